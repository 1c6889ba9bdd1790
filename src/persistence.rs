//! Per-inverter state that survives restarts: pairing id and energy counters.

use crate::prelude::*;
use crate::inverter::MAX_CHANNELS;
use crate::telemetry::TOTAL;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Key→blob storage.
pub trait PreferenceStore {
    fn load(&self, key: u32) -> Result<Option<Vec<u8>>>;
    fn save(&mut self, key: u32, blob: &[u8]) -> Result<()>;
}

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1 (multiply, then xor).
pub fn fnv1_hash(input: &str) -> u32 {
    input
        .bytes()
        .fold(FNV_OFFSET_BASIS, |hash, b| hash.wrapping_mul(FNV_PRIME) ^ u32::from(b))
}

pub fn preference_key(serial: &Serial) -> u32 {
    fnv1_hash(&format!("inv_{}", serial))
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct InverterPreference {
    pub last_poll_timestamp: u32,
    pub energy_today: [f64; MAX_CHANNELS],
    pub energy_since_reset: [f64; MAX_CHANNELS],
    pub pair_id: Option<String>,
}

impl InverterPreference {
    pub fn capture(inverter: &Inverter) -> Self {
        let t = inverter.telemetry();
        let mut pref = Self {
            last_poll_timestamp: t.poll_timestamp,
            pair_id: inverter.pair_id().map(|id| id.to_string()),
            ..Default::default()
        };
        pref.energy_today.copy_from_slice(&t.energy_today[..MAX_CHANNELS]);
        pref.energy_since_reset.copy_from_slice(&t.energy_since_reset[..MAX_CHANNELS]);
        pref
    }

    /// Restore counters and timestamp; the pairing id only fills a gap.
    pub fn apply(&self, inverter: &mut Inverter) {
        let mut t = inverter.telemetry().clone();
        t.poll_timestamp = self.last_poll_timestamp;
        t.energy_today[TOTAL] = 0.0;
        t.energy_since_reset[TOTAL] = 0.0;
        for ch in 0..MAX_CHANNELS {
            t.energy_today[ch] = self.energy_today[ch];
            t.energy_since_reset[ch] = self.energy_since_reset[ch];
            t.energy_today[TOTAL] += self.energy_today[ch];
            t.energy_since_reset[TOTAL] += self.energy_since_reset[ch];
        }
        inverter.set_telemetry(t);

        if !inverter.is_paired() {
            match self.pair_id.as_deref().map(PairId::from_str) {
                Some(Ok(id)) => inverter.set_pair_id(Some(id)),
                Some(Err(err)) => {
                    warn!("ignoring stored pair id for {}: {}", inverter.serial(), err)
                }
                None => {}
            }
        }
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(blob)?)
    }
}

/// Loads and applies the stored preference for `inverter`, if any.
pub fn restore(store: &dyn PreferenceStore, inverter: &mut Inverter) -> Result<bool> {
    let Some(blob) = store.load(preference_key(&inverter.serial()))? else {
        return Ok(false);
    };
    InverterPreference::from_blob(&blob)?.apply(inverter);
    Ok(true)
}

pub fn save(store: &mut dyn PreferenceStore, inverter: &Inverter) -> Result<()> {
    let blob = InverterPreference::capture(inverter).to_blob()?;
    store.save(preference_key(&inverter.serial()), &blob)
}

// MemoryStore {{{
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<u32, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn load(&self, key: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(&key).cloned())
    }

    fn save(&mut self, key: u32, blob: &[u8]) -> Result<()> {
        self.entries.insert(key, blob.to_vec());
        Ok(())
    }
} // }}}

// JsonFileStore {{{
/// All blobs in one JSON object, keys as 8-digit hex, blobs hex-encoded.
/// The file is rewritten on every save.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|err| anyhow!("error reading {}: {}", path.display(), err))?;
            serde_json::from_str(&content)
                .map_err(|err| anyhow!("error parsing {}: {}", path.display(), err))?
        } else {
            BTreeMap::new()
        };
        info!("preference store {} holds {} entries", path.display(), entries.len());
        Ok(Self { path, entries })
    }

    fn key(key: u32) -> String {
        format!("{:08x}", key)
    }
}

impl PreferenceStore for JsonFileStore {
    fn load(&self, key: u32) -> Result<Option<Vec<u8>>> {
        self.entries
            .get(&Self::key(key))
            .map(|blob| {
                hex::decode(blob).map_err(|err| anyhow!("corrupt entry {:08x}: {}", key, err))
            })
            .transpose()
    }

    fn save(&mut self, key: u32, blob: &[u8]) -> Result<()> {
        self.entries.insert(Self::key(key), hex::encode(blob));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
} // }}}
