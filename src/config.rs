use crate::prelude::*;
use crate::inverter::MAX_CHANNELS;
use crate::zigbee::{decoder::Limits, transport::ResetSignal};

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use std::collections::HashSet;

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub serial_port: String,
    #[serde(default = "Config::default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub reset_line: ResetSignal,

    #[serde_as(as = "DisplayFromStr")]
    pub ecu_id: EcuAddress,

    #[serde(default)]
    pub restore: bool,
    #[serde(default = "Config::default_state_file")]
    pub state_file: String,

    #[serde(default = "Config::default_auto_pair")]
    pub auto_pair: bool,

    /// Seconds between polls of every paired inverter
    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Optional path to output telemetry in JSON format
    pub datalog_file: Option<String>,

    #[serde(default)]
    pub limits: Limits,

    #[serde(default = "Vec::new")]
    pub inverters: Vec<InverterConfig>,
}

// InverterConfig {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct InverterConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub serial: Serial,
    #[serde(rename = "type")]
    pub variant: Variant,
    pub panels: Option<Vec<bool>>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub pair_id: Option<PairId>,
}

impl InverterConfig {
    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Connected panels; every channel of the variant when not given.
    pub fn panels(&self) -> Vec<bool> {
        match &self.panels {
            Some(panels) => panels.clone(),
            None => vec![true; self.variant.channel_count()],
        }
    }

    pub fn pair_id(&self) -> Option<PairId> {
        self.pair_id
    }

    pub fn build(&self) -> Inverter {
        Inverter::new(self.serial, self.variant)
            .with_panels(&self.panels())
            .with_pair_id(self.pair_id)
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial_port.trim().is_empty() {
            bail!("serial_port must not be empty");
        }
        if self.poll_interval == 0 {
            bail!("poll_interval must be at least one second");
        }

        let mut seen = HashSet::new();
        for inverter in &self.inverters {
            if !seen.insert(inverter.serial) {
                bail!("inverter {} is configured twice", inverter.serial);
            }
            let panels = inverter.panels();
            if panels.len() > inverter.variant.channel_count() || panels.len() > MAX_CHANNELS {
                bail!(
                    "inverter {} lists {} panels, a {} has {}",
                    inverter.serial,
                    panels.len(),
                    inverter.variant,
                    inverter.variant.channel_count()
                );
            }
        }

        let l = &self.limits;
        if l.min_frequency >= l.max_frequency {
            bail!("limits: min_frequency must be below max_frequency");
        }
        if l.min_ac_voltage >= l.max_ac_voltage {
            bail!("limits: min_ac_voltage must be below max_ac_voltage");
        }
        for (name, value) in [
            ("yc600_max_power", l.yc600_max_power),
            ("qs1_max_power", l.qs1_max_power),
            ("ds3_max_power", l.ds3_max_power),
        ] {
            if value <= 0.0 {
                bail!("limits: {} must be positive", name);
            }
        }

        Ok(())
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Serial port: {} at {} baud", self.serial_port, self.baud_rate);
        info!("  Reset line: {}", self.reset_line);
        info!("  ECU id: {}", self.ecu_id);
        info!(
            "  Restore: {}",
            if self.restore { self.state_file.as_str() } else { "disabled" }
        );
        info!("  Auto pair: {}", if self.auto_pair { "enabled" } else { "disabled" });
        info!("  Poll interval: {}s", self.poll_interval);
        info!("  Datalog file: {}", self.datalog_file.as_deref().unwrap_or("none"));
        info!("  Inverters: {} configured", self.inverters.len());
        for (i, inv) in self.inverters.iter().enumerate() {
            info!(
                "    Inverter[{}]: {} {} panels {:?} pair id {}",
                i,
                inv.variant,
                inv.serial,
                inv.panels(),
                inv.pair_id.map(|id| id.to_string()).unwrap_or_else(|| "none".into())
            );
        }
    }

    fn default_baud_rate() -> u32 {
        115_200
    }

    fn default_state_file() -> String {
        "apsystems-state.json".to_string()
    }

    fn default_auto_pair() -> bool {
        true
    }

    fn default_poll_interval() -> u64 {
        300
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    pub fn serial_port(&self) -> &str {
        &self.serial_port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn reset_line(&self) -> ResetSignal {
        self.reset_line
    }

    pub fn ecu_id(&self) -> EcuAddress {
        self.ecu_id
    }

    pub fn restore(&self) -> bool {
        self.restore
    }

    pub fn state_file(&self) -> &str {
        &self.state_file
    }

    pub fn auto_pair(&self) -> bool {
        self.auto_pair
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval)
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    pub fn datalog_file(&self) -> Option<&str> {
        self.datalog_file.as_deref()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn build_inverters(&self) -> Vec<Inverter> {
        self.inverters.iter().map(InverterConfig::build).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "
serial_port: /dev/ttyUSB0
ecu_id: d8a3011b9780
inverters:
  - serial: '408000158215'
    type: qs1
    panels: [true, true, false, true]
  - serial: '408000012345'
    type: yc600
    pair_id: 103a
";

    #[test]
    fn defaults_fill_in() -> Result<()> {
        let config = Config::from_yaml(MINIMAL)?;
        assert_eq!(config.baud_rate(), 115_200);
        assert_eq!(config.reset_line(), ResetSignal::Rts);
        assert_eq!(config.ecu_id().as_str(), "D8A3011B9780");
        assert!(!config.restore());
        assert!(config.auto_pair());
        assert_eq!(config.poll_interval().as_secs(), 300);
        assert_eq!(config.state_file(), "apsystems-state.json");
        assert_eq!(config.limits(), &Limits::default());
        Ok(())
    }

    #[test]
    fn builds_inverters() -> Result<()> {
        let inverters = Config::from_yaml(MINIMAL)?.build_inverters();
        assert_eq!(inverters.len(), 2);

        assert_eq!(inverters[0].variant(), Variant::Qs1);
        assert_eq!(inverters[0].connected_channels().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert!(!inverters[0].is_paired());

        assert_eq!(inverters[1].connected_channels().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(inverters[1].pair_id().map(|id| id.to_string()).as_deref(), Some("103A"));
        Ok(())
    }

    #[test]
    fn partial_limits_keep_other_defaults() -> Result<()> {
        let config = Config::from_yaml(&format!("{}limits:\n  ds3_max_power: 900\n", MINIMAL))?;
        assert_eq!(config.limits().ds3_max_power, 900.0);
        assert_eq!(config.limits().qs1_max_power, 480.0);
        Ok(())
    }

    #[test]
    fn rejects_bad_ecu_id() {
        let yaml = MINIMAL.replace("d8a3011b9780", "d8a3011b97");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn unquoted_digit_ids_stay_text() -> Result<()> {
        let yaml = MINIMAL
            .replace("d8a3011b9780", "012345678901")
            .replace("'408000158215'", "408000158215")
            .replace("103a", "1234");
        let config = Config::from_yaml(&yaml)?;
        assert_eq!(config.ecu_id().as_str(), "012345678901");

        let inverters = config.build_inverters();
        assert_eq!(inverters[0].serial().as_str(), "408000158215");
        assert_eq!(inverters[1].pair_id().map(|id| id.to_string()).as_deref(), Some("1234"));
        Ok(())
    }

    #[test]
    fn rejects_duplicate_serials() {
        let yaml = MINIMAL.replace("408000012345", "408000158215");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn rejects_too_many_panels() {
        let yaml = MINIMAL.replace("type: qs1", "type: ds3");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("panels"));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let yaml = format!("{}poll_interval: 0\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }
}
