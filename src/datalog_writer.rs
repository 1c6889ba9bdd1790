use crate::prelude::*;
use crate::telemetry::{Publication, TelemetrySink};

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Serialize)]
struct Record<'a> {
    utc_timestamp: i64,
    #[serde(flatten)]
    publication: &'a Publication,
}

/// Appends one JSON line per publication.
#[derive(Debug, Clone)]
pub struct DatalogWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    records_written: Arc<Mutex<u64>>,
}

impl DatalogWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| anyhow!("failed to open datalog file {}: {}", path, err))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
                .map_err(|err| anyhow!("failed to set permissions on {}: {}", path, err))?;
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            records_written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn write(&self, publication: &Publication) -> Result<()> {
        let record = Record {
            utc_timestamp: chrono::Utc::now().timestamp(),
            publication,
        };
        let line = serde_json::to_string(&record)?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Failed to lock datalog file"))?;
        writeln!(file, "{}", line)
            .map_err(|err| anyhow!("failed to write {}: {}", self.path, err))?;
        file.flush()?;

        let mut written = self
            .records_written
            .lock()
            .map_err(|_| anyhow!("Failed to lock record counter"))?;
        *written += 1;
        debug!("{} records in datalog file {}", *written, self.path);

        Ok(())
    }
}

impl TelemetrySink for DatalogWriter {
    fn publish(&mut self, publication: &Publication) -> Result<()> {
        self.write(publication)
    }
}
