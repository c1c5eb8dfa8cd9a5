use crate::prelude::*;
use crate::sink::TelemetrySink;
use crate::telemetry::RunOutput;

use serde_json::json;
use std::fs::OpenOptions;
use std::path::Path;

/// Appends one JSON object per record to a file.
pub struct DatalogWriter {
    file: std::fs::File,
    path: String,
    values_written: u64,
}

impl DatalogWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| crate::file_error_with_source!(err, "creating {}", parent.display()))?;
            }
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open datalog file {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on datalog file {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file,
            path: path.to_string(),
            values_written: 0,
        })
    }

    pub fn values_written(&self) -> u64 {
        self.values_written
    }

    fn lines(run: &RunOutput) -> Vec<serde_json::Value> {
        let live = run.live.iter().map(|r| {
            json!({
                "utc_timestamp": r.timestamp,
                "kind": "live",
                "inverter": run.inverter_name,
                "serial": run.serial,
                "description": r.description,
                "value": r.value,
                "units": r.units,
                "persistent": r.persistent,
            })
        });
        let archive = run.archive.iter().map(|r| {
            json!({
                "utc_timestamp": r.timestamp,
                "kind": "archive",
                "inverter": r.inverter_name,
                "serial": r.serial,
                "accumulated_total": r.accumulated_total,
                "instantaneous_value": r.instantaneous_value,
            })
        });
        live.chain(archive).collect()
    }
}

impl TelemetrySink for DatalogWriter {
    fn store(&mut self, run: &RunOutput) -> Result<()> {
        let lines = Self::lines(run);
        for line in &lines {
            if let Err(e) = writeln!(self.file, "{}", serde_json::to_string(line)?) {
                error!("Failed to write to datalog file {}: {}", self.path, e);
                return Err(e.into());
            }
        }
        if let Err(e) = self.file.flush() {
            error!("Failed to flush datalog file {}: {}", self.path, e);
            return Err(e.into());
        }

        self.values_written += lines.len() as u64;
        info!("Total values stored in datalog file: {}", self.values_written);
        Ok(())
    }
}
