use crate::datalog_writer::DatalogWriter;
use crate::prelude::*;
use crate::telemetry::RunOutput;

use enum_dispatch::enum_dispatch;

/// Receives everything one run decoded.
#[enum_dispatch]
pub trait TelemetrySink {
    fn store(&mut self, run: &RunOutput) -> Result<()>;
}

#[enum_dispatch(TelemetrySink)]
pub enum Sink {
    DatalogWriter,
    ConsoleSink,
}

/// Builds the sinks the configuration asks for.
pub fn from_config(config: &ConfigWrapper) -> Result<Vec<Sink>> {
    let mut sinks: Vec<Sink> = Vec::new();
    if config.console() {
        sinks.push(ConsoleSink::new(std::io::stdout()).into());
    }
    if let Some(path) = config.datalog_file() {
        sinks.push(DatalogWriter::new(&path)?.into());
    }
    Ok(sinks)
}

// ConsoleSink {{{
pub struct ConsoleSink {
    out: Box<dyn Write + Send>,
}

impl ConsoleSink {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }
}

impl TelemetrySink for ConsoleSink {
    fn store(&mut self, run: &RunOutput) -> Result<()> {
        if !run.inverter_name.is_empty() {
            writeln!(self.out, "{} (serial {})", run.inverter_name, run.serial)?;
        }
        for record in &run.live {
            writeln!(self.out, "{}", record)?;
        }
        for record in &run.archive {
            writeln!(self.out, "{}", record)?;
        }
        self.out.flush()?;
        Ok(())
    }
} // }}}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn console_prints_every_record() {
        let buf = Shared::default();
        let mut sink: Sink = ConsoleSink::new(buf.clone()).into();

        let run = RunOutput {
            inverter_name: "SN2100".to_string(),
            serial: 2_100_123_456,
            live: vec![TelemetryRecord {
                timestamp: 0,
                description: "Max Phase 1".to_string(),
                value: TelemetryValue::Integer(2000),
                units: "W".to_string(),
                persistent: false,
                decimal_places: 0,
            }],
            archive: vec![ArchiveRecord {
                timestamp: 300,
                serial: 2_100_123_456,
                inverter_name: "SN2100".to_string(),
                accumulated_total: 1.5,
                instantaneous_value: 120.0,
            }],
        };
        sink.store(&run).unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "SN2100 (serial 2100123456)");
        assert!(lines[1].ends_with("Max Phase 1 = 2000 W"));
        assert!(lines[2].contains("total=1.500 Kwh current=120 Watts"));
    }
}
