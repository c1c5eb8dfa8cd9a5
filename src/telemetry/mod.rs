pub mod decoder;
pub mod keys;
pub mod labels;

pub use decoder::{ArchiveDecoder, DecodeOutcome, Decoder};
pub use keys::{KeyTable, ReturnKeyDefinition, ValueFormat};
pub use labels::{LabelLookup, LabelMap};

use chrono::TimeZone;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Number(f64),
    Integer(i64),
    Text(String),
}

impl TelemetryValue {
    pub fn format(&self, decimal_places: u8) -> String {
        match self {
            Self::Number(n) => format!("{:.*}", decimal_places as usize, n),
            Self::Integer(i) => i.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

// TelemetryRecord {{{
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: i64,
    pub description: String,
    pub value: TelemetryValue,
    pub units: String,
    /// Write even when unchanged since the last observation.
    pub persistent: bool,
    #[serde(skip)]
    pub decimal_places: u8,
}

impl TelemetryRecord {
    pub fn formatted_value(&self) -> String {
        self.value.format(self.decimal_places)
    }
}

impl std::fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:>30} = {} {}",
            local_time(self.timestamp),
            self.description,
            self.formatted_value(),
            self.units
        )
    }
} // }}}

// ArchiveRecord {{{
/// One 5-minute sample from the inverter's internal log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArchiveRecord {
    pub timestamp: i64,
    pub serial: u32,
    pub inverter_name: String,
    /// kWh
    pub accumulated_total: f64,
    /// W, averaged over the interval
    pub instantaneous_value: f64,
}

impl std::fmt::Display for ArchiveRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}  total={:.3} Kwh current={:.0} Watts",
            local_time(self.timestamp),
            self.accumulated_total,
            self.instantaneous_value
        )
    }
} // }}}

/// Everything one run produced, handed to the sinks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunOutput {
    pub inverter_name: String,
    pub serial: u32,
    pub live: Vec<TelemetryRecord>,
    pub archive: Vec<ArchiveRecord>,
}

impl RunOutput {
    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.archive.is_empty()
    }
}

pub fn local_time(timestamp: i64) -> String {
    match chrono::Local.timestamp_opt(timestamp, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("@{}", timestamp),
    }
}
