pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::convert::TryFrom;
pub use std::io::Write;
pub use std::str::FromStr;

pub use crate::{
    config::{self, Config, ConfigWrapper},
    error::Fault,
    options::Options,
    sma::{codec, record, transport::Transport, Frame},
    stats::SessionStats,
    telemetry::{
        self, ArchiveRecord, KeyTable, LabelLookup, ReturnKeyDefinition, TelemetryRecord,
        TelemetryValue,
    },
    unixtime::UnixTime,
};
