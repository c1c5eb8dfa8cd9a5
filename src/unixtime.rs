use crate::prelude::*;

use chrono::{DateTime, Datelike, Local, NaiveDateTime, Offset, TimeZone, Timelike};
use serde::Serialize;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const ONE_DAY: i64 = 86_400;

/// Seconds since the epoch, as the inverter counts them.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct UnixTime(pub i64);

impl UnixTime {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    /// Local midnight today.
    pub fn start_of_today() -> Self {
        let now = Local::now();
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|t| Local.from_local_datetime(&t).earliest());
        match midnight {
            Some(t) => Self(t.timestamp()),
            None => Self(now.timestamp() - i64::from(now.num_seconds_from_midnight())),
        }
    }

    /// Now, truncated to the minute.
    pub fn now_to_minute() -> Self {
        let now = Self::now().0;
        Self(now - now.rem_euclid(60))
    }

    /// Parses a local `YYYY-MM-DD HH:MM:SS` time.
    pub fn parse_local(input: &str) -> Result<Self> {
        let naive = NaiveDateTime::parse_from_str(input.trim(), DATE_FORMAT)
            .map_err(|e| anyhow!("invalid date '{}': {}", input, e))?;
        let local = Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| anyhow!("date '{}' does not exist in the local timezone", input))?;
        Ok(Self(local.timestamp()))
    }

    pub fn offset(self, seconds: i64) -> Self {
        Self(self.0 + seconds)
    }

    pub fn timestamp(self) -> i64 {
        self.0
    }

    /// Low 32 bits, little-endian, as carried in time tokens.
    pub fn to_le_bytes(self) -> [u8; 4] {
        (self.0 as u32).to_le_bytes()
    }
}

impl std::fmt::Display for UnixTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", telemetry::local_time(self.0))
    }
}

impl FromStr for UnixTime {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::parse_local(input)
    }
}

fn offset_on(year: i32, month: u32) -> Option<i32> {
    Local
        .with_ymd_and_hms(year, month, 1, 12, 0, 0)
        .earliest()
        .map(|t| t.offset().fix().local_minus_utc())
}

/// UTC offset without daylight saving, in seconds.
pub fn standard_offset_seconds(at: DateTime<Local>) -> i32 {
    let current = at.offset().fix().local_minus_utc();
    let standard = match (offset_on(at.year(), 1), offset_on(at.year(), 7)) {
        (Some(jan), Some(jul)) => jan.min(jul),
        _ => current,
    };
    if current != standard {
        debug!("daylight saving in effect, offset {} standard {}", current, standard);
    }
    standard
}

/// `$TIMEZONE` bytes: standard offset + 1, wrapped into 16 bits.
pub fn timezone_bytes(offset_seconds: i32) -> [u8; 2] {
    (offset_seconds.wrapping_add(1) as u16).to_le_bytes()
}

pub fn local_timezone_bytes() -> [u8; 2] {
    timezone_bytes(standard_offset_seconds(Local::now()))
}
