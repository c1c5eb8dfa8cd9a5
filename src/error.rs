use std::time::Duration;

/// Faults raised by the protocol layers.
///
/// Everything travels as `anyhow::Error`; callers that need to tell a
/// retryable transport fault from a fatal one downcast with
/// [`Fault::is_transport`].
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    #[error("no frame received within {0:?}")]
    Timeout(Duration),

    #[error("checkbit mismatch in header {header:02x?}")]
    Checksum { header: [u8; 4] },

    #[error("bad frame header: {0}")]
    Header(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("archive sample at {current} does not follow {previous} by 300s")]
    Sequence { previous: u32, current: u32 },

    #[error("no data for key {key1:02x} {key2:02x}")]
    UnknownKey { key1: u8, key2: u8 },

    #[error("received what we sent, channel is echoing writes")]
    Echo,

    #[error("record exceeds {0} bytes")]
    RecordOverflow(usize),

    #[error("connection closed by peer")]
    ConnectionClosed,
}

impl Fault {
    pub fn parse(line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            line,
            reason: reason.into(),
        }
    }

    /// True for faults that count towards the per-command retry ceiling.
    pub fn is_transport(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<Fault>(),
            Some(
                Fault::Timeout(_)
                    | Fault::Checksum { .. }
                    | Fault::Header(_)
                    | Fault::Framing(_)
                    | Fault::ConnectionClosed
            )
        )
    }

    pub fn is_timeout(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Fault>(), Some(Fault::Timeout(_)))
    }
}

/// Creates an anyhow error with the current file and line number
#[macro_export]
macro_rules! file_error {
    ($($arg:tt)*) => {
        anyhow!(
            "[{}:{}] {}",
            std::path::Path::new(file!()).file_name().map(|f| f.to_string_lossy()).unwrap_or_default(),
            line!(),
            format!($($arg)*)
        )
    };
}

/// Creates an anyhow error with the current file and line number, and includes a source error
#[macro_export]
macro_rules! file_error_with_source {
    ($source:expr, $($arg:tt)*) => {
        anyhow!(
            "[{}:{}] {}: {}",
            std::path::Path::new(file!()).file_name().map(|f| f.to_string_lossy()).unwrap_or_default(),
            line!(),
            format!($($arg)*),
            $source
        )
    };
}
