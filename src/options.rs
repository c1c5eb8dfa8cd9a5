use clap::Parser;

/// SMA Bridge - read telemetry from SMA inverters over Bluetooth
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Command script, overrides script_file
    #[clap(short = 's', long = "script")]
    pub script_file: Option<String>,

    /// Start of the archive range, "YYYY-MM-DD HH:MM:SS"
    #[clap(long = "from")]
    pub date_from: Option<String>,

    /// End of the archive range, "YYYY-MM-DD HH:MM:SS"
    #[clap(long = "to")]
    pub date_to: Option<String>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
