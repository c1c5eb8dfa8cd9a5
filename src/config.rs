use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_COMMANDS: [&str; 16] = [
    "init",
    "login",
    "typelabel",
    "startuptime",
    "getacvoltage",
    "getenergyproduction",
    "getspotdcpower",
    "getspotdcvoltage",
    "getspotacpower",
    "getgridfreq",
    "maxACPower",
    "maxACPowerTotal",
    "ACPowerTotal",
    "DeviceStatus",
    "getrangedata",
    "logoff",
];

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverter: Inverter,

    #[serde(default = "Config::default_script_file")]
    pub script_file: String,
    /// Read return keys from here instead of the script file
    pub keys_file: Option<String>,
    pub labels_file: Option<String>,

    /// Optional path to output telemetry in JSON lines format
    pub datalog_file: Option<String>,
    #[serde(default = "Config::default_console")]
    pub console: bool,

    pub date_from: Option<String>,
    pub date_to: Option<String>,

    #[serde(default = "Config::default_commands")]
    pub commands: Vec<String>,

    #[serde(default = "Config::default_drain_from_line")]
    pub drain_from_line: usize,
    #[serde(default = "Config::default_max_timestring_failures")]
    pub max_timestring_failures: u32,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Rfcomm,
    Tcp,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    /// Bluetooth address, AA:BB:CC:DD:EE:FF
    pub address: String,

    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "Config::default_channel")]
    pub channel: u8,
    pub host: Option<String>,
    pub port: Option<u16>,

    #[serde(default = "Config::default_password")]
    pub password: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_read_timeout")]
    pub read_timeout: Duration,
    #[serde(default = "Config::default_connect_retries")]
    pub connect_retries: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_retry_delay")]
    pub retry_delay: Duration,

    pub use_tcp_nodelay: Option<bool>,
}

impl Inverter {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn connect_retries(&self) -> u32 {
        self.connect_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn use_tcp_nodelay(&self) -> bool {
        self.use_tcp_nodelay.unwrap_or(true)
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        // a poisoned lock still holds a valid Config
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn inverter(&self) -> Inverter {
        self.lock().inverter.clone()
    }

    pub fn script_file(&self) -> String {
        self.lock().script_file.clone()
    }

    /// Key table source: `keys_file`, falling back to the script itself.
    pub fn keys_file(&self) -> String {
        let config = self.lock();
        config.keys_file.clone().unwrap_or_else(|| config.script_file.clone())
    }

    pub fn labels_file(&self) -> Option<String> {
        self.lock().labels_file.clone()
    }

    pub fn datalog_file(&self) -> Option<String> {
        self.lock().datalog_file.clone()
    }

    pub fn console(&self) -> bool {
        self.lock().console
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn drain_from_line(&self) -> usize {
        self.lock().drain_from_line
    }

    pub fn max_timestring_failures(&self) -> u32 {
        self.lock().max_timestring_failures
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }

    /// The archive window; local midnight to now when not configured.
    pub fn date_range(&self) -> Result<(UnixTime, UnixTime)> {
        self.lock().date_range()
    }

    /// Applies command line overrides on top of the file values.
    pub fn apply_options(&self, options: &Options) -> Result<()> {
        let mut guard = self.lock();
        let mut config = guard.clone();
        if let Some(script) = &options.script_file {
            info!("Script file overridden from command line: {}", script);
            config.script_file = script.clone();
        }
        if let Some(from) = &options.date_from {
            config.date_from = Some(from.clone());
        }
        if let Some(to) = &options.date_to {
            config.date_to = Some(to.clone());
        }
        config.validate()?;

        *guard = config;
        Ok(())
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| crate::file_error_with_source!(err, "error reading {}", file))?;

        let config: Self = serde_yaml::from_str(&content)?;

        info!("Configuration loaded successfully:");
        info!("  Inverter:");
        info!("    Address: {}", config.inverter.address);
        info!("    Transport: {:?}", config.inverter.transport);
        match config.inverter.transport {
            TransportKind::Rfcomm => info!("    Channel: {}", config.inverter.channel),
            TransportKind::Tcp => {
                info!("    Host: {}", config.inverter.host.as_deref().unwrap_or_default());
                info!("    Port: {}", config.inverter.port.unwrap_or_default());
                info!("    TCP NoDelay: {}", config.inverter.use_tcp_nodelay.unwrap_or(true));
            }
        }
        info!("    Read Timeout: {}s", config.inverter.read_timeout.as_secs());
        info!("    Connect Retries: {}", config.inverter.connect_retries);
        info!("    Retry Delay: {}s", config.inverter.retry_delay.as_secs());
        info!("  Script: {}", config.script_file);
        info!("  Keys: {}", config.keys_file.as_deref().unwrap_or(&config.script_file));
        info!("  Labels: {}", config.labels_file.as_deref().unwrap_or("none"));
        info!("  Datalog: {}", config.datalog_file.as_deref().unwrap_or("disabled"));
        info!("  Console: {}", if config.console { "enabled" } else { "disabled" });
        info!(
            "  Date Range: {} to {}",
            config.date_from.as_deref().unwrap_or("today"),
            config.date_to.as_deref().unwrap_or("now")
        );
        info!("  Commands: {}", config.commands.join(", "));
        info!("  Log Level: {}", config.loglevel);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        crate::sma::channel::parse_bt_address(&self.inverter.address)
            .map_err(|e| anyhow!("inverter.address: {}", e))?;

        if self.inverter.read_timeout.is_zero() {
            bail!("inverter.read_timeout must be greater than 0");
        }
        if self.inverter.connect_retries == 0 {
            bail!("inverter.connect_retries must be greater than 0");
        }
        if self.inverter.password.len() > 12 {
            bail!("inverter.password is longer than 12 characters");
        }

        if self.inverter.transport == TransportKind::Tcp {
            if self.inverter.host.as_deref().map_or(true, str::is_empty) {
                bail!("inverter.host is required for tcp transport");
            }
            if self.inverter.port.unwrap_or(0) == 0 {
                bail!("inverter.port must be between 1 and 65535");
            }
        }

        if self.commands.is_empty() {
            bail!("commands cannot be empty");
        }
        if self.script_file.is_empty() {
            bail!("script_file cannot be empty");
        }

        let (from, to) = self.date_range()?;
        if from > to {
            bail!("date_from {} is after date_to {}", from, to);
        }

        Ok(())
    }

    pub fn date_range(&self) -> Result<(UnixTime, UnixTime)> {
        let from = match &self.date_from {
            Some(s) => UnixTime::parse_local(s)?,
            None => UnixTime::start_of_today(),
        };
        let to = match &self.date_to {
            Some(s) => UnixTime::parse_local(s)?,
            None => UnixTime::now_to_minute(),
        };
        Ok((from, to))
    }

    fn default_script_file() -> String {
        "sma.in".to_string()
    }

    fn default_console() -> bool {
        true
    }

    fn default_commands() -> Vec<String> {
        DEFAULT_COMMANDS.iter().map(|c| c.to_string()).collect()
    }

    fn default_drain_from_line() -> usize {
        22
    }

    fn default_max_timestring_failures() -> u32 {
        60
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_channel() -> u8 {
        1
    }

    fn default_password() -> String {
        "0000".to_string()
    }

    fn default_read_timeout() -> Duration {
        Duration::from_secs(30)
    }

    fn default_connect_retries() -> u32 {
        10
    }

    fn default_retry_delay() -> Duration {
        Duration::from_secs(10)
    }
}
