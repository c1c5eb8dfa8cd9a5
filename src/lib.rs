pub mod config; // Configuration management
pub mod coordinator; // Session driver
pub mod datalog_writer; // JSON-lines output
pub mod error; // Fault taxonomy and error macros
pub mod options; // Command line options parsing
pub mod prelude; // Common imports and types
pub mod script; // Command script parser and interpreter
pub mod sink; // Output collaborators
pub mod sma; // Frame codec, transport and record assembly
pub mod stats; // Per-run counters
pub mod telemetry; // Return key table and record decoding
pub mod unixtime; // Unix timestamp handling

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::coordinator::Coordinator;
use crate::prelude::*;

fn init_logging(filter: &str) -> std::result::Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init()
}

/// Main application entry point
///
/// Reads options and config, then runs one session against the inverter.
/// Ctrl-C abandons the session.
pub async fn app() -> Result<()> {
    let options = Options::new();

    // logger filter comes from the config
    let config = match ConfigWrapper::new(options.config_file.clone()) {
        Ok(config) => config,
        Err(err) => {
            let _ = init_logging("info");
            error!("Failed to load config {}: {:#}", options.config_file, err);
            std::process::exit(255);
        }
    };

    if let Err(e) = init_logging(&config.loglevel()) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    info!("sma-bridge {} starting with config file: {}", CARGO_PKG_VERSION, options.config_file);

    if let Err(e) = config.apply_options(&options) {
        error!("Invalid command line options: {:#}", e);
        return Err(e);
    }

    let coordinator = Coordinator::new(config);
    tokio::select! {
        result = coordinator.start() => {
            if let Err(e) = &result {
                error!("Session failed: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning session");
            Ok(())
        }
    }
}
