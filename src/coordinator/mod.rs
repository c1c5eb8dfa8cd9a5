use crate::prelude::*;

use crate::config::TransportKind;
use crate::script::{Interpreter, Script, Session, Settings};
use crate::sink::{self, Sink, TelemetrySink};
use crate::sma::channel::{self, Connector, TcpConnector};
use crate::telemetry::{LabelMap, RunOutput};

/// Drives one session: connect, run the command sequence, hand the output
/// to the sinks.
pub struct Coordinator {
    config: ConfigWrapper,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper) -> Self {
        Self { config }
    }

    fn connector(&self) -> Result<Box<dyn Connector + Send + Sync>> {
        let inverter = self.config.inverter();
        match inverter.transport() {
            TransportKind::Tcp => {
                let host = inverter
                    .host()
                    .ok_or_else(|| crate::file_error!("tcp transport needs inverter.host"))?;
                let port = inverter
                    .port()
                    .ok_or_else(|| crate::file_error!("tcp transport needs inverter.port"))?;
                Ok(Box::new(TcpConnector::new(host, port, inverter.use_tcp_nodelay())))
            }
            #[cfg(target_os = "linux")]
            TransportKind::Rfcomm => {
                let bdaddr = channel::parse_bt_address(inverter.address())?;
                Ok(Box::new(channel::RfcommConnector::new(
                    inverter.address(),
                    bdaddr,
                    inverter.channel(),
                )))
            }
            #[cfg(not(target_os = "linux"))]
            TransportKind::Rfcomm => bail!("rfcomm transport is only available on linux"),
        }
    }

    fn labels(&self) -> Result<Box<dyn LabelLookup + Send + Sync>> {
        let labels = match self.config.labels_file() {
            Some(path) => LabelMap::load(&path)?,
            None => {
                info!("no labels_file configured, label values are shown as indices");
                LabelMap::default()
            }
        };
        Ok(Box::new(labels))
    }

    /// Loads everything the session needs before touching the radio, so a
    /// bad script fails fast.
    pub fn prepare(&self) -> Result<(Script, KeyTable, Box<dyn LabelLookup + Send + Sync>, Session)> {
        let script = Script::load(&self.config.script_file())?;
        let keys = KeyTable::load(&self.config.keys_file())?;
        let labels = self.labels()?;

        let inverter = self.config.inverter();
        let address = channel::parse_bt_address(inverter.address())?;
        let (from, to) = self.config.date_range()?;
        info!("archive range {} to {}", from, to);
        let session = Session::new(address, inverter.password(), from, to);

        Ok((script, keys, labels, session))
    }

    pub async fn start(&self) -> Result<()> {
        let (script, keys, labels, session) = self.prepare()?;
        let mut sinks = sink::from_config(&self.config)?;

        let inverter = self.config.inverter();
        let channel = self
            .connector()?
            .connect(inverter.connect_retries(), inverter.retry_delay())
            .await?;

        let interpreter = Interpreter::new(
            Transport::new(channel),
            script,
            keys,
            labels,
            session,
            Settings::from_config(&self.config),
        );

        let (result, output, stats) = run(interpreter, &self.config.commands()).await;
        store(&mut sinks, &output);
        stats.print_summary();
        result
    }
}

/// Runs `commands` to completion, returning the outcome alongside whatever
/// was decoded before a failure.
pub async fn run<C>(
    mut interpreter: Interpreter<C>,
    commands: &[String],
) -> (Result<()>, RunOutput, SessionStats)
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let result = interpreter.run_sequence(commands).await;
    let (output, stats) = interpreter.finish();
    (result, output, stats)
}

/// A failing sink does not stop the others.
pub fn store(sinks: &mut [Sink], output: &RunOutput) {
    if output.is_empty() {
        info!("no records decoded");
        return;
    }
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.store(output) {
            error!("failed to store records: {}", e);
        }
    }
}
