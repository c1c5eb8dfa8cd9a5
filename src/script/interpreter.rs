use crate::prelude::*;
use crate::script::{Directive, ExtractKind, Purpose, Script, ScriptLine, Session, Token};
use crate::sma::{frame::STATUS_NO_DATA, transport::DRAIN_TIMEOUT};
use crate::telemetry::{ArchiveDecoder, Decoder, RunOutput};

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Consecutive transport failures tolerated within one directive.
pub const MAX_TRANSPORT_FAILURES: u32 = 3;
/// Pause when the inverter clock lags ours after `$TIMESTRING`.
const CLOCK_CATCHUP: Duration = Duration::from_secs(5);
const LOGOFF: &str = "logoff";

// Offsets into the last received frame
const NET_ID_OFFSET: usize = 22;
const SUSY_ID_OFFSET: usize = 24;
const MY_ADDRESS_OFFSET: usize = 26;
const LOGIN_SUSY_ID_OFFSET: usize = 33;
const LOGIN_SERIAL_OFFSET: usize = 35;
const LOGIN_DATE_OFFSET: usize = 59;
const TIMESTRING_MARKER_OFFSET: usize = 60;
const TIMESTRING_OFFSET: usize = 63;
const TIMESTRING_LEN: usize = 24;
const TIMESET_OFFSET: usize = 79;
const INVERTER_TIME_OFFSET: usize = 66;
const TOTAL_YIELD_OFFSET: usize = 67;
const TODAY_YIELD_OFFSET: usize = 83;

#[derive(Clone, Debug)]
pub struct Settings {
    pub read_timeout: Duration,
    pub retry_delay: Duration,
    /// Drain stale frames before a Send only past this script line.
    pub drain_from_line: usize,
    pub max_timestring_failures: u32,
}

impl Settings {
    pub fn from_config(config: &ConfigWrapper) -> Self {
        let inverter = config.inverter();
        Self {
            read_timeout: inverter.read_timeout(),
            retry_delay: inverter.retry_delay(),
            drain_from_line: config.drain_from_line(),
            max_timestring_failures: config.max_timestring_failures(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(10),
            drain_from_line: 22,
            max_timestring_failures: 60,
        }
    }
}

/// Runs script commands against one inverter connection.
pub struct Interpreter<C> {
    transport: Transport<C>,
    script: Script,
    keys: KeyTable,
    labels: Box<dyn LabelLookup + Send + Sync>,
    session: Session,
    settings: Settings,
    last_frame: Option<Frame>,
    timestring_failures: u32,
    output: RunOutput,
}

impl<C> Interpreter<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        transport: Transport<C>,
        script: Script,
        keys: KeyTable,
        labels: Box<dyn LabelLookup + Send + Sync>,
        session: Session,
        settings: Settings,
    ) -> Self {
        Self {
            transport,
            script,
            keys,
            labels,
            session,
            settings,
            last_frame: None,
            timestring_failures: 0,
            output: RunOutput::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> &SessionStats {
        self.transport.stats()
    }

    pub fn output(&self) -> &RunOutput {
        &self.output
    }

    /// Hands back what the run produced, stamped with the inverter identity.
    pub fn finish(mut self) -> (RunOutput, SessionStats) {
        self.output.inverter_name = self.session.inverter_name.clone();
        self.output.serial = self.session.serial;
        let stats = self.transport.stats().clone();
        (self.output, stats)
    }

    /// Runs `commands` in order. After a failure only `logoff` still runs;
    /// the first failure is returned.
    pub async fn run_sequence(&mut self, commands: &[String]) -> Result<()> {
        let mut failure: Option<anyhow::Error> = None;

        for command in commands {
            if failure.is_some() && command != LOGOFF {
                debug!("skipping {} after earlier failure", command);
                continue;
            }

            if let Err(e) = self.run_command(command).await {
                error!("Command {} failed: {:#}", command, e);
                self.transport.stats_mut().commands_failed += 1;
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs one labelled block. Returns false if the script has no such label.
    pub async fn run_command(&mut self, name: &str) -> Result<bool> {
        let lines = match self.script.block(name) {
            Some(block) => block.lines.clone(),
            None => {
                warn!("Command {} not found in script", name);
                self.transport.stats_mut().commands_missing += 1;
                return Ok(false);
            }
        };

        info!("Command: {}", name);
        self.session.report_time = UnixTime::now();
        self.timestring_failures = 0;

        for ScriptLine { number, directive } in &lines {
            match directive {
                Directive::Send(tokens) => self.send(*number, tokens).await?,
                Directive::Receive(tokens) => self.receive(*number, tokens).await?,
                Directive::Extract(kinds) => self.extract(*number, kinds).await?,
            }
        }

        self.transport.stats_mut().commands_run += 1;
        Ok(true)
    }

    async fn send(&mut self, line: usize, tokens: &[Token]) -> Result<()> {
        if line > self.settings.drain_from_line {
            let drained = self.transport.drain_pending(DRAIN_TIMEOUT).await;
            if drained > 0 {
                debug!("[{}] discarded {} stale frames", line, drained);
            }
        }

        let body = self.session.encode(tokens, Purpose::Send, line)?;
        debug!("[{}] sending", line);
        self.transport.send_frame(&body).await
    }

    async fn receive(&mut self, line: usize, tokens: &[Token]) -> Result<()> {
        let pattern = self.session.encode(tokens, Purpose::Receive, line)?;
        debug!("[{}] waiting for {}", line, codec::hex(&pattern));

        let mut failures = 0;
        loop {
            match self.transport.read_frame(self.settings.read_timeout).await {
                Ok(frame) => {
                    failures = 0;
                    let matched = matches_pattern(&frame, &pattern);
                    debug!("[{}] received {}", line, codec::hex(frame.as_bytes()));
                    self.last_frame = Some(frame);
                    if matched {
                        debug!("[{}] found what we were waiting for", line);
                        return Ok(());
                    }
                }
                Err(e) if Fault::is_transport(&e) => {
                    failures += 1;
                    warn!("[{}] read failed ({}/{}): {}", line, failures, MAX_TRANSPORT_FAILURES, e);
                    if failures > MAX_TRANSPORT_FAILURES {
                        return Err(e.context(format!(
                            "line {}: giving up after {} transport failures",
                            line, failures
                        )));
                    }
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn extract(&mut self, line: usize, kinds: &[ExtractKind]) -> Result<()> {
        let status = self.last_frame.as_ref().and_then(Frame::status);
        if status == Some(STATUS_NO_DATA) {
            debug!("[{}] no data for this request, draining", line);
            self.transport.drain_pending(DRAIN_TIMEOUT).await;
            return Ok(());
        }

        debug!("[{}] extracting", line);
        for kind in kinds {
            let Some(frame) = self.last_frame.clone() else {
                warn!("[{}] nothing received to extract {:?} from", line, kind);
                return Ok(());
            };
            self.extract_one(line, *kind, frame).await?;
        }
        Ok(())
    }

    async fn extract_one(&mut self, line: usize, kind: ExtractKind, frame: Frame) -> Result<()> {
        match kind {
            ExtractKind::Login => {
                let susy_id = frame.slice(LOGIN_SUSY_ID_OFFSET, 2)?;
                self.session.susy_id = [susy_id[0], susy_id[1]];
                self.session.serial = frame.le_u32(LOGIN_SERIAL_OFFSET)?;
                let date = frame.le_u32(LOGIN_DATE_OFFSET)?;
                info!(
                    "serial={} susy_id={} inverter date {}",
                    self.session.serial,
                    codec::hex(&self.session.susy_id),
                    UnixTime(i64::from(date))
                );
            }
            ExtractKind::Add2 => {
                let address = frame.slice(MY_ADDRESS_OFFSET, 6)?;
                self.session.my_address.copy_from_slice(address);
                debug!("my address {}", codec::hex(address));
            }
            ExtractKind::SusyId => {
                let susy_id = frame.slice(SUSY_ID_OFFSET, 2)?;
                self.session.susy_id = [susy_id[0], susy_id[1]];
                debug!("susy_id {}", codec::hex(susy_id));
            }
            ExtractKind::InvCode => {
                self.session.net_id = frame.byte(NET_ID_OFFSET)?;
                debug!("net id {:02x}", self.session.net_id);
            }
            ExtractKind::Signal => {
                let strength = f64::from(frame.byte(NET_ID_OFFSET)?) * 100.0 / 255.0;
                info!("bluetooth signal = {:.0}%", strength);
                self.push_live(TelemetryRecord {
                    timestamp: self.session.report_time.timestamp(),
                    description: "Bluetooth Signal".to_string(),
                    value: TelemetryValue::Number(strength),
                    units: "%".to_string(),
                    persistent: false,
                    decimal_places: 0,
                });
            }
            ExtractKind::InverterTime => {
                let time = frame.le_u32(INVERTER_TIME_OFFSET)?;
                info!("inverter time {}", UnixTime(i64::from(time)));
            }
            ExtractKind::DailyTotal => {
                let total = telemetry::decoder::le_value(frame.slice(TOTAL_YIELD_OFFSET, 3)?) as f64 / 1000.0;
                let today = telemetry::decoder::le_value(frame.slice(TODAY_YIELD_OFFSET, 2)?) as f64 / 1000.0;
                info!("total so far = {:.2} kWh, today = {:.2} kWh", total, today);
                let timestamp = self.session.report_time.timestamp();
                for (description, value) in [("Total Yield", total), ("Today Yield", today)] {
                    self.push_live(TelemetryRecord {
                        timestamp,
                        description: description.to_string(),
                        value: TelemetryValue::Number(value),
                        units: "kWh".to_string(),
                        persistent: false,
                        decimal_places: 3,
                    });
                }
            }
            ExtractKind::TimeString => self.extract_timestring(line, &frame).await?,
            ExtractKind::Power | ExtractKind::InverterData => {
                let Some(record) = self.read_record(line, frame).await else {
                    return Ok(());
                };
                let outcome = Decoder::new(&self.keys, &*self.labels).decode_spot(&record.data);
                self.transport.stats_mut().unknown_keys += outcome.unknown_keys.len() as u64;
                for r in outcome.records {
                    self.push_live(r);
                }
            }
            ExtractKind::Data => {
                let Some(record) = self.read_record(line, frame).await else {
                    return Ok(());
                };
                let outcome = Decoder::new(&self.keys, &*self.labels).decode_data(&record.data);
                self.transport.stats_mut().unknown_keys += outcome.unknown_keys.len() as u64;
                if let Some(name) = outcome.inverter_name {
                    info!("inverter name {}", name);
                    self.session.inverter_name = name;
                }
                for r in outcome.records {
                    self.push_live(r);
                }
            }
            ExtractKind::TestData => {
                if let Some(record) = self.read_record(line, frame).await {
                    debug!("[{}] test data {}", line, codec::hex(&record.data));
                }
            }
            ExtractKind::Archive => self.extract_archive(line, frame).await?,
        }
        Ok(())
    }

    async fn extract_timestring(&mut self, line: usize, frame: &Frame) -> Result<()> {
        let marker = frame.slice(TIMESTRING_MARKER_OFFSET, 2).ok().map(|m| [m[0], m[1]]);
        let timestr = frame.slice(TIMESTRING_OFFSET, TIMESTRING_LEN).ok();

        match (marker, timestr) {
            (Some([0x6d, 0x23]), Some(timestr)) => {
                self.session.timestr[..TIMESTRING_LEN].copy_from_slice(timestr);
                let timeset = TIMESET_OFFSET - TIMESTRING_OFFSET;
                self.session.timeset.copy_from_slice(&timestr[timeset..timeset + 4]);
                debug!("[{}] time string {}", line, codec::hex(timestr));

                let inverter_time = i64::from(u32::from_le_bytes([timestr[0], timestr[1], timestr[2], timestr[3]]));
                if self.session.report_time.timestamp() > inverter_time {
                    debug!(
                        "inverter clock {}s behind, waiting",
                        self.session.report_time.timestamp() - inverter_time
                    );
                    tokio::time::sleep(CLOCK_CATCHUP).await;
                }
                return Ok(());
            }
            (Some([_, 0x7e]), _) => warn!("[{}] $TIMESTRING extraction failed, check password", line),
            (Some(marker), Some(timestr)) => {
                self.session.timestr[..TIMESTRING_LEN].copy_from_slice(timestr);
                debug!("[{}] unexpected time string marker {}", line, codec::hex(&marker));
            }
            _ => warn!("[{}] {} byte reply too short for $TIMESTRING", line, frame.len()),
        }

        self.timestring_failures += 1;
        self.transport.stats_mut().timestring_failures += 1;
        if self.timestring_failures > self.settings.max_timestring_failures {
            bail!(
                "line {}: $TIMESTRING failed {} times",
                line,
                self.timestring_failures
            );
        }
        Ok(())
    }

    async fn extract_archive(&mut self, line: usize, first: Frame) -> Result<()> {
        let mut decoder = ArchiveDecoder::new(self.session.serial, &self.session.inverter_name);
        let mut frame = first;

        loop {
            let Some(record) = self.read_record(line, frame).await else {
                break;
            };

            let (samples, faults) = decoder.decode(&record.data);
            self.transport.stats_mut().sequence_faults += faults.len() as u64;
            self.transport.stats_mut().archive_records += samples.len() as u64;
            self.output.archive.extend(samples);

            if record.togo == 0 {
                break;
            }

            frame = self.read_with_retry(line).await?;
        }

        if decoder.pending_bytes() > 0 {
            warn!("[{}] {} trailing archive bytes ignored", line, decoder.pending_bytes());
        }
        Ok(())
    }

    async fn read_with_retry(&mut self, line: usize) -> Result<Frame> {
        let mut failures = 0;
        loop {
            match self.transport.read_frame(self.settings.read_timeout).await {
                Ok(frame) => return Ok(frame),
                Err(e) if Fault::is_transport(&e) => {
                    failures += 1;
                    warn!("[{}] read failed ({}/{}): {}", line, failures, MAX_TRANSPORT_FAILURES, e);
                    if failures > MAX_TRANSPORT_FAILURES {
                        return Err(e.context(format!(
                            "line {}: giving up after {} transport failures",
                            line, failures
                        )));
                    }
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads the record starting at `first`. Failures degrade to no record.
    async fn read_record(&mut self, line: usize, first: Frame) -> Option<record::Record> {
        match record::read_record(&mut self.transport, first, self.settings.read_timeout).await {
            Ok((record, last)) => {
                self.last_frame = Some(last);
                Some(record)
            }
            Err(e) => {
                warn!("[{}] record read failed: {}", line, e);
                None
            }
        }
    }

    fn push_live(&mut self, record: TelemetryRecord) {
        info!("{}", record);
        self.transport.stats_mut().live_records += 1;
        self.output.live.push(record);
    }
}

/// Compares everything after the header; a short frame never matches.
fn matches_pattern(frame: &Frame, pattern: &[u8]) -> bool {
    let received = frame.as_bytes();
    if pattern.len() <= HEADER_OFFSET {
        return true;
    }
    received.len() >= pattern.len() && received[HEADER_OFFSET..pattern.len()] == pattern[HEADER_OFFSET..]
}

const HEADER_OFFSET: usize = codec::HEADER_LEN;
