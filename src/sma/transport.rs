use crate::prelude::*;
use crate::sma::frame::FrameCodec;

use {
    bytes::BytesMut,
    std::time::Duration,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    tokio::time::{timeout, Instant},
    tokio_util::codec::Decoder,
};

const MAX_BUFFER_SIZE: usize = 4096;
const WRITE_TIMEOUT_SECS: u64 = 5;

/// Housekeeping wait used when flushing stale replies.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Frame-level access to one inverter channel.
pub struct Transport<C> {
    channel: C,
    buf: BytesMut,
    decoder: FrameCodec,
    last_sent: Vec<u8>,
    stats: SessionStats,
}

impl<C> Transport<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            buf: BytesMut::with_capacity(MAX_BUFFER_SIZE),
            decoder: FrameCodec::new(),
            last_sent: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    /// Waits up to `wait` for one complete frame.
    pub async fn read_frame(&mut self, wait: Duration) -> Result<Frame> {
        let result = self.read_frame_inner(wait).await;
        match &result {
            Ok(frame) => {
                self.stats.frames_received += 1;
                debug!("RX {}", codec::hex(frame.as_bytes()));
                if !self.last_sent.is_empty() && frame.raw() == self.last_sent.as_slice() {
                    self.stats.echo_faults += 1;
                    warn!("{}", Fault::Echo);
                }
            }
            Err(e) => match e.downcast_ref::<Fault>() {
                Some(Fault::Timeout(_)) => self.stats.timeouts += 1,
                Some(Fault::Checksum { .. }) | Some(Fault::Header(_)) | Some(Fault::Framing(_)) => {
                    self.stats.checksum_faults += 1
                }
                _ => {}
            },
        }
        result
    }

    async fn read_frame_inner(&mut self, wait: Duration) -> Result<Frame> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(raw) = self.decoder.decode(&mut self.buf)? {
                return Frame::decode(raw);
            }

            if self.buf.len() >= MAX_BUFFER_SIZE {
                bail!("Buffer overflow: received data exceeds maximum size of {} bytes", MAX_BUFFER_SIZE);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let len = match timeout(remaining, self.channel.read_buf(&mut self.buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => bail!("Read error: {}", e),
                Err(_) => return Err(Fault::Timeout(wait).into()),
            };

            if len == 0 {
                return Err(Fault::ConnectionClosed.into());
            }
        }
    }

    /// Reads and discards frames until one wait of `wait` passes quietly.
    pub async fn drain_pending(&mut self, wait: Duration) -> usize {
        let mut drained = 0;
        loop {
            match self.read_frame(wait).await {
                Ok(frame) => {
                    debug!("drained {} byte frame", frame.len());
                    drained += 1;
                }
                Err(e) => {
                    if !Fault::is_timeout(&e) {
                        debug!("drain stopped: {}", e);
                    }
                    return drained;
                }
            }
        }
    }

    /// Writes an already escaped frame verbatim.
    pub async fn send_frame(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("TX {}", codec::hex(bytes));

        match timeout(Duration::from_secs(WRITE_TIMEOUT_SECS), self.channel.write_all(bytes)).await {
            Ok(Ok(_)) => {
                if let Err(e) = self.channel.flush().await {
                    bail!("Failed to flush channel: {}", e);
                }
            }
            Ok(Err(e)) => bail!("Failed to write frame: {}", e),
            Err(_) => bail!("Write timeout after {} seconds", WRITE_TIMEOUT_SECS),
        }

        self.last_sent = bytes.to_vec();
        self.stats.frames_sent += 1;
        Ok(())
    }
}
