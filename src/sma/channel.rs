use crate::prelude::*;

use {
    async_trait::async_trait,
    net2::TcpStreamExt,
    std::time::Duration,
    tokio::io::{AsyncRead, AsyncWrite},
};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;

/// A duplex byte stream to the inverter.
pub trait Channel: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Channel for T {}

pub type BoxedChannel = Box<dyn Channel>;

// Connector {{{
#[async_trait]
pub trait Connector {
    fn describe(&self) -> String;

    async fn connect_once(&self) -> Result<BoxedChannel>;

    /// Tries up to `attempts` times, sleeping `delay` between failures.
    async fn connect(&self, attempts: u32, delay: Duration) -> Result<BoxedChannel> {
        let mut last_err = anyhow!("no connection attempts made to {}", self.describe());
        for attempt in 1..=attempts {
            info!("connecting to {} (attempt {}/{})", self.describe(), attempt, attempts);
            match self.connect_once().await {
                Ok(channel) => {
                    info!("connected to {}", self.describe());
                    return Ok(channel);
                }
                Err(e) => {
                    error!("error connecting to {}: {}", self.describe(), e);
                    last_err = e;
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err)
    }
} // }}}

// TcpConnector {{{
/// Serial-over-IP bridges that expose the RFCOMM stream on a TCP port.
pub struct TcpConnector {
    host: String,
    port: u16,
    nodelay: bool,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, nodelay: bool) -> Self {
        Self {
            host: host.to_string(),
            port,
            nodelay,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect_once(&self) -> Result<BoxedChannel> {
        let stream = match tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            tokio::net::TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => bail!("failed to connect: {}", e),
            Err(_) => bail!("connection timeout after {} seconds", CONNECT_TIMEOUT_SECS),
        };

        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::new(TCP_KEEPALIVE_SECS, 0))) {
            warn!("Failed to set TCP keepalive: {}", e);
        }
        let stream = tokio::net::TcpStream::from_std(std_stream)?;

        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        Ok(Box::new(stream))
    }
} // }}}

// RfcommConnector {{{
#[cfg(target_os = "linux")]
pub use rfcomm::RfcommConnector;

#[cfg(target_os = "linux")]
mod rfcomm {
    use super::*;

    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::unix::AsyncFd;
    use tokio::io::ReadBuf;

    const BTPROTO_RFCOMM: libc::c_int = 3;

    #[repr(C)]
    struct SockaddrRc {
        rc_family: libc::sa_family_t,
        rc_bdaddr: [u8; 6],
        rc_channel: u8,
    }

    pub struct RfcommConnector {
        address: String,
        bdaddr: [u8; 6],
        channel: u8,
    }

    impl RfcommConnector {
        /// `bdaddr` is already in wire (reversed) order.
        pub fn new(address: &str, bdaddr: [u8; 6], channel: u8) -> Self {
            Self {
                address: address.to_string(),
                bdaddr,
                channel,
            }
        }

        fn open(&self) -> io::Result<OwnedFd> {
            // SAFETY: plain socket(2); ownership moves into OwnedFd on success
            let fd = unsafe {
                libc::socket(
                    libc::AF_BLUETOOTH,
                    libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                    BTPROTO_RFCOMM,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: fd is a freshly created descriptor we own
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };

            let addr = SockaddrRc {
                rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
                rc_bdaddr: self.bdaddr,
                rc_channel: self.channel,
            };
            // SAFETY: addr is a valid sockaddr_rc for the duration of the call
            let rc = unsafe {
                libc::connect(
                    fd.as_raw_fd(),
                    (&addr as *const SockaddrRc).cast::<libc::sockaddr>(),
                    std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }

            // SAFETY: fcntl on an fd we own
            let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
            if flags < 0
                || unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0
            {
                return Err(io::Error::last_os_error());
            }

            Ok(fd)
        }
    }

    #[async_trait]
    impl Connector for RfcommConnector {
        fn describe(&self) -> String {
            format!("{} channel {}", self.address, self.channel)
        }

        async fn connect_once(&self) -> Result<BoxedChannel> {
            // connect(2) blocks until the baseband link is up
            let fd = tokio::time::timeout(
                Duration::from_secs(CONNECT_TIMEOUT_SECS * 3),
                tokio::task::spawn_blocking({
                    let connector = Self::new(&self.address, self.bdaddr, self.channel);
                    move || connector.open()
                }),
            )
            .await
            .map_err(|_| anyhow!("connection timeout after {} seconds", CONNECT_TIMEOUT_SECS * 3))???;

            Ok(Box::new(RfcommStream {
                inner: AsyncFd::new(fd)?,
            }))
        }
    }

    pub struct RfcommStream {
        inner: AsyncFd<OwnedFd>,
    }

    impl AsyncRead for RfcommStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            loop {
                let mut guard = futures::ready!(self.inner.poll_read_ready(cx))?;
                let unfilled = buf.initialize_unfilled();
                match guard.try_io(|inner| {
                    // SAFETY: unfilled is a valid writable slice of the given length
                    let n = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            unfilled.as_mut_ptr().cast::<libc::c_void>(),
                            unfilled.len(),
                        )
                    };
                    if n < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(n as usize)
                    }
                }) {
                    Ok(Ok(n)) => {
                        buf.advance(n);
                        return Poll::Ready(Ok(()));
                    }
                    Ok(Err(e)) => return Poll::Ready(Err(e)),
                    Err(_would_block) => continue,
                }
            }
        }
    }

    impl AsyncWrite for RfcommStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            loop {
                let mut guard = futures::ready!(self.inner.poll_write_ready(cx))?;
                match guard.try_io(|inner| {
                    // SAFETY: buf is a valid readable slice of the given length
                    let n = unsafe {
                        libc::write(
                            inner.as_raw_fd(),
                            buf.as_ptr().cast::<libc::c_void>(),
                            buf.len(),
                        )
                    };
                    if n < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(n as usize)
                    }
                }) {
                    Ok(result) => return Poll::Ready(result),
                    Err(_would_block) => continue,
                }
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            // SAFETY: shutdown(2) on an fd we own
            let rc = unsafe { libc::shutdown(self.inner.as_raw_fd(), libc::SHUT_RDWR) };
            if rc < 0 {
                return Poll::Ready(Err(io::Error::last_os_error()));
            }
            Poll::Ready(Ok(()))
        }
    }
} // }}}

/// Parses "AA:BB:CC:DD:EE:FF" into wire order (last octet first).
pub fn parse_bt_address(address: &str) -> Result<[u8; 6]> {
    let octets = address
        .split(':')
        .map(|part| {
            if part.len() != 2 {
                bail!("bad octet '{}' in bluetooth address {}", part, address);
            }
            u8::from_str_radix(part, 16).map_err(|e| anyhow!("bad octet '{}' in {}: {}", part, address, e))
        })
        .collect::<Result<Vec<u8>>>()?;

    let mut wire: [u8; 6] = octets
        .try_into()
        .map_err(|_| anyhow!("bluetooth address {} must have 6 octets", address))?;
    wire.reverse();
    Ok(wire)
}
