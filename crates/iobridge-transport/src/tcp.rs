use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{IoStream, Transport};

/// Port the WiFi binding listens on when no explicit address is configured.
pub const DEFAULT_PORT: u16 = 17725;

/// Plain-text query a host sends over the serial side to discover the
/// server's network address.
pub const IP_QUERY: &str = "whatisyourip";

/// How long a send may wait on a full socket buffer before the client is
/// given up on.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

const SEND_RETRY: Duration = Duration::from_millis(1);

const LINK_CONNECTED: u8 = 3;
const LINK_DISCONNECTED: u8 = 6;

/// Side channel the address query arrives on, usually the serial console.
///
/// Reads must not block; `WouldBlock` and `Ok(0)` both mean "nothing yet".
pub trait Console: Read + Write + Send {}

impl<T: Read + Write + Send> Console for T {}

/// TCP transport used for the WiFi binding.
///
/// The listener is non-blocking. One client is accepted lazily from `recv`;
/// when it disconnects the transport goes back to waiting for the next one.
/// While nobody is connected, `recv` also answers [`IP_QUERY`] on the
/// console, if one is attached.
pub struct TcpTransport {
    listener: Option<TcpListener>,
    client: Option<TcpStream>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    send_timeout: Duration,
    console: Option<Box<dyn Console>>,
    console_buf: Vec<u8>,
}

impl TcpTransport {
    /// Create a transport that will listen on `addr` once opened.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            listener: None,
            client: None,
            bind_addr: addr.into(),
            local_addr: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            console: None,
            console_buf: Vec::new(),
        }
    }

    /// Create and open a transport in one step.
    pub fn bind(addr: impl Into<String>) -> Result<Self> {
        let mut transport = Self::new(addr);
        transport.open()?;
        Ok(transport)
    }

    /// Drop a client that has not drained its socket within `timeout`.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Answer address queries arriving on `console`.
    pub fn with_console(mut self, console: impl Console + 'static) -> Self {
        self.console = Some(Box::new(console));
        self
    }

    /// Connect to a listening IO server (blocking).
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<IoStream> {
        let stream = TcpStream::connect(&addr).map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to io server");
        Ok(IoStream::from_tcp(stream))
    }

    /// The address the listener is bound to, once opened.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether a client is currently attached.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn poll_accept(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let Some(listener) = self.listener.as_ref() else {
            return Err(TransportError::Closed);
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                info!(%peer, "client connected");
                self.client = Some(stream);
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(()),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    fn poll_console(&mut self) {
        let Some(console) = self.console.as_mut() else {
            return;
        };
        let mut chunk = [0u8; 32];
        let n = match console.read(&mut chunk) {
            Ok(n) => n,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
                ) =>
            {
                return;
            }
            Err(err) => {
                warn!(error = %err, "console read failed");
                return;
            }
        };
        self.console_buf.extend_from_slice(&chunk[..n]);

        let query = IP_QUERY.as_bytes();
        match self.console_buf.windows(query.len()).position(|w| w == query) {
            Some(pos) => {
                self.console_buf.drain(..pos + query.len());
                let reply = ip_query_reply(self.local_addr);
                debug!(reply = %reply, "answering address query");
                if let Err(err) = console.write_all(reply.as_bytes()).and_then(|()| console.flush())
                {
                    warn!(error = %err, "console write failed");
                }
            }
            None => {
                let keep = query.len() - 1;
                if self.console_buf.len() > keep {
                    self.console_buf.drain(..self.console_buf.len() - keep);
                }
            }
        }
    }

    fn drop_client(&mut self, reason: &str) {
        if self.client.take().is_some() {
            info!(reason, "client disconnected");
        }
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(&self.bind_addr).map_err(|e| TransportError::Bind {
            addr: self.bind_addr.clone(),
            source: e,
        })?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        info!(addr = %local, "listening for tcp clients");
        self.local_addr = Some(local);
        self.listener = Some(listener);
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        let deadline = Instant::now() + self.send_timeout;
        let Some(client) = self.client.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        // Once the client is gone the caller only sees NotConnected, never
        // the socket error, so a lost peer cannot stop the service loop.
        loop {
            match client.write(buf) {
                Ok(0) if !buf.is_empty() => {
                    self.drop_client("write returned zero");
                    return Err(TransportError::NotConnected);
                }
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        warn!(
                            timeout_ms = self.send_timeout.as_millis() as u64,
                            "tcp send stalled"
                        );
                        self.drop_client("send timed out");
                        return Err(TransportError::NotConnected);
                    }
                    std::thread::sleep(SEND_RETRY);
                }
                Err(err) => {
                    warn!(error = %err, "tcp send failed");
                    self.drop_client("write error");
                    return Err(TransportError::NotConnected);
                }
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.poll_accept()?;
        let Some(client) = self.client.as_mut() else {
            self.poll_console();
            return Ok(0);
        };
        match client.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.drop_client("peer closed");
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
                ) =>
            {
                Ok(0)
            }
            Err(err) => {
                self.drop_client("read error");
                Err(TransportError::Io(err))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.drop_client("transport closed");
        if self.listener.take().is_some() {
            debug!(addr = ?self.local_addr, "tcp listener closed");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Reply to [`IP_QUERY`]: `status;ip;port#` while listening, `status;`
/// otherwise.
pub fn ip_query_reply(addr: Option<SocketAddr>) -> String {
    match addr {
        Some(addr) => format!("{LINK_CONNECTED};{};{}#", addr.ip(), addr.port()),
        None => format!("{LINK_DISCONNECTED};"),
    }
}
