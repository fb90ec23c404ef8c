use std::io::{Read, Write};
use std::net::TcpStream;

use crate::error::Result;

/// A byte link between the IO server and its host client.
///
/// `recv` never blocks: it returns `Ok(0)` when no bytes are pending, so the
/// server loop can keep ticking drivers while the link is idle. A transport
/// may be reopened after `close`.
pub trait Transport: Send {
    /// Prepare the link for traffic (bind, flush stale input, advertise).
    fn open(&mut self) -> Result<()>;

    /// Send bytes to the peer, returning how many were accepted.
    fn send(&mut self, buf: &[u8]) -> Result<usize>;

    /// Copy pending bytes into `buf` without blocking.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release the link. Closing an already closed transport is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;

    /// Send the whole buffer, retrying short writes.
    fn send_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let sent = self.send(buf)?;
            if sent == 0 {
                return Err(crate::error::TransportError::Closed);
            }
            buf = &buf[sent..];
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).send(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).recv(buf)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// A connected client-side stream that implements Read + Write.
///
/// Host tools use this to talk to a running IO server.
pub struct IoStream {
    inner: IoStreamInner,
}

enum IoStreamInner {
    Tcp(TcpStream),
}

impl Read for IoStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            IoStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for IoStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            IoStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            IoStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl IoStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: IoStreamInner::Tcp(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            IoStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            IoStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new socket handle).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            IoStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
        }
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        match &self.inner {
            IoStreamInner::Tcp(stream) => stream.peer_addr().map_err(Into::into),
        }
    }
}

impl std::fmt::Debug for IoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            IoStreamInner::Tcp(_) => f.debug_struct("IoStream").field("type", &"tcp").finish(),
        }
    }
}
