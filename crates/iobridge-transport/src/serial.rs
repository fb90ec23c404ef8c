use std::io::{ErrorKind, Read, Write};

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// First byte a host sends after opening the serial port.
pub const SYNC_BYTE: u8 = b'e';

const FLUSH_CHUNK: usize = 256;
const FLUSH_LIMIT: usize = 64 * 1024;

/// Serial binding over any byte stream.
///
/// Line noise and stale bytes from a previous session are discarded until
/// the host's [`SYNC_BYTE`] arrives. The sync byte itself is consumed;
/// everything after it passes through unchanged.
/// The port handle should be configured non-blocking or with a short read
/// timeout so `recv` stays non-blocking.
pub struct SerialLink<T> {
    port: T,
    synced: bool,
    open: bool,
}

impl<T: Read + Write + Send> SerialLink<T> {
    pub fn new(port: T) -> Self {
        Self {
            port,
            synced: false,
            open: false,
        }
    }

    /// Whether the sync byte has been seen since the last open.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn get_ref(&self) -> &T {
        &self.port
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.port
    }

    pub fn into_inner(self) -> T {
        self.port
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.port.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(0)
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl<T: Read + Write + Send> Transport for SerialLink<T> {
    fn open(&mut self) -> Result<()> {
        let mut scratch = [0u8; FLUSH_CHUNK];
        let mut flushed = 0usize;
        while flushed < FLUSH_LIMIT {
            let n = self.read_nonblocking(&mut scratch)?;
            if n == 0 {
                break;
            }
            flushed += n;
        }
        debug!(flushed, "serial input flushed");
        self.synced = false;
        self.open = true;
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        loop {
            match self.port.write(buf) {
                Ok(n) => {
                    self.port.flush()?;
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let n = self.read_nonblocking(buf)?;
        if n == 0 || self.synced {
            return Ok(n);
        }

        match buf[..n].iter().position(|&b| b == SYNC_BYTE) {
            Some(start) => {
                trace!(discarded = start, "serial sync byte received");
                buf.copy_within(start + 1..n, 0);
                self.synced = true;
                Ok(n - start - 1)
            }
            None => {
                trace!(discarded = n, "waiting for serial sync byte");
                Ok(0)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        self.synced = false;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Serial port double: queued inbound chunks, captured outbound bytes.
    #[derive(Default)]
    struct FakePort {
        inbound: VecDeque<Vec<u8>>,
        outbound: Vec<u8>,
    }

    impl FakePort {
        fn with_chunks(chunks: &[&[u8]]) -> Self {
            Self {
                inbound: chunks.iter().map(|c| c.to_vec()).collect(),
                outbound: Vec::new(),
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.inbound.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.inbound.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None => Err(std::io::Error::from(ErrorKind::WouldBlock)),
            }
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn open_flushes_stale_input() {
        let mut link = SerialLink::new(FakePort::with_chunks(&[b"stale-bytes", b"more"]));
        link.open().unwrap();
        assert!(link.get_ref().inbound.is_empty());
    }

    #[test]
    fn bytes_before_sync_are_discarded() {
        let mut link = SerialLink::new(FakePort::default());
        link.open().unwrap();
        link.get_mut().inbound.push_back(b"xyz".to_vec());
        link.get_mut().inbound.push_back(b"qqe\x01\x02".to_vec());

        let mut buf = [0u8; 16];
        assert_eq!(link.recv(&mut buf).unwrap(), 0);
        assert!(!link.is_synced());

        let n = link.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\x01\x02");
        assert!(link.is_synced());
    }

    #[test]
    fn bytes_after_sync_pass_through() {
        let mut link = SerialLink::new(FakePort::default());
        link.open().unwrap();
        link.get_mut().inbound.push_back(b"e".to_vec());
        link.get_mut().inbound.push_back(b"abc".to_vec());

        let mut buf = [0u8; 16];
        assert_eq!(link.recv(&mut buf).unwrap(), 0);
        assert!(link.is_synced());
        let n = link.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
    }

    #[test]
    fn stream_after_sync_starts_with_the_packet() {
        let mut link = SerialLink::new(FakePort::default());
        link.open().unwrap();
        link.get_mut().inbound.push_back(b"\x00eIO\x00\x02\x00\x03\x07".to_vec());

        let mut buf = [0u8; 16];
        let n = link.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"IO\x00\x02\x00\x03\x07");

        // later 'e' bytes are payload, not sync
        link.get_mut().inbound.push_back(b"e".to_vec());
        assert_eq!(link.recv(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'e');
    }

    #[test]
    fn recv_returns_zero_when_idle() {
        let mut link = SerialLink::new(FakePort::default());
        link.open().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(link.recv(&mut buf).unwrap(), 0);
    }

    #[test]
    fn reopen_requires_new_sync() {
        let mut link = SerialLink::new(FakePort::default());
        link.open().unwrap();
        link.get_mut().inbound.push_back(b"e".to_vec());
        let mut buf = [0u8; 4];
        link.recv(&mut buf).unwrap();
        assert!(link.is_synced());

        link.close().unwrap();
        link.open().unwrap();
        assert!(!link.is_synced());
    }

    #[test]
    fn closed_link_rejects_io() {
        let mut link = SerialLink::new(FakePort::default());
        let mut buf = [0u8; 4];
        assert!(matches!(link.recv(&mut buf), Err(TransportError::Closed)));
        assert!(matches!(link.send(b"x"), Err(TransportError::Closed)));
    }

    #[test]
    fn send_writes_to_port() {
        let mut link = SerialLink::new(FakePort::default());
        link.open().unwrap();
        link.send_all(b"reply").unwrap();
        assert_eq!(link.into_inner().outbound, b"reply");
    }
}
