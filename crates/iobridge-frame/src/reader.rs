use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use iobridge_transport::IoStream;

use crate::codec::{decode_packet, Packet, PacketConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 2 * 1024;
const READ_CHUNK_SIZE: usize = 1024;

/// Reads complete packets from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete packets.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    config: PacketConfig,
}

impl<T: Read> PacketReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = decode_packet(&mut self.buf, self.config.max_body_size)? {
                return Ok(packet);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum body size for subsequent packet decoding.
    pub fn set_max_body_size(&mut self, max_body_size: usize) {
        self.config.max_body_size = max_body_size;
    }

    /// Current packet reader configuration.
    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}

impl PacketReader<IoStream> {
    /// Create a packet reader for `IoStream` and apply read timeout from config.
    pub fn with_config_stream(inner: IoStream, config: PacketConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: iobridge_transport::TransportError) -> FrameError {
    match err {
        iobridge_transport::TransportError::Io(io)
        | iobridge_transport::TransportError::Accept(io) => FrameError::Io(io),
        iobridge_transport::TransportError::Bind { source, .. }
        | iobridge_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        iobridge_transport::TransportError::Closed => FrameError::ConnectionClosed,
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};
    use iobridge_transport::{TcpTransport, Transport};

    use super::*;
    use crate::codec::{encode_packet, MAGIC};

    #[test]
    fn read_single_packet() {
        let mut wire = BytesMut::new();
        encode_packet(1, b"hello", &mut wire).unwrap();

        let mut reader = PacketReader::new(Cursor::new(wire.to_vec()));
        let packet = reader.read_packet().unwrap();

        assert_eq!(packet.route, 1);
        assert_eq!(packet.body.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_packets() {
        let mut wire = BytesMut::new();
        encode_packet(1, b"one", &mut wire).unwrap();
        encode_packet(0xFE, b"two", &mut wire).unwrap();
        encode_packet(0xFF, b"three", &mut wire).unwrap();

        let mut reader = PacketReader::new(Cursor::new(wire.to_vec()));

        let p1 = reader.read_packet().unwrap();
        let p2 = reader.read_packet().unwrap();
        let p3 = reader.read_packet().unwrap();

        assert_eq!((p1.route, p1.body.as_ref()), (1, b"one".as_ref()));
        assert_eq!((p2.route, p2.body.as_ref()), (0xFE, b"two".as_ref()));
        assert_eq!((p3.route, p3.body.as_ref()), (0xFF, b"three".as_ref()));
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_packet(4, b"slow", &mut wire).unwrap();

        let byte_reader = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = PacketReader::new(byte_reader);

        let packet = reader.read_packet().unwrap();
        assert_eq!(packet.route, 4);
        assert_eq!(packet.body.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = PacketReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_packet() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u8(2);
        partial.put_u16_le(16);
        partial.put_slice(b"only-part");

        let mut reader = PacketReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn invalid_magic_in_stream() {
        let bytes = vec![0x00, 0x01, 0x00, 0x00, 0x00];
        let mut reader = PacketReader::new(Cursor::new(bytes));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::InvalidMagic));
    }

    #[test]
    fn oversized_packet_in_stream() {
        let mut wire = BytesMut::new();
        wire.put_slice(&MAGIC);
        wire.put_u8(1);
        wire.put_u16_le(1024);

        let cfg = PacketConfig {
            max_body_size: 16,
            ..PacketConfig::default()
        };
        let mut reader = PacketReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::BodyTooLarge { .. }));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::PacketWriter::new(left);
        let mut reader = PacketReader::new(right);

        writer.send(1, b"ping").unwrap();
        let packet = reader.read_packet().unwrap();

        assert_eq!(packet.route, 1);
        assert_eq!(packet.body.as_ref(), b"ping");
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = PacketReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        reader.set_max_body_size(8);
        assert_eq!(reader.config().max_body_size, 8);
        let _inner = reader.into_inner();
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let mut wire = BytesMut::new();
        encode_packet(7, b"ok", &mut wire).unwrap();

        let reader = FlakyReader {
            first_error: Some(ErrorKind::WouldBlock),
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = PacketReader::new(reader);
        let err = framed.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_packet(8, b"ok", &mut wire).unwrap();

        let reader = FlakyReader {
            first_error: Some(ErrorKind::Interrupted),
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = PacketReader::new(reader);
        let packet = framed.read_packet().unwrap();

        assert_eq!(packet.route, 8);
        assert_eq!(packet.body.as_ref(), b"ok");
    }

    struct FlakyReader {
        first_error: Option<ErrorKind>,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.first_error.take() {
                return Err(std::io::Error::from(kind));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn applies_read_timeout_for_io_stream() {
        let server = TcpTransport::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let stream = TcpTransport::connect(addr).unwrap();

        let cfg = PacketConfig {
            read_timeout: Some(std::time::Duration::from_millis(10)),
            ..PacketConfig::default()
        };

        let mut reader = PacketReader::with_config_stream(stream, cfg).unwrap();
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        ));
        drop(server);
    }

    #[test]
    fn closed_transport_maps_to_connection_closed() {
        let mut server = TcpTransport::bind("127.0.0.1:0").unwrap();
        server.close().unwrap();
        let mut buf = [0u8; 1];
        let err = server.recv(&mut buf).unwrap_err();
        assert!(matches!(
            transport_to_frame_error(err),
            FrameError::ConnectionClosed
        ));
    }
}
