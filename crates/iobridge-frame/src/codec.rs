use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Packet header: magic (2) + route (1) + length (2) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Magic bytes: "IO" (0x49 0x4F).
pub const MAGIC: [u8; 2] = [0x49, 0x4F];

/// Default maximum body size: 1 KiB, large enough for the biggest
/// NeoPixel write a board accepts.
pub const DEFAULT_MAX_BODY: usize = 1024;

/// A routed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Library index, [`SERVER`](crate::route::SERVER) or
    /// [`CUSTOM`](crate::route::CUSTOM).
    pub route: u8,
    /// The command or reply body.
    pub body: Bytes,
}

impl Packet {
    pub fn new(route: u8, body: impl Into<Bytes>) -> Self {
        Self {
            route,
            body: body.into(),
        }
    }

    /// The total wire size of this packet (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬─────────┬───────────┬─────────────────┐
/// │ Magic (2B)   │ Route   │ Length    │ Body            │
/// │ 0x49 0x4F    │ (1B)    │ (2B LE)   │ (Length bytes)  │
/// │ "IO"         │         │           │                 │
/// └──────────────┴─────────┴───────────┴─────────────────┘
/// ```
pub fn encode_packet(route: u8, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    if body.len() > u16::MAX as usize {
        return Err(FrameError::BodyTooLarge {
            size: body.len(),
            max: u16::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_slice(&MAGIC);
    dst.put_u8(route);
    dst.put_u16_le(body.len() as u16);
    dst.put_slice(body);
    Ok(())
}

/// Decode a packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_body: usize) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let route = src[2];
    let body_len = u16::from_le_bytes([src[3], src[4]]) as usize;

    if body_len > max_body {
        return Err(FrameError::BodyTooLarge {
            size: body_len,
            max: max_body,
        });
    }

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();

    Ok(Some(Packet { route, body }))
}

/// Drop bytes up to the next candidate magic so a corrupted stream can
/// resynchronize. Returns how many bytes were discarded.
pub fn resync(src: &mut BytesMut) -> usize {
    let skip = src
        .windows(2)
        .skip(1)
        .position(|w| w == MAGIC)
        .map(|p| p + 1)
        .unwrap_or_else(|| {
            // Keep a trailing first magic byte; the second may still arrive.
            if src.last() == Some(&MAGIC[0]) {
                src.len() - 1
            } else {
                src.len()
            }
        });
    src.advance(skip);
    skip
}

/// Configuration for the packet codec.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Maximum body size in bytes. Default: 1 KiB.
    pub max_body_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
