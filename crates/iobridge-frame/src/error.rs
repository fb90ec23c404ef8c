/// Errors that can occur during packet and command encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet header contains an invalid magic number.
    #[error("invalid packet magic (expected 0x494F \"IO\")")]
    InvalidMagic,

    /// The body exceeds the configured maximum size.
    #[error("body too large ({size} bytes, max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// A command body is shorter than its fixed header.
    #[error("command body too short ({len} bytes, need {needed})")]
    ShortBody { len: usize, needed: usize },

    /// A standard reply result does not fit its 8-bit length field.
    #[error("reply result too long ({len} bytes, max 255)")]
    ResultTooLong { len: usize },

    /// A payload field ran past the end of the payload.
    #[error("payload truncated (wanted {wanted} more bytes, {remaining} left)")]
    Truncated { wanted: usize, remaining: usize },

    /// The shared response buffer has no room for the next write.
    #[error("response buffer full ({len} + {extra} bytes exceeds {capacity})")]
    ResponseOverflow {
        len: usize,
        extra: usize,
        capacity: usize,
    },

    /// An I/O error occurred while reading or writing packets.
    #[error("packet I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
