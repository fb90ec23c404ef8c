//! Packet envelope and command body codecs for the IO server protocol.
//!
//! Stream transports carry no message boundaries, so every request and reply
//! travels inside a packet:
//! - A 2-byte magic number ("IO") for stream synchronization
//! - A 1-byte route selecting a standard library, the server, or custom space
//! - A 2-byte little-endian body length
//!
//! Inside the body, standard-space commands use an 8-bit ID and replies carry
//! an explicit result length; custom-space commands use a 16-bit big-endian ID
//! and replies accumulate in a [`ResponseBuffer`].

pub mod codec;
pub mod command;
pub mod cursor;
pub mod error;
pub mod reader;
pub mod response;
pub mod route;
pub mod writer;

pub use codec::{
    decode_packet, encode_packet, resync, Packet, PacketConfig, DEFAULT_MAX_BODY, HEADER_SIZE,
};
pub use command::{
    is_custom_id, CustomRequest, StandardReply, StandardRequest, CUSTOM_ID_FIRST, CUSTOM_ID_LAST,
};
pub use cursor::PayloadCursor;
pub use error::{FrameError, Result};
pub use reader::PacketReader;
pub use response::ResponseBuffer;
pub use route::{route_name, CUSTOM, MAX_LIBRARY, SERVER};
pub use writer::PacketWriter;
