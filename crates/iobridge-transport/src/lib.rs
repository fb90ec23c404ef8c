//! Byte transports for the IO server.
//!
//! Every binding exposes the same non-blocking contract through the
//! [`Transport`] trait:
//! - TCP, standing in for the WiFi binding
//! - a serial byte stream gated on a sync byte
//! - BLE GATT characteristics with bounded packet size
//! - an in-memory loopback pair used by tests and the simulator
//!
//! This is the lowest layer of iobridge. Packet framing lives one level up,
//! in `iobridge-frame`.

pub mod ble;
pub mod error;
pub mod loopback;
pub mod serial;
pub mod tcp;
pub mod traits;

pub use ble::{BleTransport, GattLink};
pub use error::{Result, TransportError};
pub use loopback::Loopback;
pub use serial::SerialLink;
pub use tcp::TcpTransport;
pub use traits::{IoStream, Transport};
