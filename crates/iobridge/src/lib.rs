//! Host-driven IO server for microcontroller boards.
//!
//! A host client opens pins and buses on the board, moves bytes through them
//! and drives optional device libraries, all over one byte link. The board
//! side answers every standard-space command with a length-prefixed result
//! and batches custom-space output into a shared transmit buffer.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte links (TCP for WiFi, serial, BLE GATT, loopback)
//! - [`frame`]: packet envelope and command body codecs
//! - [`config`]: board capability descriptors and the JSON board catalog
//! - [`server`]: handles, registry, dispatcher, scheduler, drivers and the
//!   simulated board

/// Re-export transport types.
pub mod transport {
    pub use iobridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use iobridge_frame::*;
}

/// Re-export board descriptor types.
pub mod config {
    pub use iobridge_config::*;
}

/// Re-export the server core.
pub mod server {
    pub use iobridge_core::*;
}

pub use iobridge_core::{IoServer, IoServerBuilder, ServerConfig};
