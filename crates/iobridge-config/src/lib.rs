//! Board capability descriptors for the IO server.
//!
//! A [`BoardConfig`] states what the target board offers: pin and bus
//! counts, the SCI port range, ADC resolution, resource maximums and which
//! optional peripheral families are compiled in. Drivers size their handle
//! tables from it instead of hardcoding limits.
//!
//! Descriptors come from the built-in presets or from a directory of
//! `*.board.json` files validated against an embedded JSON Schema.

pub mod board;
pub mod catalog;
pub mod config;
pub mod error;
pub mod validator;

pub use board::{BoardConfig, CustomFamilies, MotorCarrierVariant, PRESET_NAMES};
pub use catalog::{read_board_file, BoardCatalog};
pub use config::CatalogConfig;
pub use error::{ConfigError, Result};
