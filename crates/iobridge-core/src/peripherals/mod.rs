//! Standard-space peripheral families.
//!
//! Every family is handle based: `OPEN` (0x00) returns a `u32` handle, or
//! the null handle when the resource is beyond the board's table, and
//! `CLOSE` (0x01) releases it and always replies with an empty result.
//! Every other command replies with a [`Status`](crate::status::Status)
//! byte first.

pub mod analog_input;
pub mod digital_io;
pub mod i2c;
pub mod pwm;
pub mod sci;
pub mod spi;

pub use analog_input::AnalogInput;
pub use digital_io::DigitalIo;
pub use i2c::I2c;
pub use pwm::Pwm;
pub use sci::Sci;
pub use spi::Spi;

pub const OPEN: u8 = 0x00;
pub const CLOSE: u8 = 0x01;
