//! Optional standard-space libraries registered after the built-in
//! families.

pub mod apds9960;
pub mod can;
pub mod motor_carrier;

pub use apds9960::Apds9960;
pub use can::{CanBus, CanController, CanFrame};
pub use motor_carrier::{ControlMode, MotorCarrier, MotorController, PidGains, Setpoint};
