//! In-memory board for tests and the `serve --sim` command.
//!
//! [`SimBoard`] implements every HAL trait over shared state, so a clone
//! handed to the server can still be inspected and driven from the outside.
//! Input edges go through [`SimInterrupts`], which defers them while a
//! critical section is held.

mod board;
mod can;
mod irq;
mod motor;

pub use board::{SimBoard, SimI2cDevice, SimSciPort, SimServo, SimState, SimStrip};
pub use can::SimCan;
pub use irq::SimInterrupts;
pub use motor::{MotorCall, SimMotorController};
