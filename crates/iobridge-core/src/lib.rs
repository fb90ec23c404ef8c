//! Command dispatch core of the IO server.
//!
//! The server owns three layers:
//! - a [`PeripheralRegistry`] of standard-space libraries, addressed by
//!   registration index and 8-bit command IDs, each reply carrying an
//!   explicit result length
//! - a [`CustomSpace`] of 16-bit command IDs handled by a flat switch that
//!   appends to one shared transmit buffer
//! - a [`Scheduler`] that, while running, pumps one frame per tick and then
//!   runs every library's tick hook
//!
//! Resources a client opens are named by generation-checked [`Handle`]s, so
//! a stale handle is reported as [`Status::InvalidHandle`] instead of
//! touching a reused slot. Board access goes through the [`hal`] traits;
//! [`sim::SimBoard`] implements them in memory.

pub mod critical;
pub mod custom;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod hal;
pub mod handle;
pub mod libraries;
pub mod peripherals;
pub mod poll;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod sim;
pub mod status;

pub use critical::{
    with_masked, CriticalSection, InterruptControl, IsrCell, IsrHandler, PinSampler,
};
pub use custom::CustomSpace;
pub use dispatch::Dispatcher;
pub use driver::{Capability, Context, Driver};
pub use error::{CoreError, HandleError, Result};
pub use hal::{Board, PinMode};
pub use handle::{Handle, HandleRegistry};
pub use poll::{poll_until, Clock, ManualClock, Poll, SystemClock};
pub use registry::{PeripheralRegistry, MAX_LIBRARIES};
pub use scheduler::{Scheduler, SchedulerState, TickTimer};
pub use server::{IoServer, IoServerBuilder, ServerConfig};
pub use status::Status;
