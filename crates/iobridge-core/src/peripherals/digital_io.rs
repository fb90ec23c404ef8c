use bytes::Bytes;
use iobridge_frame::PayloadCursor;
use tracing::debug;

use super::{CLOSE, OPEN};
use crate::driver::{
    handle_reply, invalid_handle, read_handle, status_only, status_with, Capability, Context,
    Driver,
};
use crate::error::Result;
use crate::hal::PinMode;
use crate::handle::{Handle, HandleRegistry};
use crate::status::Status;

pub const READ: u8 = 0x02;
pub const WRITE: u8 = 0x03;

const FAMILY: &str = "DigitalIO";

/// Single digital pins; the slot index is the pin number.
pub struct DigitalIo {
    pins: HandleRegistry<PinMode>,
}

impl DigitalIo {
    pub fn new(digital_pins: u8) -> Self {
        Self {
            pins: HandleRegistry::new(FAMILY, digital_pins as usize),
        }
    }
}

impl Driver for DigitalIo {
    fn name(&self) -> &str {
        FAMILY
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Open, Capability::Transfer, Capability::Close]
    }

    fn accepts(&self, command: u8) -> bool {
        command <= WRITE
    }

    fn handle(&mut self, ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes> {
        let mut cur = PayloadCursor::new(payload);
        match command {
            OPEN => {
                let pin = cur.u8()?;
                let Some(mode) = PinMode::from_u8(cur.u8()?) else {
                    return Ok(handle_reply(Handle::NULL));
                };
                if ctx.config.is_reserved_pin(pin) {
                    debug!(pin, "digital open refused, pin reserved");
                    return Ok(handle_reply(Handle::NULL));
                }
                let handle = self.pins.open(pin as usize, mode);
                if !handle.is_null() {
                    ctx.board.pin_mode(pin, mode);
                    debug!(pin, ?mode, "digital pin opened");
                }
                Ok(handle_reply(handle))
            }
            CLOSE => {
                let handle = read_handle(&mut cur)?;
                if let Ok(index) = self.pins.to_index(handle) {
                    self.pins.close(handle);
                    ctx.board.pin_mode(index as u8, PinMode::Input);
                }
                Ok(Bytes::new())
            }
            READ => {
                let handle = read_handle(&mut cur)?;
                let index = match self.pins.to_index(handle) {
                    Ok(index) => index,
                    Err(err) => return Ok(invalid_handle(FAMILY, command, err)),
                };
                let level = ctx.board.digital_read(index as u8);
                Ok(status_with(Status::Success, &[u8::from(level)]))
            }
            WRITE => {
                let handle = read_handle(&mut cur)?;
                let level = cur.bool()?;
                let index = match self.pins.to_index(handle) {
                    Ok(index) => index,
                    Err(err) => return Ok(invalid_handle(FAMILY, command, err)),
                };
                if self.pins.by_index(index) != Some(&PinMode::Output) {
                    debug!(pin = index, "write to input pin");
                    return Ok(status_only(Status::Failure));
                }
                ctx.board.digital_write(index as u8, level);
                Ok(status_only(Status::Success))
            }
            _ => Ok(Bytes::new()),
        }
    }
}
