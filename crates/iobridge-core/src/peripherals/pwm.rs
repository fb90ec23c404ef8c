use bytes::Bytes;
use iobridge_frame::PayloadCursor;
use tracing::{debug, warn};

use super::{CLOSE, OPEN};
use crate::driver::{
    handle_reply, invalid_handle, read_handle, status_only, Capability, Context, Driver,
    FULL_CAPABILITIES,
};
use crate::error::Result;
use crate::hal::PinMode;
use crate::handle::{Handle, HandleRegistry};
use crate::status::Status;

pub const SET_DUTY: u8 = 0x02;
pub const SET_FREQUENCY: u8 = 0x03;

const FAMILY: &str = "PWM";

#[derive(Debug, Clone, Copy)]
struct Channel {
    frequency: u32,
    duty_percent: u8,
}

/// Percent duty to the 8-bit compare value.
pub fn duty_to_raw(percent: u8) -> u8 {
    (255 * u32::from(percent) / 100) as u8
}

/// PWM outputs, one slot per digital pin; only the board's PWM pins open.
pub struct Pwm {
    channels: HandleRegistry<Channel>,
}

impl Pwm {
    pub fn new(digital_pins: u8) -> Self {
        Self {
            channels: HandleRegistry::new(FAMILY, digital_pins as usize),
        }
    }
}

impl Driver for Pwm {
    fn name(&self) -> &str {
        FAMILY
    }

    fn capabilities(&self) -> &'static [Capability] {
        FULL_CAPABILITIES
    }

    fn accepts(&self, command: u8) -> bool {
        command <= SET_FREQUENCY
    }

    fn handle(&mut self, ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes> {
        let mut cur = PayloadCursor::new(payload);
        match command {
            OPEN => {
                let pin = cur.u8()?;
                let frequency = cur.u32_le()?;
                let duty_percent = cur.u8()?;
                if !ctx.config.is_pwm_pin(pin) || duty_percent > 100 {
                    debug!(pin, duty_percent, "pwm open refused");
                    return Ok(handle_reply(Handle::NULL));
                }
                if (pin as usize) >= self.channels.capacity() {
                    return Ok(handle_reply(Handle::NULL));
                }
                ctx.board.pin_mode(pin, PinMode::Output);
                if !ctx.board.set_pwm_frequency(pin, frequency) {
                    warn!(pin, frequency, "pwm frequency not available");
                    return Ok(handle_reply(Handle::NULL));
                }
                ctx.board.analog_write(pin, duty_to_raw(duty_percent));
                let handle = self.channels.open(
                    pin as usize,
                    Channel {
                        frequency,
                        duty_percent,
                    },
                );
                Ok(handle_reply(handle))
            }
            CLOSE => {
                let handle = read_handle(&mut cur)?;
                if let Ok(index) = self.channels.to_index(handle) {
                    self.channels.close(handle);
                    ctx.board.analog_write(index as u8, 0);
                    ctx.board.pin_mode(index as u8, PinMode::Input);
                }
                Ok(Bytes::new())
            }
            SET_DUTY => {
                let handle = read_handle(&mut cur)?;
                let duty_percent = cur.u8()?;
                let index = match self.channels.to_index(handle) {
                    Ok(index) => index,
                    Err(err) => return Ok(invalid_handle(FAMILY, command, err)),
                };
                if duty_percent > 100 {
                    return Ok(status_only(Status::Failure));
                }
                ctx.board.analog_write(index as u8, duty_to_raw(duty_percent));
                self.channels.get_mut(handle)?.duty_percent = duty_percent;
                Ok(status_only(Status::Success))
            }
            SET_FREQUENCY => {
                let handle = read_handle(&mut cur)?;
                let frequency = cur.u32_le()?;
                let index = match self.channels.to_index(handle) {
                    Ok(index) => index,
                    Err(err) => return Ok(invalid_handle(FAMILY, command, err)),
                };
                if !ctx.board.set_pwm_frequency(index as u8, frequency) {
                    return Ok(status_only(Status::Failure));
                }
                let channel = self.channels.get_mut(handle)?;
                channel.frequency = frequency;
                // Some timers reset the compare value on a frequency change.
                ctx.board.analog_write(index as u8, duty_to_raw(channel.duty_percent));
                Ok(status_only(Status::Success))
            }
            _ => Ok(Bytes::new()),
        }
    }
}
