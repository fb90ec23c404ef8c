use bytes::Bytes;
use iobridge_frame::PayloadCursor;

use super::{CLOSE, OPEN};
use crate::driver::{
    handle_reply, invalid_handle, read_handle, status_with, Capability, Context, Driver,
};
use crate::error::Result;
use crate::handle::HandleRegistry;
use crate::status::Status;

pub const READ: u8 = 0x02;

const FAMILY: &str = "AnalogInput";

/// ADC channels; readings are raw counts at the board's resolution.
pub struct AnalogInput {
    channels: HandleRegistry<()>,
}

impl AnalogInput {
    pub fn new(analog_pins: u8) -> Self {
        Self {
            channels: HandleRegistry::new(FAMILY, analog_pins as usize),
        }
    }
}

impl Driver for AnalogInput {
    fn name(&self) -> &str {
        FAMILY
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Open, Capability::Transfer, Capability::Close]
    }

    fn accepts(&self, command: u8) -> bool {
        command <= READ
    }

    fn handle(&mut self, ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes> {
        let mut cur = PayloadCursor::new(payload);
        match command {
            OPEN => {
                let channel = cur.u8()?;
                Ok(handle_reply(self.channels.open(channel as usize, ())))
            }
            CLOSE => {
                self.channels.close(read_handle(&mut cur)?);
                Ok(Bytes::new())
            }
            READ => {
                let handle = read_handle(&mut cur)?;
                let channel = match self.channels.to_index(handle) {
                    Ok(index) => index as u8,
                    Err(err) => return Ok(invalid_handle(FAMILY, command, err)),
                };
                let raw = ctx.board.analog_read(channel).min(ctx.config.adc_max());
                Ok(status_with(Status::Success, &raw.to_le_bytes()))
            }
            _ => Ok(Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::testing::{with_handle, Rig};

    #[test]
    fn read_returns_little_endian_counts() {
        let rig = Rig::new("due");
        let mut adc = AnalogInput::new(rig.config.analog_pins);
        let h = rig.open(&mut adc, &[3]);
        rig.board.set_analog(3, 0x0ABC);
        assert_eq!(
            rig.call(&mut adc, READ, &with_handle(h, &[])).as_ref(),
            &[0x00, 0xBC, 0x0A]
        );
    }

    #[test]
    fn reading_is_clamped_to_resolution() {
        let rig = Rig::new("uno");
        let mut adc = AnalogInput::new(rig.config.analog_pins);
        let h = rig.open(&mut adc, &[0]);
        rig.board.set_analog(0, 0xFFFF);
        let reply = rig.call(&mut adc, READ, &with_handle(h, &[]));
        assert_eq!(u16::from_le_bytes([reply[1], reply[2]]), rig.config.adc_max());
    }

    #[test]
    fn channel_beyond_board_is_null() {
        let rig = Rig::new("uno");
        let mut adc = AnalogInput::new(rig.config.analog_pins);
        assert!(rig.open(&mut adc, &[rig.config.analog_pins]).is_null());
    }
}
