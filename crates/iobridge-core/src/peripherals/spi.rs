use bytes::Bytes;
use iobridge_frame::PayloadCursor;
use tracing::{debug, info};

use super::{CLOSE, OPEN};
use crate::driver::{
    handle_reply, invalid_handle, read_handle, status_only, status_with, Capability, Context,
    Driver, FULL_CAPABILITIES, MAX_RESULT,
};
use crate::error::Result;
use crate::hal::{BitOrder, PinMode, SpiSettings};
use crate::handle::{Handle, HandleRegistry};
use crate::status::Status;

pub const SET_FORMAT: u8 = 0x02;
pub const SET_BUS_SPEED: u8 = 0x03;
pub const WRITE_READ: u8 = 0x04;

const FAMILY: &str = "SPI";

#[derive(Debug, Clone, Copy)]
struct Device {
    ss_pin: u8,
    active_low: bool,
    settings: SpiSettings,
}

impl Device {
    fn select(&self, ctx: &mut Context<'_>, selected: bool) {
        // active-low: selected drives low, idle drives high
        ctx.board.digital_write(self.ss_pin, selected != self.active_low);
    }
}

/// SPI controllers, one slot per bus, each with its own slave-select pin.
pub struct Spi {
    buses: HandleRegistry<Device>,
}

impl Spi {
    pub fn new(spi_buses: u8) -> Self {
        Self {
            buses: HandleRegistry::new(FAMILY, spi_buses as usize),
        }
    }
}

impl Driver for Spi {
    fn name(&self) -> &str {
        FAMILY
    }

    fn capabilities(&self) -> &'static [Capability] {
        FULL_CAPABILITIES
    }

    fn accepts(&self, command: u8) -> bool {
        command <= WRITE_READ
    }

    fn handle(&mut self, ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes> {
        let mut cur = PayloadCursor::new(payload);
        if command == OPEN {
            let bus = cur.u8()?;
            let ss_pin = cur.u8()?;
            let active_low = cur.bool()?;
            if (bus as usize) >= self.buses.capacity() || ss_pin >= ctx.config.digital_pins {
                return Ok(handle_reply(Handle::NULL));
            }
            let device = Device {
                ss_pin,
                active_low,
                settings: SpiSettings::default(),
            };
            if !self.buses.is_open(bus as usize) {
                ctx.board.spi_begin(bus);
            }
            ctx.board.pin_mode(ss_pin, PinMode::Output);
            device.select(ctx, false);
            info!(bus, ss_pin, active_low, "spi device opened");
            return Ok(handle_reply(self.buses.open(bus as usize, device)));
        }

        let handle = read_handle(&mut cur)?;
        if command == CLOSE {
            if let Ok(index) = self.buses.to_index(handle) {
                self.buses.close(handle);
                ctx.board.spi_end(index as u8);
            }
            return Ok(Bytes::new());
        }

        let bus = match self.buses.to_index(handle) {
            Ok(index) => index as u8,
            Err(err) => return Ok(invalid_handle(FAMILY, command, err)),
        };
        let device = self.buses.get_mut(handle)?;
        match command {
            SET_FORMAT => {
                let mode = cur.u8()?;
                let bit_order = match cur.u8()? {
                    0 => BitOrder::LsbFirst,
                    1 => BitOrder::MsbFirst,
                    _ => return Ok(status_only(Status::Failure)),
                };
                if mode > 3 {
                    return Ok(status_only(Status::Failure));
                }
                device.settings.mode = mode;
                device.settings.bit_order = bit_order;
                Ok(status_only(Status::Success))
            }
            SET_BUS_SPEED => {
                let hz = cur.u32_le()?;
                if hz == 0 {
                    return Ok(status_only(Status::Failure));
                }
                device.settings.clock_hz = hz;
                Ok(status_only(Status::Success))
            }
            WRITE_READ => {
                let mut data = cur.rest().to_vec();
                if data.len() >= MAX_RESULT {
                    debug!(bus, len = data.len(), "spi transfer too long");
                    return Ok(status_only(Status::Failure));
                }
                let device = *device;
                device.select(ctx, true);
                ctx.board.spi_transfer(bus, device.settings, &mut data);
                device.select(ctx, false);
                Ok(status_with(Status::Success, &data))
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
    fn open_drives_slave_select_idle() {
        let rig = Rig::new("uno");
        let mut spi = Spi::new(rig.config.spi_buses);
        let h = rig.open(&mut spi, &[0, 10, 1]);
        assert!(!h.is_null());
        assert!(rig.board.level(10));
        assert_eq!(rig.board.state().spi_begun.get(&0), Some(&true));
        assert!(rig.open(&mut spi, &[1, 10, 1]).is_null());
    }

    #[test]
    fn transfer_asserts_slave_select_around_data() {
        let rig = Rig::new("uno");
        let mut spi = Spi::new(rig.config.spi_buses);
        let h = rig.open(&mut spi, &[0, 10, 1]);
        rig.board.state().gpio_log.clear();

        let reply = rig.call(&mut spi, WRITE_READ, &with_handle(h, &[0x9F, 0, 0]));
        assert_eq!(reply.as_ref(), &[0x00, 0x9F, 0, 0]);
        assert_eq!(rig.board.state().gpio_log, vec![(10, false), (10, true)]);
        assert_eq!(rig.board.state().spi_settings, Some(SpiSettings::default()));
    }

    #[test]
    fn active_high_select_idles_low() {
        let rig = Rig::new("uno");
        let mut spi = Spi::new(rig.config.spi_buses);
        rig.open(&mut spi, &[0, 8, 0]);
        assert!(!rig.board.level(8));
    }

    #[test]
    fn format_and_speed_validation() {
        let rig = Rig::new("uno");
        let mut spi = Spi::new(rig.config.spi_buses);
        let h = rig.open(&mut spi, &[0, 10, 1]);
        assert_eq!(rig.call(&mut spi, SET_FORMAT, &with_handle(h, &[3, 0])).as_ref(), &[0x00]);
        assert_eq!(rig.call(&mut spi, SET_FORMAT, &with_handle(h, &[4, 0])).as_ref(), &[0xFF]);
        assert_eq!(rig.call(&mut spi, SET_FORMAT, &with_handle(h, &[0, 2])).as_ref(), &[0xFF]);
        let speed = with_handle(h, &1_000_000u32.to_le_bytes());
        assert_eq!(rig.call(&mut spi, SET_BUS_SPEED, &speed).as_ref(), &[0x00]);
        let zero = with_handle(h, &0u32.to_le_bytes());
        assert_eq!(rig.call(&mut spi, SET_BUS_SPEED, &zero).as_ref(), &[0xFF]);

        rig.call(&mut spi, WRITE_READ, &with_handle(h, &[1]));
        assert_eq!(
            rig.board.state().spi_settings,
            Some(SpiSettings {
                clock_hz: 1_000_000,
                mode: 3,
                bit_order: BitOrder::LsbFirst
            })
        );
    }

    #[test]
    fn closed_handle_is_rejected() {
        let rig = Rig::new("uno");
        let mut spi = Spi::new(rig.config.spi_buses);
        let h = rig.open(&mut spi, &[0, 10, 1]);
        rig.call(&mut spi, CLOSE, &with_handle(h, &[]));
        assert_eq!(rig.board.state().spi_begun.get(&0), Some(&false));
        assert_eq!(rig.call(&mut spi, WRITE_READ, &with_handle(h, &[1])).as_ref(), &[0xFE]);
    }
}
