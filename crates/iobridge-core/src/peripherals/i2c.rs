use bytes::Bytes;
use iobridge_frame::PayloadCursor;
use tracing::{debug, info};

use super::{CLOSE, OPEN};
use crate::driver::{
    handle_reply, invalid_handle, read_handle, status_only, status_with, Capability, Context,
    Driver, FULL_CAPABILITIES, MAX_RESULT,
};
use crate::error::Result;
use crate::hal::Board;
use crate::handle::HandleRegistry;
use crate::status::Status;

pub const SET_BUS_SPEED: u8 = 0x02;
pub const WRITE: u8 = 0x03;
pub const READ: u8 = 0x04;
pub const WRITE_READ: u8 = 0x05;

/// Default bus clock after begin.
pub const DEFAULT_CLOCK_HZ: u32 = 100_000;

const FAMILY: &str = "I2C";

#[derive(Debug, Clone, Copy)]
struct Bus {
    clock_hz: u32,
}

/// I2C controllers, one slot per bus.
pub struct I2c {
    buses: HandleRegistry<Bus>,
}

impl I2c {
    pub fn new(i2c_buses: u8) -> Self {
        Self {
            buses: HandleRegistry::new(FAMILY, i2c_buses as usize),
        }
    }

    /// Read `n` bytes; a short read zero-fills and reports a bus error.
    fn read_into_reply(board: &mut dyn Board, bus: u8, address: u8, n: usize, stop: bool) -> Bytes {
        let mut data = vec![0u8; n];
        let got = board.i2c_read(bus, address, &mut data, stop);
        if got < n {
            debug!(bus, address, wanted = n, got, "short i2c read");
            data[got.min(n)..].fill(0);
            return status_with(Status::BusError, &data);
        }
        status_with(Status::Success, &data)
    }
}

impl Driver for I2c {
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
            let already_open = self.buses.is_open(bus as usize);
            let handle = self.buses.open(
                bus as usize,
                Bus {
                    clock_hz: DEFAULT_CLOCK_HZ,
                },
            );
            if !handle.is_null() && !already_open {
                ctx.board.i2c_begin(bus);
                info!(bus, "i2c bus begun");
            }
            return Ok(handle_reply(handle));
        }

        let handle = read_handle(&mut cur)?;
        if command == CLOSE {
            if let Ok(index) = self.buses.to_index(handle) {
                self.buses.close(handle);
                ctx.board.i2c_end(index as u8);
            }
            return Ok(Bytes::new());
        }

        let bus = match self.buses.to_index(handle) {
            Ok(index) => index as u8,
            Err(err) => return Ok(invalid_handle(FAMILY, command, err)),
        };
        match command {
            SET_BUS_SPEED => {
                let hz = cur.u32_le()?;
                if hz == 0 {
                    return Ok(status_only(Status::Failure));
                }
                ctx.board.i2c_set_clock(bus, hz);
                self.buses.get_mut(handle)?.clock_hz = hz;
                Ok(status_only(Status::Success))
            }
            WRITE => {
                let address = cur.u8()?;
                let stop = cur.bool()?;
                let data = cur.rest();
                if ctx.board.i2c_write(bus, address, data, stop) {
                    Ok(status_only(Status::Success))
                } else {
                    debug!(bus, address, "i2c write not acknowledged");
                    Ok(status_only(Status::BusError))
                }
            }
            READ => {
                let address = cur.u8()?;
                let stop = cur.bool()?;
                let n = cur.u8()? as usize;
                if n >= MAX_RESULT {
                    return Ok(status_only(Status::Failure));
                }
                Ok(Self::read_into_reply(ctx.board, bus, address, n, stop))
            }
            WRITE_READ => {
                let address = cur.u8()?;
                let n = cur.u8()? as usize;
                let data = cur.rest();
                if n >= MAX_RESULT {
                    return Ok(status_only(Status::Failure));
                }
                if !ctx.board.i2c_write(bus, address, data, false) {
                    debug!(bus, address, "i2c write-read not acknowledged");
                    return Ok(status_with(Status::BusError, &vec![0u8; n]));
                }
                Ok(Self::read_into_reply(ctx.board, bus, address, n, true))
            }
            _ => Ok(Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::testing::{with_handle, Rig};

    const ADDR: u8 = 0x48;

    fn rig() -> (Rig, I2c) {
        let rig = Rig::new("due");
        rig.board.add_i2c_device(1, ADDR);
        let i2c = I2c::new(rig.config.i2c_buses);
        (rig, i2c)
    }

    #[test]
    fn bus_is_begun_once() {
        let (rig, mut i2c) = rig();
        let a = rig.open(&mut i2c, &[1]);
        let b = rig.open(&mut i2c, &[1]);
        assert_eq!(a, b);
        assert_eq!(rig.board.state().i2c_begun.get(&1), Some(&1));
        assert!(rig.open(&mut i2c, &[2]).is_null());
    }

    #[test]
    fn write_then_write_read_register() {
        let (rig, mut i2c) = rig();
        let h = rig.open(&mut i2c, &[1]);
        let reply = rig.call(&mut i2c, WRITE, &with_handle(h, &[ADDR, 1, 0x10, 0xAB, 0xCD]));
        assert_eq!(reply.as_ref(), &[0x00]);
        let reply = rig.call(&mut i2c, WRITE_READ, &with_handle(h, &[ADDR, 2, 0x10]));
        assert_eq!(reply.as_ref(), &[0x00, 0xAB, 0xCD]);
    }

    #[test]
    fn missing_device_is_bus_error() {
        let (rig, mut i2c) = rig();
        let h = rig.open(&mut i2c, &[1]);
        let reply = rig.call(&mut i2c, WRITE, &with_handle(h, &[0x50, 1, 0x00]));
        assert_eq!(reply.as_ref(), &[0x01]);
        let reply = rig.call(&mut i2c, WRITE_READ, &with_handle(h, &[0x50, 2, 0x00]));
        assert_eq!(reply.as_ref(), &[0x01, 0, 0]);
    }

    #[test]
    fn short_read_zero_fills() {
        let (rig, mut i2c) = rig();
        let h = rig.open(&mut i2c, &[1]);
        rig.board.with_i2c_device(1, ADDR, |d| {
            d.registers[0] = 7;
            d.registers[1] = 8;
            d.read_limit = Some(1);
        });
        let reply = rig.call(&mut i2c, READ, &with_handle(h, &[ADDR, 1, 3]));
        assert_eq!(reply.as_ref(), &[0x01, 7, 0, 0]);
    }

    #[test]
    fn oversized_read_fails() {
        let (rig, mut i2c) = rig();
        let h = rig.open(&mut i2c, &[1]);
        let reply = rig.call(&mut i2c, READ, &with_handle(h, &[ADDR, 1, 255]));
        assert_eq!(reply.as_ref(), &[0xFF]);
    }

    #[test]
    fn bus_speed_and_close() {
        let (rig, mut i2c) = rig();
        let h = rig.open(&mut i2c, &[1]);
        let reply = rig.call(&mut i2c, SET_BUS_SPEED, &with_handle(h, &400_000u32.to_le_bytes()));
        assert_eq!(reply.as_ref(), &[0x00]);
        assert_eq!(rig.board.state().i2c_clock.get(&1), Some(&400_000));
        let reply = rig.call(&mut i2c, SET_BUS_SPEED, &with_handle(h, &0u32.to_le_bytes()));
        assert_eq!(reply.as_ref(), &[0xFF]);

        rig.call(&mut i2c, CLOSE, &with_handle(h, &[]));
        assert!(rig.board.state().i2c_begun.get(&1).is_none());
        let reply = rig.call(&mut i2c, WRITE, &with_handle(h, &[ADDR, 1, 0]));
        assert_eq!(reply.as_ref(), &[0xFE]);
    }
}
