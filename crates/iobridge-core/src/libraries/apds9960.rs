//! APDS9960 gesture sensor on I2C.
//!
//! Proximity and colour are read by the client through the plain I2C
//! family; this library only owns sensor setup and the blocking gesture
//! read.

use std::time::Duration;

use bytes::Bytes;
use iobridge_frame::PayloadCursor;
use tracing::{debug, info, warn};

use crate::driver::{Capability, Context, Driver};
use crate::error::Result;
use crate::hal::Board;
use crate::poll::{poll_until, Poll};

pub const CREATE: u8 = 0x01;
pub const INIT: u8 = 0x02;
pub const READ_GESTURE: u8 = 0x03;
pub const DELETE: u8 = 0x04;

pub const DEFAULT_ADDRESS: u8 = 0x39;

/// How long a gesture read waits for a hand movement.
pub const GESTURE_TIMEOUT: Duration = Duration::from_millis(8000);
pub const GESTURE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Gesture FIFO block: 8 datasets of up/down/left/right.
pub const GESTURE_BYTES: usize = 32;

pub const REG_ENABLE: u8 = 0x80;
pub const REG_GESTURE_STATUS: u8 = 0xAF;
pub const REG_GESTURE_FIFO: u8 = 0xFC;

/// Reply to a gesture read that timed out.
pub const GESTURE_NOT_DETECTED: u8 = 0;
/// Reply to a gesture read whose FIFO block came back short.
pub const GESTURE_SHORT_READ: u8 = 1;

const INIT_TABLE: &[(u8, u8)] = &[
    (REG_ENABLE, 0x08),
    (0x81, 0xB6),
    (0x8D, 0x60),
    (0x8E, 0x49),
    (0x8F, 0x08),
    (0xA0, 0x28),
    (0xA1, 0x1E),
    (0xA2, 0x80),
    (0xA3, 0x41),
    (0xA6, 0x49),
];

const POWER_ON_RESET_TABLE: &[(u8, u8)] = &[
    (REG_ENABLE, 0x00),
    (0x81, 0xFF),
    (0x8D, 0x40),
    (0x8E, 0x40),
    (0x8F, 0x00),
    (0xA0, 0x00),
    (0xA1, 0x00),
    (0xA2, 0x00),
    (0xA3, 0x00),
    (0xA6, 0x40),
];

/// Wait time, LED boost and FIFO direction, written after either table.
const COMMON_TAIL: &[(u8, u8)] = &[(0x83, 0xFF), (0x90, 0x01), (0xAA, 0x00)];

pub struct Apds9960 {
    bus: u8,
    address: u8,
}

impl Default for Apds9960 {
    fn default() -> Self {
        Self::new()
    }
}

impl Apds9960 {
    pub fn new() -> Self {
        Self {
            bus: 0,
            address: DEFAULT_ADDRESS,
        }
    }

    fn write_register(&self, board: &mut dyn Board, register: u8, value: u8) -> bool {
        board.i2c_write(self.bus, self.address, &[register, value], true)
    }

    fn read_registers(&self, board: &mut dyn Board, register: u8, buf: &mut [u8]) -> usize {
        if !board.i2c_write(self.bus, self.address, &[register], false) {
            return 0;
        }
        board.i2c_read(self.bus, self.address, buf, true)
    }

    /// Write a register table, stopping at the first unacknowledged write.
    fn configure(&self, board: &mut dyn Board, table: &[(u8, u8)]) -> bool {
        table
            .iter()
            .chain(COMMON_TAIL)
            .all(|&(register, value)| self.write_register(board, register, value))
    }
}

impl Driver for Apds9960 {
    fn name(&self) -> &str {
        "APDS9960"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Open, Capability::Transfer, Capability::Close]
    }

    fn accepts(&self, command: u8) -> bool {
        (CREATE..=DELETE).contains(&command)
    }

    fn handle(&mut self, ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes> {
        let mut cur = PayloadCursor::new(payload);
        match command {
            CREATE => {
                self.bus = cur.u8()?;
                self.address = cur.u8()?;
                ctx.board.i2c_begin(self.bus);
                info!(bus = self.bus, address = self.address, "apds9960 created");
                Ok(Bytes::new())
            }
            INIT => {
                let ok = self.configure(ctx.board, INIT_TABLE);
                if !ok {
                    warn!(bus = self.bus, address = self.address, "apds9960 init not acknowledged");
                }
                Ok(Bytes::copy_from_slice(&[u8::from(ok)]))
            }
            READ_GESTURE => {
                let board = &mut *ctx.board;
                let outcome = poll_until(ctx.clock, GESTURE_TIMEOUT, GESTURE_POLL_INTERVAL, || {
                    let mut status = [0u8; 1];
                    self.read_registers(board, REG_GESTURE_STATUS, &mut status);
                    if status[0] & 0x01 == 0 {
                        return None;
                    }
                    let mut fifo = [0u8; GESTURE_BYTES];
                    let got = self.read_registers(board, REG_GESTURE_FIFO, &mut fifo);
                    Some((got, fifo))
                });
                match outcome {
                    Poll::Ready((got, fifo)) if got == GESTURE_BYTES => {
                        Ok(Bytes::copy_from_slice(&fifo))
                    }
                    Poll::Ready((got, _)) => {
                        debug!(got, "short gesture fifo read");
                        Ok(Bytes::from_static(&[GESTURE_SHORT_READ]))
                    }
                    Poll::TimedOut { elapsed } => {
                        debug!(elapsed_ms = elapsed.as_millis() as u64, "no gesture detected");
                        Ok(Bytes::from_static(&[GESTURE_NOT_DETECTED]))
                    }
                }
            }
            DELETE => {
                if !self.configure(ctx.board, POWER_ON_RESET_TABLE) {
                    warn!(
                        bus = self.bus,
                        address = self.address,
                        "apds9960 reset not acknowledged"
                    );
                }
                Ok(Bytes::new())
            }
            _ => Ok(Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use iobridge_config::BoardConfig;

    use super::*;
    use crate::poll::{Clock, ManualClock};
    use crate::sim::SimBoard;

    struct Rig {
        board: SimBoard,
        clock: ManualClock,
        config: BoardConfig,
        sensor: Apds9960,
    }

    impl Rig {
        fn new() -> Self {
            let config = BoardConfig::preset("nano33iot").unwrap();
            let board = SimBoard::new(&config);
            board.add_i2c_device(0, DEFAULT_ADDRESS);
            let mut rig = Self {
                board,
                clock: ManualClock::new(),
                config,
                sensor: Apds9960::new(),
            };
            rig.call(CREATE, &[0, DEFAULT_ADDRESS]);
            rig
        }

        fn call(&mut self, command: u8, payload: &[u8]) -> Bytes {
            let irq = self.board.interrupts();
            let mut board = self.board.clone();
            let mut ctx = Context {
                board: &mut board,
                irq: irq.as_ref(),
                clock: &self.clock,
                config: &self.config,
            };
            self.sensor.handle(&mut ctx, command, payload).unwrap()
        }
    }

    #[test]
    fn init_writes_default_table() {
        let mut rig = Rig::new();
        assert_eq!(rig.call(INIT, &[]).as_ref(), &[1]);
        let writes = rig
            .board
            .with_i2c_device(0, DEFAULT_ADDRESS, |d| d.writes.clone())
            .unwrap();
        assert_eq!(writes.len(), INIT_TABLE.len() + COMMON_TAIL.len());
        assert_eq!(writes[0], (REG_ENABLE, 0x08));
        assert_eq!(writes.last(), Some(&(0xAA, 0x00)));
    }

    #[test]
    fn init_without_device_reports_failure() {
        let mut rig = Rig::new();
        rig.call(CREATE, &[0, 0x40]);
        assert_eq!(rig.call(INIT, &[]).as_ref(), &[0]);
    }

    #[test]
    fn gesture_returns_fifo_block() {
        let mut rig = Rig::new();
        let block: Vec<u8> = (0..32).collect();
        rig.board.with_i2c_device(0, DEFAULT_ADDRESS, |d| {
            d.registers[REG_GESTURE_STATUS as usize] = 0x01;
            d.stream(REG_GESTURE_FIFO, &block);
        });
        assert_eq!(rig.call(READ_GESTURE, &[]).as_ref(), block.as_slice());
        assert_eq!(rig.clock.now(), Duration::ZERO);
    }

    #[test]
    fn gesture_short_fifo_read_reports_one() {
        let mut rig = Rig::new();
        rig.board.with_i2c_device(0, DEFAULT_ADDRESS, |d| {
            d.registers[REG_GESTURE_STATUS as usize] = 0x01;
            d.stream(REG_GESTURE_FIFO, &[1, 2, 3]);
        });
        assert_eq!(rig.call(READ_GESTURE, &[]).as_ref(), &[GESTURE_SHORT_READ]);
    }

    #[test]
    fn gesture_times_out_at_eight_seconds() {
        let mut rig = Rig::new();
        assert_eq!(rig.call(READ_GESTURE, &[]).as_ref(), &[GESTURE_NOT_DETECTED]);
        let elapsed = rig.clock.now();
        assert!(elapsed >= GESTURE_TIMEOUT);
        assert!(elapsed <= GESTURE_TIMEOUT + GESTURE_POLL_INTERVAL);
    }

    #[test]
    fn delete_restores_power_on_defaults() {
        let mut rig = Rig::new();
        rig.call(INIT, &[]);
        rig.call(DELETE, &[]);
        let enable = rig
            .board
            .with_i2c_device(0, DEFAULT_ADDRESS, |d| d.registers[REG_ENABLE as usize])
            .unwrap();
        assert_eq!(enable, 0x00);
    }
}
