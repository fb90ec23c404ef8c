//! Serial communication interfaces (UARTs other than the host link).

use std::time::Duration;

use bytes::Bytes;
use iobridge_frame::PayloadCursor;
use tracing::{debug, info};

use super::{CLOSE, OPEN};
use crate::driver::{
    handle_reply, invalid_handle, read_handle, status_only, status_with, Capability, Context,
    Driver, FULL_CAPABILITIES, MAX_RESULT,
};
use crate::error::Result;
use crate::hal::SciFormat;
use crate::handle::{Handle, HandleRegistry};
use crate::poll::{poll_until, Poll};
use crate::status::Status;

pub const SET_BAUD: u8 = 0x02;
pub const SET_FRAME_FORMAT: u8 = 0x03;
pub const SET_TIMEOUT: u8 = 0x04;
pub const TRANSMIT: u8 = 0x05;
pub const RECEIVE: u8 = 0x06;

pub const DEFAULT_BAUD: u32 = 9600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
pub const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Largest RECEIVE: status and count bytes share the result with the data.
pub const MAX_RECEIVE: usize = MAX_RESULT - 2;

const FAMILY: &str = "SCI";

#[derive(Debug, Clone, Copy)]
struct Session {
    baud: u32,
    format: SciFormat,
    timeout: Duration,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            format: SciFormat::DEFAULT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// SCI ports; the slot index is the port number.
pub struct Sci {
    ports: HandleRegistry<Session>,
}

impl Sci {
    pub fn new(slots: usize) -> Self {
        Self {
            ports: HandleRegistry::new(FAMILY, slots),
        }
    }

    fn restart(ctx: &mut Context<'_>, port: u8, session: &Session) {
        ctx.board.sci_end(port);
        ctx.board.sci_begin(port, session.baud, session.format);
    }
}

impl Driver for Sci {
    fn name(&self) -> &str {
        FAMILY
    }

    fn capabilities(&self) -> &'static [Capability] {
        FULL_CAPABILITIES
    }

    fn accepts(&self, command: u8) -> bool {
        command <= RECEIVE
    }

    fn handle(&mut self, ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes> {
        let mut cur = PayloadCursor::new(payload);
        if command == OPEN {
            let port = cur.u8()?;
            if !ctx.config.sci_port_allowed(port) {
                debug!(port, "sci port not available");
                return Ok(handle_reply(Handle::NULL));
            }
            let session = Session::default();
            let handle = self.ports.open(port as usize, session);
            if !handle.is_null() {
                ctx.board.sci_begin(port, session.baud, session.format);
                info!(port, baud = session.baud, "sci port opened");
            }
            return Ok(handle_reply(handle));
        }

        let handle = read_handle(&mut cur)?;
        if command == CLOSE {
            if let Ok(index) = self.ports.to_index(handle) {
                self.ports.close(handle);
                ctx.board.sci_end(index as u8);
            }
            return Ok(Bytes::new());
        }

        let port = match self.ports.to_index(handle) {
            Ok(index) => index as u8,
            Err(err) => return Ok(invalid_handle(FAMILY, command, err)),
        };
        let session = self.ports.get_mut(handle)?;
        match command {
            SET_BAUD => {
                let baud = cur.u32_le()?;
                if baud == 0 {
                    return Ok(status_only(Status::Failure));
                }
                session.baud = baud;
                Self::restart(ctx, port, session);
                Ok(status_only(Status::Success))
            }
            SET_FRAME_FORMAT => {
                let data_bits = cur.u8()?;
                let parity = cur.u8()?;
                let stop_bits = cur.u8()?;
                let Some(format) = SciFormat::from_wire(data_bits, parity, stop_bits) else {
                    debug!(port, data_bits, parity, stop_bits, "unsupported sci frame format");
                    return Ok(status_only(Status::FrameError));
                };
                session.format = format;
                Self::restart(ctx, port, session);
                Ok(status_only(Status::Success))
            }
            SET_TIMEOUT => {
                session.timeout = Duration::from_millis(u64::from(cur.u32_le()?));
                Ok(status_only(Status::Success))
            }
            TRANSMIT => {
                let data = cur.rest();
                let sent = ctx.board.sci_write(port, data);
                if sent == data.len() {
                    Ok(status_only(Status::Success))
                } else {
                    debug!(port, sent, len = data.len(), "short sci write");
                    Ok(status_only(Status::Failure))
                }
            }
            RECEIVE => {
                let n = cur.u8()? as usize;
                if n > MAX_RECEIVE {
                    return Ok(status_only(Status::Failure));
                }
                let timeout = session.timeout;
                let board = &mut *ctx.board;
                let outcome = poll_until(ctx.clock, timeout, RECEIVE_POLL_INTERVAL, || {
                    let available = board.sci_available(port);
                    (available >= n).then_some(available)
                });
                let mut data = vec![0u8; n];
                let (status, available) = match outcome {
                    Poll::Ready(available) => {
                        board.sci_read(port, &mut data);
                        (Status::Success, available)
                    }
                    Poll::TimedOut { elapsed } => {
                        let available = board.sci_available(port);
                        debug!(
                            port,
                            wanted = n,
                            available,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "sci receive timed out"
                        );
                        (Status::DataNotAvailable, available)
                    }
                };
                let mut result = Vec::with_capacity(n + 1);
                result.push(available.min(u8::MAX as usize) as u8);
                result.extend_from_slice(&data);
                Ok(status_with(status, &result))
            }
            _ => Ok(Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Parity;
    use crate::peripherals::testing::{with_handle, Rig};
    use crate::poll::Clock;

    fn rig() -> (Rig, Sci) {
        let rig = Rig::new("mega2560");
        let sci = Sci::new(rig.config.sci_slots());
        (rig, sci)
    }

    #[test]
    fn open_uses_defaults_and_respects_port_range() {
        let (rig, mut sci) = rig();
        let h = rig.open(&mut sci, &[2]);
        assert_eq!(h.raw(), 3);
        let port = rig.board.state().sci[&2].clone();
        assert!(port.open);
        assert_eq!(port.baud, DEFAULT_BAUD);
        assert_eq!(port.format, Some(SciFormat::DEFAULT));

        assert!(rig.open(&mut sci, &[0]).is_null());
        assert!(rig.open(&mut sci, &[4]).is_null());
    }

    #[test]
    fn board_without_free_ports_opens_nothing() {
        let rig = Rig::new("uno");
        let mut sci = Sci::new(rig.config.sci_slots());
        assert!(rig.open(&mut sci, &[0]).is_null());
        assert!(rig.open(&mut sci, &[1]).is_null());
    }

    #[test]
    fn baud_and_frame_format() {
        let (rig, mut sci) = rig();
        let h = rig.open(&mut sci, &[1]);
        let baud = with_handle(h, &115_200u32.to_le_bytes());
        assert_eq!(rig.call(&mut sci, SET_BAUD, &baud).as_ref(), &[0x00]);
        assert_eq!(
            rig.call(&mut sci, SET_FRAME_FORMAT, &with_handle(h, &[7, 2, 2])).as_ref(),
            &[0x00]
        );
        let port = rig.board.state().sci[&1].clone();
        assert_eq!(port.baud, 115_200);
        assert_eq!(
            port.format,
            Some(SciFormat {
                data_bits: 7,
                parity: Parity::Odd,
                stop_bits: 2
            })
        );
        assert_eq!(
            rig.call(&mut sci, SET_FRAME_FORMAT, &with_handle(h, &[9, 0, 1])).as_ref(),
            &[0x03]
        );
    }

    #[test]
    fn transmit_writes_bytes() {
        let (rig, mut sci) = rig();
        let h = rig.open(&mut sci, &[1]);
        assert_eq!(rig.call(&mut sci, TRANSMIT, &with_handle(h, b"hi")).as_ref(), &[0x00]);
        assert_eq!(rig.board.sci_tx(1), b"hi");
    }

    #[test]
    fn receive_returns_available_and_data() {
        let (rig, mut sci) = rig();
        let h = rig.open(&mut sci, &[1]);
        rig.board.push_sci_rx(1, &[1, 2, 3, 4]);
        let reply = rig.call(&mut sci, RECEIVE, &with_handle(h, &[3]));
        assert_eq!(reply.as_ref(), &[0x00, 4, 1, 2, 3]);
        assert_eq!(rig.clock.now(), Duration::ZERO);
    }

    #[test]
    fn receive_times_out_and_leaves_bytes() {
        let (rig, mut sci) = rig();
        let h = rig.open(&mut sci, &[1]);
        let timeout = with_handle(h, &250u32.to_le_bytes());
        rig.call(&mut sci, SET_TIMEOUT, &timeout);
        rig.board.push_sci_rx(1, &[9]);

        let reply = rig.call(&mut sci, RECEIVE, &with_handle(h, &[3]));
        assert_eq!(reply.as_ref(), &[0x02, 1, 0, 0, 0]);
        assert_eq!(rig.clock.now(), Duration::from_millis(250));

        let reply = rig.call(&mut sci, RECEIVE, &with_handle(h, &[1]));
        assert_eq!(reply.as_ref(), &[0x00, 1, 9]);
    }

    #[test]
    fn oversized_receive_fails() {
        let (rig, mut sci) = rig();
        let h = rig.open(&mut sci, &[1]);
        let n = MAX_RECEIVE as u8 + 1;
        assert_eq!(rig.call(&mut sci, RECEIVE, &with_handle(h, &[n])).as_ref(), &[0xFF]);
    }
}
