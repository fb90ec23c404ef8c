//! CAN bus through an SPI-attached MCP2515 controller.

use bytes::{BufMut, Bytes, BytesMut};
use iobridge_frame::PayloadCursor;
use tracing::{debug, info, warn};

use crate::driver::{Capability, Context, Driver, FULL_CAPABILITIES};
use crate::error::Result;

pub const ATTACH: u8 = 0x00;
pub const DETACH: u8 = 0x01;
pub const READ: u8 = 0x02;
pub const WRITE: u8 = 0x03;
pub const SET_MODE: u8 = 0x04;

/// Reply byte for any request made before a successful attach.
pub const NOT_ATTACHED: u8 = 255;

/// Classic CAN carries at most 8 data bytes.
pub const MAX_DATA: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub extended: bool,
    pub rtr: bool,
    pub data: Vec<u8>,
}

/// Vendor library surface of the CAN controller.
pub trait CanController: Send {
    /// Bring the controller up. Returns the bitrate actually configured or
    /// the controller's error code.
    fn attach(&mut self, cs_pin: u8, int_pin: u8, oscillator_hz: u32, bitrate: u32)
        -> std::result::Result<u32, u8>;
    fn detach(&mut self);
    fn read(&mut self) -> Option<CanFrame>;
    /// Returns true when the frame was queued for transmission.
    fn write(&mut self, frame: &CanFrame) -> bool;
    /// Switch between listen-only and normal mode; returns the controller's
    /// error code (0 on success).
    fn set_listen_only(&mut self, listen_only: bool) -> u16;
}

pub struct CanBus<C> {
    controller: C,
    attached: bool,
}

impl<C: CanController> CanBus<C> {
    pub fn new(controller: C) -> Self {
        Self {
            controller,
            attached: false,
        }
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl<C: CanController> Driver for CanBus<C> {
    fn name(&self) -> &str {
        "CAN"
    }

    fn capabilities(&self) -> &'static [Capability] {
        FULL_CAPABILITIES
    }

    fn accepts(&self, command: u8) -> bool {
        command <= SET_MODE
    }

    fn handle(&mut self, _ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes> {
        let mut cur = PayloadCursor::new(payload);
        if command != ATTACH && !self.attached {
            debug!(command, "can request before attach");
            return Ok(Bytes::from_static(&[NOT_ATTACHED]));
        }
        match command {
            ATTACH => {
                let cs_pin = cur.u8()?;
                let int_pin = cur.u8()?;
                let oscillator = cur.u32_le()?;
                let bitrate = cur.u32_le()?;
                match self.controller.attach(cs_pin, int_pin, oscillator, bitrate) {
                    Ok(actual) => {
                        self.attached = true;
                        info!(cs_pin, int_pin, requested = bitrate, actual, "can attached");
                        Ok(Bytes::copy_from_slice(&actual.to_le_bytes()))
                    }
                    Err(code) => {
                        warn!(cs_pin, bitrate, code, "can attach failed");
                        Ok(Bytes::copy_from_slice(&[code]))
                    }
                }
            }
            DETACH => {
                self.controller.detach();
                self.attached = false;
                Ok(Bytes::new())
            }
            READ => match self.controller.read() {
                Some(frame) => {
                    let len = frame.data.len().min(MAX_DATA);
                    let mut out = BytesMut::with_capacity(7 + len);
                    out.put_u8(u8::from(frame.extended));
                    out.put_u32_le(frame.id);
                    out.put_u8(u8::from(frame.rtr));
                    out.put_u8(len as u8);
                    out.put_slice(&frame.data[..len]);
                    Ok(out.freeze())
                }
                None => Ok(Bytes::from_static(&[0])),
            },
            WRITE => {
                let id = cur.u32_le()?;
                let extended = cur.bool()?;
                let len = (cur.u8()? as usize).min(MAX_DATA);
                let data = cur.take(len)?.to_vec();
                let sent = self.controller.write(&CanFrame {
                    id,
                    extended,
                    rtr: false,
                    data,
                });
                Ok(Bytes::copy_from_slice(&[u8::from(sent)]))
            }
            SET_MODE => {
                let listen_only = cur.bool()?;
                let code = self.controller.set_listen_only(listen_only);
                Ok(Bytes::copy_from_slice(&code.to_le_bytes()))
            }
            _ => Ok(Bytes::new()),
        }
    }
}
