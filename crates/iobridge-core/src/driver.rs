use bytes::{BufMut, Bytes, BytesMut};
use iobridge_config::BoardConfig;
use iobridge_frame::PayloadCursor;
use tracing::debug;

use crate::critical::InterruptControl;
use crate::error::{HandleError, Result};
use crate::hal::Board;
use crate::handle::Handle;
use crate::poll::Clock;
use crate::status::Status;

/// Operation groups a driver supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Open,
    Configure,
    Transfer,
    Close,
}

impl Capability {
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Configure => "configure",
            Self::Transfer => "transfer",
            Self::Close => "close",
        }
    }
}

/// Everything a driver may touch while it runs.
pub struct Context<'a> {
    pub board: &'a mut dyn Board,
    pub irq: &'a dyn InterruptControl,
    pub clock: &'a dyn Clock,
    pub config: &'a BoardConfig,
}

/// A standard-space library.
///
/// `accepts` is consulted before `handle`; a command it rejects is dropped
/// by the dispatcher without a reply. For an accepted command the returned
/// bytes become the reply result (possibly empty). An `Err` is reported to
/// the client as a single [`Status::InvalidPayload`] byte.
pub trait Driver: Send {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    fn accepts(&self, command: u8) -> bool;

    fn handle(&mut self, ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes>;

    /// Runs once when the server starts.
    fn setup(&mut self, _ctx: &mut Context<'_>) {}

    /// Runs on every scheduler tick while the scheduler is running.
    fn on_tick(&mut self, _ctx: &mut Context<'_>) {}
}

/// Open/Configure/Transfer/Close, the set every handle-based family has.
pub const FULL_CAPABILITIES: &[Capability] = &[
    Capability::Open,
    Capability::Configure,
    Capability::Transfer,
    Capability::Close,
];

/// Largest standard-space result (the length travels as one byte).
pub const MAX_RESULT: usize = u8::MAX as usize;

pub(crate) fn status_only(status: Status) -> Bytes {
    Bytes::copy_from_slice(&[u8::from(status)])
}

pub(crate) fn status_with(status: Status, data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(1 + data.len());
    out.put_u8(status.into());
    out.put_slice(data);
    out.freeze()
}

pub(crate) fn handle_reply(handle: Handle) -> Bytes {
    Bytes::copy_from_slice(&handle.to_le_bytes())
}

pub(crate) fn invalid_handle(family: &'static str, command: u8, err: HandleError) -> Bytes {
    debug!(family, command, error = %err, "rejected handle");
    status_only(Status::InvalidHandle)
}

pub(crate) fn read_handle(cur: &mut PayloadCursor<'_>) -> Result<Handle> {
    Ok(Handle::from_raw(cur.u32_le()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_helpers_layout() {
        assert_eq!(status_only(Status::BusError).as_ref(), &[0x01]);
        assert_eq!(
            status_with(Status::Success, &[9, 8]).as_ref(),
            &[0x00, 9, 8]
        );
        assert_eq!(
            handle_reply(Handle::from_raw(0x0102_0003)).as_ref(),
            &[3, 0, 2, 1]
        );
    }

    #[test]
    fn handle_parsing_is_little_endian() {
        let data = [0x05, 0x00, 0x01, 0x00];
        let mut cur = PayloadCursor::new(&data);
        assert_eq!(read_handle(&mut cur).unwrap().raw(), 0x0001_0005);
        assert!(read_handle(&mut cur).is_err());
    }

    #[test]
    fn invalid_handle_is_single_status_byte() {
        let reply = invalid_handle("digital", 0x02, HandleError::Null);
        assert_eq!(reply.as_ref(), &[0xFE]);
    }

    #[test]
    fn capability_names() {
        let names: Vec<&str> = FULL_CAPABILITIES.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["open", "configure", "transfer", "close"]);
    }
}
