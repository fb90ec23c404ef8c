//! Command dispatch for the standard and custom spaces.

use bytes::Bytes;
use iobridge_frame::{is_custom_id, CustomRequest, ResponseBuffer, StandardReply, StandardRequest};
use tracing::{debug, trace, warn};

use crate::custom::CustomSpace;
use crate::driver::{status_only, Context, MAX_RESULT};
use crate::registry::PeripheralRegistry;
use crate::status::Status;

/// Routes decoded bodies to libraries and frames their replies.
///
/// Drivers never raise through the dispatcher: a driver error becomes a
/// single [`Status::InvalidPayload`] byte, and anything that doesn't route
/// (unknown library, rejected command, unknown custom ID) is dropped
/// without a reply.
pub struct Dispatcher {
    registry: PeripheralRegistry,
    custom: CustomSpace,
    tx: ResponseBuffer,
    custom_handled: bool,
}

impl Dispatcher {
    pub fn new(registry: PeripheralRegistry, custom: CustomSpace, tx_capacity: usize) -> Self {
        Self {
            registry,
            custom,
            tx: ResponseBuffer::new(tx_capacity),
            custom_handled: false,
        }
    }

    pub fn registry(&self) -> &PeripheralRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PeripheralRegistry {
        &mut self.registry
    }

    pub fn custom(&self) -> &CustomSpace {
        &self.custom
    }

    /// Dispatch one standard-space body to library `library`.
    ///
    /// Returns the framed reply body, or `None` when the command is dropped.
    pub fn dispatch_standard(
        &mut self,
        ctx: &mut Context<'_>,
        library: u8,
        body: &Bytes,
    ) -> Option<Bytes> {
        let request = match StandardRequest::decode(body) {
            Ok(request) => request,
            Err(err) => {
                debug!(library, error = %err, "undecodable standard body");
                return None;
            }
        };
        let command = request.command;
        let Some(driver) = self.registry.resolve(library) else {
            debug!(library, command, "no library at index");
            return None;
        };
        if !driver.accepts(command) {
            debug!(library = driver.name(), command, "command not accepted");
            return None;
        }

        let result = match driver.handle(ctx, command, &request.payload) {
            Ok(result) if result.len() > MAX_RESULT => {
                warn!(library = driver.name(), command, len = result.len(), "result too long");
                status_only(Status::Failure)
            }
            Ok(result) => result,
            Err(err) => {
                debug!(library = driver.name(), command, error = %err, "command failed");
                status_only(Status::InvalidPayload)
            }
        };
        trace!(library, command, len = result.len(), "standard reply");
        StandardReply::new(command, result)
            .to_bytes()
            .inspect_err(|err| warn!(library, command, error = %err, "reply framing failed"))
            .ok()
    }

    /// Dispatch one custom-space body, appending its output to the shared
    /// transmit buffer.
    ///
    /// Returns whether the ID was handled. A handler that fails leaves the
    /// buffer as it was before the command.
    pub fn dispatch_custom(&mut self, ctx: &mut Context<'_>, body: &Bytes) -> bool {
        let request = match CustomRequest::decode(body) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "undecodable custom body");
                return false;
            }
        };
        if !is_custom_id(request.id) {
            debug!(id = request.id, "id outside custom space");
            return false;
        }

        let mark = self.tx.offset();
        match self.custom.handle(ctx, request.id, &request.payload, &mut self.tx) {
            Ok(handled) => {
                self.custom_handled |= handled;
                handled
            }
            Err(err) => {
                debug!(id = request.id, error = %err, "custom command failed");
                self.tx.truncate(mark);
                false
            }
        }
    }

    /// Flush the transmit buffer as one reply body.
    ///
    /// Returns `None` when no custom command was handled since the last
    /// flush; otherwise the accumulated bytes (possibly empty).
    pub fn take_custom_reply(&mut self) -> Option<Bytes> {
        if !std::mem::take(&mut self.custom_handled) {
            self.tx.clear();
            return None;
        }
        Some(self.tx.take())
    }

    /// Run every library's `setup` in registration order.
    pub fn setup_all(&mut self, ctx: &mut Context<'_>) {
        for driver in self.registry.iter_mut() {
            driver.setup(ctx);
        }
    }

    /// Run every library's `on_tick` in registration order.
    pub fn tick_all(&mut self, ctx: &mut Context<'_>) {
        for driver in self.registry.iter_mut() {
            driver.on_tick(ctx);
        }
    }

    /// Release interrupt-holding custom state.
    pub fn release(&mut self, ctx: &mut Context<'_>) {
        self.custom.release(ctx);
    }
}

#[cfg(test)]
mod tests {
    use iobridge_config::BoardConfig;

    use super::*;
    use crate::custom::{SERVO_ATTACH, SERVO_READ, SERVO_WRITE};
    use crate::driver::Driver;
    use crate::error::{CoreError, Result};
    use crate::poll::ManualClock;
    use crate::sim::SimBoard;

    struct Echo;

    impl Driver for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        fn accepts(&self, command: u8) -> bool {
            command < 0x10
        }

        fn handle(&mut self, _ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes> {
            match command {
                0x0F => Err(CoreError::Unsupported {
                    family: "Echo",
                    message: "always fails".into(),
                }),
                0x0E => Ok(Bytes::from(vec![0u8; 300])),
                _ => Ok(Bytes::copy_from_slice(payload)),
            }
        }
    }

    struct Rig {
        board: SimBoard,
        clock: ManualClock,
        config: BoardConfig,
        dispatcher: Dispatcher,
    }

    impl Rig {
        fn new() -> Self {
            let config = BoardConfig::preset("uno").unwrap();
            let mut registry = PeripheralRegistry::new();
            registry.register(Box::new(Echo)).unwrap();
            Self {
                board: SimBoard::new(&config),
                clock: ManualClock::new(),
                dispatcher: Dispatcher::new(registry, CustomSpace::new(&config), 64),
                config,
            }
        }

        fn standard(&mut self, library: u8, body: &[u8]) -> Option<Bytes> {
            let irq = self.board.interrupts();
            let mut board = self.board.clone();
            let mut ctx = Context {
                board: &mut board,
                irq: irq.as_ref(),
                clock: &self.clock,
                config: &self.config,
            };
            self.dispatcher
                .dispatch_standard(&mut ctx, library, &Bytes::copy_from_slice(body))
        }

        fn custom(&mut self, id: u16, payload: &[u8]) -> bool {
            let irq = self.board.interrupts();
            let mut board = self.board.clone();
            let mut ctx = Context {
                board: &mut board,
                irq: irq.as_ref(),
                clock: &self.clock,
                config: &self.config,
            };
            let body = CustomRequest::new(id, payload.to_vec()).to_bytes();
            self.dispatcher.dispatch_custom(&mut ctx, &body)
        }
    }

    #[test]
    fn echo_reply_carries_payload_and_length() {
        let mut rig = Rig::new();
        let reply = rig.standard(0, &[0x03, 0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(reply.as_ref(), &[0x03, 3, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn empty_payload_still_replies() {
        let mut rig = Rig::new();
        assert_eq!(rig.standard(0, &[0x05]).unwrap().as_ref(), &[0x05, 0]);
    }

    #[test]
    fn routing_misses_produce_no_reply() {
        let mut rig = Rig::new();
        assert!(rig.standard(0, &[0xEE, 1, 2]).is_none());
        assert!(rig.standard(9, &[0x01]).is_none());
        assert!(rig.standard(0, &[]).is_none());
    }

    #[test]
    fn driver_error_is_invalid_payload() {
        let mut rig = Rig::new();
        assert_eq!(rig.standard(0, &[0x0F]).unwrap().as_ref(), &[0x0F, 1, 0xFD]);
    }

    #[test]
    fn oversized_result_is_failure() {
        let mut rig = Rig::new();
        assert_eq!(rig.standard(0, &[0x0E]).unwrap().as_ref(), &[0x0E, 1, 0xFF]);
    }

    #[test]
    fn chained_custom_commands_flush_as_one_reply() {
        let mut rig = Rig::new();
        assert!(rig.custom(SERVO_ATTACH, &[9, 0x20, 0x03, 0x60, 0x09]));
        assert!(rig.custom(SERVO_WRITE, &[9, 45]));
        assert!(rig.custom(SERVO_READ, &[9]));
        assert!(rig.custom(SERVO_WRITE, &[9, 90]));
        assert!(rig.custom(SERVO_READ, &[9]));
        assert_eq!(rig.dispatcher.take_custom_reply().unwrap().as_ref(), &[45, 90]);
        assert!(rig.dispatcher.take_custom_reply().is_none());
    }

    #[test]
    fn handled_command_without_output_flushes_empty() {
        let mut rig = Rig::new();
        assert!(rig.custom(SERVO_ATTACH, &[9, 0x20, 0x03, 0x60, 0x09]));
        assert_eq!(rig.dispatcher.take_custom_reply(), Some(Bytes::new()));
    }

    #[test]
    fn unknown_custom_id_has_no_reply() {
        let mut rig = Rig::new();
        assert!(!rig.custom(0xF1EE, &[1]));
        assert!(!rig.custom(0x1234, &[1]));
        assert!(rig.dispatcher.take_custom_reply().is_none());
    }

    #[test]
    fn failed_custom_command_rolls_back() {
        let mut rig = Rig::new();
        rig.custom(SERVO_ATTACH, &[9, 0x20, 0x03, 0x60, 0x09]);
        rig.custom(SERVO_READ, &[9]);
        assert!(!rig.custom(SERVO_READ, &[]));
        assert_eq!(rig.dispatcher.take_custom_reply().unwrap().as_ref(), &[90]);
    }
}
