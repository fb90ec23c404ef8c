//! The IO server: transport pump, dispatcher and scheduler wired together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use iobridge_config::BoardConfig;
use iobridge_frame::{
    decode_packet, encode_packet, resync, route_name, Packet, PacketConfig, PayloadCursor,
    StandardReply, StandardRequest, CUSTOM, HEADER_SIZE, SERVER,
};
use iobridge_transport::{Transport, TransportError};
use tracing::{debug, info, trace, warn};

use crate::critical::InterruptControl;
use crate::custom::CustomSpace;
use crate::dispatch::Dispatcher;
use crate::driver::{status_only, Context, Driver, MAX_RESULT};
use crate::error::Result;
use crate::hal::{Board, PinMode};
use crate::peripherals::{AnalogInput, DigitalIo, I2c, Pwm, Sci, Spi};
use crate::poll::{Clock, SystemClock};
use crate::registry::PeripheralRegistry;
use crate::scheduler::{Scheduler, TickTimer};
use crate::status::Status;

pub const LIST_LIBRARIES: u8 = 0x00;
pub const CONFIGURE_SCHEDULER: u8 = 0x01;
pub const STOP_SCHEDULER: u8 = 0x02;
pub const ECHO: u8 = 0x03;
pub const BOARD_INFO: u8 = 0x04;

/// Pins below this are the host serial link on every supported board.
const FIRST_USER_PIN: u8 = 2;

/// Server loop behaviour.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Sleep between polls while the scheduler is stopped or no tick is due.
    pub idle_interval: Duration,
    /// Bytes pulled from the transport per receive call.
    pub recv_chunk: usize,
    /// Packet limits for incoming requests.
    pub packet: PacketConfig,
    /// Send a reply for a custom packet whose handled commands wrote
    /// nothing. When false such packets are acknowledged silently.
    pub reply_empty_custom: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(1),
            recv_chunk: 256,
            packet: PacketConfig::default(),
            reply_empty_custom: true,
        }
    }
}

/// Board-facing half of the server, kept apart from the dispatcher so both
/// can be borrowed at once.
struct Hardware<B> {
    board: B,
    irq: Arc<dyn InterruptControl>,
    clock: Arc<dyn Clock>,
    config: BoardConfig,
}

impl<B: Board> Hardware<B> {
    fn context(&mut self) -> Context<'_> {
        Context {
            board: &mut self.board,
            irq: self.irq.as_ref(),
            clock: self.clock.as_ref(),
            config: &self.config,
        }
    }
}

/// Builds an [`IoServer`] in the init phase.
///
/// The standard families are registered first, in a fixed order
/// (DigitalIO 0, AnalogInput 1, PWM 2, I2C 3, SPI 4, SCI 5); extra
/// libraries follow in the order they are added.
pub struct IoServerBuilder {
    config: BoardConfig,
    standard: bool,
    libraries: Vec<Box<dyn Driver>>,
    clock: Option<Arc<dyn Clock>>,
    timer: Option<Box<dyn TickTimer>>,
    server_config: ServerConfig,
}

impl IoServerBuilder {
    pub fn new(config: BoardConfig) -> Self {
        Self {
            config,
            standard: true,
            libraries: Vec::new(),
            clock: None,
            timer: None,
            server_config: ServerConfig::default(),
        }
    }

    /// Skip the standard families; only added libraries are registered.
    pub fn without_standard_libraries(mut self) -> Self {
        self.standard = false;
        self
    }

    pub fn with_library(mut self, driver: Box<dyn Driver>) -> Self {
        self.libraries.push(driver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_timer(mut self, timer: Box<dyn TickTimer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn with_server_config(mut self, config: ServerConfig) -> Self {
        self.server_config = config;
        self
    }

    pub fn build<T, B>(
        self,
        transport: T,
        board: B,
        irq: Arc<dyn InterruptControl>,
    ) -> Result<IoServer<T, B>>
    where
        T: Transport,
        B: Board,
    {
        self.config.check()?;
        let config = self.config;

        let mut registry = PeripheralRegistry::new();
        if self.standard {
            registry.register(Box::new(DigitalIo::new(config.digital_pins)))?;
            registry.register(Box::new(AnalogInput::new(config.analog_pins)))?;
            registry.register(Box::new(Pwm::new(config.digital_pins)))?;
            registry.register(Box::new(I2c::new(config.i2c_buses)))?;
            registry.register(Box::new(Spi::new(config.spi_buses)))?;
            registry.register(Box::new(Sci::new(config.sci_slots())))?;
        }
        for driver in self.libraries {
            registry.register(driver)?;
        }

        let custom = CustomSpace::new(&config);
        let dispatcher = Dispatcher::new(registry, custom, config.tx_buffer_size);
        let scheduler = match self.timer {
            Some(timer) => Scheduler::new().with_timer(timer),
            None => Scheduler::new(),
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);

        Ok(IoServer {
            transport,
            hw: Hardware {
                board,
                irq,
                clock,
                config,
            },
            dispatcher,
            scheduler,
            rx: BytesMut::new(),
            tx: BytesMut::new(),
            server_config: self.server_config,
            started: false,
        })
    }
}

pub struct IoServer<T, B> {
    transport: T,
    hw: Hardware<B>,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    rx: BytesMut,
    tx: BytesMut,
    server_config: ServerConfig,
    started: bool,
}

impl<T: Transport, B: Board> IoServer<T, B> {
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn board(&self) -> &B {
        &self.hw.board
    }

    pub fn config(&self) -> &BoardConfig {
        &self.hw.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn library_names(&self) -> Vec<&str> {
        self.dispatcher.registry().names()
    }

    /// Open the transport, park user pins as inputs and run every library's
    /// `setup`. Idempotent.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.transport.open()?;
        self.board_init();
        let mut ctx = self.hw.context();
        self.dispatcher.setup_all(&mut ctx);
        self.started = true;
        info!(
            board = %self.hw.config.name,
            transport = self.transport.name(),
            libraries = self.dispatcher.registry().len(),
            "io server started"
        );
        Ok(())
    }

    fn board_init(&mut self) {
        let config = &self.hw.config;
        for pin in FIRST_USER_PIN..config.digital_pins {
            if !config.is_reserved_pin(pin) {
                self.hw.board.pin_mode(pin, PinMode::Input);
            }
        }
    }

    /// One scheduler tick: pump at most one frame, then, while running, run
    /// every library's `on_tick` in registration order.
    ///
    /// Frames are still pumped while the scheduler is stopped so a client can
    /// configure it.
    pub fn tick(&mut self) -> Result<bool> {
        let pumped = self.pump()?;
        if self.scheduler.is_running() {
            let mut ctx = self.hw.context();
            self.dispatcher.tick_all(&mut ctx);
        }
        Ok(pumped)
    }

    /// Receive and handle at most one packet. Returns whether one was handled.
    pub fn pump(&mut self) -> Result<bool> {
        self.fill_rx()?;
        let max_body = self.server_config.packet.max_body_size;
        let packet = loop {
            match decode_packet(&mut self.rx, max_body) {
                Ok(Some(packet)) => break packet,
                Ok(None) => return Ok(false),
                Err(err) => {
                    let skipped = resync(&mut self.rx);
                    warn!(error = %err, skipped, "dropping corrupt input");
                }
            }
        };
        trace!(route = route_name(packet.route), len = packet.body.len(), "packet received");
        if let Some(reply) = self.route(&packet)? {
            self.send(packet.route, &reply)?;
        }
        Ok(true)
    }

    fn fill_rx(&mut self) -> Result<()> {
        let mut chunk = vec![0u8; self.server_config.recv_chunk.max(1)];
        let limit = HEADER_SIZE + self.server_config.packet.max_body_size;
        while self.rx.len() < limit {
            let n = match self.transport.recv(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
                Err(err) => {
                    // The transport has already dropped the client.
                    warn!(error = %err, "receive failed");
                    self.rx.clear();
                    break;
                }
            };
            self.rx.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    fn route(&mut self, packet: &Packet) -> Result<Option<Bytes>> {
        let reply = match packet.route {
            SERVER => self.handle_server(&packet.body),
            CUSTOM => {
                let mut ctx = self.hw.context();
                self.dispatcher.dispatch_custom(&mut ctx, &packet.body);
                let reply_empty = self.server_config.reply_empty_custom;
                self.dispatcher
                    .take_custom_reply()
                    .filter(|reply| reply_empty || !reply.is_empty())
            }
            library => {
                let mut ctx = self.hw.context();
                self.dispatcher.dispatch_standard(&mut ctx, library, &packet.body)
            }
        };
        Ok(reply)
    }

    fn send(&mut self, route: u8, body: &[u8]) -> Result<()> {
        self.tx.clear();
        encode_packet(route, body, &mut self.tx)?;
        match self.transport.send_all(&self.tx) {
            Ok(()) => Ok(()),
            Err(TransportError::NotConnected | TransportError::Closed) => {
                debug!(route = route_name(route), "reply dropped, no client");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn handle_server(&mut self, body: &Bytes) -> Option<Bytes> {
        let request = StandardRequest::decode(body).ok()?;
        let command = request.command;
        let result = match command {
            LIST_LIBRARIES => {
                let names = self.dispatcher.registry().names();
                let mut out = BytesMut::new();
                out.put_u8(names.len() as u8);
                for name in names {
                    let name = &name.as_bytes()[..name.len().min(u8::MAX as usize)];
                    out.put_u8(name.len() as u8);
                    out.put_slice(name);
                }
                out.freeze()
            }
            CONFIGURE_SCHEDULER => {
                let mut cur = PayloadCursor::new(&request.payload);
                let status = match cur.f32_le() {
                    Ok(rate) => match self.scheduler.configure(f64::from(rate)) {
                        Ok(_) => Status::Success,
                        Err(err) => {
                            warn!(error = %err, "scheduler configure refused");
                            Status::Failure
                        }
                    },
                    Err(_) => Status::InvalidPayload,
                };
                status_only(status)
            }
            STOP_SCHEDULER => {
                self.scheduler.stop();
                Bytes::new()
            }
            ECHO if request.payload.len() > MAX_RESULT => {
                warn!(len = request.payload.len(), "echo payload too long");
                status_only(Status::Failure)
            }
            ECHO => request.payload,
            BOARD_INFO => self.board_info(),
            _ => {
                debug!(command, "unknown server command");
                return None;
            }
        };
        StandardReply::new(command, result)
            .to_bytes()
            .inspect_err(|err| warn!(command, error = %err, "server reply framing failed"))
            .ok()
    }

    /// `[name len][name][digital, analog, i2c, spi, sci slots, adc bits,
    /// max encoders, max neopixels]`
    fn board_info(&self) -> Bytes {
        let config = &self.hw.config;
        let name = &config.name.as_bytes()[..config.name.len().min(64)];
        let mut out = BytesMut::with_capacity(name.len() + 9);
        out.put_u8(name.len() as u8);
        out.put_slice(name);
        out.put_u8(config.digital_pins);
        out.put_u8(config.analog_pins);
        out.put_u8(config.i2c_buses);
        out.put_u8(config.spi_buses);
        out.put_u8(config.sci_slots().min(u8::MAX as usize) as u8);
        out.put_u8(config.adc_resolution_bits);
        out.put_u8(config.max_encoders);
        out.put_u8(config.max_neopixels);
        out.freeze()
    }

    /// Soft-real-time loop until `shutdown` is set.
    ///
    /// While the scheduler runs, a tick fires whenever one is due on the
    /// server clock; while it is stopped, frames are pumped every idle
    /// interval.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.start()?;
        while !shutdown.load(Ordering::Relaxed) {
            let now = self.hw.clock.now();
            if self.scheduler.is_running() {
                if self.scheduler.due(now) {
                    self.tick()?;
                    continue;
                }
                let wait = self
                    .scheduler
                    .until_due(now)
                    .unwrap_or_default()
                    .min(self.server_config.idle_interval);
                self.hw.clock.sleep(wait);
            } else if !self.tick()? {
                self.hw.clock.sleep(self.server_config.idle_interval);
            }
        }
        self.shutdown()
    }

    /// Stop the scheduler, release interrupts and close the transport.
    pub fn shutdown(&mut self) -> Result<()> {
        self.scheduler.stop();
        let mut ctx = self.hw.context();
        self.dispatcher.release(&mut ctx);
        self.transport.close()?;
        self.started = false;
        info!("io server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use iobridge_transport::Loopback;

    use super::*;
    use crate::poll::ManualClock;
    use crate::sim::SimBoard;

    struct Rig {
        server: IoServer<Loopback, SimBoard>,
        client: Loopback,
        board: SimBoard,
        rx: BytesMut,
    }

    impl Rig {
        fn new(preset: &str) -> Self {
            Self::with_server_config(preset, ServerConfig::default())
        }

        fn with_server_config(preset: &str, server_config: ServerConfig) -> Self {
            let config = BoardConfig::preset(preset).unwrap();
            let board = SimBoard::new(&config);
            let (server_end, client) = Loopback::pair();
            let mut server = IoServerBuilder::new(config)
                .with_clock(Arc::new(ManualClock::new()))
                .with_server_config(server_config)
                .build(server_end, board.clone(), board.interrupts())
                .unwrap();
            server.start().unwrap();
            Self {
                server,
                client,
                board,
                rx: BytesMut::new(),
            }
        }

        fn send(&mut self, route: u8, body: &[u8]) {
            let mut buf = BytesMut::new();
            encode_packet(route, body, &mut buf).unwrap();
            self.client.send_all(&buf).unwrap();
        }

        fn recv(&mut self) -> Option<Packet> {
            let mut chunk = [0u8; 512];
            loop {
                let n = self.client.recv(&mut chunk).unwrap();
                if n == 0 {
                    break;
                }
                self.rx.extend_from_slice(&chunk[..n]);
            }
            decode_packet(&mut self.rx, 4096).unwrap()
        }

        fn request(&mut self, route: u8, body: &[u8]) -> Option<Packet> {
            self.send(route, body);
            assert!(self.server.tick().unwrap());
            self.recv()
        }
    }

    #[test]
    fn standard_libraries_register_in_order() {
        let rig = Rig::new("uno");
        assert_eq!(
            rig.server.library_names(),
            vec!["DigitalIO", "AnalogInput", "PWM", "I2C", "SPI", "SCI"]
        );
    }

    #[test]
    fn board_init_parks_user_pins() {
        let rig = Rig::new("uno");
        assert_eq!(rig.board.mode(0), None);
        assert_eq!(rig.board.mode(1), None);
        assert_eq!(rig.board.mode(2), Some(PinMode::Input));
        assert_eq!(rig.board.mode(19), Some(PinMode::Input));
    }

    #[test]
    fn digital_open_over_the_wire() {
        let mut rig = Rig::new("uno");
        let packet = rig.request(0, &[0x00, 13, 1]).unwrap();
        assert_eq!(packet.route, 0);
        let reply = StandardReply::decode(&packet.body).unwrap();
        assert_eq!(reply.command, 0x00);
        assert_eq!(reply.result.as_ref(), &14u32.to_le_bytes());
        assert_eq!(rig.board.mode(13), Some(PinMode::Output));
    }

    #[test]
    fn list_libraries_and_echo() {
        let mut rig = Rig::new("uno");
        let packet = rig.request(SERVER, &[LIST_LIBRARIES]).unwrap();
        let reply = StandardReply::decode(&packet.body).unwrap();
        assert_eq!(reply.result[0], 6);
        assert_eq!(&reply.result[1..11], b"\x09DigitalIO");

        let packet = rig.request(SERVER, &[ECHO, 1, 2, 3]).unwrap();
        assert_eq!(packet.body.as_ref(), &[ECHO, 3, 1, 2, 3]);
    }

    #[test]
    fn oversized_echo_fails_instead_of_going_silent() {
        let mut rig = Rig::new("uno");
        let mut body = vec![ECHO];
        body.extend_from_slice(&[0xAB; 255]);
        let packet = rig.request(SERVER, &body).unwrap();
        assert_eq!(packet.body.len(), 2 + 255);

        body.push(0xAB);
        let packet = rig.request(SERVER, &body).unwrap();
        assert_eq!(packet.body.as_ref(), &[ECHO, 1, 0xFF]);
    }

    #[test]
    fn board_info_reports_counts() {
        let mut rig = Rig::new("uno");
        let packet = rig.request(SERVER, &[BOARD_INFO]).unwrap();
        let reply = StandardReply::decode(&packet.body).unwrap();
        assert_eq!(&reply.result[..4], b"\x03uno");
        assert_eq!(reply.result[4], 20);
        assert_eq!(reply.result[9], 10);
    }

    #[test]
    fn configure_and_stop_scheduler() {
        let mut rig = Rig::new("uno");
        let mut body = vec![CONFIGURE_SCHEDULER];
        body.extend_from_slice(&0.01f32.to_le_bytes());
        let packet = rig.request(SERVER, &body).unwrap();
        assert_eq!(packet.body.as_ref(), &[CONFIGURE_SCHEDULER, 1, 0x00]);
        assert!(rig.server.scheduler().is_running());

        let mut body = vec![CONFIGURE_SCHEDULER];
        body.extend_from_slice(&(-1.0f32).to_le_bytes());
        let packet = rig.request(SERVER, &body).unwrap();
        assert_eq!(packet.body.as_ref(), &[CONFIGURE_SCHEDULER, 1, 0xFF]);
        assert!(rig.server.scheduler().is_running());

        let packet = rig.request(SERVER, &[STOP_SCHEDULER]).unwrap();
        assert_eq!(packet.body.as_ref(), &[STOP_SCHEDULER, 0]);
        assert!(!rig.server.scheduler().is_running());
    }

    #[test]
    fn custom_packet_replies_on_custom_route() {
        let mut rig = Rig::new("uno");
        assert!(rig
            .request(CUSTOM, &[0xF1, 0x00, 9, 0x20, 0x03, 0x60, 0x09])
            .is_some_and(|p| p.route == CUSTOM && p.body.is_empty()));
        let packet = rig.request(CUSTOM, &[0xF1, 0x02, 9]).unwrap();
        assert_eq!(packet.body.as_ref(), &[90]);
        assert!(rig.request(CUSTOM, &[0xF1, 0xEE]).is_none());
    }

    #[test]
    fn silent_policy_skips_empty_custom_replies() {
        let mut rig = Rig::with_server_config(
            "uno",
            ServerConfig {
                reply_empty_custom: false,
                ..ServerConfig::default()
            },
        );
        assert!(rig
            .request(CUSTOM, &[0xF1, 0x00, 9, 0x20, 0x03, 0x60, 0x09])
            .is_none());
        let packet = rig.request(CUSTOM, &[0xF1, 0x02, 9]).unwrap();
        assert_eq!(packet.body.as_ref(), &[90]);
    }

    #[test]
    fn partial_packets_wait_for_the_rest() {
        let mut rig = Rig::new("uno");
        let mut buf = BytesMut::new();
        encode_packet(SERVER, &[ECHO, 7], &mut buf).unwrap();
        rig.client.send_all(&buf[..HEADER_SIZE]).unwrap();
        assert!(!rig.server.tick().unwrap());
        rig.client.send_all(&buf[HEADER_SIZE..]).unwrap();
        assert!(rig.server.tick().unwrap());
        assert_eq!(rig.recv().unwrap().body.as_ref(), &[ECHO, 1, 7]);
    }

    #[test]
    fn garbage_is_skipped_until_magic() {
        let mut rig = Rig::new("uno");
        rig.client.send_all(&[0x00, 0x13, 0x37]).unwrap();
        assert!(!rig.server.tick().unwrap());
        let packet = rig.request(SERVER, &[ECHO, 5]).unwrap();
        assert_eq!(packet.body.as_ref(), &[ECHO, 1, 5]);
    }

    #[test]
    fn peer_reset_before_reply_keeps_serving() {
        use std::io::Write;
        use std::time::Instant;

        use iobridge_transport::TcpTransport;

        let config = BoardConfig::preset("uno").unwrap();
        let board = SimBoard::new(&config);
        let transport = TcpTransport::bind("127.0.0.1:0").unwrap();
        let addr = transport.local_addr().unwrap();
        let mut server = IoServerBuilder::new(config)
            .with_clock(Arc::new(ManualClock::new()))
            .build(transport, board.clone(), board.interrupts())
            .unwrap();
        server.start().unwrap();

        let mut buf = BytesMut::new();
        encode_packet(SERVER, &[ECHO, 1, 2, 3], &mut buf).unwrap();
        {
            let mut client = TcpTransport::connect(addr).unwrap();
            client.write_all(&buf).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut handled = false;
        while !handled && Instant::now() < deadline {
            handled = server.tick().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(handled);
        for _ in 0..10 {
            assert!(!server.tick().unwrap());
        }

        let mut client = TcpTransport::connect(addr).unwrap();
        client.write_all(&buf).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut handled = false;
        while !handled && Instant::now() < deadline {
            handled = server.tick().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(handled);
    }

    #[test]
    fn one_frame_per_tick() {
        let mut rig = Rig::new("uno");
        rig.send(SERVER, &[ECHO, 1]);
        rig.send(SERVER, &[ECHO, 2]);
        assert!(rig.server.tick().unwrap());
        assert_eq!(rig.recv().unwrap().body.as_ref(), &[ECHO, 1, 1]);
        assert!(rig.recv().is_none());
        assert!(rig.server.tick().unwrap());
        assert_eq!(rig.recv().unwrap().body.as_ref(), &[ECHO, 1, 2]);
    }

    #[test]
    fn run_exits_on_shutdown_flag() {
        let mut rig = Rig::new("uno");
        let stop = AtomicBool::new(true);
        rig.server.run(&stop).unwrap();
        assert!(rig.client.send(&[1]).is_err());
    }
}
