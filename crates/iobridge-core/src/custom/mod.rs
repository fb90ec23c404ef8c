//! Custom command space (16-bit IDs, 0xF100..=0xFFFF).
//!
//! One flat switch routes every custom ID to its family. Handlers append
//! their output to the shared [`ResponseBuffer`] at its running offset, so
//! several custom commands can be chained before the buffer is flushed into
//! one outgoing packet. IDs outside the table, or belonging to a family the
//! board does not enable, are routing misses: nothing is written.

pub mod encoder;
pub mod neopixel;
pub mod servo;
pub mod shift_register;
pub mod tone;
pub mod ultrasonic;

use iobridge_config::{BoardConfig, CustomFamilies};
use iobridge_frame::{PayloadCursor, ResponseBuffer};
use tracing::debug;

use crate::driver::Context;
use crate::error::{CoreError, Result};

pub use encoder::{EncoderCount, Encoders};
pub use neopixel::NeoPixels;
pub use servo::Servos;

pub const SERVO_ATTACH: u16 = 0xF100;
pub const SERVO_DETACH: u16 = 0xF101;
pub const SERVO_READ: u16 = 0xF102;
pub const SERVO_WRITE: u16 = 0xF103;

pub const PLAY_TONE: u16 = 0xF110;

pub const ENCODER_ATTACH: u16 = 0xF120;
pub const ENCODER_DETACH: u16 = 0xF121;
pub const ENCODER_CHANGE_DELAY: u16 = 0xF122;
pub const ENCODER_READ_COUNT: u16 = 0xF123;
pub const ENCODER_READ_SPEED: u16 = 0xF124;
pub const ENCODER_WRITE_COUNT: u16 = 0xF125;

pub const ULTRASONIC_ATTACH: u16 = 0xF130;
pub const ULTRASONIC_DETACH: u16 = 0xF131;
pub const ULTRASONIC_READ: u16 = 0xF132;

pub const SHIFT_REGISTER_WRITE: u16 = 0xF140;
pub const SHIFT_REGISTER_READ: u16 = 0xF141;
pub const SHIFT_REGISTER_RESET: u16 = 0xF142;

pub const NEOPIXEL_ATTACH: u16 = 0xF150;
pub const NEOPIXEL_DETACH: u16 = 0xF151;
pub const NEOPIXEL_WRITE: u16 = 0xF152;

/// Stateful half of the custom families plus the enable mask.
pub struct CustomSpace {
    families: CustomFamilies,
    servos: Servos,
    encoders: Encoders,
    neopixels: NeoPixels,
}

/// Check a pin taken from the wire against the board.
///
/// Pins beyond the board and pins the board reserves are refused, which the
/// dispatcher reports by writing nothing for the command.
pub(crate) fn user_pin(ctx: &Context<'_>, family: &'static str, pin: u8) -> Result<u8> {
    if pin >= ctx.config.digital_pins || ctx.config.is_reserved_pin(pin) {
        return Err(CoreError::InvalidPin { family, pin });
    }
    Ok(pin)
}

impl CustomSpace {
    pub fn new(config: &BoardConfig) -> Self {
        Self {
            families: config.custom_families,
            servos: Servos::new(config.max_servos as usize),
            encoders: Encoders::new(config.max_encoders as usize),
            neopixels: NeoPixels::new(config.max_neopixels as usize),
        }
    }

    pub fn families(&self) -> CustomFamilies {
        self.families
    }

    pub fn servos(&self) -> &Servos {
        &self.servos
    }

    pub fn encoders(&self) -> &Encoders {
        &self.encoders
    }

    pub fn neopixels(&self) -> &NeoPixels {
        &self.neopixels
    }

    /// Run one custom command, appending any output to `tx`.
    ///
    /// Returns `false` for a routing miss.
    pub fn handle(
        &mut self,
        ctx: &mut Context<'_>,
        id: u16,
        payload: &[u8],
        tx: &mut ResponseBuffer,
    ) -> Result<bool> {
        let f = self.families;
        let cur = &mut PayloadCursor::new(payload);
        match id {
            SERVO_ATTACH if f.servo => self.servos.attach(ctx, cur)?,
            SERVO_DETACH if f.servo => self.servos.detach(ctx, cur)?,
            SERVO_READ if f.servo => self.servos.read(ctx, cur, tx)?,
            SERVO_WRITE if f.servo => self.servos.write(ctx, cur)?,

            PLAY_TONE if f.tone => tone::play(ctx, cur)?,

            ENCODER_ATTACH if f.encoder => self.encoders.attach(ctx, cur)?,
            ENCODER_DETACH if f.encoder => self.encoders.detach(ctx, cur)?,
            ENCODER_CHANGE_DELAY if f.encoder => {}
            ENCODER_READ_COUNT if f.encoder => self.encoders.read_count(ctx, cur, tx)?,
            ENCODER_READ_SPEED if f.encoder => self.encoders.read_speed(ctx, cur, tx)?,
            ENCODER_WRITE_COUNT if f.encoder => self.encoders.write_count(ctx, cur)?,

            ULTRASONIC_ATTACH if f.ultrasonic => ultrasonic::attach(ctx, cur)?,
            ULTRASONIC_DETACH if f.ultrasonic => ultrasonic::detach(ctx, cur)?,
            ULTRASONIC_READ if f.ultrasonic => ultrasonic::read(ctx, cur, tx)?,

            SHIFT_REGISTER_WRITE if f.shift_register => shift_register::write(ctx, cur)?,
            SHIFT_REGISTER_READ if f.shift_register => shift_register::read(ctx, cur, tx)?,
            SHIFT_REGISTER_RESET if f.shift_register => shift_register::reset(ctx, cur)?,

            NEOPIXEL_ATTACH if f.neopixel => self.neopixels.attach(ctx, cur)?,
            NEOPIXEL_DETACH if f.neopixel => self.neopixels.detach(ctx, cur)?,
            NEOPIXEL_WRITE if f.neopixel => self.neopixels.write(ctx, cur)?,

            _ => {
                debug!(id, "unknown custom command");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Detach every interrupt the custom families hold.
    pub fn release(&mut self, ctx: &mut Context<'_>) {
        self.encoders.release_all(ctx.irq);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::hal::Color;
    use crate::poll::{Clock, ManualClock};
    use crate::sim::SimBoard;

    struct Rig {
        board: SimBoard,
        clock: ManualClock,
        config: BoardConfig,
        space: CustomSpace,
        tx: ResponseBuffer,
    }

    impl Rig {
        fn new(config: BoardConfig) -> Self {
            Self {
                board: SimBoard::new(&config),
                clock: ManualClock::new(),
                space: CustomSpace::new(&config),
                tx: ResponseBuffer::new(config.tx_buffer_size),
                config,
            }
        }

        fn uno() -> Self {
            Self::new(BoardConfig::preset("uno").unwrap())
        }

        fn try_call(&mut self, id: u16, payload: &[u8]) -> Result<bool> {
            let irq = self.board.interrupts();
            let mut board = self.board.clone();
            let mut ctx = Context {
                board: &mut board,
                irq: irq.as_ref(),
                clock: &self.clock,
                config: &self.config,
            };
            self.space.handle(&mut ctx, id, payload, &mut self.tx)
        }

        fn call(&mut self, id: u16, payload: &[u8]) -> bool {
            self.try_call(id, payload).unwrap()
        }

        fn reply(&mut self) -> Bytes {
            self.tx.take()
        }
    }

    #[test]
    fn unknown_id_writes_nothing() {
        let mut rig = Rig::uno();
        assert!(!rig.call(0xF1FF, &[1, 2, 3]));
        assert!(!rig.call(0xFFFF, &[]));
        assert!(rig.tx.is_empty());
    }

    #[test]
    fn disabled_family_is_a_routing_miss() {
        let mut config = BoardConfig::preset("uno").unwrap();
        config.custom_families.servo = false;
        let mut rig = Rig::new(config);
        assert!(!rig.call(SERVO_ATTACH, &[9, 0x20, 0x03, 0x60, 0x09]));
        assert!(rig.board.state().servos.is_empty());
    }

    #[test]
    fn servo_attach_write_read() {
        let mut rig = Rig::uno();
        assert!(rig.call(SERVO_ATTACH, &[9, 0x20, 0x03, 0x60, 0x09]));
        rig.call(SERVO_WRITE, &[9, 135]);
        rig.call(SERVO_READ, &[9]);
        assert_eq!(rig.reply().as_ref(), &[135]);
        let servo = rig.board.state().servos[&9].clone();
        assert_eq!((servo.min_pulse_us, servo.max_pulse_us), (800, 2400));
    }

    #[test]
    fn servo_refuses_reserved_and_missing_pins() {
        let mut rig = Rig::uno();
        let beyond = rig.config.digital_pins;
        for pin in [0, 1, beyond, 255] {
            assert!(matches!(
                rig.try_call(SERVO_ATTACH, &[pin, 0x20, 0x03, 0x60, 0x09]),
                Err(CoreError::InvalidPin { family: "Servo", .. })
            ));
        }
        assert!(rig.try_call(SERVO_WRITE, &[1, 90]).is_err());
        assert!(rig.board.state().servos.is_empty());
        assert_eq!(rig.space.servos().attached_count(), 0);
    }

    #[test]
    fn servo_attach_is_bounded_by_board() {
        let mut config = BoardConfig::preset("uno").unwrap();
        config.max_servos = 2;
        let mut rig = Rig::new(config);
        assert!(rig.call(SERVO_ATTACH, &[9, 0x20, 0x03, 0x60, 0x09]));
        assert!(rig.call(SERVO_ATTACH, &[10, 0x20, 0x03, 0x60, 0x09]));
        assert!(matches!(
            rig.try_call(SERVO_ATTACH, &[11, 0x20, 0x03, 0x60, 0x09]),
            Err(CoreError::Unsupported { .. })
        ));
        assert!(!rig.space.servos().is_attached(11));

        // re-attaching a live servo does not take a new slot
        assert!(rig.call(SERVO_ATTACH, &[9, 0x20, 0x03, 0x60, 0x09]));
        rig.call(SERVO_DETACH, &[10]);
        assert!(rig.call(SERVO_ATTACH, &[11, 0x20, 0x03, 0x60, 0x09]));
        assert_eq!(rig.space.servos().attached_count(), 2);
    }

    #[test]
    fn wire_pins_are_checked_against_board() {
        let mut rig = Rig::uno();
        assert!(rig.try_call(PLAY_TONE, &[1, 0xB8, 0x01, 0xF4, 0x01]).is_err());
        assert!(rig.board.state().tones.is_empty());

        assert!(rig.try_call(ULTRASONIC_ATTACH, &[7, 25]).is_err());
        assert_eq!(rig.board.mode(7), None);

        assert!(rig.try_call(SHIFT_REGISTER_WRITE, &[3, 4, 0, 0, 1, 0xFF]).is_err());
        assert!(rig.board.state().shifted_out.is_empty());

        assert!(rig.try_call(ENCODER_ATTACH, &[0, 2, 1]).is_err());
        assert!(!rig.space.encoders().is_attached(0));
        assert!(!rig.board.interrupts().is_attached(2));

        assert!(rig.try_call(NEOPIXEL_ATTACH, &[8, 0, 30, 0x52, 0x00, 0]).is_err());
        assert!(!rig.space.neopixels().is_attached(0));
    }

    #[test]
    fn replies_chain_at_running_offset() {
        let mut rig = Rig::uno();
        rig.call(SERVO_ATTACH, &[9, 0x20, 0x03, 0x60, 0x09]);
        rig.call(SERVO_WRITE, &[9, 10]);
        rig.call(SERVO_READ, &[9]);
        assert_eq!(rig.tx.offset(), 1);
        rig.call(SERVO_WRITE, &[9, 20]);
        rig.call(SERVO_READ, &[9]);
        assert_eq!(rig.tx.offset(), 2);
        assert_eq!(rig.reply().as_ref(), &[10, 20]);
        assert_eq!(rig.tx.offset(), 0);
    }

    #[test]
    fn tone_zero_frequency_silences() {
        let mut rig = Rig::uno();
        rig.call(PLAY_TONE, &[8, 0xB8, 0x01, 0xF4, 0x01]);
        assert_eq!(rig.board.state().tones.get(&8), Some(&(440, 500)));
        rig.call(PLAY_TONE, &[8, 0, 0, 0, 0]);
        assert!(rig.board.state().tones.is_empty());
    }

    #[test]
    fn encoder_counts_interrupt_steps() {
        let mut rig = Rig::uno();
        rig.call(ENCODER_ATTACH, &[0, 2, 3]);
        // pull-ups leave both pins high: state 11
        for (a, b) in [(false, true), (false, false), (true, false), (true, true)] {
            rig.board.set_input(2, a);
            rig.board.set_input(3, b);
        }
        rig.clock.advance(Duration::from_millis(7));
        rig.call(ENCODER_READ_COUNT, &[0, 1]);
        let reply = rig.reply();
        assert_eq!(&reply[0..4], &4i32.to_le_bytes());
        assert_eq!(&reply[4..8], &7u32.to_le_bytes());
        assert_eq!(reply[8], 0);

        rig.call(ENCODER_READ_COUNT, &[0, 0]);
        assert_eq!(&rig.reply()[0..4], &0i32.to_le_bytes());
    }

    #[test]
    fn encoder_detach_stops_counting() {
        let mut rig = Rig::uno();
        rig.call(ENCODER_ATTACH, &[1, 4, 5]);
        assert!(rig.space.encoders().is_attached(1));
        rig.call(ENCODER_DETACH, &[1, 4, 5]);
        assert!(!rig.space.encoders().is_attached(1));
        rig.board.set_input(4, false);
        rig.call(ENCODER_READ_COUNT, &[1, 0]);
        assert_eq!(&rig.reply()[0..4], &0i32.to_le_bytes());
    }

    #[test]
    fn encoder_write_count_clears_overflow() {
        let mut rig = Rig::uno();
        rig.call(ENCODER_ATTACH, &[0, 2, 3]);
        rig.call(ENCODER_WRITE_COUNT, &[0, 0xFF, 0xFF, 0xFF, 0x7F]);
        rig.board.set_input(2, false);
        rig.call(ENCODER_READ_COUNT, &[0, 0]);
        let reply = rig.reply();
        assert_eq!(&reply[0..4], &0i32.to_le_bytes());
        assert_eq!(reply[8] as i8, 1);

        rig.call(ENCODER_WRITE_COUNT, &[0, 5, 0, 0, 0]);
        rig.call(ENCODER_READ_COUNT, &[0, 0]);
        let reply = rig.reply();
        assert_eq!(&reply[0..4], &5i32.to_le_bytes());
        assert_eq!(reply[8], 0);
    }

    #[test]
    fn encoder_reset_read_keeps_overflow() {
        let mut rig = Rig::uno();
        rig.call(ENCODER_ATTACH, &[0, 2, 3]);
        rig.call(ENCODER_WRITE_COUNT, &[0, 0xFF, 0xFF, 0xFF, 0x7F]);
        rig.board.set_input(2, false);
        rig.call(ENCODER_READ_COUNT, &[0, 1]);
        let reply = rig.reply();
        assert_eq!(&reply[0..4], &0i32.to_le_bytes());
        assert_eq!(reply[8] as i8, 1);

        rig.board.set_input(3, false);
        rig.call(ENCODER_READ_COUNT, &[0, 0]);
        let reply = rig.reply();
        assert_eq!(&reply[0..4], &1i32.to_le_bytes());
        assert_eq!(reply[8] as i8, 1);
    }

    #[test]
    fn encoder_speed_waits_one_window() {
        let mut rig = Rig::uno();
        rig.call(ENCODER_ATTACH, &[0, 2, 3]);
        rig.call(ENCODER_READ_SPEED, &[2, 0, 1]);
        assert_eq!(rig.reply().as_ref(), &[0, 0, 0, 0, 0, 0]);
        assert_eq!(rig.clock.now(), encoder::SPEED_WINDOW);
    }

    #[test]
    fn change_delay_is_accepted_without_output() {
        let mut rig = Rig::uno();
        assert!(rig.call(ENCODER_CHANGE_DELAY, &[0, 10]));
        assert!(rig.tx.is_empty());
    }

    #[test]
    fn ultrasonic_pulses_trigger_and_reads_echo() {
        let mut rig = Rig::uno();
        rig.call(ULTRASONIC_ATTACH, &[7, 8]);
        rig.board.push_pulse(8, 1160);
        rig.call(ULTRASONIC_READ, &[7, 8, 0x30, 0x75, 0, 0]);
        assert_eq!(rig.reply().as_ref(), &1160u32.to_le_bytes());
        let log = rig.board.state().gpio_log.clone();
        let trigger: Vec<bool> = log.iter().filter(|(p, _)| *p == 7).map(|(_, l)| *l).collect();
        assert_eq!(trigger, vec![false, false, true, false]);
    }

    #[test]
    fn ultrasonic_timeout_reads_zero() {
        let mut rig = Rig::uno();
        rig.board.push_pulse(8, 50_000);
        rig.call(ULTRASONIC_READ, &[7, 8, 0x10, 0x27, 0, 0]);
        assert_eq!(rig.reply().as_ref(), &[0, 0, 0, 0]);
    }

    #[test]
    fn shift_595_writes_last_byte_first_inside_latch() {
        let mut rig = Rig::uno();
        rig.call(SHIFT_REGISTER_WRITE, &[2, 4, 5, 6, 0, 2, 0xAA, 0x55]);
        assert_eq!(rig.board.state().shifted_out, vec![(4, 0x55), (4, 0xAA)]);
        let latch: Vec<bool> = rig
            .board
            .state()
            .gpio_log
            .iter()
            .filter(|(p, _)| *p == 6)
            .map(|(_, l)| *l)
            .collect();
        assert_eq!(latch, vec![false, true]);
    }

    #[test]
    fn shift_164_writes_in_order_and_releases_reset() {
        let mut rig = Rig::uno();
        rig.call(SHIFT_REGISTER_WRITE, &[3, 4, 5, 1, 9, 2, 0x01, 0x02]);
        assert_eq!(rig.board.state().shifted_out, vec![(4, 0x01), (4, 0x02)]);
        assert!(rig.board.level(9));
    }

    #[test]
    fn shift_165_read_returns_n_bytes() {
        let mut rig = Rig::uno();
        rig.board.push_shift_in(4, &[0x12, 0x34]);
        rig.call(SHIFT_REGISTER_READ, &[1, 4, 5, 6, 7, 2]);
        assert_eq!(rig.reply().as_ref(), &[0x12, 0x34]);
        assert_eq!(rig.clock.now(), shift_register::LOAD_PULSE);
    }

    #[test]
    fn shift_reset_pulls_reset_low() {
        let mut rig = Rig::uno();
        rig.call(SHIFT_REGISTER_WRITE, &[3, 4, 5, 1, 9, 0]);
        rig.call(SHIFT_REGISTER_RESET, &[3, 4, 5, 1, 9]);
        assert!(!rig.board.level(9));
    }

    #[test]
    fn unknown_shift_model_writes_nothing() {
        let mut rig = Rig::uno();
        rig.call(SHIFT_REGISTER_WRITE, &[7, 4, 5, 0, 1, 0xFF]);
        assert!(rig.board.state().shifted_out.is_empty());
    }

    #[test]
    fn neopixel_write_sets_listed_leds() {
        let mut rig = Rig::uno();
        rig.call(NEOPIXEL_ATTACH, &[8, 0, 6, 0x52, 0x00, 0]);
        assert!(rig.space.neopixels().is_attached(0));
        rig.call(NEOPIXEL_WRITE, &[0, 8, 0, 2, 128, 6, 1, 2, 3, 4, 5, 6, 0, 7]);

        let state = rig.board.state();
        let strip = &state.strips[&0];
        assert_eq!(strip.pixels[0], Color { r: 1, g: 2, b: 3, w: 0 });
        assert_eq!(strip.pixels[7], Color { r: 4, g: 5, b: 6, w: 0 });
        assert_eq!(strip.pixels[3], Color::default());
        assert_eq!(strip.brightness, 128);
        assert_eq!(strip.shows, 2);
    }

    #[test]
    fn neopixel_rgb_block_covers_whole_strip() {
        let mut rig = Rig::uno();
        rig.call(NEOPIXEL_ATTACH, &[3, 0, 6, 0x52, 0x00, 0]);
        // length 6 selects per-LED RGB; the block still holds numLeds triples
        let mut write = vec![0, 3, 0, 3, 255, 6];
        write.extend_from_slice(&[7, 0, 0, 9, 0, 0, 8, 0, 0]);
        write.extend_from_slice(&[0, 1, 2]);
        assert!(rig.call(NEOPIXEL_WRITE, &write));

        let state = rig.board.state();
        let reds: Vec<u8> = state.strips[&0].pixels.iter().map(|c| c.r).collect();
        assert_eq!(reds, vec![7, 9, 8]);
    }

    #[test]
    fn neopixel_beyond_table_is_ignored() {
        let mut rig = Rig::uno();
        let id = rig.config.max_neopixels;
        rig.call(NEOPIXEL_ATTACH, &[8, 0, 6, 0x52, 0x00, id]);
        assert!(rig.board.state().strips.is_empty());
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut rig = Rig::uno();
        let irq = rig.board.interrupts();
        let mut board = rig.board.clone();
        let mut ctx = Context {
            board: &mut board,
            irq: irq.as_ref(),
            clock: &rig.clock,
            config: &rig.config,
        };
        assert!(rig
            .space
            .handle(&mut ctx, SERVO_WRITE, &[9], &mut rig.tx)
            .is_err());
    }
}
