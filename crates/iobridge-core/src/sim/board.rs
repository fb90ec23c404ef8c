use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use iobridge_config::BoardConfig;
use tracing::trace;

use super::irq::{PinLevels, SimInterrupts};
use crate::hal::{
    Analog, BitOrder, Color, Gpio, I2cBus, PinMode, PixelStrips, PulseInput, SciFormat, SerialPorts,
    ServoOutput, SpiBus, SpiSettings, ToneOutput,
};

const GPIO_LOG_CAP: usize = 4096;

/// Register-file I2C target: the first written byte selects a register,
/// following bytes write consecutive registers, reads continue from the
/// selected register.
#[derive(Debug, Clone)]
pub struct SimI2cDevice {
    pub registers: [u8; 256],
    pointer: u8,
    /// Registers that stream queued bytes instead of returning a fixed value.
    streams: HashMap<u8, VecDeque<u8>>,
    /// When set, reads return at most this many bytes.
    pub read_limit: Option<usize>,
    /// Every `(register, value)` pair written.
    pub writes: Vec<(u8, u8)>,
}

impl Default for SimI2cDevice {
    fn default() -> Self {
        Self {
            registers: [0; 256],
            pointer: 0,
            streams: HashMap::new(),
            read_limit: None,
            writes: Vec::new(),
        }
    }
}

impl SimI2cDevice {
    pub fn stream(&mut self, register: u8, bytes: &[u8]) {
        self.streams
            .entry(register)
            .or_default()
            .extend(bytes.iter().copied());
    }

    fn write(&mut self, data: &[u8]) {
        let Some((&register, values)) = data.split_first() else {
            return;
        };
        self.pointer = register;
        for &value in values {
            self.registers[self.pointer as usize] = value;
            self.writes.push((self.pointer, value));
            self.pointer = self.pointer.wrapping_add(1);
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.read_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        if let Some(stream) = self.streams.get_mut(&self.pointer) {
            let mut got = 0;
            while got < n {
                let Some(byte) = stream.pop_front() else { break };
                buf[got] = byte;
                got += 1;
            }
            return got;
        }
        for slot in buf.iter_mut().take(n) {
            *slot = self.registers[self.pointer as usize];
            self.pointer = self.pointer.wrapping_add(1);
        }
        n
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimSciPort {
    pub open: bool,
    pub baud: u32,
    pub format: Option<SciFormat>,
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimServo {
    pub min_pulse_us: u16,
    pub max_pulse_us: u16,
    pub angle: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimStrip {
    pub pin: u8,
    pub kind: u16,
    pub pixels: Vec<Color>,
    pub brightness: u8,
    pub shows: u32,
}

/// Everything the simulated board remembers.
#[derive(Debug, Default)]
pub struct SimState {
    pub modes: HashMap<u8, PinMode>,
    pub gpio_log: Vec<(u8, bool)>,
    pub analog: HashMap<u8, u16>,
    pub pwm_duty: HashMap<u8, u8>,
    pub pwm_frequency: HashMap<u8, u32>,
    /// Highest frequency the PWM timers accept.
    pub pwm_max_hz: u32,
    pub i2c_begun: HashMap<u8, u32>,
    pub i2c_clock: HashMap<u8, u32>,
    pub i2c_devices: HashMap<(u8, u8), SimI2cDevice>,
    pub spi_begun: HashMap<u8, bool>,
    pub spi_settings: Option<SpiSettings>,
    pub spi_log: Vec<Vec<u8>>,
    pub sci: HashMap<u8, SimSciPort>,
    pub servos: HashMap<u8, SimServo>,
    pub tones: HashMap<u8, (u16, u16)>,
    pub pulses: HashMap<u8, VecDeque<u32>>,
    pub shifted_out: Vec<(u8, u8)>,
    pub shift_in: HashMap<u8, VecDeque<u8>>,
    pub strips: HashMap<u8, SimStrip>,
}

/// In-memory board.
///
/// Cloning yields another view of the same board, so a test can keep one
/// clone for inspection after handing the other to a server.
#[derive(Clone)]
pub struct SimBoard {
    config: Arc<BoardConfig>,
    state: Arc<Mutex<SimState>>,
    pins: Arc<PinLevels>,
    irq: Arc<SimInterrupts>,
}

impl SimBoard {
    pub fn new(config: &BoardConfig) -> Self {
        let pins = Arc::new(PinLevels::new());
        let state = SimState {
            pwm_max_hz: 1_000_000,
            ..SimState::default()
        };
        Self {
            config: Arc::new(config.clone()),
            state: Arc::new(Mutex::new(state)),
            irq: Arc::new(SimInterrupts::new(Arc::clone(&pins))),
            pins,
        }
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// The board's interrupt controller.
    pub fn interrupts(&self) -> Arc<SimInterrupts> {
        Arc::clone(&self.irq)
    }

    /// Lock the board state for inspection or setup.
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn level(&self, pin: u8) -> bool {
        self.pins.get(pin)
    }

    /// Drive an input pin from outside; raises the pin's interrupt when the
    /// level changes.
    pub fn set_input(&self, pin: u8, level: bool) {
        if self.pins.set(pin, level) {
            self.irq.raise(pin);
        }
    }

    /// Change an input level without raising an interrupt.
    pub fn preset_input(&self, pin: u8, level: bool) {
        self.pins.set(pin, level);
    }

    pub fn set_analog(&self, channel: u8, raw: u16) {
        self.state().analog.insert(channel, raw);
    }

    /// Attach a register-file device at `address` on `bus`.
    pub fn add_i2c_device(&self, bus: u8, address: u8) {
        self.state()
            .i2c_devices
            .insert((bus, address), SimI2cDevice::default());
    }

    pub fn with_i2c_device<R>(
        &self,
        bus: u8,
        address: u8,
        f: impl FnOnce(&mut SimI2cDevice) -> R,
    ) -> Option<R> {
        self.state().i2c_devices.get_mut(&(bus, address)).map(f)
    }

    /// Queue bytes for the host to receive on `port`.
    pub fn push_sci_rx(&self, port: u8, bytes: &[u8]) {
        self.state()
            .sci
            .entry(port)
            .or_default()
            .rx
            .extend(bytes.iter().copied());
    }

    pub fn sci_tx(&self, port: u8) -> Vec<u8> {
        self.state()
            .sci
            .get(&port)
            .map(|p| p.tx.clone())
            .unwrap_or_default()
    }

    /// Program the next echo pulse length seen on `pin`.
    pub fn push_pulse(&self, pin: u8, micros: u32) {
        self.state().pulses.entry(pin).or_default().push_back(micros);
    }

    /// Queue a byte for the next shift-in on `data_pin`.
    pub fn push_shift_in(&self, data_pin: u8, bytes: &[u8]) {
        self.state()
            .shift_in
            .entry(data_pin)
            .or_default()
            .extend(bytes.iter().copied());
    }

    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.state().modes.get(&pin).copied()
    }
}

impl Gpio for SimBoard {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.state().modes.insert(pin, mode);
        if mode == PinMode::InputPullup {
            self.pins.set(pin, true);
        }
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        self.pins.set(pin, high);
        let mut state = self.state();
        if state.gpio_log.len() >= GPIO_LOG_CAP {
            state.gpio_log.remove(0);
        }
        state.gpio_log.push((pin, high));
    }

    fn digital_read(&mut self, pin: u8) -> bool {
        self.pins.get(pin)
    }

    fn shift_out(&mut self, data_pin: u8, _clock_pin: u8, order: BitOrder, value: u8) {
        let value = match order {
            BitOrder::MsbFirst => value,
            BitOrder::LsbFirst => value.reverse_bits(),
        };
        self.state().shifted_out.push((data_pin, value));
    }

    fn shift_in(&mut self, data_pin: u8, _clock_pin: u8, _order: BitOrder) -> u8 {
        self.state()
            .shift_in
            .get_mut(&data_pin)
            .and_then(|q| q.pop_front())
            .unwrap_or(0)
    }
}

impl Analog for SimBoard {
    fn analog_read(&mut self, channel: u8) -> u16 {
        self.state().analog.get(&channel).copied().unwrap_or(0)
    }

    fn analog_write(&mut self, pin: u8, duty: u8) {
        self.state().pwm_duty.insert(pin, duty);
    }

    fn set_pwm_frequency(&mut self, pin: u8, hz: u32) -> bool {
        let mut state = self.state();
        if hz == 0 || hz > state.pwm_max_hz {
            return false;
        }
        state.pwm_frequency.insert(pin, hz);
        true
    }
}

impl I2cBus for SimBoard {
    fn i2c_begin(&mut self, bus: u8) {
        *self.state().i2c_begun.entry(bus).or_default() += 1;
    }

    fn i2c_end(&mut self, bus: u8) {
        self.state().i2c_begun.remove(&bus);
    }

    fn i2c_set_clock(&mut self, bus: u8, hz: u32) {
        self.state().i2c_clock.insert(bus, hz);
    }

    fn i2c_write(&mut self, bus: u8, address: u8, data: &[u8], _stop: bool) -> bool {
        trace!(bus, address, len = data.len(), "sim i2c write");
        match self.state().i2c_devices.get_mut(&(bus, address)) {
            Some(device) => {
                device.write(data);
                true
            }
            None => false,
        }
    }

    fn i2c_read(&mut self, bus: u8, address: u8, buf: &mut [u8], _stop: bool) -> usize {
        match self.state().i2c_devices.get_mut(&(bus, address)) {
            Some(device) => device.read(buf),
            None => 0,
        }
    }
}

impl SpiBus for SimBoard {
    fn spi_begin(&mut self, bus: u8) {
        self.state().spi_begun.insert(bus, true);
    }

    fn spi_end(&mut self, bus: u8) {
        self.state().spi_begun.insert(bus, false);
    }

    /// Loopback: the received bytes are the transmitted bytes.
    fn spi_transfer(&mut self, _bus: u8, settings: SpiSettings, buf: &mut [u8]) {
        let mut state = self.state();
        state.spi_settings = Some(settings);
        state.spi_log.push(buf.to_vec());
    }
}

impl SerialPorts for SimBoard {
    fn sci_begin(&mut self, port: u8, baud: u32, format: SciFormat) {
        let mut state = self.state();
        let entry = state.sci.entry(port).or_default();
        entry.open = true;
        entry.baud = baud;
        entry.format = Some(format);
    }

    fn sci_end(&mut self, port: u8) {
        if let Some(entry) = self.state().sci.get_mut(&port) {
            entry.open = false;
        }
    }

    fn sci_available(&mut self, port: u8) -> usize {
        self.state().sci.get(&port).map_or(0, |p| p.rx.len())
    }

    fn sci_read(&mut self, port: u8, buf: &mut [u8]) -> usize {
        let mut state = self.state();
        let Some(entry) = state.sci.get_mut(&port) else {
            return 0;
        };
        let n = buf.len().min(entry.rx.len());
        for (slot, byte) in buf.iter_mut().zip(entry.rx.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn sci_write(&mut self, port: u8, data: &[u8]) -> usize {
        let mut state = self.state();
        match state.sci.get_mut(&port) {
            Some(entry) if entry.open => {
                entry.tx.extend_from_slice(data);
                data.len()
            }
            _ => 0,
        }
    }
}

impl ServoOutput for SimBoard {
    fn servo_attach(&mut self, pin: u8, min_pulse_us: u16, max_pulse_us: u16) {
        self.state().servos.insert(
            pin,
            SimServo {
                min_pulse_us,
                max_pulse_us,
                angle: 90,
            },
        );
    }

    fn servo_detach(&mut self, pin: u8) {
        self.state().servos.remove(&pin);
    }

    fn servo_write(&mut self, pin: u8, angle: u8) {
        if let Some(servo) = self.state().servos.get_mut(&pin) {
            servo.angle = angle;
        }
    }

    fn servo_read(&mut self, pin: u8) -> u8 {
        self.state().servos.get(&pin).map_or(0, |s| s.angle)
    }
}

impl ToneOutput for SimBoard {
    fn tone(&mut self, pin: u8, frequency: u16, duration_ms: u16) {
        self.state().tones.insert(pin, (frequency, duration_ms));
    }

    fn no_tone(&mut self, pin: u8) {
        self.state().tones.remove(&pin);
    }
}

impl PulseInput for SimBoard {
    fn pulse_in(&mut self, pin: u8, _level: bool, timeout_us: u32) -> u32 {
        let pulse = self
            .state()
            .pulses
            .get_mut(&pin)
            .and_then(|q| q.pop_front())
            .unwrap_or(0);
        if pulse > timeout_us {
            0
        } else {
            pulse
        }
    }
}

impl PixelStrips for SimBoard {
    fn pixel_begin(&mut self, id: u8, pin: u8, num_pixels: u16, kind: u16) {
        self.state().strips.insert(
            id,
            SimStrip {
                pin,
                kind,
                pixels: vec![Color::default(); num_pixels as usize],
                brightness: 255,
                shows: 0,
            },
        );
    }

    fn pixel_release(&mut self, id: u8) {
        self.state().strips.remove(&id);
    }

    fn pixel_clear(&mut self, id: u8) {
        if let Some(strip) = self.state().strips.get_mut(&id) {
            strip.pixels.fill(Color::default());
        }
    }

    fn pixel_set(&mut self, id: u8, index: u16, color: Color) {
        if let Some(pixel) = self
            .state()
            .strips
            .get_mut(&id)
            .and_then(|s| s.pixels.get_mut(index as usize))
        {
            *pixel = color;
        }
    }

    fn pixel_brightness(&mut self, id: u8, brightness: u8) {
        if let Some(strip) = self.state().strips.get_mut(&id) {
            strip.brightness = brightness;
        }
    }

    fn pixel_show(&mut self, id: u8) {
        if let Some(strip) = self.state().strips.get_mut(&id) {
            strip.shows += 1;
        }
    }
}
