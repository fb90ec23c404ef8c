//! Board abstraction.
//!
//! Drivers never touch registers; they call the vendor-library surface
//! described by these traits. A real firmware port implements them over its
//! HAL; [`sim::SimBoard`](crate::sim::SimBoard) implements them in memory.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    InputPullup,
}

impl PinMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Input),
            1 => Some(Self::Output),
            2 => Some(Self::InputPullup),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    LsbFirst,
    MsbFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiSettings {
    pub clock_hz: u32,
    /// SPI mode 0-3 (clock polarity and phase).
    pub mode: u8,
    pub bit_order: BitOrder,
}

impl Default for SpiSettings {
    fn default() -> Self {
        Self {
            clock_hz: 4_000_000,
            mode: 0,
            bit_order: BitOrder::MsbFirst,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// SCI character format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SciFormat {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl SciFormat {
    /// 8 data bits, no parity, 1 stop bit.
    pub const DEFAULT: SciFormat = SciFormat {
        data_bits: 8,
        parity: Parity::None,
        stop_bits: 1,
    };

    /// Build a format from wire values, rejecting anything a UART can't do.
    pub fn from_wire(data_bits: u8, parity: u8, stop_bits: u8) -> Option<Self> {
        if !(5..=8).contains(&data_bits) || !(1..=2).contains(&stop_bits) {
            return None;
        }
        let parity = match parity {
            0 => Parity::None,
            1 => Parity::Even,
            2 => Parity::Odd,
            _ => return None,
        };
        Some(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

/// One NeoPixel colour; `w` is ignored by RGB strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

pub trait Gpio {
    fn pin_mode(&mut self, pin: u8, mode: PinMode);
    fn digital_write(&mut self, pin: u8, high: bool);
    fn digital_read(&mut self, pin: u8) -> bool;

    /// Clock one byte out on `data_pin`, pulsing `clock_pin` per bit.
    fn shift_out(&mut self, data_pin: u8, clock_pin: u8, order: BitOrder, value: u8) {
        for i in 0..8 {
            let bit = match order {
                BitOrder::LsbFirst => (value >> i) & 1,
                BitOrder::MsbFirst => (value >> (7 - i)) & 1,
            };
            self.digital_write(data_pin, bit != 0);
            self.digital_write(clock_pin, true);
            self.digital_write(clock_pin, false);
        }
    }

    /// Clock one byte in from `data_pin`, sampling before each falling edge.
    fn shift_in(&mut self, data_pin: u8, clock_pin: u8, order: BitOrder) -> u8 {
        let mut value = 0u8;
        for i in 0..8 {
            self.digital_write(clock_pin, true);
            let bit = u8::from(self.digital_read(data_pin));
            match order {
                BitOrder::LsbFirst => value |= bit << i,
                BitOrder::MsbFirst => value |= bit << (7 - i),
            }
            self.digital_write(clock_pin, false);
        }
        value
    }
}

pub trait Analog {
    /// Raw ADC reading at the board's resolution.
    fn analog_read(&mut self, channel: u8) -> u16;
    /// 8-bit PWM duty on a PWM-capable pin.
    fn analog_write(&mut self, pin: u8, duty: u8);
    /// Returns false when the pin's timer cannot produce `hz`.
    fn set_pwm_frequency(&mut self, pin: u8, hz: u32) -> bool;
}

pub trait I2cBus {
    fn i2c_begin(&mut self, bus: u8);
    fn i2c_end(&mut self, bus: u8);
    fn i2c_set_clock(&mut self, bus: u8, hz: u32);
    /// Returns true when the target acknowledged every byte.
    fn i2c_write(&mut self, bus: u8, address: u8, data: &[u8], stop: bool) -> bool;
    /// Returns how many bytes were actually received into `buf`.
    fn i2c_read(&mut self, bus: u8, address: u8, buf: &mut [u8], stop: bool) -> usize;
}

pub trait SpiBus {
    fn spi_begin(&mut self, bus: u8);
    fn spi_end(&mut self, bus: u8);
    /// Full-duplex transfer; `buf` is overwritten with received bytes.
    fn spi_transfer(&mut self, bus: u8, settings: SpiSettings, buf: &mut [u8]);
}

pub trait SerialPorts {
    fn sci_begin(&mut self, port: u8, baud: u32, format: SciFormat);
    fn sci_end(&mut self, port: u8);
    fn sci_available(&mut self, port: u8) -> usize;
    fn sci_read(&mut self, port: u8, buf: &mut [u8]) -> usize;
    fn sci_write(&mut self, port: u8, data: &[u8]) -> usize;
}

pub trait ServoOutput {
    fn servo_attach(&mut self, pin: u8, min_pulse_us: u16, max_pulse_us: u16);
    fn servo_detach(&mut self, pin: u8);
    fn servo_write(&mut self, pin: u8, angle: u8);
    fn servo_read(&mut self, pin: u8) -> u8;
}

pub trait ToneOutput {
    /// `duration_ms == 0` plays until [`no_tone`](Self::no_tone).
    fn tone(&mut self, pin: u8, frequency: u16, duration_ms: u16);
    fn no_tone(&mut self, pin: u8);
}

pub trait PulseInput {
    /// Length in µs of the next pulse at `level`, or 0 on timeout.
    fn pulse_in(&mut self, pin: u8, level: bool, timeout_us: u32) -> u32;
}

pub trait PixelStrips {
    fn pixel_begin(&mut self, id: u8, pin: u8, num_pixels: u16, kind: u16);
    fn pixel_release(&mut self, id: u8);
    fn pixel_clear(&mut self, id: u8);
    fn pixel_set(&mut self, id: u8, index: u16, color: Color);
    fn pixel_brightness(&mut self, id: u8, brightness: u8);
    fn pixel_show(&mut self, id: u8);
}

/// Everything a board offers the drivers.
pub trait Board:
    Gpio
    + Analog
    + I2cBus
    + SpiBus
    + SerialPorts
    + ServoOutput
    + ToneOutput
    + PulseInput
    + PixelStrips
    + Send
{
}

impl<T> Board for T where
    T: Gpio
        + Analog
        + I2cBus
        + SpiBus
        + SerialPorts
        + ServoOutput
        + ToneOutput
        + PulseInput
        + PixelStrips
        + Send
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sci_format_accepts_uart_shapes() {
        assert_eq!(SciFormat::from_wire(8, 0, 1), Some(SciFormat::DEFAULT));
        assert_eq!(
            SciFormat::from_wire(7, 1, 2),
            Some(SciFormat {
                data_bits: 7,
                parity: Parity::Even,
                stop_bits: 2
            })
        );
    }

    #[test]
    fn sci_format_rejects_invalid_shapes() {
        assert!(SciFormat::from_wire(4, 0, 1).is_none());
        assert!(SciFormat::from_wire(9, 0, 1).is_none());
        assert!(SciFormat::from_wire(8, 3, 1).is_none());
        assert!(SciFormat::from_wire(8, 0, 0).is_none());
        assert!(SciFormat::from_wire(8, 0, 3).is_none());
    }

    #[test]
    fn pin_mode_wire_values() {
        assert_eq!(PinMode::from_u8(0), Some(PinMode::Input));
        assert_eq!(PinMode::from_u8(2), Some(PinMode::InputPullup));
        assert_eq!(PinMode::from_u8(3), None);
    }
}
