use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Names of the built-in presets, in display order.
pub const PRESET_NAMES: [&str; 6] = ["uno", "mega2560", "due", "mkrzero", "nano33iot", "esp32"];

/// Motor carrier shield flavour. The two differ in PID gain and position
/// target encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorCarrierVariant {
    /// 16-bit integer gains and position targets.
    Mkr,
    /// Float gains and 32-bit position targets.
    Nano,
}

/// Optional custom-space peripheral families compiled into the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomFamilies {
    pub servo: bool,
    pub tone: bool,
    pub encoder: bool,
    pub ultrasonic: bool,
    pub shift_register: bool,
    pub neopixel: bool,
}

impl Default for CustomFamilies {
    fn default() -> Self {
        Self {
            servo: true,
            tone: true,
            encoder: true,
            ultrasonic: true,
            shift_register: true,
            neopixel: true,
        }
    }
}

/// Capability descriptor for one target board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    /// Digital pins, numbered `0..digital_pins`.
    pub digital_pins: u8,
    /// Analog input channels, numbered `0..analog_pins`.
    pub analog_pins: u8,
    /// Digital pins that can drive PWM.
    pub pwm_pins: Vec<u8>,
    pub i2c_buses: u8,
    pub spi_buses: u8,
    /// Lowest SCI port a client may open.
    pub sci_port_first: u8,
    /// Highest SCI port a client may open. Less than `sci_port_first` means
    /// the board has no free SCI port.
    pub sci_port_last: u8,
    pub adc_resolution_bits: u8,
    /// Pins left untouched by board init (host link, flash, strapping).
    #[serde(default)]
    pub reserved_pins: Vec<u8>,
    #[serde(default = "default_max_servos")]
    pub max_servos: u8,
    #[serde(default = "default_max_encoders")]
    pub max_encoders: u8,
    #[serde(default = "default_max_neopixels")]
    pub max_neopixels: u8,
    #[serde(default)]
    pub motor_carrier: Option<MotorCarrierVariant>,
    #[serde(default)]
    pub custom_families: CustomFamilies,
    /// Capacity of the custom-space transmit buffer.
    #[serde(default = "default_tx_buffer_size")]
    pub tx_buffer_size: usize,
}

fn default_max_servos() -> u8 {
    12
}

fn default_max_encoders() -> u8 {
    2
}

fn default_max_neopixels() -> u8 {
    10
}

fn default_tx_buffer_size() -> usize {
    512
}

impl BoardConfig {
    /// Look up a built-in preset by name (case-insensitive).
    pub fn preset(name: &str) -> Result<Self> {
        let board = match name.to_ascii_lowercase().as_str() {
            "uno" => Self {
                name: "uno".into(),
                digital_pins: 20,
                analog_pins: 6,
                pwm_pins: vec![3, 5, 6, 9, 10, 11],
                i2c_buses: 1,
                spi_buses: 1,
                sci_port_first: 1,
                sci_port_last: 0,
                adc_resolution_bits: 10,
                reserved_pins: vec![0, 1],
                max_servos: 12,
                max_encoders: 2,
                max_neopixels: 10,
                motor_carrier: None,
                custom_families: CustomFamilies::default(),
                tx_buffer_size: 256,
            },
            "mega2560" => Self {
                name: "mega2560".into(),
                digital_pins: 70,
                analog_pins: 16,
                pwm_pins: (2..=13).chain(44..=46).collect(),
                i2c_buses: 1,
                spi_buses: 1,
                sci_port_first: 1,
                sci_port_last: 3,
                adc_resolution_bits: 10,
                reserved_pins: vec![0, 1],
                max_servos: 48,
                max_encoders: 2,
                max_neopixels: 10,
                motor_carrier: None,
                custom_families: CustomFamilies::default(),
                tx_buffer_size: 512,
            },
            "due" => Self {
                name: "due".into(),
                digital_pins: 66,
                analog_pins: 12,
                pwm_pins: (2..=13).collect(),
                i2c_buses: 2,
                spi_buses: 1,
                sci_port_first: 1,
                sci_port_last: 3,
                adc_resolution_bits: 12,
                reserved_pins: (0..=1).chain(14..=19).collect(),
                max_servos: 12,
                max_encoders: 2,
                max_neopixels: 10,
                motor_carrier: None,
                custom_families: CustomFamilies::default(),
                tx_buffer_size: 512,
            },
            "mkrzero" => Self {
                name: "mkrzero".into(),
                digital_pins: 22,
                analog_pins: 7,
                pwm_pins: (0..=8).chain([10, 18, 19]).collect(),
                i2c_buses: 1,
                spi_buses: 1,
                sci_port_first: 1,
                sci_port_last: 1,
                adc_resolution_bits: 12,
                reserved_pins: vec![13, 14],
                max_servos: 12,
                max_encoders: 2,
                max_neopixels: 10,
                motor_carrier: Some(MotorCarrierVariant::Mkr),
                custom_families: CustomFamilies::default(),
                tx_buffer_size: 512,
            },
            "nano33iot" => Self {
                name: "nano33iot".into(),
                digital_pins: 22,
                analog_pins: 8,
                pwm_pins: vec![2, 3, 5, 6, 9, 10, 11, 12, 16, 17, 19],
                i2c_buses: 1,
                spi_buses: 1,
                sci_port_first: 1,
                sci_port_last: 1,
                adc_resolution_bits: 12,
                reserved_pins: vec![0, 1],
                max_servos: 12,
                max_encoders: 2,
                max_neopixels: 10,
                motor_carrier: Some(MotorCarrierVariant::Nano),
                custom_families: CustomFamilies::default(),
                tx_buffer_size: 512,
            },
            "esp32" => Self {
                name: "esp32".into(),
                digital_pins: 40,
                analog_pins: 16,
                pwm_pins: [2, 4, 5]
                    .into_iter()
                    .chain(12..=19)
                    .chain(21..=23)
                    .chain(25..=27)
                    .chain(32..=33)
                    .collect(),
                i2c_buses: 2,
                spi_buses: 1,
                sci_port_first: 1,
                sci_port_last: 2,
                adc_resolution_bits: 12,
                reserved_pins: [0, 1, 3]
                    .into_iter()
                    .chain(6..=11)
                    .chain([20, 24])
                    .chain(28..=31)
                    .collect(),
                max_servos: 16,
                max_encoders: 2,
                max_neopixels: 10,
                motor_carrier: None,
                custom_families: CustomFamilies::default(),
                tx_buffer_size: 512,
            },
            _ => return Err(ConfigError::UnknownBoard(name.to_string())),
        };
        Ok(board)
    }

    /// Number of SCI slots a handle table needs (ports `0..=sci_port_last`).
    pub fn sci_slots(&self) -> usize {
        if self.sci_port_last < self.sci_port_first {
            0
        } else {
            self.sci_port_last as usize + 1
        }
    }

    /// Whether a client may open `port`.
    pub fn sci_port_allowed(&self, port: u8) -> bool {
        self.sci_port_first <= port && port <= self.sci_port_last
    }

    pub fn is_pwm_pin(&self, pin: u8) -> bool {
        self.pwm_pins.contains(&pin)
    }

    pub fn is_reserved_pin(&self, pin: u8) -> bool {
        self.reserved_pins.contains(&pin)
    }

    /// Largest raw ADC reading.
    pub fn adc_max(&self) -> u16 {
        let bits = self.adc_resolution_bits.min(16);
        ((1u32 << bits) - 1) as u16
    }

    /// Check relations between fields the schema cannot express.
    pub fn check(&self) -> Result<()> {
        let fail = |message: String| {
            Err(ConfigError::Inconsistent {
                name: self.name.clone(),
                message,
            })
        };
        if let Some(pin) = self.pwm_pins.iter().find(|&&p| p >= self.digital_pins) {
            return fail(format!(
                "pwm pin {pin} is outside 0..{}",
                self.digital_pins
            ));
        }
        if let Some(pin) = self.reserved_pins.iter().find(|&&p| p >= self.digital_pins) {
            return fail(format!(
                "reserved pin {pin} is outside 0..{}",
                self.digital_pins
            ));
        }
        if !(8..=16).contains(&self.adc_resolution_bits) {
            return fail(format!(
                "adc resolution {} bits is outside 8..=16",
                self.adc_resolution_bits
            ));
        }
        if self.tx_buffer_size > u16::MAX as usize {
            return fail(format!(
                "tx buffer of {} bytes exceeds the {} byte packet body",
                self.tx_buffer_size,
                u16::MAX
            ));
        }
        if self.tx_buffer_size < 16 {
            return fail(format!(
                "tx buffer of {} bytes is too small",
                self.tx_buffer_size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_resolves_and_is_consistent() {
        for name in PRESET_NAMES {
            let board = BoardConfig::preset(name).unwrap();
            assert_eq!(board.name, name);
            board.check().unwrap();
        }
    }

    #[test]
    fn preset_lookup_is_case_insensitive() {
        assert_eq!(BoardConfig::preset("UNO").unwrap().name, "uno");
    }

    #[test]
    fn unknown_preset_errors() {
        assert!(matches!(
            BoardConfig::preset("teensy"),
            Err(ConfigError::UnknownBoard(_))
        ));
    }

    #[test]
    fn sci_range_rules() {
        let uno = BoardConfig::preset("uno").unwrap();
        assert_eq!(uno.sci_slots(), 0);
        assert!(!uno.sci_port_allowed(0));

        let mega = BoardConfig::preset("mega2560").unwrap();
        assert_eq!(mega.sci_slots(), 4);
        assert!(!mega.sci_port_allowed(0));
        assert!(mega.sci_port_allowed(3));
        assert!(!mega.sci_port_allowed(4));
    }

    #[test]
    fn adc_max_follows_resolution() {
        assert_eq!(BoardConfig::preset("uno").unwrap().adc_max(), 1023);
        assert_eq!(BoardConfig::preset("due").unwrap().adc_max(), 4095);
    }

    #[test]
    fn check_rejects_pwm_pin_out_of_range() {
        let mut board = BoardConfig::preset("uno").unwrap();
        board.pwm_pins.push(40);
        assert!(matches!(
            board.check(),
            Err(ConfigError::Inconsistent { .. })
        ));
    }

    #[test]
    fn check_caps_tx_buffer_at_packet_body_limit() {
        let mut board = BoardConfig::preset("mega2560").unwrap();
        board.tx_buffer_size = u16::MAX as usize;
        board.check().unwrap();
        board.tx_buffer_size = u16::MAX as usize + 1;
        assert!(matches!(
            board.check(),
            Err(ConfigError::Inconsistent { .. })
        ));
        board.tx_buffer_size = 8;
        assert!(board.check().is_err());
    }

    #[test]
    fn descriptor_defaults_apply_when_fields_missing() {
        let json = r#"{
            "name": "tiny",
            "digital_pins": 8,
            "analog_pins": 2,
            "pwm_pins": [1],
            "i2c_buses": 1,
            "spi_buses": 0,
            "sci_port_first": 1,
            "sci_port_last": 0,
            "adc_resolution_bits": 10
        }"#;
        let board: BoardConfig = serde_json::from_str(json).unwrap();
        assert_eq!(board.max_servos, 12);
        assert_eq!(board.max_encoders, 2);
        assert_eq!(board.max_neopixels, 10);
        assert_eq!(board.tx_buffer_size, 512);
        assert!(board.custom_families.neopixel);
        assert!(board.motor_carrier.is_none());
    }

    #[test]
    fn motor_carrier_variant_serializes_lowercase() {
        let board = BoardConfig::preset("nano33iot").unwrap();
        let value = serde_json::to_value(&board).unwrap();
        assert_eq!(value["motor_carrier"], "nano");
    }
}
