use jsonschema::Validator;
use serde_json::Value;

use crate::error::{ConfigError, Result};

/// JSON Schema every board descriptor document must satisfy.
pub const BOARD_SCHEMA: &str = r#"{
    "$schema": "https://json-schema.org/draft/2020-12/schema",
    "type": "object",
    "additionalProperties": false,
    "required": [
        "name", "digital_pins", "analog_pins", "pwm_pins", "i2c_buses",
        "spi_buses", "sci_port_first", "sci_port_last", "adc_resolution_bits"
    ],
    "properties": {
        "name": { "type": "string", "pattern": "^[a-z0-9][a-z0-9_-]{0,31}$" },
        "digital_pins": { "type": "integer", "minimum": 1, "maximum": 255 },
        "analog_pins": { "type": "integer", "minimum": 0, "maximum": 255 },
        "pwm_pins": {
            "type": "array",
            "uniqueItems": true,
            "items": { "type": "integer", "minimum": 0, "maximum": 254 }
        },
        "i2c_buses": { "type": "integer", "minimum": 0, "maximum": 8 },
        "spi_buses": { "type": "integer", "minimum": 0, "maximum": 8 },
        "sci_port_first": { "type": "integer", "minimum": 0, "maximum": 8 },
        "sci_port_last": { "type": "integer", "minimum": 0, "maximum": 8 },
        "adc_resolution_bits": { "type": "integer", "minimum": 8, "maximum": 16 },
        "reserved_pins": {
            "type": "array",
            "uniqueItems": true,
            "items": { "type": "integer", "minimum": 0, "maximum": 254 }
        },
        "max_servos": { "type": "integer", "minimum": 0, "maximum": 64 },
        "max_encoders": { "type": "integer", "minimum": 0, "maximum": 8 },
        "max_neopixels": { "type": "integer", "minimum": 0, "maximum": 32 },
        "motor_carrier": { "enum": ["mkr", "nano", null] },
        "custom_families": {
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "servo": { "type": "boolean" },
                "tone": { "type": "boolean" },
                "encoder": { "type": "boolean" },
                "ultrasonic": { "type": "boolean" },
                "shift_register": { "type": "boolean" },
                "neopixel": { "type": "boolean" }
            }
        },
        "tx_buffer_size": { "type": "integer", "minimum": 16, "maximum": 65535 }
    }
}"#;

pub(crate) fn compile_board_schema() -> Result<Validator> {
    let schema: Value = serde_json::from_str(BOARD_SCHEMA)?;
    jsonschema::validator_for(&schema).map_err(|err| ConfigError::CompileFailed(err.to_string()))
}

pub(crate) fn validate_document(name: &str, value: &Value, validator: &Validator) -> Result<()> {
    let mut errors = validator.iter_errors(value);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(ConfigError::ValidationFailed {
            name: name.to_string(),
            message,
        });
    }

    Ok(())
}
