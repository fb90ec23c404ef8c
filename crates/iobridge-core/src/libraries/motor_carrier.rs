//! Motor carrier shield (DC motors, servos, encoders, PID) behind an I2C
//! co-processor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use iobridge_config::MotorCarrierVariant;
use iobridge_frame::PayloadCursor;
use tracing::{debug, info};

use crate::critical::{CriticalSection, PinSampler};
use crate::driver::{Capability, Context, Driver, FULL_CAPABILITIES};
use crate::error::{CoreError, Result};

pub const CREATE_MOTOR_CARRIER: u8 = 0x00;
pub const DELETE_MOTOR_CARRIER: u8 = 0x01;
pub const CREATE_DC_MOTOR: u8 = 0x02;
pub const START_DC_MOTOR: u8 = 0x03;
pub const STOP_DC_MOTOR: u8 = 0x04;
pub const SET_DUTYCYCLE_DC_MOTOR: u8 = 0x05;
pub const CREATE_SERVO_MOTOR: u8 = 0x06;
pub const CLEAR_SERVO_MOTOR: u8 = 0x07;
pub const WRITE_SERVO_POSITION: u8 = 0x09;
pub const CREATE_ENCODER: u8 = 0x0A;
pub const RESET_ENCODER_COUNT: u8 = 0x0B;
pub const READ_ENCODER_COUNT: u8 = 0x0C;
pub const READ_ENCODER_SPEED: u8 = 0x0D;
pub const DELETE_ENCODER: u8 = 0x0E;
pub const SET_DCM_VELOCITY: u8 = 0x0F;
pub const SET_DCM_POSITION: u8 = 0x10;
pub const SET_PID_GAINS: u8 = 0x11;
pub const SET_MAX_ACCELERATION: u8 = 0x12;
pub const SET_MAX_VELOCITY: u8 = 0x13;

/// Pin the carrier pulls low when it has fresh data.
pub const DEFAULT_IRQ_PIN: u8 = 6;

const DC_MOTORS: u8 = 4;
const SERVOS: u8 = 4;
const ENCODERS: u8 = 2;
const PID_LOOPS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Velocity,
    Position,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PidGains {
    Integer { kp: i16, ki: i16, kd: i16 },
    Float { kp: f32, ki: f32, kd: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setpoint {
    Velocity(i16),
    Position(i32),
}

/// Vendor library surface of the carrier's co-processor.
///
/// DC motors 0 and 1 are driven by the co-processor, 2 and 3 by the host
/// MCU's own timers; implementations route by index.
pub trait MotorController: Send {
    fn begin(&mut self, address: u8);
    fn reboot(&mut self);
    /// Keep-alive; the co-processor stops the motors when pings stop.
    fn ping(&mut self);
    fn set_dc_frequency(&mut self, motor: u8, hz: u32);
    fn set_dc_duty(&mut self, motor: u8, duty: i16);
    fn set_servo_frequency(&mut self, servo: u8, hz: u32);
    fn set_servo_angle(&mut self, servo: u8, angle: u8);
    fn encoder_reset(&mut self, encoder: u8, count: i32);
    fn encoder_count(&mut self, encoder: u8) -> i32;
    /// `(overflow, underflow)` flags.
    fn encoder_overflow_underflow(&mut self, encoder: u8) -> (u8, u8);
    fn encoder_speed(&mut self, encoder: u8) -> i32;
    fn pid_mode(&mut self, motor: u8, mode: ControlMode);
    fn pid_gains(&mut self, motor: u8, gains: PidGains);
    fn pid_max_acceleration(&mut self, motor: u8, acceleration: i16);
    fn pid_max_velocity(&mut self, motor: u8, velocity: i16);
    fn pid_setpoint(&mut self, motor: u8, setpoint: Setpoint);
}

const COMMANDS: &[u8] = &[
    CREATE_MOTOR_CARRIER,
    DELETE_MOTOR_CARRIER,
    CREATE_DC_MOTOR,
    START_DC_MOTOR,
    STOP_DC_MOTOR,
    SET_DUTYCYCLE_DC_MOTOR,
    CREATE_SERVO_MOTOR,
    CLEAR_SERVO_MOTOR,
    WRITE_SERVO_POSITION,
    CREATE_ENCODER,
    RESET_ENCODER_COUNT,
    READ_ENCODER_COUNT,
    READ_ENCODER_SPEED,
    DELETE_ENCODER,
    SET_DCM_VELOCITY,
    SET_DCM_POSITION,
    SET_PID_GAINS,
    SET_MAX_ACCELERATION,
    SET_MAX_VELOCITY,
];

pub struct MotorCarrier<C> {
    controller: C,
    variant: MotorCarrierVariant,
    irq_pin: u8,
    in_use: bool,
    data_ready: Arc<AtomicBool>,
    gains: [PidGains; PID_LOOPS as usize],
    max_acceleration: [i16; PID_LOOPS as usize],
}

impl<C: MotorController> MotorCarrier<C> {
    pub fn new(controller: C, variant: MotorCarrierVariant) -> Self {
        let zero = match variant {
            MotorCarrierVariant::Mkr => PidGains::Integer {
                kp: 0,
                ki: 0,
                kd: 0,
            },
            MotorCarrierVariant::Nano => PidGains::Float {
                kp: 0.0,
                ki: 0.0,
                kd: 0.0,
            },
        };
        Self {
            controller,
            variant,
            irq_pin: DEFAULT_IRQ_PIN,
            in_use: false,
            data_ready: Arc::new(AtomicBool::new(false)),
            gains: [zero; PID_LOOPS as usize],
            max_acceleration: [0; PID_LOOPS as usize],
        }
    }

    pub fn with_irq_pin(mut self, pin: u8) -> Self {
        self.irq_pin = pin;
        self
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    /// Whether the carrier raised its data-ready interrupt since the last
    /// encoder read.
    pub fn data_ready(&self) -> bool {
        self.data_ready.load(Ordering::Acquire)
    }

    fn index(cur: &mut PayloadCursor<'_>, limit: u8, what: &'static str) -> Result<u8> {
        let index = cur.u8()?;
        if index >= limit {
            return Err(CoreError::Unsupported {
                family: "MotorCarrier",
                message: format!("{what} {index} out of range (max {limit})"),
            });
        }
        Ok(index)
    }

    /// Re-apply mode, stored gains and acceleration, then the new target.
    fn closed_loop(&mut self, motor: u8, mode: ControlMode, setpoint: Setpoint) {
        self.controller.set_dc_duty(motor, 0);
        self.controller.pid_mode(motor, mode);
        self.controller.pid_gains(motor, self.gains[motor as usize]);
        self.controller
            .pid_max_acceleration(motor, self.max_acceleration[motor as usize]);
        self.controller.pid_setpoint(motor, setpoint);
    }
}

impl<C: MotorController> Driver for MotorCarrier<C> {
    fn name(&self) -> &str {
        "MotorCarrier"
    }

    fn capabilities(&self) -> &'static [Capability] {
        FULL_CAPABILITIES
    }

    fn accepts(&self, command: u8) -> bool {
        COMMANDS.contains(&command)
    }

    fn handle(&mut self, ctx: &mut Context<'_>, command: u8, payload: &[u8]) -> Result<Bytes> {
        let mut cur = PayloadCursor::new(payload);
        match command {
            CREATE_MOTOR_CARRIER => {
                let address = cur.u8()?;
                self.controller.begin(address);
                self.controller.reboot();
                self.in_use = true;
                info!(address, variant = ?self.variant, "motor carrier started");
            }
            DELETE_MOTOR_CARRIER => {
                self.in_use = false;
                info!("motor carrier released");
            }
            CREATE_DC_MOTOR => {
                let motor = Self::index(&mut cur, DC_MOTORS, "motor")?;
                let hz = u32::from(cur.u8()?);
                let _mode = cur.u8()?;
                self.controller.set_dc_frequency(motor, hz);
                if motor < 2 {
                    self.controller.set_dc_duty(motor, 0);
                }
            }
            START_DC_MOTOR | SET_DUTYCYCLE_DC_MOTOR => {
                let motor = Self::index(&mut cur, DC_MOTORS, "motor")?;
                let duty = cur.i16_le()?;
                self.controller.set_dc_duty(motor, duty);
            }
            STOP_DC_MOTOR => {
                let motor = Self::index(&mut cur, DC_MOTORS, "motor")?;
                self.controller.set_dc_duty(motor, 0);
            }
            CREATE_SERVO_MOTOR => {
                let servo = Self::index(&mut cur, SERVOS, "servo")?;
                let hz = u32::from(cur.u8()?);
                self.controller.set_servo_frequency(servo, hz);
            }
            CLEAR_SERVO_MOTOR => {
                Self::index(&mut cur, SERVOS, "servo")?;
            }
            WRITE_SERVO_POSITION => {
                let servo = Self::index(&mut cur, SERVOS, "servo")?;
                let angle = cur.u8()?;
                self.controller.set_servo_angle(servo, angle);
            }
            CREATE_ENCODER => {
                let encoder = Self::index(&mut cur, ENCODERS, "encoder")?;
                let flag = Arc::clone(&self.data_ready);
                ctx.irq.attach(
                    self.irq_pin,
                    Box::new(move |_cs: &CriticalSection<'_>, _pins: &dyn PinSampler| {
                        flag.store(true, Ordering::Release);
                    }),
                );
                self.controller.encoder_reset(encoder, 0);
            }
            RESET_ENCODER_COUNT => {
                let encoder = Self::index(&mut cur, ENCODERS, "encoder")?;
                let count = cur.i32_le()?;
                self.controller.encoder_reset(encoder, count);
            }
            READ_ENCODER_COUNT => {
                let encoder = Self::index(&mut cur, ENCODERS, "encoder")?;
                let reset = cur.bool()?;
                let count = self.controller.encoder_count(encoder);
                let (overflow, underflow) = self.controller.encoder_overflow_underflow(encoder);
                if reset {
                    self.controller.encoder_reset(encoder, 0);
                }
                self.data_ready.store(false, Ordering::Release);
                let mut out = BytesMut::with_capacity(6);
                out.put_i32_le(count);
                out.put_u8(overflow);
                out.put_u8(underflow);
                return Ok(out.freeze());
            }
            READ_ENCODER_SPEED => {
                let encoder = Self::index(&mut cur, ENCODERS, "encoder")?;
                let speed = self.controller.encoder_speed(encoder);
                return Ok(Bytes::copy_from_slice(&speed.to_le_bytes()));
            }
            DELETE_ENCODER => {
                Self::index(&mut cur, ENCODERS, "encoder")?;
                ctx.irq.detach(self.irq_pin);
            }
            SET_DCM_VELOCITY => {
                let motor = Self::index(&mut cur, PID_LOOPS, "pid loop")?;
                let target = cur.i16_le()?;
                self.closed_loop(motor, ControlMode::Velocity, Setpoint::Velocity(target));
            }
            SET_DCM_POSITION => {
                let motor = Self::index(&mut cur, PID_LOOPS, "pid loop")?;
                let relative = cur.bool()?;
                let target = match self.variant {
                    MotorCarrierVariant::Mkr => {
                        let target = cur.i16_le()?;
                        if relative {
                            // The MKR firmware only holds a 16-bit target.
                            let current = self.controller.encoder_count(motor);
                            i32::from(current.wrapping_add(i32::from(target)) as i16)
                        } else {
                            i32::from(target)
                        }
                    }
                    MotorCarrierVariant::Nano => {
                        let target = cur.i32_le()?;
                        if relative {
                            self.controller.encoder_count(motor).wrapping_add(target)
                        } else {
                            target
                        }
                    }
                };
                self.closed_loop(motor, ControlMode::Position, Setpoint::Position(target));
            }
            SET_PID_GAINS => {
                let motor = Self::index(&mut cur, PID_LOOPS, "pid loop")?;
                self.gains[motor as usize] = match self.variant {
                    MotorCarrierVariant::Mkr => PidGains::Integer {
                        kp: cur.i16_le()?,
                        ki: cur.i16_le()?,
                        kd: cur.i16_le()?,
                    },
                    MotorCarrierVariant::Nano => PidGains::Float {
                        kp: cur.f32_le()?,
                        ki: cur.f32_le()?,
                        kd: cur.f32_le()?,
                    },
                };
            }
            SET_MAX_ACCELERATION => {
                let motor = Self::index(&mut cur, PID_LOOPS, "pid loop")?;
                self.max_acceleration[motor as usize] = cur.i16_le()?;
            }
            SET_MAX_VELOCITY => {
                let motor = Self::index(&mut cur, PID_LOOPS, "pid loop")?;
                let velocity = cur.i16_le()?;
                self.controller.pid_max_velocity(motor, velocity);
            }
            other => debug!(command = other, "motor carrier command ignored"),
        }
        Ok(Bytes::new())
    }

    fn on_tick(&mut self, _ctx: &mut Context<'_>) {
        if self.in_use {
            self.controller.ping();
        }
    }
}
