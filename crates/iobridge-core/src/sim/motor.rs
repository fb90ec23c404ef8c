use std::sync::{Arc, Mutex, MutexGuard};

use crate::libraries::motor_carrier::{ControlMode, MotorController, PidGains, Setpoint};

/// One call made against the simulated carrier.
#[derive(Debug, Clone, PartialEq)]
pub enum MotorCall {
    Begin(u8),
    Reboot,
    DcFrequency(u8, u32),
    DcDuty(u8, i16),
    ServoFrequency(u8, u32),
    ServoAngle(u8, u8),
    EncoderReset(u8, i32),
    Mode(u8, ControlMode),
    Gains(u8, PidGains),
    MaxAcceleration(u8, i16),
    MaxVelocity(u8, i16),
    Setpoint(u8, Setpoint),
}

#[derive(Debug, Default)]
struct Carrier {
    calls: Vec<MotorCall>,
    pings: usize,
    encoders: [(i32, (u8, u8)); 2],
    speeds: [i32; 2],
}

/// Motor carrier co-processor that records every call.
#[derive(Debug, Clone, Default)]
pub struct SimMotorController {
    inner: Arc<Mutex<Carrier>>,
}

impl SimMotorController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Carrier> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn calls(&self) -> Vec<MotorCall> {
        self.lock().calls.clone()
    }

    pub fn pings(&self) -> usize {
        self.lock().pings
    }

    pub fn set_encoder(&self, encoder: u8, count: i32, flags: (u8, u8)) {
        self.lock().encoders[encoder as usize] = (count, flags);
    }

    pub fn encoder_value(&self, encoder: u8) -> i32 {
        self.lock().encoders[encoder as usize].0
    }

    pub fn set_speed(&self, encoder: u8, counts_per_second: i32) {
        self.lock().speeds[encoder as usize] = counts_per_second;
    }

    fn record(&self, call: MotorCall) {
        self.lock().calls.push(call);
    }
}

impl MotorController for SimMotorController {
    fn begin(&mut self, address: u8) {
        self.record(MotorCall::Begin(address));
    }

    fn reboot(&mut self) {
        self.record(MotorCall::Reboot);
    }

    fn ping(&mut self) {
        self.lock().pings += 1;
    }

    fn set_dc_frequency(&mut self, motor: u8, hz: u32) {
        self.record(MotorCall::DcFrequency(motor, hz));
    }

    fn set_dc_duty(&mut self, motor: u8, duty: i16) {
        self.record(MotorCall::DcDuty(motor, duty));
    }

    fn set_servo_frequency(&mut self, servo: u8, hz: u32) {
        self.record(MotorCall::ServoFrequency(servo, hz));
    }

    fn set_servo_angle(&mut self, servo: u8, angle: u8) {
        self.record(MotorCall::ServoAngle(servo, angle));
    }

    fn encoder_reset(&mut self, encoder: u8, count: i32) {
        let mut carrier = self.lock();
        carrier.encoders[encoder as usize] = (count, (0, 0));
        carrier.calls.push(MotorCall::EncoderReset(encoder, count));
    }

    fn encoder_count(&mut self, encoder: u8) -> i32 {
        self.encoder_value(encoder)
    }

    fn encoder_overflow_underflow(&mut self, encoder: u8) -> (u8, u8) {
        self.lock().encoders[encoder as usize].1
    }

    fn encoder_speed(&mut self, encoder: u8) -> i32 {
        self.lock().speeds[encoder as usize]
    }

    fn pid_mode(&mut self, motor: u8, mode: ControlMode) {
        self.record(MotorCall::Mode(motor, mode));
    }

    fn pid_gains(&mut self, motor: u8, gains: PidGains) {
        self.record(MotorCall::Gains(motor, gains));
    }

    fn pid_max_acceleration(&mut self, motor: u8, acceleration: i16) {
        self.record(MotorCall::MaxAcceleration(motor, acceleration));
    }

    fn pid_max_velocity(&mut self, motor: u8, velocity: i16) {
        self.record(MotorCall::MaxVelocity(motor, velocity));
    }

    fn pid_setpoint(&mut self, motor: u8, setpoint: Setpoint) {
        self.record(MotorCall::Setpoint(motor, setpoint));
    }
}
