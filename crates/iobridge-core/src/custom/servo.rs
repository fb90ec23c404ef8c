//! Hobby servos; the servo id is the output pin.

use std::collections::BTreeSet;

use iobridge_frame::{PayloadCursor, ResponseBuffer};
use tracing::debug;

use super::user_pin;
use crate::driver::Context;
use crate::error::{CoreError, Result};

const FAMILY: &str = "Servo";

/// Pins with an attached servo, bounded by the board's servo count.
pub struct Servos {
    attached: BTreeSet<u8>,
    max: usize,
}

impl Servos {
    pub fn new(max: usize) -> Self {
        Self {
            attached: BTreeSet::new(),
            max,
        }
    }

    pub fn is_attached(&self, pin: u8) -> bool {
        self.attached.contains(&pin)
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    /// `[id, min u16, max u16]`
    pub fn attach(&mut self, ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
        let pin = user_pin(ctx, FAMILY, cur.u8()?)?;
        let min_pulse_us = cur.u16_le()?;
        let max_pulse_us = cur.u16_le()?;
        if !self.attached.contains(&pin) && self.attached.len() >= self.max {
            return Err(CoreError::Unsupported {
                family: FAMILY,
                message: format!("all {} servos in use", self.max),
            });
        }
        debug!(pin, min_pulse_us, max_pulse_us, "servo attach");
        ctx.board.servo_attach(pin, min_pulse_us, max_pulse_us);
        self.attached.insert(pin);
        Ok(())
    }

    pub fn detach(&mut self, ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
        let pin = user_pin(ctx, FAMILY, cur.u8()?)?;
        if self.attached.remove(&pin) {
            ctx.board.servo_detach(pin);
        }
        Ok(())
    }

    pub fn read(
        &mut self,
        ctx: &mut Context<'_>,
        cur: &mut PayloadCursor<'_>,
        tx: &mut ResponseBuffer,
    ) -> Result<()> {
        let pin = user_pin(ctx, FAMILY, cur.u8()?)?;
        tx.put_u8(ctx.board.servo_read(pin))?;
        Ok(())
    }

    pub fn write(&mut self, ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
        let pin = user_pin(ctx, FAMILY, cur.u8()?)?;
        let angle = cur.u8()?;
        ctx.board.servo_write(pin, angle);
        Ok(())
    }
}
