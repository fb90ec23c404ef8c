//! Trigger/echo ultrasonic rangers (HC-SR04 style).

use std::time::Duration;

use iobridge_frame::{PayloadCursor, ResponseBuffer};

use super::user_pin;
use crate::driver::Context;
use crate::error::Result;
use crate::hal::PinMode;

pub const TRIGGER_SETTLE: Duration = Duration::from_micros(2);
pub const TRIGGER_PULSE: Duration = Duration::from_micros(10);

const FAMILY: &str = "Ultrasonic";

fn pins(ctx: &Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<(u8, u8)> {
    let trigger = user_pin(ctx, FAMILY, cur.u8()?)?;
    let echo = user_pin(ctx, FAMILY, cur.u8()?)?;
    Ok((trigger, echo))
}

/// `[trigger, echo]`
pub fn attach(ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
    let (trigger, echo) = pins(ctx, cur)?;
    ctx.board.pin_mode(trigger, PinMode::Output);
    ctx.board.digital_write(trigger, false);
    ctx.board.pin_mode(echo, PinMode::Input);
    Ok(())
}

pub fn detach(ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
    let (trigger, _echo) = pins(ctx, cur)?;
    ctx.board.pin_mode(trigger, PinMode::Input);
    Ok(())
}

/// `[trigger, echo, timeout u32]` -> echo pulse length in µs (0 on timeout).
pub fn read(
    ctx: &mut Context<'_>,
    cur: &mut PayloadCursor<'_>,
    tx: &mut ResponseBuffer,
) -> Result<()> {
    let (trigger, echo) = pins(ctx, cur)?;
    let timeout_us = cur.u32_le()?;

    ctx.board.digital_write(trigger, false);
    ctx.clock.sleep(TRIGGER_SETTLE);
    ctx.board.digital_write(trigger, true);
    ctx.clock.sleep(TRIGGER_PULSE);
    ctx.board.digital_write(trigger, false);

    let duration = ctx.board.pulse_in(echo, true, timeout_us);
    tx.put_u32_le(duration)?;
    Ok(())
}
