//! 74HC165 / 74HC595 / 74HC164 shift registers driven by bit-banging.

use std::time::Duration;

use iobridge_frame::{PayloadCursor, ResponseBuffer};
use tracing::debug;

use super::user_pin;
use crate::driver::Context;
use crate::error::Result;
use crate::hal::{BitOrder, PinMode};

pub const MODEL_74HC165: u8 = 1;
pub const MODEL_74HC595: u8 = 2;
pub const MODEL_74HC164: u8 = 3;

pub const LOAD_PULSE: Duration = Duration::from_micros(5);

const FAMILY: &str = "ShiftRegister";

struct Pins {
    model: u8,
    data: u8,
    clock: u8,
    latch: Option<u8>,
}

impl Pins {
    fn parse(ctx: &Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<Self> {
        let model = cur.u8()?;
        let data = user_pin(ctx, FAMILY, cur.u8()?)?;
        let clock = user_pin(ctx, FAMILY, cur.u8()?)?;
        let latch = if model == MODEL_74HC595 {
            Some(user_pin(ctx, FAMILY, cur.u8()?)?)
        } else {
            None
        };
        Ok(Self {
            model,
            data,
            clock,
            latch,
        })
    }
}

/// `[model, data, clock, (latch), isReset, (reset), n, bytes..]`
pub fn write(ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
    let pins = Pins::parse(ctx, cur)?;
    let reset = if cur.bool()? {
        Some(user_pin(ctx, FAMILY, cur.u8()?)?)
    } else {
        None
    };
    let n = cur.u8()? as usize;
    let bytes = cur.take(n)?;

    let board = &mut *ctx.board;
    board.pin_mode(pins.data, PinMode::Output);
    board.pin_mode(pins.clock, PinMode::Output);
    if let Some(reset) = reset {
        board.pin_mode(reset, PinMode::Output);
        board.digital_write(reset, true);
    }

    match (pins.model, pins.latch) {
        (MODEL_74HC595, Some(latch)) => {
            board.pin_mode(latch, PinMode::Output);
            board.digital_write(latch, false);
            for &byte in bytes.iter().rev() {
                board.shift_out(pins.data, pins.clock, BitOrder::MsbFirst, byte);
            }
            board.digital_write(latch, true);
        }
        (MODEL_74HC164, _) => {
            for &byte in bytes {
                board.shift_out(pins.data, pins.clock, BitOrder::MsbFirst, byte);
            }
        }
        (model, _) => debug!(model, "shift write for unsupported model"),
    }
    Ok(())
}

/// `[1, data, clock, load, ce, n]` -> n bytes.
pub fn read(
    ctx: &mut Context<'_>,
    cur: &mut PayloadCursor<'_>,
    tx: &mut ResponseBuffer,
) -> Result<()> {
    let model = cur.u8()?;
    let data = user_pin(ctx, FAMILY, cur.u8()?)?;
    let clock = user_pin(ctx, FAMILY, cur.u8()?)?;
    let load = user_pin(ctx, FAMILY, cur.u8()?)?;
    let ce = user_pin(ctx, FAMILY, cur.u8()?)?;
    let n = cur.u8()? as usize;
    if model != MODEL_74HC165 {
        debug!(model, "shift read needs a 74HC165");
        return Ok(());
    }

    let board = &mut *ctx.board;
    board.pin_mode(data, PinMode::Input);
    board.pin_mode(clock, PinMode::Output);
    board.pin_mode(load, PinMode::Output);
    board.pin_mode(ce, PinMode::Output);

    board.digital_write(load, false);
    ctx.clock.sleep(LOAD_PULSE);
    board.digital_write(load, true);
    board.digital_write(ce, false);
    for _ in 0..n {
        let byte = board.shift_in(data, clock, BitOrder::MsbFirst);
        tx.put_u8(byte)?;
    }
    board.digital_write(ce, true);
    Ok(())
}

/// `[model, data, clock, (latch), isReset, reset]`
pub fn reset(ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
    let pins = Pins::parse(ctx, cur)?;
    if !cur.bool()? {
        return Ok(());
    }
    let reset = user_pin(ctx, FAMILY, cur.u8()?)?;

    let board = &mut *ctx.board;
    board.pin_mode(reset, PinMode::Output);
    match (pins.model, pins.latch) {
        (MODEL_74HC595, Some(latch)) => {
            board.digital_write(reset, false);
            board.pin_mode(latch, PinMode::Output);
            board.digital_write(latch, false);
            board.digital_write(latch, true);
        }
        (MODEL_74HC164, _) => board.digital_write(reset, false),
        (model, _) => debug!(model, "shift reset for unsupported model"),
    }
    Ok(())
}
