use iobridge_frame::PayloadCursor;

use super::user_pin;
use crate::driver::Context;
use crate::error::Result;

/// `[pin, frequency u16, duration u16]`. A zero frequency silences the pin.
pub fn play(ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
    let pin = user_pin(ctx, "Tone", cur.u8()?)?;
    let frequency = cur.u16_le()?;
    let duration_ms = cur.u16_le()?;
    if frequency == 0 {
        ctx.board.no_tone(pin);
    } else {
        ctx.board.tone(pin, frequency, duration_ms);
    }
    Ok(())
}
