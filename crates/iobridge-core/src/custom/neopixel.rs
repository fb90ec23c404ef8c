//! Addressable LED strips.

use iobridge_frame::PayloadCursor;
use tracing::{debug, info};

use super::user_pin;
use crate::driver::Context;
use crate::error::Result;
use crate::hal::Color;

const FAMILY: &str = "NeoPixel";

pub struct NeoPixels {
    attached: Vec<bool>,
}

impl NeoPixels {
    pub fn new(max: usize) -> Self {
        Self {
            attached: vec![false; max],
        }
    }

    pub fn is_attached(&self, id: u8) -> bool {
        self.attached.get(id as usize).copied().unwrap_or(false)
    }

    /// `[numPixels u16, pin, type u16, id]`
    pub fn attach(&mut self, ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
        let num_pixels = cur.u16_le()?;
        let pin = user_pin(ctx, FAMILY, cur.u8()?)?;
        let kind = cur.u16_le()?;
        let id = cur.u8()?;
        let Some(slot) = self.attached.get_mut(id as usize) else {
            debug!(id, "neopixel id beyond table");
            return Ok(());
        };
        ctx.board.pixel_begin(id, pin, num_pixels, kind);
        ctx.board.pixel_clear(id);
        ctx.board.pixel_show(id);
        *slot = true;
        info!(id, pin, num_pixels, "neopixel attached");
        Ok(())
    }

    pub fn detach(&mut self, ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
        let id = cur.u8()?;
        if let Some(slot) = self.attached.get_mut(id as usize) {
            if *slot {
                ctx.board.pixel_release(id);
                *slot = false;
            }
        }
        Ok(())
    }

    /// `[id, numPixels u16, numLeds, brightness, length, colours.., ledNums..]`
    ///
    /// `length` only selects the colour layout; the size of the colour block
    /// comes from [`ColourBlock`].
    pub fn write(&mut self, ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
        let id = cur.u8()?;
        let _num_pixels = cur.u16_le()?;
        let num_leds = cur.u8()? as usize;
        let brightness = cur.u8()?;
        let block = ColourBlock::from_length(cur.u8()?);
        let colours = cur.take(block.size(num_leds))?;
        let leds = cur.take(num_leds)?;
        if !self.is_attached(id) {
            debug!(id, "write to detached neopixel");
            return Ok(());
        }

        ctx.board.pixel_clear(id);
        for (i, &led) in leds.iter().enumerate() {
            ctx.board.pixel_set(id, u16::from(led), block.colour(colours, i));
        }
        ctx.board.pixel_brightness(id, brightness);
        ctx.board.pixel_show(id);
        Ok(())
    }
}

/// Layout of the colour bytes in a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColourBlock {
    /// One RGB colour for every listed LED.
    SharedRgb,
    /// One RGBW colour for every listed LED.
    SharedRgbw,
    /// One RGB triple per listed LED.
    Rgb,
    /// One RGBW quad per listed LED.
    Rgbw,
}

impl ColourBlock {
    fn from_length(length: u8) -> Self {
        match length {
            3 => Self::SharedRgb,
            4 => Self::SharedRgbw,
            n if n % 3 == 0 => Self::Rgb,
            _ => Self::Rgbw,
        }
    }

    /// Bytes the block occupies for `num_leds` listed LEDs.
    fn size(self, num_leds: usize) -> usize {
        match self {
            Self::SharedRgb => 3,
            Self::SharedRgbw => 4,
            Self::Rgb => 3 * num_leds,
            Self::Rgbw => 4 * num_leds,
        }
    }

    /// Colour of the `i`-th listed LED.
    fn colour(self, colours: &[u8], i: usize) -> Color {
        let (offset, width) = match self {
            Self::SharedRgb => (0, 3),
            Self::SharedRgbw => (0, 4),
            Self::Rgb => (i * 3, 3),
            Self::Rgbw => (i * 4, 4),
        };
        let byte = |k: usize| colours.get(offset + k).copied().unwrap_or(0);
        Color {
            r: byte(0),
            g: byte(1),
            b: byte(2),
            w: if width == 4 { byte(3) } else { 0 },
        }
    }
}
