//! Quadrature encoders decoded in pin-change interrupts.

use std::sync::Arc;
use std::time::Duration;

use iobridge_frame::{PayloadCursor, ResponseBuffer};
use tracing::{debug, info};

use crate::critical::{CriticalSection, InterruptControl, IsrCell, IsrHandler, PinSampler};
use super::user_pin;
use crate::driver::Context;
use crate::error::Result;
use crate::hal::PinMode;

/// Window between the two snapshots of a speed read.
pub const SPEED_WINDOW: Duration = Duration::from_millis(20);

/// Count and overflow of one encoder, written by its interrupt handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderCount {
    pub count: i32,
    /// Moves by one each time `count` wraps at an `i32` bound.
    pub overflow: i8,
    /// Last sampled `(A << 1) | B`.
    pub state: u8,
}

impl EncoderCount {
    /// Fold one new pin sample into the count.
    pub fn step(&mut self, a: bool, b: bool) {
        let new = (u8::from(a) << 1) | u8::from(b);
        let delta = quadrature_delta(self.state, new);
        self.state = new;
        match delta {
            1 if self.count == i32::MAX => {
                self.count = 0;
                self.overflow = self.overflow.wrapping_add(1);
            }
            -1 if self.count == i32::MIN => {
                self.count = 0;
                self.overflow = self.overflow.wrapping_sub(1);
            }
            _ => self.count += i32::from(delta),
        }
    }
}

/// Direction of one quadrature transition from `last` to `new` (both
/// `(A << 1) | B`).
pub fn quadrature_delta(last: u8, new: u8) -> i8 {
    match ((last & 0b11) << 2) | (new & 0b11) {
        0b1011 | 0b0100 | 0b0010 | 0b1101 => 1,
        0b0001 | 0b1110 | 0b0111 | 0b1000 => -1,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy)]
struct Attached {
    pin_a: u8,
    pin_b: u8,
}

pub struct Encoders {
    slots: Vec<Option<Attached>>,
    counts: Vec<Arc<IsrCell<EncoderCount>>>,
}

impl Encoders {
    pub fn new(max: usize) -> Self {
        Self {
            slots: vec![None; max],
            counts: (0..max)
                .map(|_| Arc::new(IsrCell::new(EncoderCount::default())))
                .collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_attached(&self, id: u8) -> bool {
        self.slots.get(id as usize).is_some_and(Option::is_some)
    }

    /// Consistent `(count, overflow)` snapshot.
    pub fn snapshot(&self, irq: &dyn InterruptControl, id: u8) -> Option<(i32, i8)> {
        let cell = self.counts.get(id as usize)?;
        let cs = CriticalSection::enter(irq);
        let value = cell.get(&cs);
        Some((value.count, value.overflow))
    }

    fn handler(cell: Arc<IsrCell<EncoderCount>>, pin_a: u8, pin_b: u8) -> IsrHandler {
        Box::new(move |cs: &CriticalSection<'_>, pins: &dyn PinSampler| {
            let a = pins.level(pin_a);
            let b = pins.level(pin_b);
            cell.with(cs, |enc| enc.step(a, b));
        })
    }

    pub fn attach(&mut self, ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
        let id = cur.u8()?;
        let pin_a = user_pin(ctx, "Encoder", cur.u8()?)?;
        let pin_b = user_pin(ctx, "Encoder", cur.u8()?)?;
        let Some(slot) = self.slots.get_mut(id as usize) else {
            debug!(id, "encoder id beyond table");
            return Ok(());
        };
        ctx.board.pin_mode(pin_a, PinMode::InputPullup);
        ctx.board.pin_mode(pin_b, PinMode::InputPullup);
        let initial = (u8::from(ctx.board.digital_read(pin_a)) << 1)
            | u8::from(ctx.board.digital_read(pin_b));

        let cell = &self.counts[id as usize];
        {
            let cs = CriticalSection::enter(ctx.irq);
            cell.set(
                &cs,
                EncoderCount {
                    count: 0,
                    overflow: 0,
                    state: initial,
                },
            );
        }
        ctx.irq
            .attach(pin_a, Self::handler(Arc::clone(cell), pin_a, pin_b));
        ctx.irq
            .attach(pin_b, Self::handler(Arc::clone(cell), pin_a, pin_b));
        *slot = Some(Attached { pin_a, pin_b });
        info!(id, pin_a, pin_b, "encoder attached");
        Ok(())
    }

    pub fn detach(&mut self, ctx: &mut Context<'_>, cur: &mut PayloadCursor<'_>) -> Result<()> {
        let id = cur.u8()?;
        if let Some(attached) = self.slots.get_mut(id as usize).and_then(Option::take) {
            ctx.irq.detach(attached.pin_a);
            ctx.irq.detach(attached.pin_b);
            info!(id, "encoder detached");
        }
        Ok(())
    }

    /// `[id, reset]` -> `count i32, millis u32, overflow i8`.
    ///
    /// A reset zeroes the count only; the overflow keeps tracking wraps.
    pub fn read_count(
        &mut self,
        ctx: &mut Context<'_>,
        cur: &mut PayloadCursor<'_>,
        tx: &mut ResponseBuffer,
    ) -> Result<()> {
        let id = cur.u8()?;
        let reset = cur.bool()?;
        let Some(cell) = self.counts.get(id as usize) else {
            return Ok(());
        };
        let value = {
            let cs = CriticalSection::enter(ctx.irq);
            cell.with(&cs, |enc| {
                let snapshot = *enc;
                if reset {
                    enc.count = 0;
                }
                snapshot
            })
        };
        tx.put_i32_le(value.count)?;
        tx.put_u32_le(ctx.clock.millis())?;
        tx.put_i8(value.overflow)?;
        Ok(())
    }

    /// `[n, id..]` -> `[overflowDiff i8, countDiff i16]` per id over one
    /// speed window.
    pub fn read_speed(
        &mut self,
        ctx: &mut Context<'_>,
        cur: &mut PayloadCursor<'_>,
        tx: &mut ResponseBuffer,
    ) -> Result<()> {
        let n = cur.u8()? as usize;
        let ids = cur.take(n)?;
        let before: Vec<(i32, i8)> = ids
            .iter()
            .map(|&id| self.snapshot(ctx.irq, id).unwrap_or_default())
            .collect();
        ctx.clock.sleep(SPEED_WINDOW);
        for (&id, &(count0, overflow0)) in ids.iter().zip(&before) {
            let (count1, overflow1) = self.snapshot(ctx.irq, id).unwrap_or_default();
            tx.put_i8(overflow1.wrapping_sub(overflow0))?;
            tx.put_i16_le(count1.wrapping_sub(count0) as i16)?;
        }
        Ok(())
    }

    /// `[id, count i32]`; the overflow counter is cleared.
    pub fn write_count(
        &mut self,
        ctx: &mut Context<'_>,
        cur: &mut PayloadCursor<'_>,
    ) -> Result<()> {
        let id = cur.u8()?;
        let count = cur.i32_le()?;
        if let Some(cell) = self.counts.get(id as usize) {
            let cs = CriticalSection::enter(ctx.irq);
            cell.with(&cs, |enc| {
                enc.count = count;
                enc.overflow = 0;
            });
        }
        Ok(())
    }

    /// Detach every encoder, leaving counts intact.
    pub fn release_all(&mut self, irq: &dyn InterruptControl) {
        for attached in self.slots.iter_mut().filter_map(Option::take) {
            irq.detach(attached.pin_a);
            irq.detach(attached.pin_b);
        }
    }
}
