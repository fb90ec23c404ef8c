//! Interrupt masking and state shared with interrupt handlers.
//!
//! Interrupt handlers preempt the main loop. Any state with more than one
//! field that a handler writes lives in an [`IsrCell`], and the only way to
//! touch an `IsrCell` is with a [`CriticalSection`] token, so a reader can
//! never observe a half-applied update.

use std::sync::Mutex;

/// Reads input levels from inside an interrupt handler.
pub trait PinSampler {
    fn level(&self, pin: u8) -> bool;
}

/// Body of a pin-change interrupt.
pub type IsrHandler = Box<dyn FnMut(&CriticalSection<'_>, &dyn PinSampler) + Send>;

/// Board interrupt controller.
///
/// `mask`/`unmask` nest: interrupts are delivered again only when every
/// `mask` has been matched by an `unmask`. Interrupts raised while masked
/// are held and run on the final `unmask`.
pub trait InterruptControl: Send + Sync {
    fn mask(&self);
    fn unmask(&self);

    /// Run `handler` on every level change of `pin`. Replaces any previous
    /// handler for the pin.
    fn attach(&self, pin: u8, handler: IsrHandler);

    /// Remove the handler for `pin`, if any.
    fn detach(&self, pin: u8);
}

/// Proof that interrupts are masked. Unmasks on drop.
pub struct CriticalSection<'a> {
    irq: Option<&'a dyn InterruptControl>,
}

impl<'a> CriticalSection<'a> {
    pub fn enter(irq: &'a dyn InterruptControl) -> Self {
        irq.mask();
        Self { irq: Some(irq) }
    }

    /// Token for code that already runs with interrupts masked, i.e. an
    /// interrupt handler invoked by an [`InterruptControl`] implementation.
    pub fn in_isr() -> CriticalSection<'static> {
        CriticalSection { irq: None }
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        if let Some(irq) = self.irq {
            irq.unmask();
        }
    }
}

/// Run `f` with interrupts masked.
pub fn with_masked<R>(
    irq: &dyn InterruptControl,
    f: impl FnOnce(&CriticalSection<'_>) -> R,
) -> R {
    let cs = CriticalSection::enter(irq);
    f(&cs)
}

/// State shared between the main loop and interrupt handlers.
#[derive(Debug, Default)]
pub struct IsrCell<T> {
    inner: Mutex<T>,
}

impl<T> IsrCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn with<R>(&self, _cs: &CriticalSection<'_>, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl<T: Copy> IsrCell<T> {
    /// Copy out a consistent snapshot.
    pub fn get(&self, cs: &CriticalSection<'_>) -> T {
        self.with(cs, |value| *value)
    }

    pub fn set(&self, cs: &CriticalSection<'_>, value: T) {
        self.with(cs, |slot| *slot = value);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingIrq {
        depth: AtomicUsize,
        masks: AtomicUsize,
    }

    impl InterruptControl for CountingIrq {
        fn mask(&self) {
            self.depth.fetch_add(1, Ordering::SeqCst);
            self.masks.fetch_add(1, Ordering::SeqCst);
        }

        fn unmask(&self) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }

        fn attach(&self, _pin: u8, _handler: IsrHandler) {}

        fn detach(&self, _pin: u8) {}
    }

    #[test]
    fn guard_masks_and_unmasks() {
        let irq = CountingIrq::default();
        {
            let _cs = CriticalSection::enter(&irq);
            assert_eq!(irq.depth.load(Ordering::SeqCst), 1);
            {
                let _inner = CriticalSection::enter(&irq);
                assert_eq!(irq.depth.load(Ordering::SeqCst), 2);
            }
            assert_eq!(irq.depth.load(Ordering::SeqCst), 1);
        }
        assert_eq!(irq.depth.load(Ordering::SeqCst), 0);
        assert_eq!(irq.masks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn isr_token_does_not_touch_controller() {
        let cell = IsrCell::new((1, 2));
        let cs = CriticalSection::in_isr();
        cell.with(&cs, |v| v.0 = 5);
        assert_eq!(cell.get(&cs), (5, 2));
    }

    #[test]
    fn with_masked_returns_value() {
        let irq = CountingIrq::default();
        let cell = IsrCell::new(41u32);
        let got = with_masked(&irq, |cs| {
            cell.with(cs, |v| *v += 1);
            cell.get(cs)
        });
        assert_eq!(got, 42);
        assert_eq!(irq.depth.load(Ordering::SeqCst), 0);
    }
}
