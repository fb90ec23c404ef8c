use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::critical::{CriticalSection, InterruptControl, IsrHandler, PinSampler};

/// Input levels shared by the simulated board and its interrupt handlers.
#[derive(Debug)]
pub(crate) struct PinLevels {
    levels: Mutex<Vec<bool>>,
}

impl PinLevels {
    pub(crate) fn new() -> Self {
        Self {
            levels: Mutex::new(vec![false; 256]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<bool>> {
        self.levels.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn get(&self, pin: u8) -> bool {
        self.lock()[pin as usize]
    }

    /// Returns true when the level changed.
    pub(crate) fn set(&self, pin: u8, level: bool) -> bool {
        let mut levels = self.lock();
        let changed = levels[pin as usize] != level;
        levels[pin as usize] = level;
        changed
    }
}

impl PinSampler for PinLevels {
    fn level(&self, pin: u8) -> bool {
        self.get(pin)
    }
}

#[derive(Default)]
struct IrqState {
    depth: usize,
    masks: usize,
    pending: VecDeque<u8>,
    handlers: HashMap<u8, IsrHandler>,
    armed: Option<u8>,
}

/// In-memory interrupt controller.
///
/// Interrupts raised while masked are queued and delivered, in order, when
/// the outermost critical section ends. [`arm_on_mask`](Self::arm_on_mask)
/// raises an interrupt exactly as the next critical section starts, which
/// is how tests model an interrupt landing in the middle of a multi-field
/// read.
pub struct SimInterrupts {
    state: Mutex<IrqState>,
    pins: Arc<PinLevels>,
}

impl SimInterrupts {
    pub(crate) fn new(pins: Arc<PinLevels>) -> Self {
        Self {
            state: Mutex::new(IrqState::default()),
            pins,
        }
    }

    fn lock(&self) -> MutexGuard<'_, IrqState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Signal a level change on `pin`.
    pub fn raise(&self, pin: u8) {
        {
            let mut state = self.lock();
            if !state.handlers.contains_key(&pin) {
                return;
            }
            if state.depth > 0 {
                trace!(pin, "interrupt deferred");
                state.pending.push_back(pin);
                return;
            }
        }
        self.run_handler(pin);
    }

    /// Raise `pin` at the start of the next critical section.
    pub fn arm_on_mask(&self, pin: u8) {
        self.lock().armed = Some(pin);
    }

    pub fn is_attached(&self, pin: u8) -> bool {
        self.lock().handlers.contains_key(&pin)
    }

    /// Current nesting depth of critical sections.
    pub fn depth(&self) -> usize {
        self.lock().depth
    }

    /// Total number of critical sections entered.
    pub fn mask_count(&self) -> usize {
        self.lock().masks
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn run_handler(&self, pin: u8) {
        // Run without the controller lock; handlers may raise.
        let Some(mut handler) = self.lock().handlers.remove(&pin) else {
            return;
        };
        let cs = CriticalSection::in_isr();
        handler(&cs, self.pins.as_ref());
        self.lock().handlers.entry(pin).or_insert(handler);
    }
}

impl InterruptControl for SimInterrupts {
    fn mask(&self) {
        let mut state = self.lock();
        state.depth += 1;
        state.masks += 1;
        if let Some(pin) = state.armed.take() {
            state.pending.push_back(pin);
        }
    }

    fn unmask(&self) {
        let drained: Vec<u8> = {
            let mut state = self.lock();
            state.depth = state.depth.saturating_sub(1);
            if state.depth > 0 {
                return;
            }
            state.pending.drain(..).collect()
        };
        for pin in drained {
            self.run_handler(pin);
        }
    }

    fn attach(&self, pin: u8, handler: IsrHandler) {
        self.lock().handlers.insert(pin, handler);
    }

    fn detach(&self, pin: u8) {
        let mut state = self.lock();
        state.handlers.remove(&pin);
        state.pending.retain(|&p| p != pin);
    }
}
