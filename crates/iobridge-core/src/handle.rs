//! Generation-checked handle tables.
//!
//! A handle packs a slot index and the slot's generation:
//!
//! ```text
//! bits 31..16  generation (bumped on every close)
//! bits 15..0   index + 1  (0 means null)
//! ```
//!
//! The first handle issued for a slot is exactly `index + 1`. Closing a slot
//! bumps its generation, so a handle kept past `close` no longer resolves.
//! A slot whose generation is exhausted is retired rather than wrapped, and
//! never opens again.

use std::fmt;

use tracing::debug;

use crate::error::HandleError;

/// Opaque token for an opened peripheral instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u32);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.slot() == 0
    }

    fn new(index: usize, generation: u16) -> Self {
        Self((u32::from(generation) << 16) | (index as u32 + 1))
    }

    fn slot(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Handle(NULL)")
        } else {
            write!(
                f,
                "Handle(index={}, gen={})",
                self.slot() - 1,
                self.generation()
            )
        }
    }
}

struct Slot<S> {
    generation: u16,
    retired: bool,
    state: Option<S>,
}

/// Fixed-size table of open peripheral instances for one family.
pub struct HandleRegistry<S> {
    family: &'static str,
    slots: Vec<Slot<S>>,
}

impl<S> HandleRegistry<S> {
    /// Create a table with `max` slots (clamped to 65535).
    pub fn new(family: &'static str, max: usize) -> Self {
        let max = max.min(u16::MAX as usize);
        Self {
            family,
            slots: (0..max)
                .map(|_| Slot {
                    generation: 0,
                    retired: false,
                    state: None,
                })
                .collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    /// Open slot `index` with fresh session state.
    ///
    /// Returns [`Handle::NULL`] when `index` is beyond the table or the slot
    /// is retired. Opening a slot that is already open replaces its state and
    /// returns the live handle unchanged.
    pub fn open(&mut self, index: usize, state: S) -> Handle {
        let Some(slot) = self.slots.get_mut(index) else {
            debug!(family = self.family, index, "open beyond table");
            return Handle::NULL;
        };
        if slot.retired {
            debug!(family = self.family, index, "open on retired slot");
            return Handle::NULL;
        }
        if slot.state.is_some() {
            debug!(family = self.family, index, "reopening live slot");
        }
        slot.state = Some(state);
        Handle::new(index, slot.generation)
    }

    /// Resolve a handle to its slot index.
    pub fn to_index(&self, handle: Handle) -> Result<usize, HandleError> {
        if handle.is_null() {
            return Err(HandleError::Null);
        }
        let index = handle.slot() as usize - 1;
        let Some(slot) = self.slots.get(index) else {
            return Err(HandleError::OutOfRange {
                index,
                max: self.slots.len(),
            });
        };
        if slot.generation != handle.generation() || slot.state.is_none() {
            return Err(HandleError::Stale {
                index,
                generation: handle.generation(),
                current: slot.generation,
            });
        }
        Ok(index)
    }

    pub fn get(&self, handle: Handle) -> Result<&S, HandleError> {
        let index = self.to_index(handle)?;
        self.slots[index]
            .state
            .as_ref()
            .ok_or(HandleError::Null)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut S, HandleError> {
        let index = self.to_index(handle)?;
        self.slots[index]
            .state
            .as_mut()
            .ok_or(HandleError::Null)
    }

    /// Close the slot behind `handle`, returning its state.
    ///
    /// Closing a null, stale or already closed handle does nothing.
    pub fn close(&mut self, handle: Handle) -> Option<S> {
        let index = self.to_index(handle).ok()?;
        let slot = &mut self.slots[index];
        let state = slot.state.take();
        match slot.generation.checked_add(1) {
            Some(next) => slot.generation = next,
            None => {
                debug!(family = self.family, index, "slot generations exhausted");
                slot.retired = true;
            }
        }
        state
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.state.is_some())
    }

    /// State of an open slot, looked up by index.
    pub fn by_index(&self, index: usize) -> Option<&S> {
        self.slots.get(index).and_then(|slot| slot.state.as_ref())
    }

    /// Indices of all open slots.
    pub fn open_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state.is_some())
            .map(|(index, _)| index)
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.state.is_some()).count()
    }
}
