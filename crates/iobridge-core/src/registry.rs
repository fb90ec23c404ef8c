use tracing::info;

use crate::driver::Driver;
use crate::error::{CoreError, Result};

/// Maximum number of standard-space libraries (routes 0..=0xFD).
pub const MAX_LIBRARIES: usize = iobridge_frame::MAX_LIBRARY as usize + 1;

/// Append-only list of standard-space libraries.
///
/// A library's position is its route index. Entries are never removed and
/// names are not checked for duplicates; the first registration of a name
/// is the one clients find by name.
#[derive(Default)]
pub struct PeripheralRegistry {
    drivers: Vec<Box<dyn Driver>>,
}

impl PeripheralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a driver, returning its library index.
    pub fn register(&mut self, driver: Box<dyn Driver>) -> Result<u8> {
        if self.drivers.len() >= MAX_LIBRARIES {
            return Err(CoreError::RegistryFull { max: MAX_LIBRARIES });
        }
        let index = self.drivers.len() as u8;
        info!(library = driver.name(), index, "registered library");
        self.drivers.push(driver);
        Ok(index)
    }

    pub fn resolve(&mut self, index: u8) -> Option<&mut (dyn Driver + 'static)> {
        self.drivers.get_mut(index as usize).map(|d| d.as_mut())
    }

    /// Index of the first library registered under `name`.
    pub fn index_of(&self, name: &str) -> Option<u8> {
        self.drivers
            .iter()
            .position(|d| d.name() == name)
            .map(|i| i as u8)
    }

    pub fn names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Driver> {
        self.drivers.iter().map(|d| d.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Driver>> {
        self.drivers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
