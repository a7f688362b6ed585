//! Board registry.
//!
//! Maps the `board.driver` name from the configuration to the factory that
//! brings that board up. Built at startup and passed by value.

use crate::drivers;
use dlog_common::hal::driver::{Board, BoardFactory, HalError};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use tracing::debug;

/// Board factories by name, in name order.
#[derive(Default)]
pub struct BoardRegistry {
    factories: BTreeMap<&'static str, BoardFactory>,
}

impl BoardRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every board this crate ships.
    ///
    /// # Errors
    /// `HalError::DuplicateBoard` if two built-in boards share a name.
    pub fn with_builtin() -> Result<Self, HalError> {
        let mut registry = Self::new();
        drivers::register_builtin(&mut registry)?;
        Ok(registry)
    }

    /// Add a board factory. The first registration of a name wins.
    ///
    /// # Errors
    /// `HalError::DuplicateBoard` if `name` is taken; the registry is
    /// unchanged.
    pub fn register(&mut self, name: &'static str, factory: BoardFactory) -> Result<(), HalError> {
        match self.factories.entry(name) {
            Entry::Occupied(_) => Err(HalError::DuplicateBoard(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                debug!(board = name, "Board registered");
                Ok(())
            }
        }
    }

    /// `true` if a board is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Bring up a board by name.
    ///
    /// # Errors
    /// `HalError::DriverNotFound` for an unknown name, or whatever the
    /// factory reports.
    pub fn create_board(&self, name: &str) -> Result<Board, HalError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| HalError::DriverNotFound(name.to_string()))?;
        debug!(board = name, "Creating board");
        factory()
    }

    /// Registered board names, sorted.
    pub fn list_boards(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}
