//! Board driver implementations.
//!
//! - [`ad7606b`] - AD7606B sequencing on top of any `AdcInterface`
//! - [`simulation`] - software board for development and testing
//!
//! # Adding New Boards
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `AdcInterface`, `BoardSensors` and `AlarmPool` for it
//! 3. Register its factory in [`register_builtin`]

pub mod ad7606b;
pub mod simulation;

use crate::driver_registry::BoardRegistry;
use dlog_common::hal::driver::HalError;

/// Register all built-in boards.
///
/// # Errors
/// `HalError::DuplicateBoard` if one of them is already registered.
pub fn register_builtin(registry: &mut BoardRegistry) -> Result<(), HalError> {
    registry.register("simulation", simulation::create_board)
}
