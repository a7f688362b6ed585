//! Board driver traits and error types.
//!
//! This module defines:
//! - `AdcInterface` - the ADC control lines and channel read
//! - `BoardSensors` - readings taken from the board itself
//! - `Board` - the bundle a board factory hands to the runtime
//! - `HalError` - errors raised at the hardware boundary

use crate::consts::ADC_PHYSICAL_CHANNELS;
use crate::hal::timer::AlarmPool;
use thiserror::Error;

/// Errors raised at the hardware boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    /// Board bring-up failed.
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Bus transfer failed.
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),

    /// BUSY stayed asserted past the conversion budget.
    #[error("ADC conversion still busy after {waited_us} us")]
    AdcBusyTimeout {
        /// Time spent polling [µs].
        waited_us: u64,
    },

    /// Alarm pool refused a timer.
    #[error("Timer rejected: {0}")]
    TimerRejected(String),

    /// Cancel for a timer the pool does not know.
    #[error("Timer {0} not found")]
    TimerNotFound(u32),

    /// Board sensor not fitted or not answering.
    #[error("Board sensor unavailable: {0}")]
    SensorUnavailable(&'static str),

    /// Transport open or I/O failed.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// No factory registered under that board name.
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// A factory is already registered under that board name.
    #[error("Board '{0}' is already registered")]
    DuplicateBoard(String),
}

/// Control lines and data path of an AD7606B-class simultaneous-sampling ADC.
///
/// Implementations only move pins and bytes; sequencing and timing live in
/// the driver built on top.
///
/// # Timing Contracts
///
/// | Operation         | Max Duration           | Context            |
/// |-------------------|------------------------|--------------------|
/// | `set_convst()`    | pin write              | task and interrupt |
/// | `busy()`          | pin read               | task and interrupt |
/// | `read_channels()` | 8 × 16-bit at bus rate | task and interrupt |
/// | `set_reset()`     | pin write              | boot only          |
pub trait AdcInterface: Send {
    /// Drive the conversion-start line.
    fn set_convst(&mut self, high: bool);

    /// Drive the reset line.
    fn set_reset(&mut self, high: bool);

    /// Sample the busy line; `true` while a conversion is in progress.
    fn busy(&mut self) -> bool;

    /// Blocking read of all physical channels (16-bit two's complement).
    fn read_channels(&mut self, dest: &mut [u16; ADC_PHYSICAL_CHANNELS]) -> Result<(), HalError>;
}

impl<T: AdcInterface + ?Sized> AdcInterface for Box<T> {
    fn set_convst(&mut self, high: bool) {
        (**self).set_convst(high);
    }

    fn set_reset(&mut self, high: bool) {
        (**self).set_reset(high);
    }

    fn busy(&mut self) -> bool {
        (**self).busy()
    }

    fn read_channels(&mut self, dest: &mut [u16; ADC_PHYSICAL_CHANNELS]) -> Result<(), HalError> {
        (**self).read_channels(dest)
    }
}

/// Readings the board provides without the external ADC.
pub trait BoardSensors: Send {
    /// On-die temperature [m°C].
    fn die_temperature_mc(&mut self) -> Result<i32, HalError>;

    /// Supply rail [mV].
    fn supply_voltage_mv(&mut self) -> Result<i32, HalError>;
}

/// Hardware handed to the runtime by a board factory.
pub struct Board {
    /// Board name, as registered.
    pub name: &'static str,
    /// External ADC lines.
    pub adc: Box<dyn AdcInterface>,
    /// On-board readings.
    pub sensors: Box<dyn BoardSensors>,
    /// Repeating-timer service for the sampler core.
    pub alarm_pool: Box<dyn AlarmPool>,
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Factory function type for creating boards.
pub type BoardFactory = fn() -> Result<Board, HalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hal_error_display() {
        let err = HalError::AdcBusyTimeout { waited_us: 120 };
        assert!(err.to_string().contains("120"));
        let err = HalError::TimerNotFound(3);
        assert_eq!(err.to_string(), "Timer 3 not found");
    }
}
