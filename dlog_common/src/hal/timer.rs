//! Repeating hardware timer service.

use crate::hal::driver::HalError;

/// Callback run on every timer expiry, in interrupt context on hardware.
/// Returning `false` stops the timer.
pub type AlarmCallback = Box<dyn FnMut() -> bool + Send + 'static>;

/// Handle of a registered repeating timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u32);

/// Pool of repeating timers bound to one core.
///
/// `delay_us` follows the SDK convention: negative is the time between
/// callback starts (fixed rate), positive the time from the end of one
/// callback to the start of the next. Zero is rejected.
pub trait AlarmPool: Send {
    /// Register a repeating timer.
    ///
    /// # Errors
    /// `HalError::TimerRejected` if the delay is zero or the pool is full.
    fn add_repeating_timer_us(
        &mut self,
        delay_us: i64,
        callback: AlarmCallback,
    ) -> Result<TimerId, HalError>;

    /// Cancel a timer. When this returns `Ok`, the callback is not running
    /// and will not run again.
    ///
    /// # Errors
    /// `HalError::TimerNotFound` for an unknown id.
    fn cancel_repeating_timer(&mut self, id: TimerId) -> Result<(), HalError>;

    /// Timers currently registered.
    fn active_timers(&self) -> usize;
}
