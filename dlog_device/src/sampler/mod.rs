//! Periodic sampler: frame composition and the controller that arms and
//! disarms the sampling timer.

pub mod compose;
pub mod controller;

pub use compose::{Acquisition, BoardAdc, ComposerStats};
pub use controller::{
    PeriodicSamplerController, SamplerEvent, SamplerMonitor, SamplerState, SamplerStateMachine,
    SamplerStatus, TransitionResult,
};

/// Log gate for repeated failures on hot paths: the first 10, then every
/// 1000th. `count` is 1-based.
#[inline]
pub(crate) fn rate_limited(count: u64) -> bool {
    count <= 10 || count % 1000 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_pattern() {
        let logged: Vec<u64> = (1..=3000).filter(|&n| rate_limited(n)).collect();
        assert_eq!(logged.len(), 13);
        assert_eq!(&logged[9..], &[10, 1000, 2000, 3000]);
    }
}
