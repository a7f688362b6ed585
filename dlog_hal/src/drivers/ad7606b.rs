//! AD7606B simultaneous-sampling ADC driver.
//!
//! One conversion samples all eight channels at once:
//!
//! ```text
//! CONVST  ──┐‾‾‾‾┌───────────────────────────────
//!           │≥32ns│
//! BUSY    ───────┌‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾┐────────────────
//!                │ conversion    │
//! SPI     ────────────────────────[ 8 × 16 bit ]─
//! ```
//!
//! The driver owns the sequencing and timing; the [`AdcInterface`] below it
//! only moves pins and bytes. Every wait is bounded, so the driver can run
//! from the sampler's timer callback.

use dlog_common::consts::ADC_PHYSICAL_CHANNELS;
use dlog_common::frame::SampleFrame;
use dlog_common::hal::driver::{AdcInterface, HalError};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Minimum CONVST high time.
const CONVST_PULSE: Duration = Duration::from_nanos(32);

/// CONVST falling edge to BUSY valid.
const CONVST_TO_BUSY: Duration = Duration::from_nanos(48);

/// RESET release to first conversion.
const RESET_TO_READY: Duration = Duration::from_micros(253);

/// Driver timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ad7606bConfig {
    /// Upper bound on the BUSY poll.
    pub busy_timeout: Duration,
    /// RESET pulse width at init. The part needs at least 1 µs.
    pub reset_pulse: Duration,
}

impl Default for Ad7606bConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_micros(100),
            reset_pulse: Duration::from_micros(2),
        }
    }
}

/// Conversion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdcStats {
    /// Completed conversions.
    pub conversions: u64,
    /// Conversions abandoned because BUSY never dropped.
    pub busy_timeouts: u64,
    /// Failed channel reads.
    pub read_errors: u64,
    /// Longest BUSY wait seen [ns].
    pub max_busy_wait_ns: u64,
}

/// AD7606B driver over an interface `I`.
pub struct Ad7606b<I: AdcInterface> {
    lines: I,
    config: Ad7606bConfig,
    stats: AdcStats,
}

impl<I: AdcInterface> Ad7606b<I> {
    /// Wrap an interface. Call [`init`](Self::init) before sampling.
    pub fn new(lines: I, config: Ad7606bConfig) -> Self {
        Self {
            lines,
            config,
            stats: AdcStats::default(),
        }
    }

    /// Boot sequence: CONVST low, RESET pulse, wait for the part to settle.
    pub fn init(&mut self) {
        self.lines.set_convst(false);
        self.lines.set_reset(true);
        spin_for(self.config.reset_pulse.max(Duration::from_micros(1)));
        self.lines.set_reset(false);
        spin_for(RESET_TO_READY);
        info!(
            busy_timeout_us = self.config.busy_timeout.as_micros() as u64,
            "AD7606B initialized"
        );
    }

    /// Run one conversion and append the first `active` channels to `frame`.
    ///
    /// Raw words are two's complement and sign-extended. Returns the number
    /// of values appended, which is less than `active` only if the frame ran
    /// out of room.
    ///
    /// # Errors
    /// `HalError::AdcBusyTimeout` if BUSY outlives the configured timeout,
    /// or the interface's read error. Nothing is appended on error.
    pub fn sample(&mut self, active: usize, frame: &mut SampleFrame) -> Result<usize, HalError> {
        let raw = self.convert()?;
        let mut appended = 0;
        for &word in raw.iter().take(active.min(ADC_PHYSICAL_CHANNELS)) {
            if !frame.push(i32::from(word as i16)) {
                break;
            }
            appended += 1;
        }
        Ok(appended)
    }

    fn convert(&mut self) -> Result<[u16; ADC_PHYSICAL_CHANNELS], HalError> {
        self.lines.set_convst(true);
        spin_for(CONVST_PULSE);
        self.lines.set_convst(false);
        spin_for(CONVST_TO_BUSY);

        let start = Instant::now();
        while self.lines.busy() {
            let waited = start.elapsed();
            if waited >= self.config.busy_timeout {
                self.stats.busy_timeouts += 1;
                debug!(waited_us = waited.as_micros() as u64, "ADC busy timeout");
                return Err(HalError::AdcBusyTimeout {
                    waited_us: waited.as_micros() as u64,
                });
            }
            std::hint::spin_loop();
        }
        let waited_ns = start.elapsed().as_nanos() as u64;
        self.stats.max_busy_wait_ns = self.stats.max_busy_wait_ns.max(waited_ns);

        let mut raw = [0u16; ADC_PHYSICAL_CHANNELS];
        if let Err(e) = self.lines.read_channels(&mut raw) {
            self.stats.read_errors += 1;
            return Err(e);
        }
        self.stats.conversions += 1;
        Ok(raw)
    }

    /// Counters snapshot.
    pub fn stats(&self) -> AdcStats {
        self.stats
    }

    /// Driver configuration.
    pub fn config(&self) -> &Ad7606bConfig {
        &self.config
    }
}

impl<I: AdcInterface> std::fmt::Debug for Ad7606b<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ad7606b")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Busy-wait; the delays here are far below scheduler granularity.
#[inline]
fn spin_for(duration: Duration) {
    let until = Instant::now() + duration;
    while Instant::now() < until {
        std::hint::spin_loop();
    }
}
