//! Sample composition: one frame from the ADC plus the board readings.
//!
//! Runs from both cores (the periodic timer callback and the one-off
//! command), so the hardware sits behind `try_lock`. Whoever loses the race
//! gets zeros for the contended slots and never waits.

use super::rate_limited;
use dlog_common::frame::SampleFrame;
use dlog_common::hal::driver::{AdcInterface, BoardSensors};
use dlog_common::sensor::{BoardReading, SensorRegistry};
use dlog_hal::{Ad7606b, AdcStats};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// ADC driver over whatever lines the board provides.
pub type BoardAdc = Ad7606b<Box<dyn AdcInterface>>;

/// Composer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComposerStats {
    /// Frames composed.
    pub frames: u64,
    /// Frames whose ADC slots were zero-filled because the ADC was busy in
    /// the other context.
    pub adc_contention: u64,
    /// Frames whose ADC slots were zero-filled after a conversion error.
    pub adc_errors: u64,
    /// Board readings replaced by zero (read failed or bus contended).
    pub sensor_faults: u64,
    /// Registered sensors that never contribute a value.
    pub unresolved_sensors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    adc_contention: AtomicU64,
    adc_errors: AtomicU64,
    sensor_faults: AtomicU64,
}

/// Shared handle to the registry and the sampling hardware.
#[derive(Clone)]
pub struct Acquisition {
    registry: Arc<SensorRegistry>,
    adc: Arc<Mutex<BoardAdc>>,
    board: Arc<Mutex<Box<dyn BoardSensors>>>,
    counters: Arc<Counters>,
    unresolved: u64,
}

impl Acquisition {
    /// Take ownership of the hardware. Unresolved sensors are reported here,
    /// once.
    pub fn new(registry: Arc<SensorRegistry>, adc: BoardAdc, board: Box<dyn BoardSensors>) -> Self {
        let mut unresolved = 0;
        for sensor in registry.unresolved() {
            unresolved += 1;
            warn!(
                id = sensor.id(),
                name = sensor.name(),
                family = ?sensor.family(),
                "Sensor has no sampling behaviour and contributes no value"
            );
        }
        Self {
            registry,
            adc: Arc::new(Mutex::new(adc)),
            board: Arc::new(Mutex::new(board)),
            counters: Arc::new(Counters::default()),
            unresolved,
        }
    }

    /// Compose one frame: ADC channels first, then board readings in
    /// registration order.
    ///
    /// Always yields `registry.expected_elements()` values.
    pub fn compose(&self) -> SampleFrame {
        let mut frame = SampleFrame::new();
        let channels = self.registry.adc_channel_count();

        if channels > 0 {
            match self.adc.try_lock() {
                Some(mut adc) => {
                    if let Err(e) = adc.sample(channels, &mut frame) {
                        let n = self.counters.adc_errors.fetch_add(1, Ordering::Relaxed) + 1;
                        if rate_limited(n) {
                            warn!(error = %e, count = n, "ADC conversion failed, slots zeroed");
                        }
                        zero_fill(&mut frame, channels);
                    }
                }
                None => {
                    self.counters.adc_contention.fetch_add(1, Ordering::Relaxed);
                    zero_fill(&mut frame, channels);
                }
            }
        }

        for (_, reading) in self.registry.board_readings() {
            frame.push(self.read_board(reading));
        }

        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        frame
    }

    fn read_board(&self, reading: BoardReading) -> i32 {
        let Some(mut board) = self.board.try_lock() else {
            self.counters.sensor_faults.fetch_add(1, Ordering::Relaxed);
            return 0;
        };
        let result = match reading {
            BoardReading::DieTemperature => board.die_temperature_mc(),
            BoardReading::SupplyVoltage => board.supply_voltage_mv(),
        };
        result.unwrap_or_else(|e| {
            let n = self.counters.sensor_faults.fetch_add(1, Ordering::Relaxed) + 1;
            if rate_limited(n) {
                warn!(error = %e, ?reading, count = n, "Board reading failed");
            }
            0
        })
    }

    /// Sensor registry.
    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    /// Counters snapshot.
    pub fn stats(&self) -> ComposerStats {
        ComposerStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            adc_contention: self.counters.adc_contention.load(Ordering::Relaxed),
            adc_errors: self.counters.adc_errors.load(Ordering::Relaxed),
            sensor_faults: self.counters.sensor_faults.load(Ordering::Relaxed),
            unresolved_sensors: self.unresolved,
        }
    }

    /// ADC driver counters, waiting for the ADC if it is mid-conversion.
    /// Not for use on the sampling path.
    pub fn adc_stats(&self) -> AdcStats {
        self.adc.lock().stats()
    }
}

fn zero_fill(frame: &mut SampleFrame, n: usize) {
    for _ in 0..n {
        frame.push(0);
    }
}
