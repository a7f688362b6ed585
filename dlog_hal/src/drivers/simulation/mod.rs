//! Simulation board.
//!
//! Stands in for the logger hardware when running hosted: a timed ADC with
//! deterministic waveforms, fixed board readings and a thread-backed alarm
//! pool.

mod adc;
mod board;
mod timer;

pub use adc::{SimulatedAdc, Waveform};
pub use board::SimulatedBoardSensors;
pub use timer::ThreadAlarmPool;

use dlog_common::hal::driver::{Board, HalError};
use tracing::info;

/// Factory for the `simulation` board.
pub fn create_board() -> Result<Board, HalError> {
    info!("Bringing up simulation board");
    Ok(Board {
        name: "simulation",
        adc: Box::new(SimulatedAdc::default()),
        sensors: Box::new(SimulatedBoardSensors::default()),
        alarm_pool: Box::new(ThreadAlarmPool::new("sampler")),
    })
}
