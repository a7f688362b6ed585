//! Hardware boundary of the logger.
//!
//! The pipeline only talks to hardware through these traits. Board
//! implementations (simulation, serial) live in `dlog_hal`.

pub mod driver;
pub mod timer;
pub mod transport;
