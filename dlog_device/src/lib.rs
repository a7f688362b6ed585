//! # dlog device
//!
//! The dual-core sampling pipeline of the data logger.
//!
//! One core runs command ingress: it decodes host commands, answers them and
//! tells the sampler what to do. The other core runs the periodic sampler
//! controller, whose timer callback composes a frame per period and queues it
//! on the egress ring, plus the egress writer that streams the ring to the
//! host in whole frames.
//!
//! # Module Structure
//!
//! - [`config`] - `device.toml` sections and validation
//! - [`sampler`] - frame composition and the sampler state machine
//! - [`egress`] - ring-to-transport writer
//! - [`ingress`] - host command handling
//! - [`runtime`] - wiring and thread lifecycle
//! - [`rt`] - memory locking and core placement (`rt` feature)
//! - [`error`] - error types
//!
//! # Example
//!
//! ```no_run
//! use dlog_device::config::DeviceConfig;
//! use dlog_device::runtime::DeviceRuntime;
//! use dlog_hal::{BoardRegistry, LoopbackTransport};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::default();
//! let board = BoardRegistry::with_builtin()?.create_board(&config.board.driver)?;
//! let (transport, host) = LoopbackTransport::pair();
//! let runtime = DeviceRuntime::start(&config, board, Arc::new(transport))?;
//! host.connect();
//! // ... drive it from `host` ...
//! let stats = runtime.shutdown();
//! println!("{} frames", stats.sampler.total_frames);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod egress;
pub mod error;
pub mod ingress;
pub mod rt;
pub mod runtime;
pub mod sampler;

pub use crate::config::DeviceConfig;
pub use crate::error::{ControllerError, DeviceError, IngressError};
pub use crate::runtime::{DeviceRuntime, DeviceStats};
