//! # dlog HAL
//!
//! Board drivers for the data logger. The pipeline in `dlog_device` only sees
//! the traits from `dlog_common::hal`; this crate supplies implementations.
//!
//! # Module Structure
//!
//! - [`driver_registry`] - board factory registration
//! - [`drivers`] - AD7606B driver and the simulation board
//! - [`transport`] - host links (in-process loopback, serial tty)
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        dlog_hal                                │
//! │  ┌────────────────┐   ┌───────────────┐   ┌─────────────────┐  │
//! │  │ BoardRegistry  │──►│ Board         │──►│ Ad7606b<Adc>    │  │
//! │  │ name → factory │   │ adc, sensors, │   │ CONVST/BUSY/SPI │  │
//! │  └────────────────┘   │ alarm pool    │   └─────────────────┘  │
//! │                       └───────────────┘                        │
//! │  ┌────────────────────────────┐  ┌──────────────────────────┐  │
//! │  │ LoopbackTransport + Host   │  │ SerialTransport (tty)    │  │
//! │  └────────────────────────────┘  └──────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod driver_registry;
pub mod drivers;
pub mod transport;

pub use crate::driver_registry::BoardRegistry;
pub use crate::drivers::ad7606b::{Ad7606b, Ad7606bConfig, AdcStats};
pub use crate::transport::loopback::{LoopbackHost, LoopbackTransport};
pub use crate::transport::serial::SerialTransport;
