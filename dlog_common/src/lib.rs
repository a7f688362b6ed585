//! dlog Common Library
//!
//! Shared definitions for every crate of the data-logger workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Protocol bounds, buffer sizes and hardware limits
//! - [`config`] - Configuration loading traits and types
//! - [`sensor`] - Sensor model and the boot-time sensor registry
//! - [`frame`] - Composite sample frame and its stream encoding
//! - [`protocol`] - Host ↔ device messages, framing and the host-side decoder
//! - [`hal`] - Hardware boundary traits (ADC lines, timers, transport)
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use dlog_common::prelude::*;
//!
//! let registry = SensorRegistry::from_configs(&default_sensors()).unwrap();
//! assert_eq!(registry.adc_channel_count(), 2);
//! ```

pub mod config;
pub mod consts;
pub mod frame;
pub mod hal;
pub mod prelude;
pub mod protocol;
pub mod sensor;
