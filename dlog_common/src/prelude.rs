//! Prelude module for common re-exports.
//!
//! ```rust
//! use dlog_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{
    EOS_MARKER, FRAME_BYTES, FRAME_CAPACITY, MIN_SAMPLING_PERIOD_US, SAMPLER_STOP,
    SAMPLER_STOPPED,
};

// ─── Sensors & Frames ───────────────────────────────────────────────
pub use crate::frame::SampleFrame;
pub use crate::sensor::{
    BoardReading, SamplingRoute, Sensor, SensorConfig, SensorFamily, SensorRegistry,
    default_sensors,
};

// ─── Protocol ───────────────────────────────────────────────────────
pub use crate::protocol::{
    DeviceToHostMessage, HostEvent, HostStreamDecoder, HostToDeviceMessage, ProtocolError,
};

// ─── Hardware Boundary ──────────────────────────────────────────────
pub use crate::hal::driver::{AdcInterface, Board, BoardFactory, BoardSensors, HalError};
pub use crate::hal::timer::{AlarmCallback, AlarmPool, TimerId};
pub use crate::hal::transport::{LineState, Transport, TransportListener};
