//! System-wide constants for the dlog workspace.
//!
//! Single source of truth for protocol bounds, buffer sizes and hardware
//! limits. Imported by all crates.

/// Physical channels on the ADC (AD7606B).
pub const ADC_PHYSICAL_CHANNELS: usize = 8;

/// Maximum number of registered sensors.
pub const MAX_SENSORS: usize = 8;

/// Maximum sensor name length in bytes.
pub const MAX_SENSOR_NAME_LEN: usize = 64;

/// Channel slots in one sample frame.
pub const FRAME_CAPACITY: usize = 8;

/// Serialized size of one sample frame on the egress stream (8 × i32 LE).
pub const FRAME_BYTES: usize = FRAME_CAPACITY * core::mem::size_of::<i32>();

/// Default egress ring buffer capacity in bytes.
pub const DEFAULT_EGRESS_CAPACITY: usize = 2560;

/// Maximum bytes moved from the egress queue to the transport per drain.
pub const DEFAULT_DRAIN_CHUNK: usize = 256;

/// Smallest supported sampling interval [µs].
///
/// Below this the egress writer cannot drain one frame per period and the
/// queue overflows.
pub const MIN_SAMPLING_PERIOD_US: u32 = 40;

/// End-of-stream marker byte.
pub const EOS_BYTE: u8 = 0xFF;

/// End-of-stream marker length.
pub const EOS_LEN: usize = 10;

/// End-of-stream marker sent once after a confirmed stop.
pub const EOS_MARKER: [u8; EOS_LEN] = [EOS_BYTE; EOS_LEN];

/// Maximum host → device payload length (one length byte).
pub const MAX_INGRESS_MESSAGE_SIZE: usize = u8::MAX as usize;

/// Maximum encoded acknowledgment size, length byte included.
pub const MAX_ACK_MESSAGE_SIZE: usize = 32;

/// Maximum encoded device → host message size, length byte included.
pub const MAX_DEVICE_MESSAGE_SIZE: usize = 64;

/// Controller mailbox value requesting a stop.
pub const SAMPLER_STOP: u32 = 0;

/// Return mailbox value confirming the sampler is stopped and the egress
/// path is empty.
pub const SAMPLER_STOPPED: u32 = 1;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dlog/device.toml";
