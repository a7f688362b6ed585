//! Device configuration.
//!
//! One TOML file, every section optional:
//!
//! ```toml
//! [shared]
//! service_name = "dlog-bench-01"
//!
//! [sampler]
//! min_period_us = 40
//!
//! [egress]
//! capacity_bytes = 2560
//! drain_chunk_bytes = 256
//!
//! [ingress]
//! rx_byte_timeout_ms = 50
//! stop_ack_timeout_ms = 2000   # 0 = wait forever
//!
//! [board]
//! driver = "simulation"
//! adc_busy_timeout_us = 100
//! ingress_core = 0
//! sampler_core = 1
//! rt_priority = 80
//!
//! [[sensors]]
//! id = 0
//! name = "MBA500_load_cell_torque"
//! family = "mba500_load_cell"
//! ```

use dlog_common::config::{ConfigError, SharedConfig};
use dlog_common::consts::{
    DEFAULT_DRAIN_CHUNK, DEFAULT_EGRESS_CAPACITY, FRAME_BYTES, MIN_SAMPLING_PERIOD_US,
};
use dlog_common::sensor::{SensorConfig, SensorError, SensorRegistry, default_sensors};
use dlog_hal::Ad7606bConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Periodic sampler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Shortest period the sampler runs at [µs]; requests below are clamped.
    pub min_period_us: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_period_us: MIN_SAMPLING_PERIOD_US,
        }
    }
}

/// Egress queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Ring buffer size [bytes].
    pub capacity_bytes: usize,
    /// Bytes the writer drains per transport write. Multiple of 32.
    pub drain_chunk_bytes: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_EGRESS_CAPACITY,
            drain_chunk_bytes: DEFAULT_DRAIN_CHUNK,
        }
    }
}

/// Command ingress settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Wait per payload byte before a message counts as truncated [ms].
    pub rx_byte_timeout_ms: u64,
    /// Wait for the sampler's stop confirmation [ms]; 0 waits forever.
    pub stop_ack_timeout_ms: u64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            rx_byte_timeout_ms: 50,
            stop_ack_timeout_ms: 2000,
        }
    }
}

impl IngressConfig {
    /// Per-byte read timeout.
    pub fn rx_byte_timeout(&self) -> Duration {
        Duration::from_millis(self.rx_byte_timeout_ms)
    }

    /// Stop confirmation timeout, `None` for unbounded.
    pub fn stop_ack_timeout(&self) -> Option<Duration> {
        (self.stop_ack_timeout_ms > 0).then(|| Duration::from_millis(self.stop_ack_timeout_ms))
    }
}

/// Board and core placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Registered board name.
    pub driver: String,
    /// ADC BUSY poll bound [µs].
    pub adc_busy_timeout_us: u64,
    /// CPU running command ingress.
    pub ingress_core: usize,
    /// CPU running the sampler, its timer and the egress writer.
    pub sampler_core: usize,
    /// SCHED_FIFO priority of the sampler core threads (`rt` feature only).
    pub rt_priority: i32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            driver: "simulation".to_string(),
            adc_busy_timeout_us: 100,
            ingress_core: 0,
            sampler_core: 1,
            rt_priority: 80,
        }
    }
}

impl BoardConfig {
    /// ADC driver timing for this board.
    pub fn adc_config(&self) -> Ad7606bConfig {
        Ad7606bConfig {
            busy_timeout: Duration::from_micros(self.adc_busy_timeout_us),
            ..Ad7606bConfig::default()
        }
    }
}

/// Complete device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Logging and identity.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Periodic sampler.
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Egress queue.
    #[serde(default)]
    pub egress: EgressConfig,
    /// Command ingress.
    #[serde(default)]
    pub ingress: IngressConfig,
    /// Board selection and core placement.
    #[serde(default)]
    pub board: BoardConfig,
    /// Sensors in registration order.
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            sampler: SamplerConfig::default(),
            egress: EgressConfig::default(),
            ingress: IngressConfig::default(),
            board: BoardConfig::default(),
            sensors: default_sensors(),
        }
    }
}

impl DeviceConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.sampler.min_period_us == 0 {
            return Err(invalid("sampler.min_period_us must be > 0"));
        }
        if self.egress.capacity_bytes < FRAME_BYTES {
            return Err(invalid(format!(
                "egress.capacity_bytes must hold at least one {FRAME_BYTES} byte frame"
            )));
        }
        let chunk = self.egress.drain_chunk_bytes;
        if chunk == 0 || chunk % FRAME_BYTES != 0 {
            return Err(invalid(format!(
                "egress.drain_chunk_bytes must be a non-zero multiple of {FRAME_BYTES}"
            )));
        }
        if chunk > self.egress.capacity_bytes {
            return Err(invalid(
                "egress.drain_chunk_bytes exceeds egress.capacity_bytes",
            ));
        }
        if self.ingress.rx_byte_timeout_ms == 0 {
            return Err(invalid("ingress.rx_byte_timeout_ms must be > 0"));
        }
        if self.board.driver.trim().is_empty() {
            return Err(invalid("board.driver cannot be empty"));
        }
        if self.board.adc_busy_timeout_us == 0 {
            return Err(invalid("board.adc_busy_timeout_us must be > 0"));
        }
        if !(1..=99).contains(&self.board.rt_priority) {
            return Err(invalid("board.rt_priority must be in 1..=99"));
        }
        self.registry()
            .map_err(|e| invalid(format!("sensors: {e}")))?;
        Ok(())
    }

    /// Build the sensor registry from the `[[sensors]]` list.
    ///
    /// # Errors
    /// The registry's construction error.
    pub fn registry(&self) -> Result<SensorRegistry, SensorError> {
        SensorRegistry::from_configs(&self.sensors)
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}
