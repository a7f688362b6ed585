//! Error types of the device pipeline.
//!
//! None of these is fatal once the pipeline runs: the controller and the
//! ingress task log them, count them and carry on. Only [`DeviceError`]
//! escapes, from startup.

use dlog_common::config::ConfigError;
use dlog_common::hal::driver::HalError;
use dlog_common::protocol::ProtocolError;
use dlog_common::sensor::SensorError;
use dlog_ipc::IpcError;
use thiserror::Error;

/// Sampler controller failures. The controller state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// The alarm pool refused the sampling timer; the sampler stays idle.
    #[error("Sampling timer registration failed: {0}")]
    TimerRegistration(#[source] HalError),

    /// The sampling timer could not be cancelled; the sampler keeps running.
    #[error("Sampling timer cancellation failed: {0}")]
    TimerCancellation(#[source] HalError),
}

/// Command ingress failures. The offending message is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngressError {
    /// Woken for data but no length byte could be read.
    #[error("No length byte available")]
    MissingLength,

    /// The payload stopped arriving before `expected` bytes were read.
    #[error("Framing error: payload truncated at {received} of {expected} bytes")]
    Truncated {
        /// Announced payload length.
        expected: usize,
        /// Bytes read before the per-byte timeout.
        received: usize,
    },

    /// The payload is not a valid command.
    #[error("Decode error: {0}")]
    Decode(#[from] ProtocolError),

    /// `SetPeriodicSampler` with a zero period; answered with a negative ack.
    #[error("Zero sampling period rejected")]
    ZeroPeriod,

    /// The sampler did not confirm the stop in time; no end-of-stream sent.
    #[error("Sampler stop not confirmed: {0}")]
    StopTimeout(#[source] IpcError),

    /// The completion mailbox carried something other than the stop sentinel.
    #[error("Unexpected sampler completion value {0}")]
    UnexpectedCompletion(u32),

    /// The transport accepted fewer bytes than the reply needs.
    #[error("Short write: {written} of {len} bytes")]
    ShortWrite {
        /// Bytes accepted.
        written: usize,
        /// Bytes in the reply.
        len: usize,
    },

    /// Shutdown was requested while waiting for the sampler.
    #[error("Shutting down")]
    ShuttingDown,
}

/// Startup failures.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Sensor list rejected.
    #[error("Sensor registry: {0}")]
    Sensor(#[from] SensorError),

    /// Board bring-up or transport failure.
    #[error("Hardware: {0}")]
    Hal(#[from] HalError),

    /// Cross-core primitive could not be created.
    #[error("IPC: {0}")]
    Ipc(#[from] IpcError),

    /// Real-time setup (mlockall, affinity, scheduler) failed.
    #[error("RT setup failed: {0}")]
    RtSetup(String),

    /// A pipeline thread could not be started.
    #[error("Failed to spawn {thread}: {reason}")]
    Spawn {
        /// Thread name.
        thread: &'static str,
        /// OS error text.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_error_display() {
        let err = IngressError::Truncated {
            expected: 5,
            received: 2,
        };
        assert_eq!(
            err.to_string(),
            "Framing error: payload truncated at 2 of 5 bytes"
        );
        let err: IngressError = ProtocolError::EmptyPayload.into();
        assert!(matches!(err, IngressError::Decode(_)));
    }

    #[test]
    fn device_error_wraps_layers() {
        let err: DeviceError = HalError::DriverNotFound("fpga".into()).into();
        assert!(err.to_string().contains("fpga"));
        let err: DeviceError = ConfigError::FileNotFound.into();
        assert_eq!(err.to_string(), "Configuration file not found");
    }
}
