//! Error types for cross-core primitives

use thiserror::Error;

/// Errors raised by mailboxes and the egress queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// Nothing was posted before the deadline
    #[error("Mailbox '{mailbox}' timed out after {waited_ms} ms")]
    Timeout {
        /// Mailbox name
        mailbox: &'static str,
        /// Time waited in milliseconds
        waited_ms: u64,
    },

    /// Ring buffer capacity unusable
    #[error("Invalid egress capacity: {capacity} bytes")]
    InvalidCapacity {
        /// Requested capacity in bytes
        capacity: usize,
    },

    /// The single consumer handle was already handed out
    #[error("Egress consumer already taken")]
    ConsumerTaken,
}

/// Result type for cross-core operations
pub type IpcResult<T> = Result<T, IpcError>;
