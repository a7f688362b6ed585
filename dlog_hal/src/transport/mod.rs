//! Host link implementations of [`Transport`](dlog_common::hal::transport::Transport).
//!
//! Both emulate a USB CDC endpoint: writes collect in a packet buffer of
//! [`TX_PACKET_SIZE`] bytes that goes out when full or on `flush`.

pub mod loopback;
pub mod serial;

/// Full-speed USB bulk packet size.
pub const TX_PACKET_SIZE: usize = 64;
