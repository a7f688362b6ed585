//! Byte-stream transport to the host (USB CDC or any serial-like link).

use bitflags::bitflags;
use std::sync::Arc;
use std::time::Duration;

bitflags! {
    /// Modem control lines asserted by the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LineState: u8 {
        /// Data terminal ready: a host has the port open.
        const DTR = 0b0000_0001;
        /// Request to send.
        const RTS = 0b0000_0010;
    }
}

/// Receives transport events. Called from the transport's own context and
/// must return quickly without blocking.
pub trait TransportListener: Send + Sync {
    /// New bytes are readable.
    fn on_rx(&self);

    /// The host changed the line state.
    fn on_line_state(&self, state: LineState);
}

/// Device side of the host link.
///
/// Writes are buffered; bytes reach the host on [`flush`](Self::flush) or
/// when the transport's own packet buffer fills. All methods take `&self`
/// so the ingress and egress tasks can share one transport.
pub trait Transport: Send + Sync {
    /// Register the event listener, replacing any previous one.
    fn set_listener(&self, listener: Arc<dyn TransportListener>);

    /// Current line state.
    fn line_state(&self) -> LineState;

    /// `true` while a host holds the port open.
    fn connected(&self) -> bool {
        self.line_state().contains(LineState::DTR)
    }

    /// Bytes waiting to be read.
    fn available(&self) -> usize;

    /// Non-blocking read of one byte.
    fn read_byte(&self) -> Option<u8>;

    /// Read one byte, waiting up to `timeout`.
    fn read_byte_timeout(&self, timeout: Duration) -> Option<u8>;

    /// Queue bytes for transmission. Returns how many were accepted.
    fn write(&self, bytes: &[u8]) -> usize;

    /// Free space in the transmit buffer.
    fn write_available(&self) -> usize;

    /// Push queued bytes to the host. Returns how many were sent.
    fn flush(&self) -> usize;

    /// Drop queued, unsent bytes.
    fn clear_tx(&self) -> bool;
}
