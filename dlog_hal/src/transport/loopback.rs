//! In-process transport pair.
//!
//! [`LoopbackTransport`] is the device end, [`LoopbackHost`] the host end.
//! The host end can send bytes, read what the device flushed and toggle the
//! line state, which makes the whole pipeline testable without hardware.
//!
//! ```text
//!  LoopbackHost::send ──► rx ──► Transport::read_byte
//!  Transport::write ──► packet (64 B) ──► to_host ──► LoopbackHost::recv
//! ```

use super::TX_PACKET_SIZE;
use dlog_common::hal::transport::{LineState, Transport, TransportListener};
use dlog_common::protocol::{HostToDeviceMessage, ProtocolError, encode_host_message};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Default room on the host side before device writes are refused.
pub const DEFAULT_HOST_BUFFER: usize = 64 * 1024;

struct Shared {
    rx: Mutex<VecDeque<u8>>,
    rx_ready: Condvar,
    packet: Mutex<Vec<u8>>,
    to_host: Mutex<VecDeque<u8>>,
    host_ready: Condvar,
    host_capacity: usize,
    line: AtomicU8,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
}

impl Shared {
    fn line_state(&self) -> LineState {
        LineState::from_bits_truncate(self.line.load(Ordering::Acquire))
    }

    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener.lock().clone()
    }

    /// Move the packet buffer to the host side. A packet goes whole or not
    /// at all, like a bulk transfer the host has not yet polled.
    fn send_packet(&self, packet: &mut Vec<u8>) -> usize {
        let n = packet.len();
        if n == 0 {
            return 0;
        }
        let mut to_host = self.to_host.lock();
        if self.host_capacity.saturating_sub(to_host.len()) < n {
            return 0;
        }
        to_host.extend(packet.drain(..));
        drop(to_host);
        self.host_ready.notify_all();
        n
    }
}

/// Device end of the loopback pair.
#[derive(Clone)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

/// Host end of the loopback pair.
#[derive(Clone)]
pub struct LoopbackHost {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    /// New pair with the default host buffer, host disconnected.
    pub fn pair() -> (LoopbackTransport, LoopbackHost) {
        Self::pair_with_host_buffer(DEFAULT_HOST_BUFFER)
    }

    /// New pair whose host side holds at most `host_capacity` unread bytes.
    /// A small value models a host that reads slowly.
    pub fn pair_with_host_buffer(host_capacity: usize) -> (LoopbackTransport, LoopbackHost) {
        let shared = Arc::new(Shared {
            rx: Mutex::new(VecDeque::new()),
            rx_ready: Condvar::new(),
            packet: Mutex::new(Vec::with_capacity(TX_PACKET_SIZE)),
            to_host: Mutex::new(VecDeque::new()),
            host_ready: Condvar::new(),
            host_capacity,
            line: AtomicU8::new(0),
            listener: Mutex::new(None),
        });
        (
            LoopbackTransport {
                shared: Arc::clone(&shared),
            },
            LoopbackHost { shared },
        )
    }
}

impl Transport for LoopbackTransport {
    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.shared.listener.lock() = Some(listener);
    }

    fn line_state(&self) -> LineState {
        self.shared.line_state()
    }

    fn available(&self) -> usize {
        self.shared.rx.lock().len()
    }

    fn read_byte(&self) -> Option<u8> {
        self.shared.rx.lock().pop_front()
    }

    fn read_byte_timeout(&self, timeout: Duration) -> Option<u8> {
        let deadline = Instant::now() + timeout;
        let mut rx = self.shared.rx.lock();
        loop {
            if let Some(byte) = rx.pop_front() {
                return Some(byte);
            }
            if self.shared.rx_ready.wait_until(&mut rx, deadline).timed_out() {
                return rx.pop_front();
            }
        }
    }

    fn write(&self, bytes: &[u8]) -> usize {
        if !self.connected() {
            return 0;
        }
        let mut packet = self.shared.packet.lock();
        let mut accepted = 0;
        while accepted < bytes.len() {
            let room = TX_PACKET_SIZE - packet.len();
            if room == 0 {
                self.shared.send_packet(&mut packet);
                if packet.len() == TX_PACKET_SIZE {
                    break;
                }
                continue;
            }
            let n = room.min(bytes.len() - accepted);
            packet.extend_from_slice(&bytes[accepted..accepted + n]);
            accepted += n;
        }
        if packet.len() == TX_PACKET_SIZE {
            self.shared.send_packet(&mut packet);
        }
        accepted
    }

    fn write_available(&self) -> usize {
        TX_PACKET_SIZE - self.shared.packet.lock().len()
    }

    fn flush(&self) -> usize {
        let mut packet = self.shared.packet.lock();
        self.shared.send_packet(&mut packet)
    }

    fn clear_tx(&self) -> bool {
        self.shared.packet.lock().clear();
        true
    }
}

impl LoopbackHost {
    /// Open the port: assert DTR and RTS.
    pub fn connect(&self) {
        self.set_line_state(LineState::DTR | LineState::RTS);
    }

    /// Close the port: drop all lines.
    pub fn disconnect(&self) {
        self.set_line_state(LineState::empty());
    }

    /// Change the line state and notify the device.
    pub fn set_line_state(&self, state: LineState) {
        self.shared.line.store(state.bits(), Ordering::Release);
        if let Some(listener) = self.shared.listener() {
            listener.on_line_state(state);
        }
    }

    /// Current line state.
    pub fn line_state(&self) -> LineState {
        self.shared.line_state()
    }

    /// Deliver raw bytes to the device.
    pub fn send(&self, bytes: &[u8]) {
        self.shared.rx.lock().extend(bytes.iter().copied());
        self.shared.rx_ready.notify_all();
        if let Some(listener) = self.shared.listener() {
            listener.on_rx();
        }
    }

    /// Encode and deliver one command.
    ///
    /// # Errors
    /// Encoding failures from the protocol layer.
    pub fn send_message(&self, msg: &HostToDeviceMessage) -> Result<(), ProtocolError> {
        self.send(&encode_host_message(msg)?);
        Ok(())
    }

    /// Take everything the device has flushed so far.
    pub fn take_received(&self) -> Vec<u8> {
        self.shared.to_host.lock().drain(..).collect()
    }

    /// Wait up to `timeout` for flushed bytes, then take at most `max`.
    pub fn recv_timeout(&self, max: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut to_host = self.shared.to_host.lock();
        while to_host.is_empty() {
            if self
                .shared
                .host_ready
                .wait_until(&mut to_host, deadline)
                .timed_out()
            {
                break;
            }
        }
        let n = max.min(to_host.len());
        to_host.drain(..n).collect()
    }

    /// Flushed bytes not yet read by the host.
    pub fn pending(&self) -> usize {
        self.shared.to_host.lock().len()
    }
}
