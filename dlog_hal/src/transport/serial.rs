//! Serial tty transport.
//!
//! Runs the device end of the link over a tty (USB gadget `ttyGS*`, a pty,
//! a UART). A reader thread polls the port and feeds the receive buffer;
//! writes collect in a 64-byte packet like a CDC endpoint.
//!
//! A tty exposes no DTR to the device side, so the port counts as connected
//! from open until the reader sees hang-up or EOF. The transport does not
//! reconnect after that.

use super::TX_PACKET_SIZE;
use dlog_common::hal::driver::HalError;
use dlog_common::hal::transport::{LineState, Transport, TransportListener};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{self, SetArg};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reader poll interval; bounds how long `drop` waits for the thread.
const POLL_INTERVAL_MS: u16 = 100;

/// Open a tty read/write in raw mode (no echo, no line discipline).
///
/// # Errors
/// `HalError::TransportError` if the port cannot be opened or configured.
pub fn open_raw_tty(path: &Path) -> Result<File, HalError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlag::O_NOCTTY.bits())
        .open(path)
        .map_err(|e| HalError::TransportError(format!("open {}: {e}", path.display())))?;
    make_raw(&file)?;
    Ok(file)
}

/// Switch an open tty to raw mode.
///
/// # Errors
/// `HalError::TransportError` if the descriptor is not a tty.
pub fn make_raw(file: &File) -> Result<(), HalError> {
    let mut attrs = termios::tcgetattr(file)
        .map_err(|e| HalError::TransportError(format!("tcgetattr: {e}")))?;
    termios::cfmakeraw(&mut attrs);
    termios::tcsetattr(file, SetArg::TCSANOW, &attrs)
        .map_err(|e| HalError::TransportError(format!("tcsetattr: {e}")))
}

struct Shared {
    rx: Mutex<VecDeque<u8>>,
    rx_ready: Condvar,
    line: AtomicU8,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    stop: AtomicBool,
}

impl Shared {
    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener.lock().clone()
    }

    fn hang_up(&self) {
        self.line.store(LineState::empty().bits(), Ordering::Release);
        if let Some(listener) = self.listener() {
            listener.on_line_state(LineState::empty());
        }
    }
}

/// Device end of the link over a tty.
pub struct SerialTransport {
    port: File,
    packet: Mutex<Vec<u8>>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Open `path` in raw mode and start the reader.
    ///
    /// # Errors
    /// `HalError::TransportError` on open, configure or spawn failure.
    pub fn open(path: &Path) -> Result<Self, HalError> {
        let port = open_raw_tty(path)?;
        info!(port = %path.display(), "Serial transport open");
        Self::from_file(port)
    }

    /// Use an already configured descriptor.
    ///
    /// # Errors
    /// `HalError::TransportError` if the descriptor cannot be cloned for the
    /// reader thread.
    pub fn from_file(port: File) -> Result<Self, HalError> {
        let reader_port = port
            .try_clone()
            .map_err(|e| HalError::TransportError(format!("clone port: {e}")))?;
        let shared = Arc::new(Shared {
            rx: Mutex::new(VecDeque::new()),
            rx_ready: Condvar::new(),
            line: AtomicU8::new((LineState::DTR | LineState::RTS).bits()),
            listener: Mutex::new(None),
            stop: AtomicBool::new(false),
        });
        let reader = thread::Builder::new()
            .name("serial-rx".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || read_loop(reader_port, &shared)
            })
            .map_err(|e| HalError::TransportError(format!("spawn reader: {e}")))?;

        Ok(Self {
            port,
            packet: Mutex::new(Vec::with_capacity(TX_PACKET_SIZE)),
            shared,
            reader: Some(reader),
        })
    }

    fn send_packet(&self, packet: &mut Vec<u8>) -> usize {
        if packet.is_empty() {
            return 0;
        }
        let n = packet.len();
        let result = (&self.port).write_all(packet);
        packet.clear();
        match result {
            Ok(()) => n,
            Err(e) => {
                warn!(error = %e, bytes = n, "Serial write failed, packet dropped");
                0
            }
        }
    }
}

impl Transport for SerialTransport {
    fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.shared.listener.lock() = Some(listener);
    }

    fn line_state(&self) -> LineState {
        LineState::from_bits_truncate(self.shared.line.load(Ordering::Acquire))
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
        let mut packet = self.packet.lock();
        let mut accepted = 0;
        for chunk in bytes.chunks(TX_PACKET_SIZE) {
            let mut rest = chunk;
            while !rest.is_empty() {
                let n = (TX_PACKET_SIZE - packet.len()).min(rest.len());
                packet.extend_from_slice(&rest[..n]);
                rest = &rest[n..];
                accepted += n;
                if packet.len() == TX_PACKET_SIZE {
                    self.send_packet(&mut packet);
                }
            }
        }
        accepted
    }

    fn write_available(&self) -> usize {
        TX_PACKET_SIZE - self.packet.lock().len()
    }

    fn flush(&self) -> usize {
        let mut packet = self.packet.lock();
        let sent = self.send_packet(&mut packet);
        if let Err(e) = (&self.port).flush() {
            debug!(error = %e, "Serial flush failed");
        }
        sent
    }

    fn clear_tx(&self) -> bool {
        self.packet.lock().clear();
        true
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Serial reader panicked");
            }
        }
    }
}

fn read_loop(port: File, shared: &Shared) {
    let mut buf = [0u8; 256];
    while !shared.stop.load(Ordering::Acquire) {
        let mut fds = [PollFd::new(port.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, "Serial poll failed");
                shared.hang_up();
                return;
            }
        }

        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        if !revents.contains(PollFlags::POLLIN)
            && revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR)
        {
            info!("Serial port hung up");
            shared.hang_up();
            return;
        }

        match (&port).read(&mut buf) {
            Ok(0) => {
                info!("Serial port closed");
                shared.hang_up();
                return;
            }
            Ok(n) => {
                shared.rx.lock().extend(&buf[..n]);
                shared.rx_ready.notify_all();
                if let Some(listener) = shared.listener() {
                    listener.on_rx();
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
            Err(e) => {
                info!(error = %e, "Serial port read ended");
                shared.hang_up();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::openpty;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Hangups(AtomicUsize);

    impl TransportListener for Hangups {
        fn on_rx(&self) {}

        fn on_line_state(&self, state: LineState) {
            if state.is_empty() {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn pty_pair() -> (SerialTransport, File) {
        let pty = openpty(None, None).unwrap();
        let device = File::from(pty.slave);
        make_raw(&device).unwrap();
        (SerialTransport::from_file(device).unwrap(), File::from(pty.master))
    }

    #[test]
    fn bytes_flow_both_ways() {
        let (transport, mut host) = pty_pair();
        assert!(transport.connected());

        host.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(transport.read_byte_timeout(Duration::from_secs(2)), Some(1));
        assert_eq!(transport.read_byte_timeout(Duration::from_secs(2)), Some(2));
        assert_eq!(transport.read_byte_timeout(Duration::from_secs(2)), Some(3));

        assert_eq!(transport.write(&[0xAA, 0xBB]), 2);
        assert_eq!(transport.flush(), 2);
        let mut got = [0u8; 2];
        host.read_exact(&mut got).unwrap();
        assert_eq!(got, [0xAA, 0xBB]);
    }

    #[test]
    fn clear_tx_discards_partial_packet() {
        let (transport, _host) = pty_pair();
        transport.write(&[5; 10]);
        assert_eq!(transport.write_available(), TX_PACKET_SIZE - 10);
        transport.clear_tx();
        assert_eq!(transport.flush(), 0);
    }

    #[test]
    fn host_close_drops_line_state() {
        let (transport, host) = pty_pair();
        let hangups = Arc::new(Hangups::default());
        transport.set_listener(hangups.clone());
        drop(host);

        let deadline = Instant::now() + Duration::from_secs(2);
        while transport.connected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!transport.connected());
        assert_eq!(hangups.0.load(Ordering::Relaxed), 1);
        assert_eq!(transport.write(&[1]), 0);
    }

    #[test]
    fn open_missing_port_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = SerialTransport::open(&dir.path().join("ttyNONE")).err().unwrap();
        assert!(matches!(err, HalError::TransportError(_)));
    }
}
