//! Command ingress: reads host commands and drives the sampler.
//!
//! Woken by the transport through a bits mailbox (data arrived, line state
//! changed). Each message is one length byte followed by a postcard payload;
//! the task keeps reading while bytes are available.
//!
//! ```text
//! Set(P)  ── clear TX ─ Ack ─ flush ─► post P ───────────► sampler arms
//! Stop    ── post 0 ─► wait STOPPED ─ 10 × 0xFF ─ flush
//! OneOff  ── compose here ─ OneOffSamplerData ─ flush
//! DTR ↓   ── post 0 ─► wait STOPPED            (no marker, nobody listens)
//! ```

use crate::config::IngressConfig;
use crate::error::IngressError;
use crate::sampler::Acquisition;
use dlog_common::consts::{
    EOS_MARKER, MAX_ACK_MESSAGE_SIZE, MAX_DEVICE_MESSAGE_SIZE, MAX_INGRESS_MESSAGE_SIZE,
    SAMPLER_STOP, SAMPLER_STOPPED,
};
use dlog_common::hal::transport::{LineState, Transport, TransportListener};
use dlog_common::protocol::{
    DeviceToHostMessage, HostToDeviceMessage, ProtocolError, decode_host_payload, encode_framed,
};
use dlog_hal::transport::TX_PACKET_SIZE;
use dlog_ipc::{IpcError, MailboxReceiver, MailboxSender, mailbox};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Event bit: bytes arrived.
pub const RX_EVENT: u32 = 1 << 0;
/// Event bit: line state changed.
pub const LINE_EVENT: u32 = 1 << 1;

/// How often waits check the running flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Longest a reply waits for the host to take its last packet.
const FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Transport listener that wakes the ingress task.
pub struct IngressWaker {
    events: MailboxSender,
}

impl TransportListener for IngressWaker {
    fn on_rx(&self) {
        self.events.post_bits(RX_EVENT);
    }

    fn on_line_state(&self, _state: LineState) {
        self.events.post_bits(LINE_EVENT);
    }
}

/// Ingress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngressStats {
    /// Commands decoded.
    pub commands: u64,
    /// Messages dropped for a missing length byte or a truncated payload.
    pub framing_errors: u64,
    /// Payloads that did not decode.
    pub decode_errors: u64,
    /// Commands refused (zero period).
    pub rejected: u64,
    /// End-of-stream markers sent.
    pub eos_sent: u64,
    /// Stops the sampler did not confirm.
    pub stop_failures: u64,
    /// One-off frames sent.
    pub one_offs: u64,
    /// Replies the transport did not fully accept.
    pub short_writes: u64,
    /// Host disconnects seen.
    pub disconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    commands: AtomicU64,
    framing_errors: AtomicU64,
    decode_errors: AtomicU64,
    rejected: AtomicU64,
    eos_sent: AtomicU64,
    stop_failures: AtomicU64,
    one_offs: AtomicU64,
    short_writes: AtomicU64,
    disconnects: AtomicU64,
}

/// Read-only view of the ingress task.
#[derive(Debug, Clone)]
pub struct IngressMonitor {
    counters: Arc<Counters>,
}

impl IngressMonitor {
    /// Counters snapshot.
    pub fn stats(&self) -> IngressStats {
        let c = &self.counters;
        IngressStats {
            commands: c.commands.load(Ordering::Relaxed),
            framing_errors: c.framing_errors.load(Ordering::Relaxed),
            decode_errors: c.decode_errors.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            eos_sent: c.eos_sent.load(Ordering::Relaxed),
            stop_failures: c.stop_failures.load(Ordering::Relaxed),
            one_offs: c.one_offs.load(Ordering::Relaxed),
            short_writes: c.short_writes.load(Ordering::Relaxed),
            disconnects: c.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// The ingress task. Runs on the ingress core.
pub struct CommandIngress {
    transport: Arc<dyn Transport>,
    acquisition: Acquisition,
    control: MailboxSender,
    stopped: MailboxReceiver,
    events: MailboxReceiver,
    rx_byte_timeout: Duration,
    stop_ack_timeout: Option<Duration>,
    counters: Arc<Counters>,
    session_started: Option<Instant>,
    was_connected: bool,
    running: Arc<AtomicBool>,
}

impl CommandIngress {
    /// Create the task and register its waker with the transport.
    ///
    /// `control` feeds the sampler controller; `stopped` is its stop
    /// confirmation.
    pub fn new(
        config: &IngressConfig,
        transport: Arc<dyn Transport>,
        acquisition: Acquisition,
        control: MailboxSender,
        stopped: MailboxReceiver,
        running: Arc<AtomicBool>,
    ) -> Self {
        let (events_tx, events) = mailbox("ingress-events");
        transport.set_listener(Arc::new(IngressWaker { events: events_tx }));
        let was_connected = transport.connected();
        Self {
            transport,
            acquisition,
            control,
            stopped,
            events,
            rx_byte_timeout: config.rx_byte_timeout(),
            stop_ack_timeout: config.stop_ack_timeout(),
            counters: Arc::new(Counters::default()),
            session_started: None,
            was_connected,
            running,
        }
    }

    /// Status handle for other threads.
    pub fn monitor(&self) -> IngressMonitor {
        IngressMonitor {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Serve events until the running flag drops.
    pub fn run(&mut self) {
        info!(
            connected = self.was_connected,
            stop_ack_timeout_ms = ?self.stop_ack_timeout.map(|t| t.as_millis() as u64),
            "Command ingress started"
        );
        while self.running.load(Ordering::Acquire) {
            match self.events.recv_timeout(SHUTDOWN_POLL) {
                Ok(bits) => self.service(bits),
                Err(IpcError::Timeout { .. }) => {
                    // Bytes that arrived before the waker was registered.
                    if self.transport.available() > 0 {
                        self.service(RX_EVENT);
                    }
                }
                Err(e) => warn!(error = %e, "Ingress event mailbox error"),
            }
        }
        info!("Command ingress stopped");
    }

    /// Handle one wake-up: line state first, then every pending message.
    pub fn service(&mut self, events: u32) {
        if events & LINE_EVENT != 0 {
            self.check_line_state();
        }
        while self.transport.available() > 0 {
            match self.process_next() {
                Ok(()) => {}
                Err(IngressError::MissingLength) => break,
                Err(e) => self.record(&e),
            }
        }
    }

    /// Read, decode and dispatch one message.
    ///
    /// # Errors
    /// Framing, decode, protocol and stop-confirmation failures. The message
    /// is dropped; the task carries on with the next one.
    pub fn process_next(&mut self) -> Result<(), IngressError> {
        let msg = self.read_message()?;
        self.counters.commands.fetch_add(1, Ordering::Relaxed);
        debug!(?msg, "Command received");
        match msg {
            HostToDeviceMessage::SetPeriodicSampler { sampling_period } => {
                self.start_sampler(sampling_period)
            }
            HostToDeviceMessage::StopPeriodicSampler => self.stop_sampler(true),
            HostToDeviceMessage::ExecuteOneOffSampler => self.one_off(),
        }
    }

    fn read_message(&mut self) -> Result<HostToDeviceMessage, IngressError> {
        let len = self
            .transport
            .read_byte()
            .ok_or(IngressError::MissingLength)? as usize;
        if len == 0 {
            return Err(ProtocolError::EmptyPayload.into());
        }
        let mut payload = [0u8; MAX_INGRESS_MESSAGE_SIZE];
        for (received, slot) in payload[..len].iter_mut().enumerate() {
            *slot = self
                .transport
                .read_byte_timeout(self.rx_byte_timeout)
                .ok_or(IngressError::Truncated {
                    expected: len,
                    received,
                })?;
        }
        Ok(decode_host_payload(&payload[..len])?)
    }

    /// Ack and post the period. While a session is streaming the ack still
    /// goes out, inside the raw frame stream, and the host loses frame
    /// alignment; the controller keeps its current period.
    fn start_sampler(&mut self, period_us: u32) -> Result<(), IngressError> {
        let ack = period_us != 0;
        let mut buf = [0u8; MAX_ACK_MESSAGE_SIZE];
        let reply = encode_framed(&DeviceToHostMessage::AckSetPeriodicSampler { ack }, &mut buf)?;
        self.transport.clear_tx();
        self.write_reply(reply)?;
        if !ack {
            return Err(IngressError::ZeroPeriod);
        }
        self.control.post(period_us);
        self.session_started.get_or_insert_with(Instant::now);
        info!(period_us, "Sampling requested");
        Ok(())
    }

    fn stop_sampler(&mut self, send_eos: bool) -> Result<(), IngressError> {
        // A confirmation left over from an earlier timed-out stop.
        while let Some(stale) = self.stopped.try_recv() {
            debug!(value = stale, "Discarded stale stop confirmation");
        }
        self.control.post(SAMPLER_STOP);

        let value = self.wait_stopped().inspect_err(|_| {
            self.counters.stop_failures.fetch_add(1, Ordering::Relaxed);
        })?;
        if value != SAMPLER_STOPPED {
            self.counters.stop_failures.fetch_add(1, Ordering::Relaxed);
            return Err(IngressError::UnexpectedCompletion(value));
        }

        if send_eos {
            self.write_reply(&EOS_MARKER)?;
            self.counters.eos_sent.fetch_add(1, Ordering::Relaxed);
        }
        match self.session_started.take() {
            Some(started) => info!(
                duration_ms = started.elapsed().as_millis() as u64,
                eos = send_eos,
                "Sampling session ended"
            ),
            None => debug!(eos = send_eos, "Stop while idle"),
        }
        Ok(())
    }

    fn wait_stopped(&self) -> Result<u32, IngressError> {
        if let Some(timeout) = self.stop_ack_timeout {
            return self
                .stopped
                .recv_timeout(timeout)
                .map_err(IngressError::StopTimeout);
        }
        loop {
            match self.stopped.recv_timeout(SHUTDOWN_POLL) {
                Ok(value) => return Ok(value),
                Err(IpcError::Timeout { .. }) if self.running.load(Ordering::Acquire) => {}
                Err(_) => return Err(IngressError::ShuttingDown),
            }
        }
    }

    fn one_off(&mut self) -> Result<(), IngressError> {
        let frame = self.acquisition.compose();
        let mut buf = [0u8; MAX_DEVICE_MESSAGE_SIZE];
        let reply = encode_framed(&DeviceToHostMessage::one_off(&frame), &mut buf)?;
        self.write_reply(reply)?;
        self.counters.one_offs.fetch_add(1, Ordering::Relaxed);
        debug!(elements = frame.elements(), "One-off frame sent");
        Ok(())
    }

    /// Write a complete reply and flush it. A short write is retried once
    /// after a flush.
    fn write_reply(&self, bytes: &[u8]) -> Result<(), IngressError> {
        let mut written = self.transport.write(bytes);
        if written < bytes.len() {
            self.flush_reply();
            written += self.transport.write(&bytes[written..]);
        }
        self.flush_reply();
        if written < bytes.len() {
            self.counters.short_writes.fetch_add(1, Ordering::Relaxed);
            return Err(IngressError::ShortWrite {
                written,
                len: bytes.len(),
            });
        }
        Ok(())
    }

    /// Flush, then keep flushing for a bounded time while the host has not
    /// taken the last packet.
    fn flush_reply(&self) {
        let deadline = Instant::now() + FLUSH_TIMEOUT;
        self.transport.flush();
        while self.transport.write_available() < TX_PACKET_SIZE
            && self.transport.connected()
            && Instant::now() < deadline
        {
            thread::yield_now();
            self.transport.flush();
        }
    }

    fn check_line_state(&mut self) {
        let connected = self.transport.connected();
        if connected == self.was_connected {
            return;
        }
        self.was_connected = connected;
        if connected {
            info!("Host connected");
            return;
        }

        self.counters.disconnects.fetch_add(1, Ordering::Relaxed);
        if self.session_started.is_none() {
            info!("Host disconnected");
            return;
        }
        info!("Host disconnected while streaming, stopping sampler");
        if let Err(e) = self.stop_sampler(false) {
            self.record(&e);
        }
    }

    fn record(&self, err: &IngressError) {
        match err {
            IngressError::MissingLength | IngressError::Truncated { .. } => {
                self.counters.framing_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Message dropped");
            }
            IngressError::Decode(_) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Message dropped");
            }
            IngressError::ZeroPeriod => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Command refused");
            }
            IngressError::ShortWrite { .. } => warn!(error = %err, "Reply incomplete"),
            IngressError::StopTimeout(_)
            | IngressError::UnexpectedCompletion(_)
            | IngressError::ShuttingDown => {
                error!(error = %err, "Sampler stop failed, end-of-stream not sent");
            }
        }
    }
}
