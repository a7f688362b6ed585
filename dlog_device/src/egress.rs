//! Egress writer: moves queued frames from the egress ring to the transport.
//!
//! Drains whole chunks (a multiple of the frame size, so frames stay
//! aligned on the wire), keeps the drain guard alive until the transport
//! accepted the bytes, and flushes once the queue runs dry.

use dlog_common::hal::transport::Transport;
use dlog_ipc::{EgressConsumer, EgressQueue};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Idle polls before the writer starts sleeping between polls.
const IDLE_SPINS: u32 = 1_000;

/// Sleep between polls once idle for a while.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EgressWriterStats {
    /// Chunks handed to the transport.
    pub chunks: u64,
    /// Bytes accepted by the transport.
    pub bytes_written: u64,
    /// Bytes lost to a disconnect or a reset mid-write.
    pub bytes_discarded: u64,
    /// Drains that raced a reset and were skipped.
    pub stale_drains: u64,
    /// Transport flushes.
    pub flushes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    chunks: AtomicU64,
    bytes_written: AtomicU64,
    bytes_discarded: AtomicU64,
    stale_drains: AtomicU64,
    flushes: AtomicU64,
}

/// Read-only view of the writer.
#[derive(Debug, Clone)]
pub struct EgressWriterMonitor {
    counters: Arc<Counters>,
}

impl EgressWriterMonitor {
    /// Counters snapshot.
    pub fn stats(&self) -> EgressWriterStats {
        let c = &self.counters;
        EgressWriterStats {
            chunks: c.chunks.load(Ordering::Relaxed),
            bytes_written: c.bytes_written.load(Ordering::Relaxed),
            bytes_discarded: c.bytes_discarded.load(Ordering::Relaxed),
            stale_drains: c.stale_drains.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
        }
    }
}

/// Consumer side of the egress pipeline.
pub struct EgressWriter {
    consumer: EgressConsumer,
    transport: Arc<dyn Transport>,
    chunk: Vec<u8>,
    unflushed: bool,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
}

impl EgressWriter {
    /// Writer draining `chunk_bytes` at a time.
    pub fn new(
        consumer: EgressConsumer,
        transport: Arc<dyn Transport>,
        chunk_bytes: usize,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            consumer,
            transport,
            chunk: vec![0; chunk_bytes],
            unflushed: false,
            counters: Arc::new(Counters::default()),
            running,
        }
    }

    /// Status handle for other threads.
    pub fn monitor(&self) -> EgressWriterMonitor {
        EgressWriterMonitor {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Poll until the running flag drops.
    pub fn run(&mut self) {
        info!(chunk_bytes = self.chunk.len(), "Egress writer started");
        let mut idle = 0u32;
        while self.running.load(Ordering::Acquire) {
            if self.poll_once() {
                idle = 0;
            } else if idle < IDLE_SPINS {
                idle += 1;
                thread::yield_now();
            } else {
                thread::sleep(IDLE_SLEEP);
            }
        }
        info!("Egress writer stopped");
    }

    /// One drain/write/flush step. Returns `true` if bytes were drained.
    pub fn poll_once(&mut self) -> bool {
        let drain = self.consumer.drain(&mut self.chunk);
        if drain.is_empty() {
            drop(drain);
            self.flush_if_needed();
            return false;
        }
        if drain.is_stale() {
            self.counters.stale_drains.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let len = drain.len();
        let mut written = 0;
        while written < len {
            if !self.transport.connected()
                || drain.is_stale()
                || !self.running.load(Ordering::Acquire)
            {
                break;
            }
            let n = self.transport.write(&self.chunk[written..len]);
            written += n;
            if n == 0 {
                thread::yield_now();
            }
        }
        drop(drain);

        self.counters.chunks.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_written
            .fetch_add(written as u64, Ordering::Relaxed);
        if written < len {
            let lost = (len - written) as u64;
            self.counters.bytes_discarded.fetch_add(lost, Ordering::Relaxed);
            debug!(lost, "Egress chunk cut short");
        }

        self.unflushed = true;
        if self.queue().is_empty() {
            self.flush_if_needed();
        }
        true
    }

    fn flush_if_needed(&mut self) {
        if self.unflushed {
            self.transport.flush();
            self.unflushed = false;
            self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn queue(&self) -> &EgressQueue {
        self.consumer.queue()
    }
}
