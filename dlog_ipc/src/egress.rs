//! Lock-free egress ring buffer.
//!
//! Carries serialized sample frames from the timer callback (producer) to the
//! transport writer task (consumer) on the other core.
//!
//! ```text
//!        tail (consumer)          head (producer)
//!            │                        │
//!  [ . . . . F F F F F F F F F F F F F . . . . . . ]
//!            └──── queued bytes ──────┘
//! ```
//!
//! Positions run over `[0, 2 * capacity)` so a full buffer and an empty one
//! are distinguishable without a spare byte. Bytes live in `AtomicU8` cells:
//! the producer fills them with relaxed stores and publishes with a release
//! store of `head`; the consumer acquires `head` before copying.
//!
//! Rules:
//! - `enqueue` never blocks and never writes a partial message.
//! - `drain` hands out a [`Drain`] guard; the drain counts as in flight until
//!   the guard drops, i.e. until its bytes have been given to the transport.
//! - `reset` runs only while no producer is active (the sampler timer is
//!   cancelled first). It discards everything queued and waits for an
//!   in-flight drain to finish, so nothing queued before the reset can reach
//!   the transport after it returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::error::{IpcError, IpcResult};

/// Counters snapshot of the egress queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EgressStats {
    /// Buffer capacity [bytes].
    pub capacity: usize,
    /// Bytes queued right now.
    pub queued: usize,
    /// Highest fill level seen [bytes].
    pub high_water: usize,
    /// Messages accepted.
    pub enqueued_frames: u64,
    /// Bytes accepted.
    pub enqueued_bytes: u64,
    /// Messages refused for lack of space.
    pub dropped_frames: u64,
    /// Bytes handed to the consumer.
    pub drained_bytes: u64,
    /// Resets performed.
    pub resets: u64,
}

#[derive(Debug, Default)]
struct Counters {
    high_water: AtomicUsize,
    enqueued_frames: AtomicU64,
    enqueued_bytes: AtomicU64,
    dropped_frames: AtomicU64,
    drained_bytes: AtomicU64,
    resets: AtomicU64,
}

/// Bounded byte ring shared between one producer and one consumer.
#[derive(Debug)]
pub struct EgressQueue {
    storage: Box<[AtomicU8]>,
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    epoch: AtomicU32,
    in_flight: AtomicBool,
    consumer_taken: AtomicBool,
    counters: Counters,
}

impl EgressQueue {
    /// Queue with `capacity` bytes of storage.
    ///
    /// # Errors
    /// `IpcError::InvalidCapacity` for zero or absurdly large capacities.
    pub fn with_capacity(capacity: usize) -> IpcResult<Self> {
        if capacity == 0 || capacity > usize::MAX / 4 {
            return Err(IpcError::InvalidCapacity { capacity });
        }
        debug!(capacity, "Egress queue allocated");
        Ok(Self {
            storage: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            epoch: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
            consumer_taken: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    #[inline]
    fn distance(&self, from: usize, to: usize) -> usize {
        (to + 2 * self.capacity - from) % (2 * self.capacity)
    }

    #[inline]
    fn advance(&self, pos: usize, n: usize) -> usize {
        (pos + n) % (2 * self.capacity)
    }

    /// Capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently queued.
    #[inline]
    pub fn len(&self) -> usize {
        self.distance(
            self.tail.load(Ordering::Acquire),
            self.head.load(Ordering::Acquire),
        )
    }

    /// `true` when nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free space in bytes.
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    /// Reset generation; changes on every [`reset`](Self::reset).
    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Append one message. Non-blocking, safe from interrupt context.
    ///
    /// Returns `false`, writing nothing, when the message does not fit.
    pub fn enqueue(&self, bytes: &[u8]) -> bool {
        let len = bytes.len();
        if len == 0 {
            return true;
        }
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let used = self.distance(tail, head);
        if len > self.capacity - used {
            self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut idx = head % self.capacity;
        for &byte in bytes {
            self.storage[idx].store(byte, Ordering::Relaxed);
            idx += 1;
            if idx == self.capacity {
                idx = 0;
            }
        }
        self.head.store(self.advance(head, len), Ordering::Release);

        self.counters.enqueued_frames.fetch_add(1, Ordering::Relaxed);
        self.counters
            .enqueued_bytes
            .fetch_add(len as u64, Ordering::Relaxed);
        self.counters
            .high_water
            .fetch_max(used + len, Ordering::Relaxed);
        true
    }

    /// Discard everything queued.
    ///
    /// Must not race a producer. Spins until an in-flight drain has dropped
    /// its guard; that wait is bounded by one transport write.
    pub fn reset(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let head = self.head.load(Ordering::Acquire);
        let discarded = self.distance(self.tail.swap(head, Ordering::SeqCst), head);

        let mut spins = 0u32;
        while self.in_flight.load(Ordering::SeqCst) {
            if spins < 128 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
            spins = spins.saturating_add(1);
        }
        self.counters.resets.fetch_add(1, Ordering::Relaxed);
        debug!(epoch, discarded, "Egress queue reset");
    }

    /// Counters snapshot.
    pub fn stats(&self) -> EgressStats {
        EgressStats {
            capacity: self.capacity,
            queued: self.len(),
            high_water: self.counters.high_water.load(Ordering::Relaxed),
            enqueued_frames: self.counters.enqueued_frames.load(Ordering::Relaxed),
            enqueued_bytes: self.counters.enqueued_bytes.load(Ordering::Relaxed),
            dropped_frames: self.counters.dropped_frames.load(Ordering::Relaxed),
            drained_bytes: self.counters.drained_bytes.load(Ordering::Relaxed),
            resets: self.counters.resets.load(Ordering::Relaxed),
        }
    }

    /// Hand out the single consumer handle.
    ///
    /// # Errors
    /// `IpcError::ConsumerTaken` on the second call.
    pub fn consumer(self: &Arc<Self>) -> IpcResult<EgressConsumer> {
        if self.consumer_taken.swap(true, Ordering::AcqRel) {
            return Err(IpcError::ConsumerTaken);
        }
        Ok(EgressConsumer {
            queue: Arc::clone(self),
        })
    }

    fn drain_into(&self, out: &mut [u8]) -> Drain<'_> {
        // in_flight must be visible before tail is read: reset either sees
        // this drain and waits, or this drain sees the reset tail.
        self.in_flight.store(true, Ordering::SeqCst);
        let epoch = self.epoch.load(Ordering::SeqCst);
        let tail = self.tail.load(Ordering::SeqCst);
        let head = self.head.load(Ordering::Acquire);
        let n = self.distance(tail, head).min(out.len());

        let mut idx = tail % self.capacity;
        for slot in out.iter_mut().take(n) {
            *slot = self.storage[idx].load(Ordering::Relaxed);
            idx += 1;
            if idx == self.capacity {
                idx = 0;
            }
        }

        let len = if n > 0
            && self
                .tail
                .compare_exchange(
                    tail,
                    self.advance(tail, n),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.counters
                .drained_bytes
                .fetch_add(n as u64, Ordering::Relaxed);
            n
        } else {
            0
        };

        Drain {
            queue: self,
            len,
            epoch,
        }
    }
}

/// The only handle that may drain the queue.
#[derive(Debug)]
pub struct EgressConsumer {
    queue: Arc<EgressQueue>,
}

impl EgressConsumer {
    /// Copy up to `out.len()` queued bytes into `out`, oldest first.
    ///
    /// The bytes are `out[..drain.len()]`. Keep the guard alive until they
    /// have been written to the transport.
    pub fn drain<'a>(&'a mut self, out: &mut [u8]) -> Drain<'a> {
        self.queue.drain_into(out)
    }

    /// Shared queue behind this handle.
    pub fn queue(&self) -> &Arc<EgressQueue> {
        &self.queue
    }
}

/// An in-flight drain. Dropping it lets a pending reset complete.
#[derive(Debug)]
#[must_use = "dropping the guard ends the drain before its bytes are written"]
pub struct Drain<'a> {
    queue: &'a EgressQueue,
    len: usize,
    epoch: u32,
}

impl Drain<'_> {
    /// Bytes copied out.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if nothing was copied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `true` once a reset has happened since this drain started; its bytes
    /// predate the reset and should not be transmitted.
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.queue.epoch() != self.epoch
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        self.queue.in_flight.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize) -> (Arc<EgressQueue>, EgressConsumer) {
        let q = Arc::new(EgressQueue::with_capacity(capacity).unwrap());
        let c = q.consumer().unwrap();
        (q, c)
    }

    #[test]
    fn drains_in_write_order() {
        let (q, mut c) = queue(16);
        assert!(q.enqueue(&[1, 2, 3]));
        assert!(q.enqueue(&[4, 5]));
        let mut out = [0u8; 16];
        let d = c.drain(&mut out);
        assert_eq!(d.len(), 5);
        drop(d);
        assert_eq!(&out[..5], &[1, 2, 3, 4, 5]);
        assert!(q.is_empty());
    }

    #[test]
    fn refuses_whole_message_when_full() {
        let (q, mut c) = queue(8);
        assert!(q.enqueue(&[1; 6]));
        assert!(!q.enqueue(&[2; 3]));
        assert_eq!(q.len(), 6);
        assert!(q.enqueue(&[3; 2]));
        assert_eq!(q.free(), 0);

        let mut out = [0u8; 8];
        let d = c.drain(&mut out);
        assert_eq!(d.len(), 8);
        drop(d);
        assert_eq!(out, [1, 1, 1, 1, 1, 1, 3, 3]);
        assert_eq!(q.stats().dropped_frames, 1);
        assert_eq!(q.stats().enqueued_frames, 2);
    }

    #[test]
    fn wraps_around_storage_end() {
        let (q, mut c) = queue(8);
        let mut out = [0u8; 8];
        for round in 0..5u8 {
            assert!(q.enqueue(&[round, round + 1, round + 2, round + 3, round + 4]));
            let d = c.drain(&mut out);
            assert_eq!(d.len(), 5);
            drop(d);
            assert_eq!(&out[..5], &[round, round + 1, round + 2, round + 3, round + 4]);
        }
    }

    #[test]
    fn partial_drain_leaves_the_rest() {
        let (q, mut c) = queue(32);
        q.enqueue(&[9; 20]);
        let mut out = [0u8; 8];
        assert_eq!(c.drain(&mut out).len(), 8);
        assert_eq!(q.len(), 12);
    }

    #[test]
    fn reset_discards_and_bumps_epoch() {
        let (q, mut c) = queue(64);
        q.enqueue(&[7; 32]);
        let before = q.epoch();
        q.reset();
        assert!(q.is_empty());
        assert_ne!(q.epoch(), before);
        let mut out = [0u8; 64];
        assert!(c.drain(&mut out).is_empty());
        assert_eq!(q.stats().resets, 1);
    }

    #[test]
    fn drain_started_before_reset_is_stale() {
        let (q, mut c) = queue(64);
        q.enqueue(&[1; 32]);
        let mut out = [0u8; 64];
        let d = c.drain(&mut out);
        assert_eq!(d.len(), 32);
        assert!(!d.is_stale());

        let q2 = Arc::clone(&q);
        let resetter = std::thread::spawn(move || q2.reset());
        // The reset cannot finish while the guard lives.
        while q.epoch() == d.epoch {
            std::hint::spin_loop();
        }
        assert!(d.is_stale());
        drop(d);
        resetter.join().unwrap();
    }

    #[test]
    fn high_water_tracks_peak() {
        let (q, mut c) = queue(64);
        q.enqueue(&[0; 32]);
        q.enqueue(&[0; 16]);
        let mut out = [0u8; 64];
        drop(c.drain(&mut out));
        q.enqueue(&[0; 8]);
        assert_eq!(q.stats().high_water, 48);
    }

    #[test]
    fn only_one_consumer() {
        let (q, _c) = queue(8);
        assert_eq!(q.consumer().unwrap_err(), IpcError::ConsumerTaken);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            EgressQueue::with_capacity(0).unwrap_err(),
            IpcError::InvalidCapacity { capacity: 0 }
        );
    }
}
