//! Single-slot cross-core mailbox.
//!
//! A mailbox carries one 32-bit value. Posting never blocks: an overwrite
//! post replaces whatever is still unread (latest write wins), a bits post
//! ORs into it. Reading takes the value and leaves the slot empty, blocking
//! until something is posted.
//!
//! Lossy by design: control signals are level-triggered ("run at period P",
//! "stop"), so only the most recent one matters.
//!
//! ```text
//! state: u64 = [ FULL flag (bit 32) | value (bits 0..32) ]
//! post(v)      : swap(FULL | v)        then unpark receiver
//! post_bits(b) : fetch_or(FULL | b)    then unpark receiver
//! try_recv()   : swap(0)               -> Some(v) if FULL was set
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{IpcError, IpcResult};

const FULL: u64 = 1 << 32;
const VALUE_MASK: u64 = u32::MAX as u64;

#[derive(Debug)]
struct Slot {
    name: &'static str,
    state: AtomicU64,
    receiver: OnceLock<Thread>,
    posts: AtomicU64,
    overwrites: AtomicU64,
}

/// Counters of one mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MailboxStats {
    /// Values posted.
    pub posts: u64,
    /// Posts that landed on an unread value.
    pub overwrites: u64,
}

/// Create a mailbox. The receiver binds to the first thread that waits on it.
pub fn mailbox(name: &'static str) -> (MailboxSender, MailboxReceiver) {
    let slot = Arc::new(Slot {
        name,
        state: AtomicU64::new(0),
        receiver: OnceLock::new(),
        posts: AtomicU64::new(0),
        overwrites: AtomicU64::new(0),
    });
    (
        MailboxSender { slot: slot.clone() },
        MailboxReceiver {
            slot,
            _single_reader: PhantomData,
        },
    )
}

/// Posting side. Cheap to clone; never blocks.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    slot: Arc<Slot>,
}

impl MailboxSender {
    /// Replace the slot content with `value`.
    #[inline]
    pub fn post(&self, value: u32) {
        let prev = self.slot.state.swap(FULL | value as u64, Ordering::AcqRel);
        self.record(prev);
        self.wake();
    }

    /// OR `bits` into the slot content.
    #[inline]
    pub fn post_bits(&self, bits: u32) {
        let prev = self.slot.state.fetch_or(FULL | bits as u64, Ordering::AcqRel);
        self.record(prev);
        self.wake();
    }

    /// Mailbox name.
    pub fn name(&self) -> &'static str {
        self.slot.name
    }

    #[inline]
    fn record(&self, prev: u64) {
        self.slot.posts.fetch_add(1, Ordering::Relaxed);
        if prev & FULL != 0 {
            self.slot.overwrites.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    fn wake(&self) {
        // No receiver yet: it checks the slot before it first parks.
        if let Some(receiver) = self.slot.receiver.get() {
            receiver.unpark();
        }
    }
}

/// Reading side. One per mailbox, used from one thread.
#[derive(Debug)]
pub struct MailboxReceiver {
    slot: Arc<Slot>,
    _single_reader: PhantomData<Cell<()>>,
}

impl MailboxReceiver {
    /// Take the value if one is posted.
    #[inline]
    pub fn try_recv(&self) -> Option<u32> {
        let state = self.slot.state.swap(0, Ordering::AcqRel);
        (state & FULL != 0).then_some((state & VALUE_MASK) as u32)
    }

    /// Wait for a value without a deadline.
    pub fn recv(&self) -> u32 {
        self.register();
        loop {
            if let Some(value) = self.try_recv() {
                return value;
            }
            thread::park();
        }
    }

    /// Wait for a value for at most `timeout`.
    ///
    /// # Errors
    /// `IpcError::Timeout` if nothing was posted in time.
    pub fn recv_timeout(&self, timeout: Duration) -> IpcResult<u32> {
        self.register();
        let start = Instant::now();
        loop {
            if let Some(value) = self.try_recv() {
                return Ok(value);
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(IpcError::Timeout {
                    mailbox: self.slot.name,
                    waited_ms: waited.as_millis() as u64,
                });
            }
            thread::park_timeout(timeout - waited);
        }
    }

    /// Mailbox name.
    pub fn name(&self) -> &'static str {
        self.slot.name
    }

    /// Counters snapshot.
    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            posts: self.slot.posts.load(Ordering::Relaxed),
            overwrites: self.slot.overwrites.load(Ordering::Relaxed),
        }
    }

    fn register(&self) {
        let bound = self.slot.receiver.get_or_init(thread::current);
        debug_assert_eq!(
            bound.id(),
            thread::current().id(),
            "mailbox '{}' read from a second thread",
            self.slot.name
        );
    }
}
