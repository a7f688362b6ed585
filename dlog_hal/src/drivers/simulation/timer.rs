//! Thread-backed alarm pool.
//!
//! Each repeating timer gets its own thread, spawned from the caller so it
//! inherits the caller's CPU affinity and scheduling policy. Long waits park
//! the thread; the last stretch before a deadline is spun so short periods
//! keep their rate.

use dlog_common::hal::driver::HalError;
use dlog_common::hal::timer::{AlarmCallback, AlarmPool, TimerId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Below this remaining time the timer thread spins instead of parking.
const SPIN_THRESHOLD: Duration = Duration::from_micros(200);

/// Timers one pool accepts.
const MAX_TIMERS: usize = 4;

struct TimerThread {
    cancel: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    overruns: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

/// [`AlarmPool`] on host threads.
pub struct ThreadAlarmPool {
    name: &'static str,
    next_id: u32,
    timers: HashMap<u32, TimerThread>,
}

impl ThreadAlarmPool {
    /// Empty pool; `name` prefixes the timer thread names.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: 0,
            timers: HashMap::new(),
        }
    }

    /// Fixed-rate deadlines missed by a timer (callback took longer than the
    /// period). `None` for an unknown id.
    pub fn overruns(&self, id: TimerId) -> Option<u64> {
        self.timers
            .get(&id.0)
            .map(|t| t.overruns.load(Ordering::Relaxed))
    }

    fn reap_finished(&mut self) {
        let done: Vec<u32> = self
            .timers
            .iter()
            .filter(|(_, t)| t.finished.load(Ordering::Acquire))
            .map(|(&id, _)| id)
            .collect();
        for id in done {
            if let Some(timer) = self.timers.remove(&id) {
                Self::join(id, timer);
            }
        }
    }

    fn join(id: u32, timer: TimerThread) {
        timer.cancel.store(true, Ordering::Release);
        timer.handle.thread().unpark();
        if timer.handle.join().is_err() {
            warn!(timer = id, "Alarm callback panicked");
        }
    }
}

impl AlarmPool for ThreadAlarmPool {
    fn add_repeating_timer_us(
        &mut self,
        delay_us: i64,
        callback: AlarmCallback,
    ) -> Result<TimerId, HalError> {
        if delay_us == 0 {
            return Err(HalError::TimerRejected("zero delay".into()));
        }
        self.reap_finished();
        if self.timers.len() >= MAX_TIMERS {
            return Err(HalError::TimerRejected(format!(
                "pool '{}' full ({MAX_TIMERS} timers)",
                self.name
            )));
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let overruns = Arc::new(AtomicU64::new(0));

        let handle = thread::Builder::new()
            .name(format!("{}-alarm-{id}", self.name))
            .spawn({
                let cancel = Arc::clone(&cancel);
                let finished = Arc::clone(&finished);
                let overruns = Arc::clone(&overruns);
                move || {
                    run_timer(delay_us, callback, &cancel, &overruns);
                    finished.store(true, Ordering::Release);
                }
            })
            .map_err(|e| HalError::TimerRejected(format!("spawn failed: {e}")))?;

        debug!(timer = id, delay_us, "Repeating timer added");
        self.timers.insert(
            id,
            TimerThread {
                cancel,
                finished,
                overruns,
                handle,
            },
        );
        Ok(TimerId(id))
    }

    fn cancel_repeating_timer(&mut self, id: TimerId) -> Result<(), HalError> {
        let timer = self
            .timers
            .remove(&id.0)
            .ok_or(HalError::TimerNotFound(id.0))?;
        let overruns = timer.overruns.load(Ordering::Relaxed);
        Self::join(id.0, timer);
        debug!(timer = id.0, overruns, "Repeating timer cancelled");
        Ok(())
    }

    fn active_timers(&self) -> usize {
        self.timers
            .values()
            .filter(|t| !t.finished.load(Ordering::Acquire))
            .count()
    }
}

impl Drop for ThreadAlarmPool {
    fn drop(&mut self) {
        for (id, timer) in self.timers.drain() {
            Self::join(id, timer);
        }
    }
}

fn run_timer(delay_us: i64, mut callback: AlarmCallback, cancel: &AtomicBool, overruns: &AtomicU64) {
    let period = Duration::from_micros(delay_us.unsigned_abs());
    let fixed_rate = delay_us < 0;
    let mut deadline = Instant::now() + period;

    loop {
        if !wait_until(deadline, cancel) {
            return;
        }
        if !callback() {
            return;
        }
        let now = Instant::now();
        if fixed_rate {
            deadline += period;
            if deadline <= now {
                // Missed one or more starts: count them and realign.
                let missed = (now - deadline).as_micros() / period.as_micros().max(1) + 1;
                overruns.fetch_add(missed as u64, Ordering::Relaxed);
                deadline += period * missed as u32;
            }
        } else {
            deadline = now + period;
        }
    }
}

/// Wait for `deadline`. Returns `false` if cancelled first.
fn wait_until(deadline: Instant, cancel: &AtomicBool) -> bool {
    loop {
        if cancel.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        let remaining = deadline - now;
        if remaining > SPIN_THRESHOLD {
            thread::park_timeout(remaining - SPIN_THRESHOLD);
        } else {
            std::hint::spin_loop();
        }
    }
}
