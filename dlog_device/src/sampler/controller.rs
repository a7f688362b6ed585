//! Periodic sampler controller.
//!
//! Owns the sampling timer and reacts to the control mailbox:
//!
//! ```text
//!            V != 0 (arm timer at -max(V, floor) µs)
//!   ┌──────┐ ─────────────────────────────────────► ┌─────────┐
//!   │ Idle │                                        │ Running │
//!   └──────┘ ◄───────────────────────────────────── └─────────┘
//!     │  ▲    0 (cancel → reset egress → clear TX      │  ▲
//!     └──┘       → post STOPPED)                       └──┘
//!   0: post STOPPED                                V != 0: ignored
//! ```
//!
//! The timer callback composes a frame and enqueues its 32 bytes without
//! blocking; a full queue drops the frame and counts it.

use super::compose::Acquisition;
use super::rate_limited;
use crate::config::SamplerConfig;
use crate::error::ControllerError;
use dlog_common::consts::{SAMPLER_STOP, SAMPLER_STOPPED};
use dlog_common::hal::timer::{AlarmCallback, AlarmPool, TimerId};
use dlog_common::hal::transport::Transport;
use dlog_ipc::{EgressQueue, IpcError, MailboxReceiver, MailboxSender};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the controller loop checks the running flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Sampler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SamplerState {
    /// No timer registered.
    Idle,
    /// Timer registered at `period_us`.
    Running {
        /// Effective period after clamping [µs].
        period_us: u32,
    },
}

/// Control mailbox value, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerEvent {
    /// Non-zero value: run at the requested period.
    Start {
        /// Requested period [µs] before clamping.
        requested_us: u32,
    },
    /// Zero: stop.
    Stop,
}

impl SamplerEvent {
    /// Decode a control mailbox value.
    pub const fn from_signal(value: u32) -> Self {
        if value == SAMPLER_STOP {
            Self::Stop
        } else {
            Self::Start {
                requested_us: value,
            }
        }
    }
}

/// Result of evaluating an event against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition valid; the controller performs it and commits the state.
    Ok(SamplerState),
    /// No transition; the state is unchanged.
    Rejected(&'static str),
}

/// Transition table of the sampler.
#[derive(Debug, Clone)]
pub struct SamplerStateMachine {
    state: SamplerState,
    floor_us: u32,
}

impl SamplerStateMachine {
    /// Idle machine clamping periods to `floor_us`.
    pub const fn new(floor_us: u32) -> Self {
        Self {
            state: SamplerState::Idle,
            floor_us,
        }
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> SamplerState {
        self.state
    }

    /// Shortest period the sampler runs at [µs].
    pub const fn floor_us(&self) -> u32 {
        self.floor_us
    }

    /// Evaluate an event without changing state.
    pub fn evaluate(&self, event: SamplerEvent) -> TransitionResult {
        use SamplerEvent::*;
        use SamplerState::*;

        match (self.state, event) {
            (Idle, Start { requested_us }) => TransitionResult::Ok(Running {
                period_us: requested_us.max(self.floor_us),
            }),
            (Running { .. }, Stop) => TransitionResult::Ok(Idle),
            (Idle, Stop) => TransitionResult::Rejected("sampler already idle"),
            (Running { .. }, Start { .. }) => TransitionResult::Rejected("sampler already running"),
        }
    }

    /// Commit a state after its side effects succeeded.
    pub fn commit(&mut self, state: SamplerState) {
        self.state = state;
    }
}

/// Published sampler status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SamplerStatus {
    /// Current state.
    pub state: SamplerState,
    /// Sessions started since boot.
    pub sessions: u64,
    /// Frames enqueued in the current session.
    pub session_frames: u64,
    /// Frames dropped in the current session.
    pub session_dropped: u64,
    /// Frames enqueued since boot.
    pub total_frames: u64,
    /// Frames dropped since boot.
    pub total_dropped: u64,
    /// Timer registration or cancellation failures.
    pub timer_failures: u64,
}

#[derive(Debug, Default)]
struct Published {
    period_us: AtomicU32,
    sessions: AtomicU64,
    session_frames: AtomicU64,
    session_dropped: AtomicU64,
    total_frames: AtomicU64,
    total_dropped: AtomicU64,
    timer_failures: AtomicU64,
}

/// Read-only view of the controller, usable from any thread.
#[derive(Debug, Clone)]
pub struct SamplerMonitor {
    published: Arc<Published>,
}

impl SamplerMonitor {
    /// Status snapshot.
    pub fn status(&self) -> SamplerStatus {
        let p = &self.published;
        let period_us = p.period_us.load(Ordering::Acquire);
        SamplerStatus {
            state: if period_us == 0 {
                SamplerState::Idle
            } else {
                SamplerState::Running { period_us }
            },
            sessions: p.sessions.load(Ordering::Relaxed),
            session_frames: p.session_frames.load(Ordering::Relaxed),
            session_dropped: p.session_dropped.load(Ordering::Relaxed),
            total_frames: p.total_frames.load(Ordering::Relaxed),
            total_dropped: p.total_dropped.load(Ordering::Relaxed),
            timer_failures: p.timer_failures.load(Ordering::Relaxed),
        }
    }
}

/// The controller. Runs on the sampler core; its timer fires there too.
pub struct PeriodicSamplerController {
    machine: SamplerStateMachine,
    alarm_pool: Box<dyn AlarmPool>,
    timer: Option<TimerId>,
    acquisition: Acquisition,
    egress: Arc<EgressQueue>,
    transport: Arc<dyn Transport>,
    control: MailboxReceiver,
    stopped: MailboxSender,
    published: Arc<Published>,
    session_started: Option<Instant>,
    running: Arc<AtomicBool>,
}

impl PeriodicSamplerController {
    /// Idle controller.
    ///
    /// `control` carries period/stop values from ingress; `stopped` returns
    /// the stop confirmation. `running` going false ends [`run`](Self::run).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &SamplerConfig,
        alarm_pool: Box<dyn AlarmPool>,
        acquisition: Acquisition,
        egress: Arc<EgressQueue>,
        transport: Arc<dyn Transport>,
        control: MailboxReceiver,
        stopped: MailboxSender,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            machine: SamplerStateMachine::new(config.min_period_us),
            alarm_pool,
            timer: None,
            acquisition,
            egress,
            transport,
            control,
            stopped,
            published: Arc::new(Published::default()),
            session_started: None,
            running,
        }
    }

    /// Current state.
    pub fn state(&self) -> SamplerState {
        self.machine.state()
    }

    /// Timers the alarm pool is running.
    pub fn active_timers(&self) -> usize {
        self.alarm_pool.active_timers()
    }

    /// Status handle for other threads.
    pub fn monitor(&self) -> SamplerMonitor {
        SamplerMonitor {
            published: Arc::clone(&self.published),
        }
    }

    /// Wait for control values until the running flag drops, then cancel
    /// any active timer.
    pub fn run(&mut self) {
        info!(floor_us = self.machine.floor_us(), "Sampler controller started");
        while self.running.load(Ordering::Acquire) {
            match self.control.recv_timeout(SHUTDOWN_POLL) {
                Ok(value) => {
                    if let Err(e) = self.handle_signal(value) {
                        error!(error = %e, value, "Sampler transition failed");
                    }
                }
                Err(IpcError::Timeout { .. }) => {}
                Err(e) => warn!(error = %e, "Control mailbox error"),
            }
        }
        self.shutdown();
        info!("Sampler controller stopped");
    }

    /// Apply one control value.
    ///
    /// # Errors
    /// Timer registration or cancellation failure; the state is unchanged.
    pub fn handle_signal(&mut self, value: u32) -> Result<SamplerState, ControllerError> {
        let event = SamplerEvent::from_signal(value);
        match self.machine.evaluate(event) {
            TransitionResult::Ok(SamplerState::Running { period_us }) => self.arm(period_us)?,
            TransitionResult::Ok(SamplerState::Idle) => self.disarm()?,
            TransitionResult::Rejected(reason) => {
                debug!(value, reason, "Control value ignored");
                if event == SamplerEvent::Stop {
                    // Stop while idle still gets its confirmation.
                    self.stopped.post(SAMPLER_STOPPED);
                }
            }
        }
        Ok(self.machine.state())
    }

    fn arm(&mut self, period_us: u32) -> Result<(), ControllerError> {
        let callback = sampling_callback(
            self.acquisition.clone(),
            Arc::clone(&self.egress),
            Arc::clone(&self.published),
        );
        let id = self
            .alarm_pool
            .add_repeating_timer_us(-i64::from(period_us), callback)
            .map_err(|e| {
                self.published.timer_failures.fetch_add(1, Ordering::Relaxed);
                ControllerError::TimerRegistration(e)
            })?;

        self.timer = Some(id);
        self.session_started = Some(Instant::now());
        self.published.sessions.fetch_add(1, Ordering::Relaxed);
        self.published.period_us.store(period_us, Ordering::Release);
        self.machine.commit(SamplerState::Running { period_us });
        info!(period_us, timer = id.0, "Periodic sampler armed");
        Ok(())
    }

    fn disarm(&mut self) -> Result<(), ControllerError> {
        if let Some(id) = self.timer {
            self.alarm_pool.cancel_repeating_timer(id).map_err(|e| {
                self.published.timer_failures.fetch_add(1, Ordering::Relaxed);
                ControllerError::TimerCancellation(e)
            })?;
            self.timer = None;
        }

        // No callback runs past this point. Discard what it queued and what
        // the transport holds so nothing from this session follows the
        // end-of-stream marker.
        self.egress.reset();
        self.transport.clear_tx();

        let frames = self.published.session_frames.swap(0, Ordering::Relaxed);
        let dropped = self.published.session_dropped.swap(0, Ordering::Relaxed);
        let duration_ms = self
            .session_started
            .take()
            .map_or(0, |t| t.elapsed().as_millis() as u64);
        info!(frames, dropped, duration_ms, "Periodic sampler stopped");

        self.published.period_us.store(0, Ordering::Release);
        self.machine.commit(SamplerState::Idle);
        self.stopped.post(SAMPLER_STOPPED);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(id) = self.timer.take() {
            if let Err(e) = self.alarm_pool.cancel_repeating_timer(id) {
                error!(error = %e, "Failed to cancel sampling timer at shutdown");
            }
            self.published.period_us.store(0, Ordering::Release);
            self.machine.commit(SamplerState::Idle);
        }
    }
}

fn sampling_callback(
    acquisition: Acquisition,
    egress: Arc<EgressQueue>,
    published: Arc<Published>,
) -> AlarmCallback {
    Box::new(move || {
        let frame = acquisition.compose();
        if egress.enqueue(&frame.to_le_bytes()) {
            published.session_frames.fetch_add(1, Ordering::Relaxed);
            published.total_frames.fetch_add(1, Ordering::Relaxed);
        } else {
            let dropped = published.session_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            published.total_dropped.fetch_add(1, Ordering::Relaxed);
            if rate_limited(dropped) {
                warn!(dropped, "Egress queue full, frame dropped");
            }
        }
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlog_common::consts::{ADC_PHYSICAL_CHANNELS, FRAME_BYTES};
    use dlog_common::hal::driver::{AdcInterface, HalError};
    use dlog_common::sensor::{SensorRegistry, default_sensors};
    use dlog_hal::drivers::simulation::{SimulatedAdc, SimulatedBoardSensors, ThreadAlarmPool};
    use dlog_hal::{Ad7606b, Ad7606bConfig, LoopbackTransport};
    use dlog_ipc::mailbox;

    /// Pool that hands out ids without running callbacks.
    #[derive(Default)]
    struct ScriptedPool {
        refuse_add: bool,
        refuse_cancel: bool,
        active: usize,
        next_id: u32,
    }

    impl AlarmPool for ScriptedPool {
        fn add_repeating_timer_us(
            &mut self,
            _delay_us: i64,
            _callback: AlarmCallback,
        ) -> Result<TimerId, HalError> {
            if self.refuse_add {
                return Err(HalError::TimerRejected("no free alarm".into()));
            }
            self.next_id += 1;
            self.active += 1;
            Ok(TimerId(self.next_id))
        }

        fn cancel_repeating_timer(&mut self, id: TimerId) -> Result<(), HalError> {
            if self.refuse_cancel {
                return Err(HalError::TimerNotFound(id.0));
            }
            self.active -= 1;
            Ok(())
        }

        fn active_timers(&self) -> usize {
            self.active
        }
    }

    struct Bench {
        controller: PeriodicSamplerController,
        egress: Arc<EgressQueue>,
        stopped: MailboxReceiver,
        _control: MailboxSender,
    }

    fn bench(pool: Box<dyn AlarmPool>) -> Bench {
        let registry = Arc::new(SensorRegistry::from_configs(&default_sensors()).unwrap());
        let codes = [100i16; ADC_PHYSICAL_CHANNELS];
        let lines: Box<dyn AdcInterface> = Box::new(SimulatedAdc::with_constant(codes));
        let mut adc = Ad7606b::new(lines, Ad7606bConfig::default());
        adc.init();
        let acquisition =
            Acquisition::new(registry, adc, Box::new(SimulatedBoardSensors::default()));

        let egress = Arc::new(EgressQueue::with_capacity(8 * FRAME_BYTES).unwrap());
        let (transport, _host) = LoopbackTransport::pair();
        let (control_tx, control_rx) = mailbox("control");
        let (stopped_tx, stopped_rx) = mailbox("stopped");
        let controller = PeriodicSamplerController::new(
            &SamplerConfig::default(),
            pool,
            acquisition,
            Arc::clone(&egress),
            Arc::new(transport),
            control_rx,
            stopped_tx,
            Arc::new(AtomicBool::new(true)),
        );
        Bench {
            controller,
            egress,
            stopped: stopped_rx,
            _control: control_tx,
        }
    }

    fn wait_for_frames(egress: &EgressQueue) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while egress.is_empty() {
            assert!(Instant::now() < deadline, "no frame queued");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn refused_timer_leaves_sampler_idle() {
        let mut b = bench(Box::new(ScriptedPool {
            refuse_add: true,
            ..Default::default()
        }));

        assert!(matches!(
            b.controller.handle_signal(1000),
            Err(ControllerError::TimerRegistration(_))
        ));
        assert_eq!(b.controller.state(), SamplerState::Idle);
        assert_eq!(b.controller.active_timers(), 0);
        let status = b.controller.monitor().status();
        assert_eq!(status.timer_failures, 1);
        assert_eq!(status.sessions, 0);

        // A stop after the failed start is still confirmed.
        assert_eq!(b.controller.handle_signal(SAMPLER_STOP), Ok(SamplerState::Idle));
        assert_eq!(b.stopped.try_recv(), Some(SAMPLER_STOPPED));
    }

    #[test]
    fn failed_cancel_keeps_running_without_confirmation() {
        let mut b = bench(Box::new(ScriptedPool {
            refuse_cancel: true,
            ..Default::default()
        }));

        let running = SamplerState::Running { period_us: 1000 };
        assert_eq!(b.controller.handle_signal(1000), Ok(running));
        assert!(matches!(
            b.controller.handle_signal(SAMPLER_STOP),
            Err(ControllerError::TimerCancellation(_))
        ));
        assert_eq!(b.controller.state(), running);
        assert_eq!(b.controller.active_timers(), 1);
        assert_eq!(b.stopped.try_recv(), None);
        assert_eq!(b.controller.monitor().status().timer_failures, 1);
    }

    #[test]
    fn second_start_does_not_add_a_timer() {
        let mut b = bench(Box::new(ScriptedPool::default()));

        let running = SamplerState::Running { period_us: 1000 };
        assert_eq!(b.controller.handle_signal(1000), Ok(running));
        assert_eq!(b.controller.handle_signal(40), Ok(running));
        assert_eq!(b.controller.active_timers(), 1);
        assert_eq!(b.controller.monitor().status().sessions, 1);
    }

    #[test]
    fn stop_cancels_timer_and_empties_egress() {
        let mut b = bench(Box::new(ThreadAlarmPool::new("ctl-test")));

        assert_eq!(
            b.controller.handle_signal(10),
            Ok(SamplerState::Running { period_us: 40 })
        );
        assert_eq!(b.controller.active_timers(), 1);
        wait_for_frames(&b.egress);

        assert_eq!(b.controller.handle_signal(SAMPLER_STOP), Ok(SamplerState::Idle));
        assert_eq!(b.controller.active_timers(), 0);
        assert_eq!(b.egress.len(), 0);
        assert_eq!(b.stopped.try_recv(), Some(SAMPLER_STOPPED));

        // Nothing is queued once the timer is gone.
        std::thread::sleep(Duration::from_millis(5));
        assert!(b.egress.is_empty());
        let status = b.controller.monitor().status();
        assert_eq!(status.state, SamplerState::Idle);
        assert_eq!(status.session_frames, 0);
        assert!(status.total_frames > 0);
    }

    #[test]
    fn start_clamps_to_floor() {
        let m = SamplerStateMachine::new(40);
        assert_eq!(
            m.evaluate(SamplerEvent::Start { requested_us: 10 }),
            TransitionResult::Ok(SamplerState::Running { period_us: 40 })
        );
        assert_eq!(
            m.evaluate(SamplerEvent::Start {
                requested_us: 1000
            }),
            TransitionResult::Ok(SamplerState::Running { period_us: 1000 })
        );
    }

    #[test]
    fn stop_while_idle_rejected() {
        let m = SamplerStateMachine::new(40);
        assert!(matches!(
            m.evaluate(SamplerEvent::Stop),
            TransitionResult::Rejected(_)
        ));
    }

    #[test]
    fn start_while_running_rejected() {
        let mut m = SamplerStateMachine::new(40);
        m.commit(SamplerState::Running { period_us: 500 });
        assert!(matches!(
            m.evaluate(SamplerEvent::Start { requested_us: 40 }),
            TransitionResult::Rejected(_)
        ));
        assert_eq!(
            m.evaluate(SamplerEvent::Stop),
            TransitionResult::Ok(SamplerState::Idle)
        );
    }

    #[test]
    fn evaluate_does_not_mutate() {
        let m = SamplerStateMachine::new(40);
        let _ = m.evaluate(SamplerEvent::Start { requested_us: 100 });
        assert_eq!(m.state(), SamplerState::Idle);
    }

    #[test]
    fn signal_decoding() {
        assert_eq!(SamplerEvent::from_signal(0), SamplerEvent::Stop);
        assert_eq!(
            SamplerEvent::from_signal(1),
            SamplerEvent::Start { requested_us: 1 }
        );
    }

    #[test]
    fn status_serializes_state_tag() {
        let json = serde_json::to_string(&SamplerState::Running { period_us: 40 }).unwrap();
        assert_eq!(json, r#"{"state":"running","period_us":40}"#);
    }
}
