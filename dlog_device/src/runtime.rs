//! Device runtime: builds the pipeline and runs it on its threads.
//!
//! ```text
//! ingress core                      sampler core
//! ┌──────────────┐  sampler-control  ┌──────────────────┐  timer  ┌──────────┐
//! │ dlog-ingress │ ────────────────► │   dlog-sampler   │ ──────► │ callback │
//! │              │ ◄──────────────── │   (controller)   │         └────┬─────┘
//! └──────┬───────┘  sampler-stopped  └──────────────────┘              │ frames
//!        │ replies                                                ┌────▼─────┐
//!        ▼                                                        │  egress  │
//!    transport ◄─────────────────── dlog-egress ◄──────────────── │   ring   │
//!                                                                 └──────────┘
//! ```

use crate::config::DeviceConfig;
use crate::egress::{EgressWriter, EgressWriterMonitor, EgressWriterStats};
use crate::error::DeviceError;
use crate::ingress::{CommandIngress, IngressMonitor, IngressStats};
use crate::rt;
use crate::sampler::{
    Acquisition, BoardAdc, ComposerStats, PeriodicSamplerController, SamplerMonitor,
    SamplerStatus,
};
use dlog_common::hal::driver::Board;
use dlog_common::hal::transport::Transport;
use dlog_hal::AdcStats;
use dlog_ipc::{EgressQueue, EgressStats, mailbox};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Snapshot of every pipeline counter.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    /// Board driver name.
    pub board: &'static str,
    /// Controller state and session counters.
    pub sampler: SamplerStatus,
    /// Egress ring.
    pub egress: EgressStats,
    /// Egress writer.
    pub writer: EgressWriterStats,
    /// Frame composition.
    pub composer: ComposerStats,
    /// ADC driver.
    pub adc: AdcStats,
    /// Command ingress.
    pub ingress: IngressStats,
}

/// The running pipeline.
pub struct DeviceRuntime {
    board: &'static str,
    running: Arc<AtomicBool>,
    egress: Arc<EgressQueue>,
    acquisition: Acquisition,
    sampler: SamplerMonitor,
    writer: EgressWriterMonitor,
    ingress: IngressMonitor,
    threads: Vec<JoinHandle<()>>,
}

impl DeviceRuntime {
    /// Bring up the board, wire the pipeline and start its threads.
    ///
    /// # Errors
    /// Invalid configuration, sensor registry, egress allocation, memory
    /// locking or thread spawn failure. Thread placement failures are logged
    /// and the thread runs unplaced.
    pub fn start(
        config: &DeviceConfig,
        board: Board,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, DeviceError> {
        config.validate()?;
        let registry = Arc::new(config.registry()?);

        let Board {
            name,
            adc,
            sensors,
            alarm_pool,
        } = board;
        let mut adc: BoardAdc = BoardAdc::new(adc, config.board.adc_config());
        adc.init();
        let acquisition = Acquisition::new(Arc::clone(&registry), adc, sensors);

        let egress = Arc::new(EgressQueue::with_capacity(config.egress.capacity_bytes)?);
        let consumer = egress.consumer()?;

        let (control_tx, control_rx) = mailbox("sampler-control");
        let (stopped_tx, stopped_rx) = mailbox("sampler-stopped");
        let running = Arc::new(AtomicBool::new(true));

        rt::lock_memory()?;

        let mut controller = PeriodicSamplerController::new(
            &config.sampler,
            alarm_pool,
            acquisition.clone(),
            Arc::clone(&egress),
            Arc::clone(&transport),
            control_rx,
            stopped_tx,
            Arc::clone(&running),
        );
        let mut writer = EgressWriter::new(
            consumer,
            Arc::clone(&transport),
            config.egress.drain_chunk_bytes,
            Arc::clone(&running),
        );
        let mut ingress = CommandIngress::new(
            &config.ingress,
            transport,
            acquisition.clone(),
            control_tx,
            stopped_rx,
            Arc::clone(&running),
        );

        let sampler = controller.monitor();
        let writer_monitor = writer.monitor();
        let ingress_monitor = ingress.monitor();

        let sampler_core = config.board.sampler_core;
        let ingress_core = config.board.ingress_core;
        let priority = Some(config.board.rt_priority);

        let mut threads = Vec::with_capacity(3);
        let spawned = (|| {
            threads.push(spawn_placed("dlog-sampler", sampler_core, priority, move || {
                controller.run()
            })?);
            threads.push(spawn_placed("dlog-egress", sampler_core, priority, move || {
                writer.run()
            })?);
            threads.push(spawn_placed("dlog-ingress", ingress_core, None, move || {
                ingress.run()
            })?);
            Ok::<(), DeviceError>(())
        })();
        if let Err(e) = spawned {
            running.store(false, Ordering::SeqCst);
            for handle in threads {
                let _ = handle.join();
            }
            return Err(e);
        }

        info!(
            board = name,
            sensors = registry.len(),
            frame_elements = registry.expected_elements(),
            egress_bytes = config.egress.capacity_bytes,
            min_period_us = config.sampler.min_period_us,
            rt = rt::enabled(),
            "Device runtime started"
        );

        Ok(Self {
            board: name,
            running,
            egress,
            acquisition,
            sampler,
            writer: writer_monitor,
            ingress: ingress_monitor,
            threads,
        })
    }

    /// Flag that keeps the pipeline threads alive. Clearing it starts
    /// shutdown.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// `false` once shutdown has been requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current counters.
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            board: self.board,
            sampler: self.sampler.status(),
            egress: self.egress.stats(),
            writer: self.writer.stats(),
            composer: self.acquisition.stats(),
            adc: self.acquisition.adc_stats(),
            ingress: self.ingress.stats(),
        }
    }

    /// Stop every thread, cancel the sampling timer and return the final
    /// counters.
    pub fn shutdown(mut self) -> DeviceStats {
        info!("Device runtime shutting down");
        self.running.store(false, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("unnamed").to_owned();
            if handle.join().is_err() {
                error!(thread = %name, "Pipeline thread panicked");
            }
        }
        let stats = self.stats();
        info!(
            sessions = stats.sampler.sessions,
            frames = stats.sampler.total_frames,
            dropped = stats.sampler.total_dropped,
            "Device runtime stopped"
        );
        stats
    }
}

impl Drop for DeviceRuntime {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Spawn a named thread that places itself on `cpu` before running `body`.
fn spawn_placed<F>(
    name: &'static str,
    cpu: usize,
    priority: Option<i32>,
    body: F,
) -> Result<JoinHandle<()>, DeviceError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            if let Err(e) = rt::setup_core_thread(name, cpu, priority) {
                warn!(thread = name, error = %e, "Thread placement failed, running unplaced");
            }
            body();
        })
        .map_err(|e| DeviceError::Spawn {
            thread: name,
            reason: e.to_string(),
        })
}
