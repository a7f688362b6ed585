//! Real-time setup for the core threads.
//!
//! With the `rt` feature:
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` once at startup.
//! 2. `sched_setaffinity` per thread, pinning it to its core.
//! 3. `sched_setscheduler(SCHED_FIFO, prio)` for the sampler core threads.
//!
//! Without it every call is a no-op, so the pipeline runs unprivileged on a
//! development host. Threads spawned after pinning (the alarm pool's timer
//! threads) inherit affinity and policy.

use crate::error::DeviceError;
use tracing::{debug, info};

/// Lock all current and future memory pages.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
pub fn lock_memory() -> Result<(), DeviceError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| DeviceError::RtSetup(format!("mlockall failed: {e}")))?;
    info!("Memory locked");
    Ok(())
}

#[cfg(not(feature = "rt"))]
pub fn lock_memory() -> Result<(), DeviceError> {
    Ok(())
}

/// Pin the calling thread to `cpu`.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn set_affinity(cpu: usize) -> Result<(), DeviceError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| DeviceError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| DeviceError::RtSetup(format!("sched_setaffinity failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn set_affinity(_cpu: usize) -> Result<(), DeviceError> {
    Ok(())
}

/// Switch the calling thread to SCHED_FIFO at `priority`.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn set_fifo(priority: i32) -> Result<(), DeviceError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid sched_param for the duration of the call;
    // pid 0 names the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(DeviceError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn set_fifo(_priority: i32) -> Result<(), DeviceError> {
    Ok(())
}

/// Place the calling thread: pin it to `cpu` and, if given, raise it to
/// SCHED_FIFO `priority`.
pub fn setup_core_thread(role: &str, cpu: usize, priority: Option<i32>) -> Result<(), DeviceError> {
    set_affinity(cpu)?;
    if let Some(priority) = priority {
        set_fifo(priority)?;
    }
    if cfg!(feature = "rt") {
        info!(role, cpu, ?priority, "Thread placed");
    } else {
        debug!(role, cpu, "RT placement skipped (rt feature off)");
    }
    Ok(())
}

/// `true` if the crate was built with real-time setup.
pub const fn enabled() -> bool {
    cfg!(feature = "rt")
}
