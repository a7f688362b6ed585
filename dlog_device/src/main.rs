//! # dlog device binary
//!
//! Runs the sampling pipeline against a serial port.
//!
//! # Usage
//!
//! ```bash
//! # Simulation board on a gadget-serial port
//! dlog_device --port /dev/ttyGS0
//!
//! # Explicit config, verbose JSON logs
//! dlog_device --port /dev/ttyGS0 --config config/device.toml -v --json
//! ```

use clap::Parser;
use dlog_common::config::ConfigLoader;
use dlog_common::consts::DEFAULT_CONFIG_PATH;
use dlog_device::config::DeviceConfig;
use dlog_device::runtime::DeviceRuntime;
use dlog_hal::{BoardRegistry, SerialTransport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Dual-core data logger
#[derive(Parser, Debug)]
#[command(name = "dlog_device")]
#[command(version)]
#[command(about = "Periodic sampler streaming ADC frames to a USB host")]
struct Args {
    /// Serial device connected to the host.
    #[arg(short, long, value_name = "TTY")]
    port: PathBuf,

    /// Device configuration (defaults apply when the file is absent).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Board driver, overriding `board.driver`.
    #[arg(short, long)]
    board: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("Device startup failed: {}", e);
        eprintln!("dlog_device: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let (mut config, loaded_from) = load_config(args.config.as_deref())?;
    if let Some(board) = &args.board {
        config.board.driver.clone_from(board);
    }

    setup_tracing(&args, &config);
    info!("dlog device v{} starting...", env!("CARGO_PKG_VERSION"));
    match loaded_from {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => warn!("No configuration file, using defaults"),
    }

    let registry = BoardRegistry::with_builtin()?;
    info!(available = ?registry.list_boards(), driver = %config.board.driver, "Selecting board");
    let board = registry.create_board(&config.board.driver)?;
    let transport = SerialTransport::open(&args.port)?;

    let runtime = DeviceRuntime::start(&config, board, Arc::new(transport))?;

    let running = runtime.running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    while runtime.is_running() {
        thread::sleep(Duration::from_millis(200));
    }

    let stats = runtime.shutdown();
    match serde_json::to_string(&stats) {
        Ok(json) => info!(stats = %json, "Final counters"),
        Err(e) => warn!(error = %e, "Could not serialize final counters"),
    }
    info!("dlog device shutdown complete");
    Ok(())
}

/// Explicit path must exist; the default path is optional.
fn load_config(
    explicit: Option<&Path>,
) -> Result<(DeviceConfig, Option<PathBuf>), Box<dyn std::error::Error>> {
    if let Some(path) = explicit {
        return Ok((DeviceConfig::load(path)?, Some(path.to_path_buf())));
    }
    let default = Path::new(DEFAULT_CONFIG_PATH);
    if default.exists() {
        return Ok((DeviceConfig::load(default)?, Some(default.to_path_buf())));
    }
    Ok((DeviceConfig::default(), None))
}

/// Setup tracing subscriber based on CLI arguments and `shared.log_level`.
fn setup_tracing(args: &Args, config: &DeviceConfig) {
    let level = if args.verbose {
        "debug"
    } else {
        config.shared.log_level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .init();
    }
}
