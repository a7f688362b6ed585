//! # dlog host tool
//!
//! Talks to a running `dlog_device` over its serial port: starts and stops
//! streaming, prints frames, takes one-off samples.
//!
//! ```bash
//! # Stream at 1 kHz for two seconds, then stop
//! dlog_host --port /dev/ttyACM0 set 1000 --duration-ms 2000
//!
//! # One frame, as JSON
//! dlog_host --port /dev/ttyACM0 --json one-off
//! ```

use clap::{Parser, Subcommand};
use dlog_common::protocol::{
    DeviceToHostMessage, HostEvent, HostStreamDecoder, HostToDeviceMessage, encode_host_message,
};
use dlog_hal::transport::serial::open_raw_tty;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long to wait for a reply or the end-of-stream marker.
const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// dlog host tool
#[derive(Parser, Debug)]
#[command(name = "dlog_host")]
#[command(version)]
#[command(about = "Host side of the dlog serial protocol")]
struct Args {
    /// Serial device of the logger.
    #[arg(short, long, value_name = "TTY")]
    port: PathBuf,

    /// Print frames and replies as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start periodic sampling and print frames.
    Set {
        /// Requested period [µs]; the device clamps it to its floor.
        period_us: u32,
        /// Stop after this long; without it, stream until the device ends
        /// the stream or the port closes.
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Stop periodic sampling.
    Stop,
    /// Take one frame now.
    OneOff,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);
    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut link = Link::open(args)?;
    match args.command {
        Command::Set {
            period_us,
            duration_ms,
        } => {
            link.send(&HostToDeviceMessage::SetPeriodicSampler {
                sampling_period: period_us,
            })?;
            match link.next_event(REPLY_TIMEOUT)? {
                Some(HostEvent::Message(DeviceToHostMessage::AckSetPeriodicSampler {
                    ack: true,
                })) => info!(period_us, "Streaming"),
                Some(HostEvent::Message(DeviceToHostMessage::AckSetPeriodicSampler {
                    ack: false,
                })) => return Err("device refused the sampling period".into()),
                other => return Err(format!("unexpected reply: {other:?}").into()),
            }

            let deadline = duration_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
            let frames = link.stream_until(deadline)?;
            if link.decoder.is_streaming() {
                link.send(&HostToDeviceMessage::StopPeriodicSampler)?;
                let tail = link.stream_until(Some(Instant::now() + REPLY_TIMEOUT))?;
                if link.decoder.is_streaming() {
                    return Err("no end-of-stream marker after stop".into());
                }
                info!(frames = frames + tail, "Stream closed");
            } else {
                info!(frames, "Stream closed by device");
            }
        }
        Command::Stop => {
            link.send(&HostToDeviceMessage::StopPeriodicSampler)?;
            let deadline = Instant::now() + REPLY_TIMEOUT;
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                match link.next_event(left)? {
                    Some(HostEvent::EndOfStream) => break,
                    Some(event) => debug!(?event, "Skipped while waiting for end-of-stream"),
                    None => return Err("no end-of-stream marker after stop".into()),
                }
            }
            info!("Sampler stopped");
        }
        Command::OneOff => {
            link.send(&HostToDeviceMessage::ExecuteOneOffSampler)?;
            match link.next_event(REPLY_TIMEOUT)? {
                Some(HostEvent::Message(
                    msg @ DeviceToHostMessage::OneOffSamplerData { populated, values },
                )) => {
                    if args.json {
                        println!("{}", serde_json::to_string(&msg)?);
                    } else {
                        println!("{:?}", &values[..usize::from(populated)]);
                    }
                }
                other => return Err(format!("unexpected reply: {other:?}").into()),
            }
        }
    }
    Ok(())
}

struct Link {
    port: File,
    decoder: HostStreamDecoder,
    json: bool,
}

impl Link {
    fn open(args: &Args) -> Result<Self, Box<dyn std::error::Error>> {
        let port = open_raw_tty(&args.port)?;
        Ok(Self {
            port,
            decoder: HostStreamDecoder::new(),
            json: args.json,
        })
    }

    fn send(&mut self, msg: &HostToDeviceMessage) -> Result<(), Box<dyn std::error::Error>> {
        let bytes = encode_host_message(msg)?;
        self.port.write_all(&bytes)?;
        debug!(?msg, "Sent");
        Ok(())
    }

    /// Print frames until the marker, the deadline or a closed port.
    fn stream_until(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<u64, Box<dyn std::error::Error>> {
        let mut frames = 0u64;
        loop {
            let wait = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()),
                None => Duration::from_secs(1),
            };
            if wait.is_zero() {
                return Ok(frames);
            }
            match self.next_event(wait)? {
                Some(HostEvent::Frame(frame)) => {
                    frames += 1;
                    if self.json {
                        println!("{}", serde_json::to_string(frame.populated())?);
                    } else {
                        println!("{:?}", frame.populated());
                    }
                }
                Some(HostEvent::EndOfStream) => return Ok(frames),
                Some(HostEvent::Message(msg)) => warn!(?msg, "Reply inside stream"),
                None if deadline.is_none() => {}
                None => return Ok(frames),
            }
        }
    }

    /// Next decoded event, reading the port for up to `timeout`.
    fn next_event(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<HostEvent>, Box<dyn std::error::Error>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.decoder.next_event() {
                return Ok(Some(event?));
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() || !self.fill(left)? {
                return Ok(None);
            }
        }
    }

    /// Read what the port has, waiting up to `timeout`. `false` on timeout.
    fn fill(&mut self, timeout: Duration) -> Result<bool, Box<dyn std::error::Error>> {
        let ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.port.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(ms)) {
            Ok(0) => return Ok(false),
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(true),
            Err(e) => return Err(e.into()),
        }
        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        if !revents.contains(PollFlags::POLLIN) {
            return Err("port hung up".into());
        }
        let mut buf = [0u8; 512];
        match self.port.read(&mut buf) {
            Ok(0) => Err("port closed".into()),
            Ok(n) => {
                self.decoder.push(&buf[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
