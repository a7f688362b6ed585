mod disconnect;
mod end_to_end;
mod one_off;
mod overflow;

use dlog_common::consts::ADC_PHYSICAL_CHANNELS;
use dlog_common::prelude::*;
use dlog_device::config::DeviceConfig;
use dlog_device::runtime::{DeviceRuntime, DeviceStats};
use dlog_device::sampler::SamplerState;
use dlog_hal::drivers::simulation::{SimulatedAdc, SimulatedBoardSensors, ThreadAlarmPool};
use dlog_hal::{LoopbackHost, LoopbackTransport};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ── Helpers ─────────────────────────────────────────────────────────

/// Codes on the simulated ADC: channel `n` reads `(n + 1) * 1000`, odd
/// channels negative.
pub fn adc_codes() -> [i16; ADC_PHYSICAL_CHANNELS] {
    let mut codes = [0i16; ADC_PHYSICAL_CHANNELS];
    for (n, code) in codes.iter_mut().enumerate() {
        let magnitude = (n as i16 + 1) * 1000;
        *code = if n % 2 == 0 { magnitude } else { -magnitude };
    }
    codes
}

/// Simulation board with a constant ADC.
pub fn constant_board() -> Board {
    Board {
        name: "simulation",
        adc: Box::new(SimulatedAdc::with_constant(adc_codes())),
        sensors: Box::new(SimulatedBoardSensors::default()),
        alarm_pool: Box::new(ThreadAlarmPool::new("test-sampler")),
    }
}

/// Frame every periodic sample has with the default sensors.
pub fn expected_frame() -> SampleFrame {
    let mut values = [0i32; 8];
    values[0] = 1000;
    values[1] = -2000;
    SampleFrame::from_parts(values, 8)
}

pub struct Harness {
    pub runtime: DeviceRuntime,
    pub host: LoopbackHost,
    pub decoder: HostStreamDecoder,
}

impl Harness {
    pub fn start(config: DeviceConfig) -> Self {
        Self::start_with(config, LoopbackTransport::pair())
    }

    pub fn start_with(config: DeviceConfig, pair: (LoopbackTransport, LoopbackHost)) -> Self {
        let (transport, host) = pair;
        host.connect();
        let runtime =
            DeviceRuntime::start(&config, constant_board(), Arc::new(transport)).unwrap();
        Self {
            runtime,
            host,
            decoder: HostStreamDecoder::new(),
        }
    }

    pub fn send(&self, msg: HostToDeviceMessage) {
        self.host.send_message(&msg).unwrap();
    }

    /// Next decoded event within `timeout`.
    pub fn next_event(&mut self, timeout: Duration) -> Option<HostEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.decoder.next_event() {
                return Some(event.unwrap());
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            let bytes = self.host.recv_timeout(4096, left.min(Duration::from_millis(20)));
            self.decoder.push(&bytes);
        }
    }

    /// Frames received until the end-of-stream marker. `None` if the marker
    /// did not show up within `timeout`.
    pub fn frames_until_eos(&mut self, timeout: Duration) -> Option<Vec<SampleFrame>> {
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.next_event(left)? {
                HostEvent::Frame(frame) => frames.push(frame),
                HostEvent::EndOfStream => return Some(frames),
                HostEvent::Message(msg) => panic!("reply inside stream: {msg:?}"),
            }
        }
    }

    /// Frames received during `window`, without stopping.
    pub fn frames_for(&mut self, window: Duration) -> Vec<SampleFrame> {
        let deadline = Instant::now() + window;
        let mut frames = Vec::new();
        while let Some(event) = self.next_event(deadline.saturating_duration_since(Instant::now()))
        {
            match event {
                HostEvent::Frame(frame) => frames.push(frame),
                other => panic!("unexpected event while streaming: {other:?}"),
            }
        }
        frames
    }

    /// Wait until the sampler reaches `state`.
    pub fn wait_for_state(&self, state: SamplerState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.runtime.stats().sampler.state == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    pub fn shutdown(self) -> DeviceStats {
        self.runtime.shutdown()
    }
}
