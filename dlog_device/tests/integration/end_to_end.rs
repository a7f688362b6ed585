//! Start, stream, stop: the full command cycle seen from the host.

use super::{Harness, expected_frame};
use dlog_common::protocol::{DeviceToHostMessage, HostEvent, HostToDeviceMessage};
use dlog_device::config::DeviceConfig;
use dlog_device::sampler::SamplerState;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(3);

fn start_streaming(h: &mut Harness, period_us: u32) {
    h.send(HostToDeviceMessage::SetPeriodicSampler {
        sampling_period: period_us,
    });
    assert_eq!(
        h.next_event(TIMEOUT),
        Some(HostEvent::Message(DeviceToHostMessage::AckSetPeriodicSampler {
            ack: true
        }))
    );
    assert!(h.decoder.is_streaming());
}

#[test]
fn stream_then_stop_ends_with_marker() {
    let mut h = Harness::start(DeviceConfig::default());
    start_streaming(&mut h, 1000);

    let streamed = h.frames_for(Duration::from_millis(150));
    assert!(streamed.len() >= 20, "only {} frames", streamed.len());

    h.send(HostToDeviceMessage::StopPeriodicSampler);
    let tail = h.frames_until_eos(TIMEOUT).expect("end-of-stream marker");
    assert!(!h.decoder.is_streaming());
    for frame in streamed.iter().chain(&tail) {
        assert_eq!(*frame, expected_frame());
    }

    // Nothing follows the marker.
    assert!(h.next_event(Duration::from_millis(50)).is_none());
    assert_eq!(h.decoder.buffered(), 0);

    let stats = h.shutdown();
    assert_eq!(stats.sampler.state, SamplerState::Idle);
    assert_eq!(stats.sampler.sessions, 1);
    assert_eq!(stats.sampler.session_frames, 0);
    assert!(stats.sampler.total_frames >= streamed.len() as u64);
    assert_eq!(stats.ingress.eos_sent, 1);
    assert_eq!(stats.egress.resets, 1);
    assert_eq!(stats.egress.queued, 0);
}

#[test]
fn short_period_is_clamped_to_floor() {
    let mut h = Harness::start(DeviceConfig::default());
    start_streaming(&mut h, 1);
    assert!(h.wait_for_state(SamplerState::Running { period_us: 40 }, TIMEOUT));

    h.send(HostToDeviceMessage::StopPeriodicSampler);
    assert!(h.frames_until_eos(TIMEOUT).is_some());
    h.shutdown();
}

#[test]
fn zero_period_is_refused() {
    let mut h = Harness::start(DeviceConfig::default());
    h.send(HostToDeviceMessage::SetPeriodicSampler { sampling_period: 0 });
    assert_eq!(
        h.next_event(TIMEOUT),
        Some(HostEvent::Message(DeviceToHostMessage::AckSetPeriodicSampler {
            ack: false
        }))
    );
    assert!(!h.decoder.is_streaming());
    assert!(h.next_event(Duration::from_millis(50)).is_none());

    let stats = h.shutdown();
    assert_eq!(stats.sampler.state, SamplerState::Idle);
    assert_eq!(stats.sampler.sessions, 0);
    assert_eq!(stats.ingress.rejected, 1);
}

#[test]
fn stop_while_idle_still_sends_marker() {
    let mut h = Harness::start(DeviceConfig::default());
    h.send(HostToDeviceMessage::StopPeriodicSampler);
    assert_eq!(h.next_event(TIMEOUT), Some(HostEvent::EndOfStream));

    let stats = h.shutdown();
    assert_eq!(stats.ingress.eos_sent, 1);
    assert_eq!(stats.sampler.sessions, 0);
}

#[test]
fn sessions_can_be_restarted() {
    let mut h = Harness::start(DeviceConfig::default());
    for _ in 0..3 {
        start_streaming(&mut h, 500);
        h.frames_for(Duration::from_millis(20));
        h.send(HostToDeviceMessage::StopPeriodicSampler);
        let tail = h.frames_until_eos(TIMEOUT).expect("end-of-stream marker");
        assert!(tail.iter().all(|f| *f == expected_frame()));
    }
    let stats = h.shutdown();
    assert_eq!(stats.sampler.sessions, 3);
    assert_eq!(stats.ingress.eos_sent, 3);
}

#[test]
fn shutdown_while_streaming_cancels_timer() {
    let mut h = Harness::start(DeviceConfig::default());
    start_streaming(&mut h, 1000);
    assert!(h.wait_for_state(SamplerState::Running { period_us: 1000 }, TIMEOUT));
    let stats = h.shutdown();
    assert_eq!(stats.sampler.state, SamplerState::Idle);
}
