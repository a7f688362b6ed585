//! Host going away mid-stream.

use super::{Harness, expected_frame};
use dlog_common::protocol::{DeviceToHostMessage, HostEvent, HostToDeviceMessage};
use dlog_device::config::DeviceConfig;
use dlog_device::sampler::SamplerState;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(3);

#[test]
fn disconnect_stops_sampler_without_marker() {
    let mut h = Harness::start(DeviceConfig::default());
    h.send(HostToDeviceMessage::SetPeriodicSampler {
        sampling_period: 1000,
    });
    assert_eq!(
        h.next_event(TIMEOUT),
        Some(HostEvent::Message(DeviceToHostMessage::AckSetPeriodicSampler {
            ack: true
        }))
    );
    assert!(h.wait_for_state(SamplerState::Running { period_us: 1000 }, TIMEOUT));

    h.host.disconnect();
    assert!(h.wait_for_state(SamplerState::Idle, TIMEOUT));
    let stats = h.runtime.stats();
    assert_eq!(stats.ingress.disconnects, 1);
    assert_eq!(stats.ingress.eos_sent, 0);

    // Reconnect: a new host starts fresh in message mode.
    h.host.take_received();
    h.host.connect();
    h.decoder = Default::default();
    h.send(HostToDeviceMessage::SetPeriodicSampler {
        sampling_period: 1000,
    });
    assert_eq!(
        h.next_event(TIMEOUT),
        Some(HostEvent::Message(DeviceToHostMessage::AckSetPeriodicSampler {
            ack: true
        }))
    );
    let frames = h.frames_for(Duration::from_millis(50));
    assert!(frames.iter().all(|f| *f == expected_frame()));

    h.send(HostToDeviceMessage::StopPeriodicSampler);
    assert!(h.frames_until_eos(TIMEOUT).is_some());
    let stats = h.shutdown();
    assert_eq!(stats.sampler.sessions, 2);
    assert_eq!(stats.ingress.eos_sent, 1);
}
