//! Egress overflow against a host that stops reading.

use super::{Harness, expected_frame};
use dlog_common::consts::FRAME_BYTES;
use dlog_common::protocol::{DeviceToHostMessage, HostEvent, HostToDeviceMessage};
use dlog_device::config::{DeviceConfig, EgressConfig};
use dlog_hal::LoopbackTransport;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(3);

#[test]
fn stalled_host_drops_whole_frames_and_stream_recovers() {
    let config = DeviceConfig {
        egress: EgressConfig {
            capacity_bytes: 16 * FRAME_BYTES,
            drain_chunk_bytes: 4 * FRAME_BYTES,
        },
        ..DeviceConfig::default()
    };
    let mut h = Harness::start_with(config, LoopbackTransport::pair_with_host_buffer(1024));

    h.send(HostToDeviceMessage::SetPeriodicSampler {
        sampling_period: 100,
    });
    assert_eq!(
        h.next_event(TIMEOUT),
        Some(HostEvent::Message(DeviceToHostMessage::AckSetPeriodicSampler {
            ack: true
        }))
    );

    // Stop reading until the ring overflows.
    let deadline = Instant::now() + TIMEOUT;
    while h.runtime.stats().sampler.session_dropped == 0 {
        assert!(Instant::now() < deadline, "egress never overflowed");
        std::thread::sleep(Duration::from_millis(5));
    }

    // Everything that did arrive is whole, aligned frames.
    h.send(HostToDeviceMessage::StopPeriodicSampler);
    let frames = h.frames_until_eos(TIMEOUT).expect("end-of-stream marker");
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| *f == expected_frame()));

    let stats = h.shutdown();
    assert!(stats.sampler.total_dropped > 0);
    assert!(stats.egress.dropped_frames > 0);
    assert!(stats.egress.high_water <= stats.egress.capacity);
}
