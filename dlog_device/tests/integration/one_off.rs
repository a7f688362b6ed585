//! One-off sampling from the command core.

use super::{Harness, adc_codes};
use dlog_common::consts::FRAME_CAPACITY;
use dlog_common::protocol::{DeviceToHostMessage, HostEvent, HostToDeviceMessage};
use dlog_common::sensor::{SensorConfig, SensorFamily};
use dlog_device::config::DeviceConfig;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(3);

fn sensor(id: u8, family: SensorFamily) -> SensorConfig {
    SensorConfig {
        id,
        name: format!("sensor-{id}"),
        family,
        uses_adc: None,
    }
}

fn one_off(h: &mut Harness) -> (u8, [i32; FRAME_CAPACITY]) {
    h.send(HostToDeviceMessage::ExecuteOneOffSampler);
    match h.next_event(TIMEOUT) {
        Some(HostEvent::Message(DeviceToHostMessage::OneOffSamplerData { populated, values })) => {
            (populated, values)
        }
        other => panic!("expected one-off data, got {other:?}"),
    }
}

#[test]
fn one_off_while_idle_returns_adc_values() {
    let mut h = Harness::start(DeviceConfig::default());
    let (populated, values) = one_off(&mut h);
    assert_eq!(populated, 2);
    assert_eq!(&values[..2], &[1000, -2000]);
    assert!(values[2..].iter().all(|&v| v == 0));
    assert!(!h.decoder.is_streaming());

    let stats = h.shutdown();
    assert_eq!(stats.ingress.one_offs, 1);
    assert_eq!(stats.sampler.sessions, 0);
}

#[test]
fn board_readings_follow_load_cells() {
    let config = DeviceConfig {
        sensors: vec![
            sensor(0, SensorFamily::Mba500LoadCell),
            sensor(1, SensorFamily::SupplyVoltage),
            sensor(2, SensorFamily::Mba500LoadCell),
            sensor(3, SensorFamily::Unknown),
            sensor(4, SensorFamily::Mba500LoadCell),
        ],
        ..DeviceConfig::default()
    };
    let mut h = Harness::start(config);
    let (populated, values) = one_off(&mut h);
    let codes = adc_codes();
    assert_eq!(populated, 4);
    assert_eq!(
        &values[..4],
        &[
            i32::from(codes[0]),
            i32::from(codes[1]),
            i32::from(codes[2]),
            3_300
        ]
    );

    let stats = h.shutdown();
    assert_eq!(stats.composer.unresolved_sensors, 1);
}

#[test]
fn repeated_one_offs_each_get_a_reply() {
    let mut h = Harness::start(DeviceConfig::default());
    for _ in 0..5 {
        let (populated, _) = one_off(&mut h);
        assert_eq!(populated, 2);
    }
    let stats = h.shutdown();
    assert_eq!(stats.ingress.one_offs, 5);
    assert_eq!(stats.adc.conversions, 5);
}
