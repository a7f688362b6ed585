//! Simulated on-board readings.

use dlog_common::hal::driver::{BoardSensors, HalError};

/// Die temperature drifting slowly around a base value, fixed supply rail.
#[derive(Debug, Clone)]
pub struct SimulatedBoardSensors {
    base_temperature_mc: i32,
    supply_mv: i32,
    fitted: bool,
    reads: u32,
}

impl SimulatedBoardSensors {
    /// Readings around `base_temperature_mc` and a `supply_mv` rail.
    pub fn new(base_temperature_mc: i32, supply_mv: i32) -> Self {
        Self {
            base_temperature_mc,
            supply_mv,
            fitted: true,
            reads: 0,
        }
    }

    /// A board without these sensors: every read fails.
    pub fn absent() -> Self {
        Self {
            fitted: false,
            ..Self::default()
        }
    }
}

impl Default for SimulatedBoardSensors {
    fn default() -> Self {
        Self::new(27_000, 3_300)
    }
}

impl BoardSensors for SimulatedBoardSensors {
    fn die_temperature_mc(&mut self) -> Result<i32, HalError> {
        if !self.fitted {
            return Err(HalError::SensorUnavailable("die temperature"));
        }
        self.reads = self.reads.wrapping_add(1);
        // ±0.5 °C triangle over 200 reads
        let phase = (self.reads % 200) as i32;
        let offset = if phase < 100 { phase } else { 200 - phase };
        Ok(self.base_temperature_mc + (offset - 50) * 10)
    }

    fn supply_voltage_mv(&mut self) -> Result<i32, HalError> {
        if !self.fitted {
            return Err(HalError::SensorUnavailable("supply voltage"));
        }
        Ok(self.supply_mv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_stays_near_base() {
        let mut sensors = SimulatedBoardSensors::new(25_000, 3_300);
        for _ in 0..500 {
            let t = sensors.die_temperature_mc().unwrap();
            assert!((24_500..=25_500).contains(&t), "{t}");
        }
        assert_eq!(sensors.supply_voltage_mv(), Ok(3_300));
    }

    #[test]
    fn absent_sensors_report_unavailable() {
        let mut sensors = SimulatedBoardSensors::absent();
        assert!(matches!(
            sensors.die_temperature_mc(),
            Err(HalError::SensorUnavailable(_))
        ));
        assert!(sensors.supply_voltage_mv().is_err());
    }
}
