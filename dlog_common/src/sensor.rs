//! Sensor model and registry.
//!
//! The registry is built once at boot from a static list and is read-only
//! afterwards, so both cores read it through a shared reference without
//! locking.

use heapless::{String as FixedString, Vec as FixedVec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{ADC_PHYSICAL_CHANNELS, MAX_SENSORS, MAX_SENSOR_NAME_LEN};

/// Registry construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    /// More sensors than frame slots.
    #[error("{count} sensors registered, at most {MAX_SENSORS} supported")]
    TooManySensors {
        /// Number of sensors offered.
        count: usize,
    },

    /// More ADC-backed sensors than physical ADC channels.
    #[error("{count} ADC-backed sensors, ADC has {ADC_PHYSICAL_CHANNELS} channels")]
    TooManyAdcChannels {
        /// Number of ADC-backed sensors offered.
        count: usize,
    },

    /// Two sensors share an id.
    #[error("duplicate sensor id {0}")]
    DuplicateId(u8),

    /// Empty sensor name.
    #[error("sensor {id} has an empty name")]
    EmptyName {
        /// Sensor id.
        id: u8,
    },

    /// Name longer than the fixed name buffer.
    #[error("sensor {id} name is {len} bytes, limit is {MAX_SENSOR_NAME_LEN}")]
    NameTooLong {
        /// Sensor id.
        id: u8,
        /// Offending length in bytes.
        len: usize,
    },

    /// `uses_adc` contradicts the family wiring.
    #[error("sensor {id}: family {family:?} cannot have uses_adc = {uses_adc}")]
    AdcFlagMismatch {
        /// Sensor id.
        id: u8,
        /// Declared family.
        family: SensorFamily,
        /// Declared flag.
        uses_adc: bool,
    },
}

/// Closed set of sensor kinds the logger knows how to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFamily {
    /// MBA500 load cell, wired to one ADC channel.
    Mba500LoadCell,
    /// On-die temperature sensor [m°C].
    BoardTemperature,
    /// Board supply rail [mV].
    SupplyVoltage,
    /// Registered but without sampling behaviour.
    Unknown,
}

impl SensorFamily {
    /// Fixed ADC wiring of the family, `None` when either is allowed.
    pub const fn adc_wiring(self) -> Option<bool> {
        match self {
            Self::Mba500LoadCell => Some(true),
            Self::BoardTemperature | Self::SupplyVoltage => Some(false),
            Self::Unknown => None,
        }
    }
}

/// Reading taken from the board itself rather than the external ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardReading {
    /// On-die temperature [m°C].
    DieTemperature,
    /// Supply voltage [mV].
    SupplyVoltage,
}

/// How a sensor gets its value into a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingRoute {
    /// Filled by the single shared ADC conversion.
    SharedAdc,
    /// Read individually after the ADC slots.
    Board(BoardReading),
    /// No sampling behaviour; contributes nothing.
    Unresolved,
}

/// One logical sensor. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sensor {
    id: u8,
    name: FixedString<MAX_SENSOR_NAME_LEN>,
    family: SensorFamily,
    uses_adc: bool,
}

impl Sensor {
    /// Build a sensor, checking the name bound and ADC wiring.
    pub fn new(
        id: u8,
        name: &str,
        family: SensorFamily,
        uses_adc: bool,
    ) -> Result<Self, SensorError> {
        if name.is_empty() {
            return Err(SensorError::EmptyName { id });
        }
        let name = FixedString::try_from(name).map_err(|_| SensorError::NameTooLong {
            id,
            len: name.len(),
        })?;
        if family.adc_wiring().is_some_and(|wired| wired != uses_adc) {
            return Err(SensorError::AdcFlagMismatch {
                id,
                family,
                uses_adc,
            });
        }
        Ok(Self {
            id,
            name,
            family,
            uses_adc,
        })
    }

    /// Sensor id.
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Sensor name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Sensor family.
    pub const fn family(&self) -> SensorFamily {
        self.family
    }

    /// Whether the sensor occupies an ADC channel.
    pub const fn uses_adc(&self) -> bool {
        self.uses_adc
    }

    /// Resolve the sampling behaviour for this sensor.
    pub const fn route(&self) -> SamplingRoute {
        if self.uses_adc {
            return SamplingRoute::SharedAdc;
        }
        match self.family {
            SensorFamily::BoardTemperature => SamplingRoute::Board(BoardReading::DieTemperature),
            SensorFamily::SupplyVoltage => SamplingRoute::Board(BoardReading::SupplyVoltage),
            SensorFamily::Mba500LoadCell | SensorFamily::Unknown => SamplingRoute::Unresolved,
        }
    }
}

/// Sensor entry as written in the `[[sensors]]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Sensor id, unique within the registry.
    pub id: u8,
    /// Human-readable name, at most 64 bytes.
    pub name: String,
    /// Sensor family.
    pub family: SensorFamily,
    /// ADC wiring; defaults from the family when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses_adc: Option<bool>,
}

impl SensorConfig {
    fn to_sensor(&self) -> Result<Sensor, SensorError> {
        let uses_adc = self
            .uses_adc
            .or(self.family.adc_wiring())
            .unwrap_or(false);
        Sensor::new(self.id, &self.name, self.family, uses_adc)
    }
}

/// Sensors fitted on the reference bench: two MBA500 load cells on ADC
/// channels 0 and 1.
pub fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig {
            id: 0,
            name: "MBA500_load_cell_torque".to_string(),
            family: SensorFamily::Mba500LoadCell,
            uses_adc: Some(true),
        },
        SensorConfig {
            id: 1,
            name: "MBA500_load_cell_thrust".to_string(),
            family: SensorFamily::Mba500LoadCell,
            uses_adc: Some(true),
        },
    ]
}

/// Ordered, immutable set of registered sensors.
///
/// ADC-backed sensors take ADC channels in registration order: the first
/// one reads channel 0, the second channel 1, and so on.
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: FixedVec<Sensor, MAX_SENSORS>,
    adc_channels: usize,
}

impl SensorRegistry {
    /// Build a registry from already constructed sensors.
    pub fn new(sensors: impl IntoIterator<Item = Sensor>) -> Result<Self, SensorError> {
        let mut registry = Self::default();
        let mut offered = 0usize;
        for sensor in sensors {
            offered += 1;
            if registry.sensors.iter().any(|s| s.id == sensor.id) {
                return Err(SensorError::DuplicateId(sensor.id));
            }
            if sensor.uses_adc {
                registry.adc_channels += 1;
            }
            // Keep counting past capacity so the error reports the real total.
            let _ = registry.sensors.push(sensor);
        }
        if offered > MAX_SENSORS {
            return Err(SensorError::TooManySensors { count: offered });
        }
        if registry.adc_channels > ADC_PHYSICAL_CHANNELS {
            return Err(SensorError::TooManyAdcChannels {
                count: registry.adc_channels,
            });
        }
        Ok(registry)
    }

    /// Build a registry from config entries.
    pub fn from_configs(configs: &[SensorConfig]) -> Result<Self, SensorError> {
        if configs.len() > MAX_SENSORS {
            return Err(SensorError::TooManySensors {
                count: configs.len(),
            });
        }
        let sensors = configs
            .iter()
            .map(SensorConfig::to_sensor)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(sensors)
    }

    /// Number of ADC channels copied into each frame.
    #[inline]
    pub const fn adc_channel_count(&self) -> usize {
        self.adc_channels
    }

    /// All sensors in registration order.
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    /// Number of registered sensors.
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Look up a sensor by id.
    pub fn get(&self, id: u8) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.id == id)
    }

    /// Sensors serviced after the ADC slots, in registration order.
    pub fn board_readings(&self) -> impl Iterator<Item = (&Sensor, BoardReading)> {
        self.sensors.iter().filter_map(|s| match s.route() {
            SamplingRoute::Board(reading) => Some((s, reading)),
            SamplingRoute::SharedAdc | SamplingRoute::Unresolved => None,
        })
    }

    /// Sensors that contribute no value to frames.
    pub fn unresolved(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors
            .iter()
            .filter(|s| s.route() == SamplingRoute::Unresolved)
    }

    /// Values every frame carries: ADC channels plus resolved board readings.
    pub fn expected_elements(&self) -> usize {
        self.adc_channels + self.board_readings().count()
    }
}
