//! Simulated AD7606B lines.

use dlog_common::consts::ADC_PHYSICAL_CHANNELS;
use dlog_common::hal::driver::{AdcInterface, HalError};
use std::f64::consts::TAU;
use std::time::{Duration, Instant};

/// Signal produced on one simulated channel, indexed by conversion count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Same code every conversion.
    Constant(i16),
    /// Sawtooth advancing by `step` codes per conversion, wrapping.
    Ramp {
        /// Codes per conversion.
        step: i16,
    },
    /// Sine over `period` conversions.
    Sine {
        /// Peak code.
        amplitude: i16,
        /// Conversions per cycle.
        period: u32,
    },
}

impl Waveform {
    fn code_at(self, n: u64) -> i16 {
        match self {
            Self::Constant(code) => code,
            Self::Ramp { step } => (n as i16).wrapping_mul(step),
            Self::Sine { amplitude, period } => {
                let period = u64::from(period.max(1));
                let phase = (n % period) as f64 / period as f64;
                (f64::from(amplitude) * (phase * TAU).sin()).round() as i16
            }
        }
    }
}

/// AD7606B model: BUSY stays high for `conversion_time` after the CONVST
/// falling edge; channel words are latched at that edge.
#[derive(Debug)]
pub struct SimulatedAdc {
    waveforms: [Waveform; ADC_PHYSICAL_CHANNELS],
    conversion_time: Duration,
    convst: bool,
    in_reset: bool,
    busy_until: Option<Instant>,
    conversions: u64,
    latched: [u16; ADC_PHYSICAL_CHANNELS],
}

impl SimulatedAdc {
    /// Datasheet conversion time at full throughput.
    pub const CONVERSION_TIME: Duration = Duration::from_micros(4);

    /// Model with the given per-channel signals.
    pub fn new(waveforms: [Waveform; ADC_PHYSICAL_CHANNELS], conversion_time: Duration) -> Self {
        Self {
            waveforms,
            conversion_time,
            convst: false,
            in_reset: false,
            busy_until: None,
            conversions: 0,
            latched: [0; ADC_PHYSICAL_CHANNELS],
        }
    }

    /// Model whose channels always read `codes`.
    pub fn with_constant(codes: [i16; ADC_PHYSICAL_CHANNELS]) -> Self {
        Self::new(codes.map(Waveform::Constant), Self::CONVERSION_TIME)
    }

    /// Conversions started since the last reset.
    pub fn conversions(&self) -> u64 {
        self.conversions
    }
}

impl Default for SimulatedAdc {
    /// Two load-cell-like sines on channels 0 and 1, slow ramps elsewhere.
    fn default() -> Self {
        let mut waveforms = [Waveform::Ramp { step: 16 }; ADC_PHYSICAL_CHANNELS];
        waveforms[0] = Waveform::Sine {
            amplitude: 12_000,
            period: 1_000,
        };
        waveforms[1] = Waveform::Sine {
            amplitude: 8_000,
            period: 250,
        };
        Self::new(waveforms, Self::CONVERSION_TIME)
    }
}

impl AdcInterface for SimulatedAdc {
    fn set_convst(&mut self, high: bool) {
        let falling = self.convst && !high;
        self.convst = high;
        if falling && !self.in_reset {
            let n = self.conversions;
            for (word, wave) in self.latched.iter_mut().zip(self.waveforms) {
                *word = wave.code_at(n) as u16;
            }
            self.conversions += 1;
            self.busy_until = Some(Instant::now() + self.conversion_time);
        }
    }

    fn set_reset(&mut self, high: bool) {
        self.in_reset = high;
        if high {
            self.busy_until = None;
            self.conversions = 0;
            self.latched = [0; ADC_PHYSICAL_CHANNELS];
        }
    }

    fn busy(&mut self) -> bool {
        match self.busy_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                self.busy_until = None;
                false
            }
            None => false,
        }
    }

    fn read_channels(&mut self, dest: &mut [u16; ADC_PHYSICAL_CHANNELS]) -> Result<(), HalError> {
        if self.busy() {
            return Err(HalError::CommunicationError(
                "channel read during conversion".into(),
            ));
        }
        *dest = self.latched;
        Ok(())
    }
}
