//! Numerically Controlled Oscillator and Quadrature Mixer

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{ConfigError, Sample, SampleFormat};

use crate::ClockedStage;

/// NCO configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcoConfig {
    /// Phase accumulator width
    pub phase_bits: u32,
    /// log2 of the lookup table length
    pub table_bits: u32,
    /// Width of the cos/sin outputs
    pub output_width: u8,
    /// Peak amplitude as a fraction of full scale
    pub amplitude: f64,
}

impl Default for NcoConfig {
    fn default() -> Self {
        Self {
            phase_bits: 25,
            table_bits: 8,
            output_width: 10,
            amplitude: 0.8,
        }
    }
}

/// Frequency control word producing `frequency` at `sample_rate`
pub fn fcw_for_frequency(frequency: f64, sample_rate: f64, phase_bits: u32) -> Result<u32, ConfigError> {
    let nyquist = sample_rate / 2.0;
    if !(sample_rate > 0.0) || frequency.abs() > nyquist {
        return Err(ConfigError::InvalidFrequency { frequency, nyquist });
    }
    let modulus = 1i64 << phase_bits;
    let fcw = (frequency / sample_rate * modulus as f64).round() as i64;
    Ok(fcw.rem_euclid(modulus) as u32)
}

/// Frequency produced by `fcw`; words in the upper half are negative
pub fn frequency_for_fcw(fcw: u32, sample_rate: f64, phase_bits: u32) -> f64 {
    let modulus = 1i64 << phase_bits;
    let mut signed = fcw as i64 & (modulus - 1);
    if signed >= modulus / 2 {
        signed -= modulus;
    }
    signed as f64 * sample_rate / modulus as f64
}

/// Table-driven carrier generator
#[derive(Debug, Clone)]
pub struct Nco {
    phase_bits: u32,
    index_shift: u32,
    phase: u32,
    fcw: u32,
    cos: Vec<i64>,
    sin: Vec<i64>,
    output_width: u8,
}

impl Nco {
    pub fn new(config: NcoConfig) -> Result<Self, ConfigError> {
        if config.phase_bits > 32 || config.table_bits == 0 || config.table_bits > config.phase_bits {
            return Err(ConfigError::InvalidConfig(format!(
                "NCO table of 2^{} entries on a {}-bit accumulator",
                config.table_bits, config.phase_bits
            )));
        }
        if !(config.amplitude > 0.0 && config.amplitude <= 1.0) {
            return Err(ConfigError::InvalidConfig(format!("NCO amplitude {} outside (0, 1]", config.amplitude)));
        }
        let format = SampleFormat::signed(config.output_width)?;
        let peak = config.amplitude * format.max_value() as f64;
        let len = 1usize << config.table_bits;
        let angle = |k: usize| 2.0 * PI * k as f64 / len as f64;

        let cos = (0..len).map(|k| (peak * angle(k).cos()).round() as i64).collect();
        let sin = (0..len).map(|k| (peak * angle(k).sin()).round() as i64).collect();

        info!(
            "NCO: {}-bit phase, {} entries, {}-bit output at {:.2} of full scale",
            config.phase_bits, len, config.output_width, config.amplitude
        );

        Ok(Self {
            phase_bits: config.phase_bits,
            index_shift: config.phase_bits - config.table_bits,
            phase: 0,
            fcw: 0,
            cos,
            sin,
            output_width: config.output_width,
        })
    }

    fn phase_mask(&self) -> u32 {
        if self.phase_bits == 32 {
            u32::MAX
        } else {
            (1 << self.phase_bits) - 1
        }
    }

    pub fn set_fcw(&mut self, fcw: u32) {
        let fcw = fcw & self.phase_mask();
        if fcw != self.fcw {
            debug!("NCO fcw {:#x}", fcw);
            self.fcw = fcw;
        }
    }

    pub fn fcw(&self) -> u32 {
        self.fcw
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn output_width(&self) -> u8 {
        self.output_width
    }

    /// `(cos, sin)` at the current phase, then advance by one sample
    pub fn tick(&mut self) -> (i64, i64) {
        let index = (self.phase >> self.index_shift) as usize;
        let out = (self.cos[index], self.sin[index]);
        self.phase = self.phase.wrapping_add(self.fcw) & self.phase_mask();
        out
    }

    pub fn reset(&mut self) {
        self.phase = 0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Products {
    valid: bool,
    last: bool,
    i_cos: i64,
    q_sin: i64,
    i_sin: i64,
    q_cos: i64,
}

/// Complex multiplier against an NCO, pipelined as multiply then add
#[derive(Debug, Clone)]
pub struct Mixer {
    nco: Nco,
    format: SampleFormat,
    shift: u32,
    products: Products,
    sum: Sample,
}

impl Mixer {
    /// Mixer on rails of `data_width` bits
    pub fn new(config: NcoConfig, data_width: u8) -> Result<Self, ConfigError> {
        let nco = Nco::new(config)?;
        let shift = nco.output_width() as u32 - 1;
        Ok(Self {
            nco,
            format: SampleFormat::signed(data_width)?,
            shift,
            products: Products::default(),
            sum: Sample::IDLE,
        })
    }

    pub fn set_fcw(&mut self, fcw: u32) {
        self.nco.set_fcw(fcw);
    }

    pub fn nco(&self) -> &Nco {
        &self.nco
    }

    /// Cycles from input to output
    pub const LATENCY: usize = 2;
}

impl ClockedStage for Mixer {
    fn name(&self) -> &'static str {
        "mixer"
    }

    fn step(&mut self, input: Sample) -> Sample {
        let out = self.sum;

        let p = self.products;
        self.sum = if p.valid {
            Sample {
                valid: true,
                last: p.last,
                i: self.format.saturate((p.i_cos - p.q_sin) >> self.shift),
                q: self.format.saturate((p.i_sin + p.q_cos) >> self.shift),
            }
        } else {
            Sample::IDLE
        };

        let (cos, sin) = self.nco.tick();
        let (i, q) = input.rails();
        self.products = Products {
            valid: input.valid,
            last: input.last,
            i_cos: i * cos,
            q_sin: q * sin,
            i_sin: i * sin,
            q_cos: q * cos,
        };

        out
    }

    fn reset(&mut self) {
        self.nco.reset();
        self.products = Products::default();
        self.sum = Sample::IDLE;
    }
}
