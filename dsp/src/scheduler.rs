//! Two-Clock Scheduler
//!
//! Advances the bus clock and the sample clock in picosecond time, always
//! ticking whichever edge comes next; on coincident edges the bus ticks
//! first. A bus functional model drives register transactions on top of
//! it, and the ADC input comes from a pluggable source.

use std::f64::consts::PI;

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use common::registers::Register;
use common::{ConfigError, Sample, SampleFormat};
use interfaces::{BusRequest, BusResponse, InterfaceError};

use crate::conditioning::DacWord;
use crate::transceiver::Transceiver;
use crate::DspError;

/// Bus cycles a transaction may take before it is abandoned
pub const BUS_TIMEOUT_CYCLES: u32 = 16;

/// Clock periods in picoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub bus_period_ps: u64,
    pub sample_period_ps: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            bus_period_ps: 20_000,
            sample_period_ps: 15_625,
        }
    }
}

impl ClockConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_period_ps == 0 || self.sample_period_ps == 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "clock periods must be non-zero, got bus {} ps, sample {} ps",
                self.bus_period_ps, self.sample_period_ps
            )));
        }
        Ok(())
    }

    pub fn sample_rate_hz(&self) -> f64 {
        1e12 / self.sample_period_ps as f64
    }
}

/// Source of ADC samples, one per sample tick
pub trait AdcSource: Send {
    fn next_sample(&mut self) -> Sample;
}

/// ADC with its valid strobe held low
#[derive(Debug, Clone, Default)]
pub struct Silence;

impl AdcSource for Silence {
    fn next_sample(&mut self) -> Sample {
        Sample::IDLE
    }
}

/// Complex tone quantized to the ADC width
#[derive(Debug, Clone)]
pub struct Tone {
    phasor: Complex<f64>,
    rotation: Complex<f64>,
    amplitude: f64,
    format: SampleFormat,
}

impl Tone {
    /// `frequency` in cycles per sample, `amplitude` as a fraction of full scale
    pub fn new(frequency: f64, amplitude: f64, width: u8) -> Result<Self, ConfigError> {
        if frequency.abs() > 0.5 {
            return Err(ConfigError::InvalidFrequency { frequency, nyquist: 0.5 });
        }
        let format = SampleFormat::signed(width)?;
        Ok(Self {
            phasor: Complex::new(1.0, 0.0),
            rotation: Complex::from_polar(1.0, 2.0 * PI * frequency),
            amplitude: amplitude.clamp(0.0, 1.0) * format.max_value() as f64,
            format,
        })
    }
}

impl AdcSource for Tone {
    fn next_sample(&mut self) -> Sample {
        let value = self.phasor * self.amplitude;
        self.phasor *= self.rotation;
        // keep the phasor on the unit circle
        self.phasor /= self.phasor.norm();
        Sample::new(
            self.format.saturate(value.re.round() as i64),
            self.format.saturate(value.im.round() as i64),
        )
    }
}

/// Replays a fixed sample list
#[derive(Debug, Clone)]
pub struct Recorded {
    samples: Vec<Sample>,
    position: usize,
    repeat: bool,
}

impl Recorded {
    pub fn new(samples: Vec<Sample>, repeat: bool) -> Self {
        Self { samples, position: 0, repeat }
    }

    pub fn finished(&self) -> bool {
        !self.repeat && self.position >= self.samples.len()
    }
}

impl AdcSource for Recorded {
    fn next_sample(&mut self) -> Sample {
        if self.samples.is_empty() {
            return Sample::IDLE;
        }
        if self.position >= self.samples.len() {
            if !self.repeat {
                return Sample::IDLE;
            }
            self.position = 0;
        }
        let sample = self.samples[self.position];
        self.position += 1;
        sample
    }
}

/// Which clock ticked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Bus,
    Sample,
}

/// Transceiver driven by two free-running clocks
pub struct Simulator {
    transceiver: Transceiver,
    clocks: ClockConfig,
    adc: Box<dyn AdcSource>,
    time_ps: u64,
    next_bus_ps: u64,
    next_sample_ps: u64,
    request: BusRequest,
    response: BusResponse,
    capture: bool,
    dac: Vec<DacWord>,
    bus_cycles: u64,
    sample_cycles: u64,
}

impl Simulator {
    pub fn new(transceiver: Transceiver, clocks: ClockConfig) -> Result<Self, DspError> {
        clocks.validate()?;
        Ok(Self {
            transceiver,
            clocks,
            adc: Box::new(Silence),
            time_ps: 0,
            next_bus_ps: 0,
            next_sample_ps: 0,
            request: BusRequest::IDLE,
            response: BusResponse::default(),
            capture: false,
            dac: Vec::new(),
            bus_cycles: 0,
            sample_cycles: 0,
        })
    }

    pub fn set_adc(&mut self, source: Box<dyn AdcSource>) {
        self.adc = source;
    }

    /// Record every DAC word from now on
    pub fn capture_dac(&mut self, enable: bool) {
        self.capture = enable;
    }

    pub fn dac_words(&self) -> &[DacWord] {
        &self.dac
    }

    pub fn take_dac_words(&mut self) -> Vec<DacWord> {
        std::mem::take(&mut self.dac)
    }

    pub fn transceiver(&self) -> &Transceiver {
        &self.transceiver
    }

    pub fn clocks(&self) -> ClockConfig {
        self.clocks
    }

    pub fn time_ps(&self) -> u64 {
        self.time_ps
    }

    pub fn cycles(&self) -> (u64, u64) {
        (self.bus_cycles, self.sample_cycles)
    }

    /// Tick whichever clock edge comes next
    pub fn advance(&mut self) -> Edge {
        if self.next_bus_ps <= self.next_sample_ps {
            self.time_ps = self.next_bus_ps;
            self.response = self.transceiver.tick_bus(&self.request);
            self.next_bus_ps += self.clocks.bus_period_ps;
            self.bus_cycles += 1;
            Edge::Bus
        } else {
            self.time_ps = self.next_sample_ps;
            let adc = self.adc.next_sample();
            let words = self.transceiver.tick_sample(adc);
            if self.capture {
                self.dac.extend_from_slice(&words);
            }
            self.next_sample_ps += self.clocks.sample_period_ps;
            self.sample_cycles += 1;
            Edge::Sample
        }
    }

    /// Run until `ticks` sample edges have passed
    pub fn run_sample_ticks(&mut self, ticks: u64) {
        let target = self.sample_cycles + ticks;
        while self.sample_cycles < target {
            self.advance();
        }
    }

    /// Run until `ticks` bus edges have passed
    pub fn run_bus_ticks(&mut self, ticks: u64) {
        let target = self.bus_cycles + ticks;
        while self.bus_cycles < target {
            self.advance();
        }
    }

    /// Drive one transaction and wait for `ready`
    fn transact(&mut self, request: BusRequest) -> Result<u32, InterfaceError> {
        self.request = request;
        let mut cycles = 0;
        loop {
            if self.advance() != Edge::Bus {
                continue;
            }
            cycles += 1;
            if self.response.ready {
                break;
            }
            if cycles >= BUS_TIMEOUT_CYCLES {
                self.request = BusRequest::IDLE;
                warn!("Bus transaction at {:#04x} timed out", request.address);
                return Err(InterfaceError::BusTimeout { address: request.address, cycles });
            }
        }
        self.request = BusRequest::IDLE;
        trace!("Bus transaction at {:#04x} done in {} cycles", request.address, cycles);
        Ok(self.response.read_data)
    }

    pub fn write_register(&mut self, register: Register, value: u32) -> Result<(), InterfaceError> {
        debug!("{} <- {:#010x}", register.name(), value);
        self.transact(BusRequest::write(register, value)).map(|_| ())
    }

    pub fn read_register(&mut self, register: Register) -> Result<u32, InterfaceError> {
        self.transact(BusRequest::read(register))
    }

    /// Write to a raw address, decoded or not
    pub fn write_address(&mut self, address: u32, value: u32) -> Result<(), InterfaceError> {
        self.transact(BusRequest::raw(address, true, value)).map(|_| ())
    }

    pub fn read_address(&mut self, address: u32) -> Result<u32, InterfaceError> {
        self.transact(BusRequest::raw(address, false, 0))
    }
}
