//! Multi-Cycle FIR Engine
//!
//! One multiply-accumulate path per rail is shared across all taps of an
//! output sample. The engine walks `Ready -> Wait -> Run -> Done`: the
//! accepted sample is written into the delay-line memory, two cycles fill
//! the memory read and multiply registers, then one tap is accumulated per
//! cycle. Latency from acceptance to output is `taps + 3` cycles for every
//! sample, and a new sample can be accepted `taps + 4` cycles after the
//! previous one.
//!
//! Memories are addressed `bank << address_bits | index`; the coefficient
//! memory is written from the register bus on its own port, so one bank can
//! be reloaded while another is in use.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::range::mac_width;
use common::{ConfigError, Sample, SampleFormat, TapSet};
use interfaces::ram::{PortConfig, RamConfig};
use interfaces::{DualPortRam, PortRequest};

use crate::{ClockedStage, DspError};

/// Cycles between issuing the first read and accumulating its product
pub const PIPELINE_FILL: u8 = 2;

/// Number of coefficient banks addressable by the bank selector
pub const BANKS: usize = 4;

/// FIR engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirConfig {
    pub data_width: u8,
    pub coefficient_width: u8,
    pub output_width: u8,
    /// Address bits selecting a tap within a bank
    pub address_bits: u32,
    /// Coefficient fraction bits dropped from the accumulator
    pub fraction_bits: u32,
}

impl Default for FirConfig {
    fn default() -> Self {
        Self {
            data_width: 16,
            coefficient_width: 18,
            output_width: 16,
            address_bits: 7,
            fraction_bits: 17,
        }
    }
}

/// Control state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirState {
    Ready,
    /// Pipeline filling, cycles remaining
    Wait(u8),
    Run,
    Done,
}

#[derive(Debug, Clone, Copy, Default)]
struct Mac {
    acc: i64,
    product: i64,
}

/// Time-multiplexed FIR filter over dual-port memories
#[derive(Debug, Clone)]
pub struct FirEngine {
    config: FirConfig,
    delay_i: DualPortRam,
    delay_q: DualPortRam,
    coefficients: DualPortRam,
    output_format: SampleFormat,
    state: FirState,
    enabled: bool,
    /// Tap count and bank of the computation in progress
    taps: usize,
    bank: usize,
    /// Settings taken up once the engine is back in `Ready`
    pending: (usize, usize),
    /// Rolling delay-line write pointer
    write_ptr: usize,
    /// Next tap to read
    read_tap: usize,
    accumulated: usize,
    i: Mac,
    q: Mac,
    last: bool,
    dropped: u64,
}

impl FirEngine {
    pub fn new(config: FirConfig) -> Result<Self, DspError> {
        if config.address_bits == 0 || config.address_bits > 12 {
            return Err(ConfigError::InvalidConfig(format!(
                "FIR address bits {} outside 1..=12",
                config.address_bits
            ))
            .into());
        }
        let data = SampleFormat::signed(config.data_width)?;
        let coefficient = SampleFormat::signed(config.coefficient_width)?;
        let output_format = SampleFormat::signed(config.output_width)?;
        let acc_width = mac_width(data, coefficient, 1u128 << config.address_bits)?;

        let depth = BANKS << config.address_bits;
        let delay_i = DualPortRam::single_writer(depth, config.data_width)?;
        let delay_q = DualPortRam::single_writer(depth, config.data_width)?;
        // the bus writes coefficients on port B, the engine reads port A
        let coefficients = DualPortRam::new(RamConfig {
            depth,
            port_a: PortConfig { width: config.coefficient_width, writable: false },
            port_b: PortConfig { width: config.coefficient_width, writable: true },
        })?;

        info!(
            "FIR engine: {} taps/bank x {} banks, data {} coeff {} acc {} -> {} bits",
            1usize << config.address_bits,
            BANKS,
            config.data_width,
            config.coefficient_width,
            acc_width,
            config.output_width
        );

        Ok(Self {
            config,
            delay_i,
            delay_q,
            coefficients,
            output_format,
            state: FirState::Ready,
            enabled: false,
            taps: 0,
            bank: 0,
            pending: (0, 0),
            write_ptr: 0,
            read_tap: 0,
            accumulated: 0,
            i: Mac::default(),
            q: Mac::default(),
            last: false,
            dropped: 0,
        })
    }

    fn index_mask(&self) -> usize {
        (1 << self.config.address_bits) - 1
    }

    fn delay_address(&self, tap: usize) -> usize {
        (self.bank << self.config.address_bits) | (self.write_ptr.wrapping_sub(tap) & self.index_mask())
    }

    fn coefficient_address(&self, tap: usize) -> usize {
        (self.bank << self.config.address_bits) | (tap & self.index_mask())
    }

    /// Apply the runtime settings; taps beyond a bank are clamped
    ///
    /// A new tap count or bank waits for the current output to finish.
    pub fn configure(&mut self, enabled: bool, taps: usize, bank: usize) {
        let taps = taps.min(self.index_mask() + 1);
        let bank = bank % BANKS;
        if (enabled, (taps, bank)) != (self.enabled, self.pending) {
            debug!("FIR enabled={} taps={} bank={}", enabled, taps, bank);
            self.enabled = enabled;
            self.pending = (taps, bank);
        }
        if self.state == FirState::Ready {
            self.latch_settings();
        }
    }

    fn latch_settings(&mut self) {
        (self.taps, self.bank) = self.pending;
    }

    /// Write one coefficient through the bus-side port
    pub fn load_coefficient(&mut self, address: usize, value: i64) {
        self.coefficients.tick_b(PortRequest::write(address, value));
    }

    /// Load a whole tap set into `bank`
    pub fn load_taps(&mut self, bank: usize, taps: &TapSet) -> Result<(), ConfigError> {
        if taps.len() > self.index_mask() + 1 {
            return Err(ConfigError::InvalidTaps(format!(
                "{} taps do not fit a {}-entry bank",
                taps.len(),
                self.index_mask() + 1
            )));
        }
        if taps.width() > self.config.coefficient_width {
            return Err(ConfigError::WidthTooWide {
                requested: taps.width() as u32,
                available: self.config.coefficient_width as u32,
            });
        }
        let base = (bank % BANKS) << self.config.address_bits;
        for (k, &tap) in taps.taps().iter().enumerate() {
            self.load_coefficient(base | k, tap);
        }
        Ok(())
    }

    pub fn state(&self) -> FirState {
        self.state
    }

    /// Inputs that arrived while the engine was busy
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn bypassed(&self) -> bool {
        !self.enabled || self.taps == 0
    }

    /// Calls from acceptance to output
    pub fn latency(&self) -> usize {
        self.taps + PIPELINE_FILL as usize + 1
    }

    fn issue_read(&mut self, tap: usize) {
        let delay = PortRequest::read(self.delay_address(tap));
        self.delay_i.tick_b(delay);
        self.delay_q.tick_b(delay);
        self.coefficients.tick_a(PortRequest::read(self.coefficient_address(tap)));
    }

    fn multiply(&mut self) {
        let coefficient = self.coefficients.dout_a();
        self.i.product = self.delay_i.dout_b() * coefficient;
        self.q.product = self.delay_q.dout_b() * coefficient;
    }
}

impl ClockedStage for FirEngine {
    fn name(&self) -> &'static str {
        "fir"
    }

    fn step(&mut self, input: Sample) -> Sample {
        if self.bypassed() {
            self.state = FirState::Ready;
            self.latch_settings();
            return input;
        }

        if input.valid && self.state != FirState::Ready {
            self.dropped += 1;
            warn!("FIR busy in {:?}, input dropped ({} total)", self.state, self.dropped);
        }

        match self.state {
            FirState::Ready => {
                if input.valid {
                    let address = self.delay_address(0);
                    self.delay_i.tick_a(PortRequest::write(address, input.i));
                    self.delay_q.tick_a(PortRequest::write(address, input.q));
                    self.last = input.last;
                    self.state = FirState::Wait(PIPELINE_FILL);
                }
                Sample::IDLE
            }
            FirState::Wait(remaining) => {
                if remaining == PIPELINE_FILL {
                    self.read_tap = 0;
                } else {
                    self.multiply();
                    self.i.acc = 0;
                    self.q.acc = 0;
                    self.accumulated = 0;
                }
                let tap = self.read_tap;
                self.issue_read(tap);
                self.read_tap += 1;
                self.state = if remaining > 1 { FirState::Wait(remaining - 1) } else { FirState::Run };
                Sample::IDLE
            }
            FirState::Run => {
                self.i.acc += self.i.product;
                self.q.acc += self.q.product;
                self.accumulated += 1;
                self.multiply();
                if self.read_tap < self.taps {
                    let tap = self.read_tap;
                    self.issue_read(tap);
                    self.read_tap += 1;
                }
                if self.accumulated == self.taps {
                    self.state = FirState::Done;
                }
                Sample::IDLE
            }
            FirState::Done => {
                self.write_ptr = (self.write_ptr + 1) & self.index_mask();
                self.state = FirState::Ready;
                self.latch_settings();
                let shift = self.config.fraction_bits;
                Sample {
                    valid: true,
                    last: self.last,
                    i: self.output_format.wrap(self.i.acc >> shift),
                    q: self.output_format.wrap(self.q.acc >> shift),
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = FirState::Ready;
        self.latch_settings();
        self.write_ptr = 0;
        self.read_tap = 0;
        self.accumulated = 0;
        self.i = Mac::default();
        self.q = Mac::default();
        self.last = false;
        self.delay_i.clear();
        self.delay_q.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(taps: &[i64], fraction_bits: u32) -> FirEngine {
        let mut fir = FirEngine::new(FirConfig { fraction_bits, ..Default::default() }).unwrap();
        fir.load_taps(0, &TapSet::new(taps.to_vec(), 18).unwrap()).unwrap();
        fir.configure(true, taps.len(), 0);
        fir
    }

    /// Feed `inputs` one every `spacing` calls; return (call, sample) of outputs
    fn drive(fir: &mut FirEngine, inputs: &[i64], spacing: usize) -> Vec<(usize, Sample)> {
        let calls = inputs.len() * spacing + 2 * fir.latency();
        (0..calls)
            .filter_map(|call| {
                let input = if call % spacing == 0 && call / spacing < inputs.len() {
                    let x = inputs[call / spacing];
                    Sample::new(x, -x)
                } else {
                    Sample::IDLE
                };
                let out = fir.step(input);
                out.valid.then_some((call, out))
            })
            .collect()
    }

    #[test]
    fn test_impulses_reproduce_taps() {
        let mut fir = engine(&[4, 3, 2, 1], 0);
        let out = drive(&mut fir, &[1, 0, 0, 0, 1, 0, 0, 0], 8);
        let values: Vec<i64> = out.iter().map(|(_, s)| s.i).collect();
        assert_eq!(values, vec![4, 3, 2, 1, 4, 3, 2, 1]);
        for (n, (call, s)) in out.iter().enumerate() {
            assert_eq!(*call, n * 8 + 7);
            assert_eq!(s.q, -s.i);
        }
        assert_eq!(fir.dropped(), 0);
    }

    #[test]
    fn test_latency_is_constant() {
        let taps: Vec<i64> = (1..=20).collect();
        let mut fir = engine(&taps, 0);
        let spacing = taps.len() + 4;
        let inputs: Vec<i64> = (0..10).map(|n| (n * 37 % 11) - 5).collect();
        let out = drive(&mut fir, &inputs, spacing);
        assert_eq!(out.len(), inputs.len());
        for (n, (call, s)) in out.iter().enumerate() {
            assert_eq!(*call, n * spacing + taps.len() + 3);
            let expected: i64 = (0..=n).filter(|k| n - k < taps.len()).map(|k| inputs[k] * taps[n - k]).sum();
            assert_eq!(s.i, expected, "sample {}", n);
        }
    }

    #[test]
    fn test_fraction_bits_truncate() {
        // 0.5 in Q17 against a full-scale-ish input
        let mut fir = engine(&[1 << 16], 17);
        let out = drive(&mut fir, &[1000, -1001], 8);
        assert_eq!(out.iter().map(|(_, s)| s.i).collect::<Vec<_>>(), vec![500, -501]);
    }

    #[test]
    fn test_busy_input_dropped() {
        let mut fir = engine(&[1, 1, 1, 1], 0);
        let out = drive(&mut fir, &[5, 6, 7], 2);
        assert!(fir.dropped() > 0);
        assert!(out.len() < 3);
        assert_eq!(out[0].1.i, 5);
    }

    #[test]
    fn test_bypass() {
        let mut fir = FirEngine::new(FirConfig::default()).unwrap();
        let s = Sample::new(12, -3).with_last(true);
        assert_eq!(fir.step(s), s);
        fir.configure(true, 0, 0);
        assert_eq!(fir.step(s), s);
        assert!(fir.bypassed());
    }

    #[test]
    fn test_banks_are_independent() {
        let mut fir = engine(&[2, 0], 0);
        fir.load_taps(1, &TapSet::new(vec![7, 0], 18).unwrap()).unwrap();
        let out = drive(&mut fir, &[3], 8);
        assert_eq!(out[0].1.i, 6);
        fir.configure(true, 2, 1);
        let out = drive(&mut fir, &[3], 8);
        assert_eq!(out[0].1.i, 21);
    }

    #[test]
    fn test_settings_held_for_computation() {
        let mut fir = engine(&[2, 0], 0);
        fir.load_taps(1, &TapSet::new(vec![7, 5, 1], 18).unwrap()).unwrap();
        let mut outputs = Vec::new();
        for call in 0..24 {
            if call == 3 {
                fir.configure(true, 3, 1);
            }
            let input = if call == 0 || call == 12 { Sample::new(3, 3) } else { Sample::IDLE };
            let out = fir.step(input);
            if out.valid {
                outputs.push((call, out.i));
            }
        }
        // the first output finishes with two bank-0 taps, the next input
        // runs three taps of bank 1 over its own delay line
        assert_eq!(outputs, vec![(5, 6), (18, 21)]);
    }

    #[test]
    fn test_last_propagates() {
        let mut fir = engine(&[1, 2], 0);
        let mut outputs = Vec::new();
        for call in 0..12 {
            let input = if call == 0 { Sample::new(1, 1).with_last(true) } else { Sample::IDLE };
            let out = fir.step(input);
            if out.valid {
                outputs.push(out);
            }
        }
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].last);
    }

    #[test]
    fn test_config_errors() {
        assert!(FirEngine::new(FirConfig { address_bits: 0, ..Default::default() }).is_err());
        assert!(FirEngine::new(FirConfig { data_width: 40, coefficient_width: 40, ..Default::default() }).is_err());
        let mut fir = FirEngine::new(FirConfig { address_bits: 2, ..Default::default() }).unwrap();
        assert!(fir.load_taps(0, &TapSet::new(vec![1; 5], 18).unwrap()).is_err());
        assert!(fir.load_taps(0, &TapSet::new(vec![1; 4], 20).unwrap()).is_err());
    }
}
