//! Signal Conditioning Stages
//!
//! Width changes, DC offset and gain correction, and the DAC-side
//! formatting that sits at the edges of the transmit and receive chains.

use serde::{Deserialize, Serialize};
use tracing::trace;

use common::registers::GAIN_UNITY;
use common::range::clog2;
use common::{Channel, ConfigError, Sample, SampleFormat};

use crate::ClockedStage;

/// Drops low-order bits to narrow a channel
#[derive(Debug, Clone)]
pub struct Truncator {
    output: Channel,
    shift: u32,
}

impl Truncator {
    pub fn new(input: &Channel, width: u8) -> Result<Self, ConfigError> {
        let output = input.truncated(format!("{}-truncated", input.name()), width)?;
        Ok(Self { shift: (input.width() - width) as u32, output })
    }

    pub fn output(&self) -> &Channel {
        &self.output
    }
}

impl ClockedStage for Truncator {
    fn name(&self) -> &'static str {
        "truncator"
    }

    fn step(&mut self, input: Sample) -> Sample {
        let shift = self.shift;
        input.map(|v| v >> shift)
    }

    fn reset(&mut self) {}
}

/// Adds a per-rail DC correction
#[derive(Debug, Clone)]
pub struct OffsetCorrector {
    format: SampleFormat,
    saturate: bool,
    offset_i: i64,
    offset_q: i64,
}

impl OffsetCorrector {
    /// Corrector that wraps on overflow
    pub fn wrapping(format: SampleFormat) -> Self {
        Self { format, saturate: false, offset_i: 0, offset_q: 0 }
    }

    /// Corrector that clamps to the format
    pub fn saturating(format: SampleFormat) -> Self {
        Self { format, saturate: true, offset_i: 0, offset_q: 0 }
    }

    pub fn set_offsets(&mut self, i: i64, q: i64) {
        self.offset_i = i;
        self.offset_q = q;
    }

    fn apply(&self, value: i64, offset: i64) -> i64 {
        if self.saturate {
            self.format.saturate(value + offset)
        } else {
            self.format.wrap(value + offset)
        }
    }
}

impl ClockedStage for OffsetCorrector {
    fn name(&self) -> &'static str {
        "offset"
    }

    fn step(&mut self, input: Sample) -> Sample {
        if !input.valid {
            return Sample::IDLE;
        }
        Sample {
            i: self.apply(input.i, self.offset_i),
            q: self.apply(input.q, self.offset_q),
            ..input
        }
    }

    fn reset(&mut self) {}
}

/// Per-rail gain with `GAIN_UNITY` as 1.0; multiply then scale
#[derive(Debug, Clone)]
pub struct GainCorrector {
    format: SampleFormat,
    shift: u32,
    gain_i: i64,
    gain_q: i64,
    product: Sample,
    scaled: Sample,
}

impl GainCorrector {
    /// Cycles from input to output
    pub const LATENCY: usize = 2;

    pub fn new(format: SampleFormat) -> Self {
        Self {
            format,
            shift: clog2(GAIN_UNITY as u128),
            gain_i: GAIN_UNITY as i64,
            gain_q: GAIN_UNITY as i64,
            product: Sample::IDLE,
            scaled: Sample::IDLE,
        }
    }

    pub fn set_gains(&mut self, i: u16, q: u16) {
        let (i, q) = (i as i64, q as i64);
        if (i, q) != (self.gain_i, self.gain_q) {
            trace!("Gain correction i={} q={}", i, q);
            self.gain_i = i;
            self.gain_q = q;
        }
    }
}

impl ClockedStage for GainCorrector {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn step(&mut self, input: Sample) -> Sample {
        let out = self.scaled;
        let shift = self.shift;
        let format = self.format;
        self.scaled = self.product.map(|v| format.saturate(v >> shift));
        self.product = if input.valid {
            Sample { i: input.i * self.gain_i, q: input.q * self.gain_q, ..input }
        } else {
            Sample::IDLE
        };
        out
    }

    fn reset(&mut self) {
        self.product = Sample::IDLE;
        self.scaled = Sample::IDLE;
    }
}

/// Two's complement to offset binary
#[derive(Debug, Clone)]
pub struct BinaryOffsetter {
    format: SampleFormat,
    offset: i64,
}

impl BinaryOffsetter {
    pub fn new(width: u8) -> Result<Self, ConfigError> {
        let format = SampleFormat::unsigned(width)?;
        Ok(Self { format, offset: 1 << (width - 1) })
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }
}

impl ClockedStage for BinaryOffsetter {
    fn name(&self) -> &'static str {
        "binary-offset"
    }

    fn step(&mut self, input: Sample) -> Sample {
        let (offset, format) = (self.offset, self.format);
        input.map(|v| format.wrap(v + offset))
    }

    fn reset(&mut self) {}
}

/// One word on the doubled-rate DAC bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DacWord {
    pub enable: bool,
    pub data: u16,
    pub last: bool,
}

/// Serializes I then Q onto the DAC bus at twice the sample rate
#[derive(Debug, Clone, Default)]
pub struct Interleaver {
    latched: Sample,
    phase: bool,
}

impl Interleaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture this sample tick's output; call once per sample tick
    pub fn latch(&mut self, sample: Sample) {
        self.latched = sample;
        self.phase = false;
    }

    /// One doubled-rate edge; I on the first, Q (with `last`) on the second
    pub fn tick_fast(&mut self) -> DacWord {
        let s = self.latched;
        let word = if !s.valid {
            DacWord::default()
        } else if !self.phase {
            DacWord { enable: true, data: s.i as u16, last: false }
        } else {
            DacWord { enable: true, data: s.q as u16, last: s.last }
        };
        self.phase = !self.phase;
        word
    }

    /// Both words of the latched sample
    pub fn words(&mut self) -> [DacWord; 2] {
        [self.tick_fast(), self.tick_fast()]
    }

    pub fn reset(&mut self) {
        self.latched = Sample::IDLE;
        self.phase = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_stage;

    #[test]
    fn test_truncator() {
        let input = Channel::signed("wide", 16).unwrap();
        let mut t = Truncator::new(&input, 10).unwrap();
        assert_eq!(t.output().width(), 10);
        assert_eq!(t.step(Sample::new(-32768, 32767)), Sample::new(-512, 511));
        assert!(Truncator::new(&input, 20).is_err());
    }

    #[test]
    fn test_offset_saturates_or_wraps() {
        let format = SampleFormat::signed(10).unwrap();
        let mut sat = OffsetCorrector::saturating(format);
        sat.set_offsets(100, -100);
        assert_eq!(sat.step(Sample::new(500, -500)), Sample::new(511, -512));

        let mut wrap = OffsetCorrector::wrapping(format);
        wrap.set_offsets(100, -100);
        assert_eq!(wrap.step(Sample::new(500, -500)), Sample::new(-424, 424));
        assert_eq!(wrap.step(Sample::IDLE), Sample::IDLE);
    }

    #[test]
    fn test_gain_pipeline() {
        let mut gain = GainCorrector::new(SampleFormat::signed(10).unwrap());
        gain.set_gains(256, 1023);
        let out = run_stage(&mut gain, [Sample::new(200, 400).with_last(true), Sample::IDLE, Sample::IDLE]);
        assert!(!out[0].valid && !out[1].valid);
        assert_eq!(out[2], Sample::new(100, 511).with_last(true));
    }

    #[test]
    fn test_unity_gain() {
        let mut gain = GainCorrector::new(SampleFormat::signed(10).unwrap());
        let out = run_stage(&mut gain, [Sample::new(-37, 5), Sample::IDLE, Sample::IDLE]);
        assert_eq!(out[2], Sample::new(-37, 5));
    }

    #[test]
    fn test_binary_offset() {
        let mut b = BinaryOffsetter::new(10).unwrap();
        assert_eq!(b.step(Sample::new(-512, 511)), Sample::new(0, 1023));
        assert_eq!(b.step(Sample::new(0, -1)), Sample::new(512, 511));
    }

    #[test]
    fn test_interleaver_order() {
        let mut il = Interleaver::new();
        il.latch(Sample::new(3, 7).with_last(true));
        assert_eq!(
            il.words(),
            [
                DacWord { enable: true, data: 3, last: false },
                DacWord { enable: true, data: 7, last: true }
            ]
        );
        il.latch(Sample::IDLE);
        assert_eq!(il.words(), [DacWord::default(); 2]);
    }
}
