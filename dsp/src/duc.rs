//! Transmit Chain (Digital Up-Converter)
//!
//! Pulls packed sample words from the transmit queue at the low rate and
//! carries them to the DAC:
//!
//! queue -> FIR -> truncate -> CIC interpolator / upsampler -> gain ->
//! mixer -> offset -> (loopback tap) -> binary offset -> DAC
//!
//! The FIR, CIC and mixer are switched in and out by their mode bits.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{unpack_sample_word, Channel, RateMode, Sample, SampleFormat};
use interfaces::{StreamingQueue, TxControl};

use crate::cic::{Cic, CicConfig};
use crate::conditioning::{BinaryOffsetter, GainCorrector, OffsetCorrector, Truncator};
use crate::fir::{FirConfig, FirEngine};
use crate::nco::{Mixer, NcoConfig};
use crate::rate::Upsampler;
use crate::{ClockedStage, DspError};

/// Transmit chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DucConfig {
    /// Rail width of queued samples
    pub sample_width: u8,
    pub dac_width: u8,
    pub cic_order: u32,
    pub cic_delay: u32,
    /// Largest interpolation the CIC is planned for
    pub max_interp: u32,
    pub fir: FirConfig,
    pub nco: NcoConfig,
}

impl Default for DucConfig {
    fn default() -> Self {
        Self {
            sample_width: 16,
            dac_width: 10,
            cic_order: 3,
            cic_delay: 1,
            max_interp: 2047,
            fir: FirConfig::default(),
            nco: NcoConfig::default(),
        }
    }
}

/// What the transmit chain drives this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DucOutput {
    /// Offset-binary sample for the DAC
    pub dac: Sample,
    /// Two's complement sample offered to the receive chain
    pub loopback: Sample,
}

/// Transmit datapath
#[derive(Debug, Clone)]
pub struct Duc {
    fir: FirEngine,
    truncator: Truncator,
    cic: Cic,
    upsampler: Upsampler,
    gain: GainCorrector,
    mixer: Mixer,
    offset: OffsetCorrector,
    offsetter: BinaryOffsetter,
    counter: u32,
    /// The end-of-burst sample has left the queue
    final_pulled: bool,
    /// The end-of-burst sample has left the chain
    drained: bool,
}

impl Duc {
    pub fn new(config: DucConfig) -> Result<Self, DspError> {
        let samples = Channel::signed("tx-samples", config.sample_width)?;
        let fir_out = Channel::signed("tx-fir", config.fir.output_width)?;
        samples.require_width(config.fir.data_width)?;
        let truncator = Truncator::new(&fir_out, config.dac_width)?;
        let dac_format = SampleFormat::signed(config.dac_width)?;

        let cic = Cic::new(CicConfig {
            mode: RateMode::Interpolate,
            order: config.cic_order,
            delay: config.cic_delay,
            max_rate: config.max_interp,
            input_width: config.dac_width,
            output_width: config.dac_width,
            prune: false,
        })?;

        info!(
            "DUC: {}-bit samples -> {}-bit DAC, CIC N={} up to x{}",
            config.sample_width, config.dac_width, config.cic_order, config.max_interp
        );

        Ok(Self {
            fir: FirEngine::new(config.fir)?,
            truncator,
            cic,
            upsampler: Upsampler::new(1),
            gain: GainCorrector::new(dac_format),
            mixer: Mixer::new(config.nco, config.dac_width)?,
            offset: OffsetCorrector::saturating(dac_format),
            offsetter: BinaryOffsetter::new(config.dac_width)?,
            counter: 0,
            final_pulled: false,
            drained: false,
        })
    }

    /// The burst ended after a stop and the chain has emptied
    pub fn drained(&self) -> bool {
        self.drained
    }

    pub fn fir_mut(&mut self) -> &mut FirEngine {
        &mut self.fir
    }

    /// Pull one sample from the queue when the interpolation counter expires
    fn pull(&mut self, control: &TxControl, queue: &mut StreamingQueue) -> Sample {
        if !control.enable || self.final_pulled {
            self.counter = 0;
            return Sample::IDLE;
        }
        self.counter += 1;
        if self.counter < (control.interp as u32).max(1) {
            return Sample::IDLE;
        }
        self.counter = 0;

        if !queue.is_empty() {
            let Some(word) = queue.pop() else {
                return Sample::IDLE;
            };
            let (i, q) = unpack_sample_word(word);
            let last = control.stop && queue.is_empty();
            if last {
                debug!("TX final sample pulled");
                self.final_pulled = true;
            }
            Sample::new(i, q).with_last(last)
        } else if control.stop {
            debug!("TX stopped on an empty queue");
            self.final_pulled = true;
            Sample::new(0, 0).with_last(true)
        } else {
            // counted as an underrun, the sample is suppressed
            let _ = queue.pop();
            Sample::IDLE
        }
    }

    /// Advance one sample tick
    pub fn step(&mut self, control: &TxControl, queue: &mut StreamingQueue) -> DucOutput {
        if !control.enable || !control.stop {
            self.final_pulled = false;
            self.drained = false;
        }

        let pulled = self.pull(control, queue);

        self.fir.configure(control.fir_enable, control.fir_taps as usize, control.fir_bank as usize);
        let filtered = self.fir.step(pulled);
        let narrowed = self.truncator.step(filtered);

        let rate = (control.interp as u32).max(1);
        let upsampled = if control.filter_enable {
            self.cic.set_rate(rate);
            self.cic.step(narrowed)
        } else {
            self.upsampler.set_rate(rate);
            self.upsampler.step(narrowed)
        };

        self.gain.set_gains(control.gain_i, control.gain_q);
        let scaled = self.gain.step(upsampled);

        let mixed = if control.dds_enable {
            self.mixer.set_fcw(control.fcw);
            self.mixer.step(scaled)
        } else {
            scaled
        };

        self.offset.set_offsets(control.correct_i as i64, control.correct_q as i64);
        let corrected = self.offset.step(mixed);

        if corrected.valid && corrected.last && self.final_pulled && !self.drained {
            debug!("TX drained");
            self.drained = true;
        }

        DucOutput { dac: self.offsetter.step(corrected), loopback: corrected }
    }
}

impl Duc {
    /// Return every stage to its post-reset state
    pub fn reset(&mut self) {
        self.fir.reset();
        self.truncator.reset();
        self.cic.reset();
        self.upsampler.reset();
        self.gain.reset();
        self.mixer.reset();
        self.offset.reset();
        self.offsetter.reset();
        self.counter = 0;
        self.final_pulled = false;
        self.drained = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{pack_sample_word, TapSet};
    use interfaces::QueueConfig;

    fn queue_with(words: &[(i64, i64)]) -> StreamingQueue {
        let mut queue = StreamingQueue::new(QueueConfig::default()).unwrap();
        for &(i, q) in words {
            queue.push(pack_sample_word(i, q));
        }
        queue
    }

    fn run(duc: &mut Duc, control: &TxControl, queue: &mut StreamingQueue, ticks: usize) -> Vec<DucOutput> {
        (0..ticks).map(|_| duc.step(control, queue)).collect()
    }

    fn enabled() -> TxControl {
        TxControl { enable: true, ..Default::default() }
    }

    #[test]
    fn test_passthrough_to_dac() {
        let mut duc = Duc::new(DucConfig::default()).unwrap();
        let mut queue = queue_with(&[(1024, -1024), (-32768, 32767)]);
        let out = run(&mut duc, &enabled(), &mut queue, 6);
        let valid: Vec<Sample> = out.iter().map(|o| o.loopback).filter(|s| s.valid).collect();
        // 16 -> 10 bits, unity gain behind a two-cycle gain pipeline
        assert_eq!(valid[0], Sample::new(16, -16));
        assert_eq!(valid[1], Sample::new(-512, 511));
        let dac: Vec<Sample> = out.iter().map(|o| o.dac).filter(|s| s.valid).collect();
        assert_eq!(dac[0], Sample::new(528, 496));
    }

    #[test]
    fn test_underrun_suppresses_sample() {
        let mut duc = Duc::new(DucConfig::default()).unwrap();
        let mut queue = queue_with(&[]);
        let out = run(&mut duc, &enabled(), &mut queue, 5);
        assert!(out.iter().all(|o| !o.loopback.valid));
        assert_eq!(queue.underruns(), 5);
    }

    #[test]
    fn test_interp_paces_pulls() {
        let mut duc = Duc::new(DucConfig::default()).unwrap();
        let mut queue = queue_with(&[(64, 64); 10]);
        let control = TxControl { interp: 4, ..enabled() };
        let out = run(&mut duc, &control, &mut queue, 16);
        assert_eq!(queue.len(), 6);
        // sample-and-hold upsampler keeps the DAC busy every tick once started
        assert!(out[8..].iter().all(|o| o.loopback.valid));
    }

    #[test]
    fn test_stop_drains() {
        let mut duc = Duc::new(DucConfig::default()).unwrap();
        let mut queue = queue_with(&[(64, 0), (128, 0), (192, 0)]);
        let control = TxControl { stop: true, interp: 2, ..enabled() };
        let out = run(&mut duc, &control, &mut queue, 20);
        let lasts = out.iter().filter(|o| o.loopback.valid && o.loopback.last).count();
        assert_eq!(lasts, 1);
        assert!(duc.drained());
        assert_eq!(queue.underruns(), 0);

        // dropping stop re-arms the consumer
        duc.step(&enabled(), &mut queue);
        assert!(!duc.drained());
    }

    #[test]
    fn test_stop_on_empty_queue_sends_zero_last() {
        let mut duc = Duc::new(DucConfig::default()).unwrap();
        let mut queue = queue_with(&[]);
        let control = TxControl { stop: true, ..enabled() };
        let out = run(&mut duc, &control, &mut queue, 4);
        let s = out.iter().map(|o| o.loopback).find(|s| s.valid).unwrap();
        assert_eq!(s, Sample::new(0, 0).with_last(true));
        assert!(duc.drained());
    }

    #[test]
    fn test_cic_interpolation_dc() {
        let mut duc = Duc::new(DucConfig::default()).unwrap();
        let mut queue = queue_with(&[(6400, -6400); 64]);
        let control = TxControl { interp: 8, filter_enable: true, ..enabled() };
        let out = run(&mut duc, &control, &mut queue, 400);
        let last = out.iter().rev().map(|o| o.loopback).find(|s| s.valid).unwrap();
        // 6400 >> 6 = 100; N=3 at x8 has gain 64 against a 6-bit shift
        assert_eq!((last.i, last.q), (100, -100));
    }

    #[test]
    fn test_fir_in_chain() {
        let mut duc = Duc::new(DucConfig::default()).unwrap();
        let half = TapSet::new(vec![1 << 16], 18).unwrap();
        duc.fir_mut().load_taps(0, &half).unwrap();
        let mut queue = queue_with(&[(6400, 6400)]);
        let control = TxControl { interp: 8, fir_enable: true, fir_taps: 1, ..enabled() };
        let out = run(&mut duc, &control, &mut queue, 40);
        let first = out.iter().map(|o| o.loopback).find(|s| s.valid).unwrap();
        assert_eq!(first.i, 50);
    }

    #[test]
    fn test_mixer_and_offset() {
        let mut duc = Duc::new(DucConfig::default()).unwrap();
        let mut queue = queue_with(&[(6400, 0); 4]);
        let control = TxControl { dds_enable: true, correct_i: 3, correct_q: -2, ..enabled() };
        let out = run(&mut duc, &control, &mut queue, 8);
        let first = out.iter().map(|o| o.loopback).find(|s| s.valid).unwrap();
        // fcw 0: cos = 409, sin = 0
        assert_eq!(first, Sample::new((100 * 409 >> 9) + 3, -2));
    }
}
