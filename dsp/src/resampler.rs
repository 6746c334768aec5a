//! Rational Sample Rate Resampler
//!
//! Converts the sample rate by `interpolate / decimate` without ever
//! materializing the zero-stuffed stream. The prototype lowpass runs at
//! `interpolate` times the input rate and is split into `interpolate`
//! polyphase branches; an integer phase accumulator picks the branch for
//! each output and tells when to move on to the next input sample.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{ConfigError, Sample, SampleFormat, TapSet};

use crate::ClockedStage;

/// Resampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResamplerConfig {
    /// Interpolation factor (L)
    pub interpolate: usize,
    /// Decimation factor (M)
    pub decimate: usize,
    /// Taps per polyphase branch of the designed prototype filter
    pub filter_order: usize,
    /// Filter cutoff frequency as fraction of the lower Nyquist rate
    pub cutoff_factor: f64,
    /// Fractional bits of the fixed-point coefficients
    pub fraction_bits: u32,
    pub coefficient_width: u8,
    /// Width of the input and output rails
    pub data_width: u8,
}

impl Default for ResamplerConfig {
    fn default() -> Self {
        Self {
            interpolate: 3,
            decimate: 4,
            filter_order: 16,
            cutoff_factor: 0.45,
            fraction_bits: 15,
            coefficient_width: 18,
            data_width: 16,
        }
    }
}

impl ResamplerConfig {
    /// Configuration converting `input_rate` to `output_rate`
    pub fn from_rates(input_rate: f64, output_rate: f64) -> Result<Self, ConfigError> {
        if !(input_rate > 0.0 && output_rate > 0.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "sample rates must be positive, got {} -> {}",
                input_rate, output_rate
            )));
        }
        let (interpolate, decimate) = rational_approximation(output_rate / input_rate, 1000);
        Ok(Self { interpolate, decimate, ..Self::default() })
    }
}

/// Polyphase resampler over fixed-point samples
#[derive(Debug, Clone)]
pub struct Resampler {
    interpolate: usize,
    decimate: usize,
    taps: TapSet,
    /// Polyphase filter coefficients [phase][tap]
    branches: Vec<Vec<i64>>,
    fraction_bits: u32,
    format: SampleFormat,
    /// Circular history of the most recent inputs
    history_i: Vec<i64>,
    history_q: Vec<i64>,
    newest: usize,
    /// Position of the next output on the interpolated grid, relative to the
    /// newest input
    phase: usize,
    pending_last: bool,
}

impl Resampler {
    /// Create a resampler with a windowed-sinc prototype filter
    pub fn new(config: ResamplerConfig) -> Result<Self, ConfigError> {
        check_ratio(config.interpolate, config.decimate)?;
        let interp = config.interpolate;

        // Cutoff relative to the interpolated rate
        let cutoff = config.cutoff_factor / interp.max(config.decimate) as f64;
        let prototype = design_lowpass_filter(config.filter_order.max(1) * interp, cutoff);

        // Apply interpolation gain compensation, then quantize
        let scale = (1u64 << config.fraction_bits) as f64 * interp as f64;
        let taps: Vec<i64> = prototype.iter().map(|&x| (x * scale).round() as i64).collect();
        let taps = TapSet::new(taps, config.coefficient_width)?;

        Self::with_taps(interp, config.decimate, taps, config.fraction_bits, config.data_width)
    }

    /// Create a resampler with an explicit tap set
    pub fn with_taps(
        interpolate: usize,
        decimate: usize,
        taps: TapSet,
        fraction_bits: u32,
        data_width: u8,
    ) -> Result<Self, ConfigError> {
        check_ratio(interpolate, decimate)?;
        let format = SampleFormat::signed(data_width)?;
        let taps = taps.padded_to_multiple(interpolate);
        let branches: Vec<Vec<i64>> = (0..interpolate).map(|k| taps.polyphase_branch(k, interpolate)).collect();
        let per_branch = taps.len() / interpolate;
        let history = per_branch.max(interpolate);

        info!(
            "Resampler: L={}, M={}, {} taps, {} per phase",
            interpolate,
            decimate,
            taps.len(),
            per_branch
        );

        Ok(Self {
            interpolate,
            decimate,
            taps,
            branches,
            fraction_bits,
            format,
            history_i: vec![0; history],
            history_q: vec![0; history],
            newest: 0,
            phase: 0,
            pending_last: false,
        })
    }

    /// Create a resampler driven once per clock edge: at most one output
    /// per input, so `interpolate` may not exceed `decimate`
    pub fn for_fixed_clock(config: ResamplerConfig) -> Result<Self, ConfigError> {
        if config.interpolate > config.decimate {
            return Err(ConfigError::UnsupportedRatio {
                interpolate: config.interpolate,
                decimate: config.decimate,
            });
        }
        Self::new(config)
    }

    pub fn ratio(&self) -> (usize, usize) {
        (self.interpolate, self.decimate)
    }

    pub fn taps(&self) -> &TapSet {
        &self.taps
    }

    pub fn branch(&self, phase: usize) -> &[i64] {
        &self.branches[phase % self.interpolate]
    }

    fn dot(&self, history: &[i64], branch: &[i64]) -> i64 {
        let len = history.len();
        let acc: i128 = branch
            .iter()
            .enumerate()
            .map(|(c, &h)| history[(self.newest + len - c) % len] as i128 * h as i128)
            .sum();
        let shifted = acc >> self.fraction_bits;
        self.format.saturate(shifted.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Feed one input pair and hand every output it produces to `emit`
    pub fn consume(&mut self, i: i64, q: i64, mut emit: impl FnMut(i64, i64)) {
        let len = self.history_i.len();
        self.newest = (self.newest + 1) % len;
        self.history_i[self.newest] = i;
        self.history_q[self.newest] = q;

        while self.phase < self.interpolate {
            let branch = &self.branches[self.phase];
            let out_i = self.dot(&self.history_i, branch);
            let out_q = self.dot(&self.history_q, branch);
            emit(out_i, out_q);
            self.phase += self.decimate;
        }
        self.phase -= self.interpolate;
    }

    /// Process a block of samples
    pub fn process(&mut self, input: &[Sample]) -> Vec<Sample> {
        let mut output = Vec::with_capacity(self.output_len(input.len()));
        for sample in input.iter().filter(|s| s.valid) {
            let start = output.len();
            self.consume(sample.i, sample.q, |i, q| output.push(Sample::new(i, q)));
            self.pending_last |= sample.last;
            if self.pending_last && output.len() > start {
                if let Some(last) = output.last_mut() {
                    last.last = true;
                }
                self.pending_last = false;
            }
        }
        output
    }

    /// Get the expected output size for the next `input_len` inputs
    pub fn output_len(&self, input_len: usize) -> usize {
        let span = input_len * self.interpolate;
        span.saturating_sub(self.phase).div_ceil(self.decimate)
    }
}

impl ClockedStage for Resampler {
    fn name(&self) -> &'static str {
        "resampler"
    }

    /// Only meaningful for `interpolate <= decimate`; later outputs of an
    /// input beyond the first are dropped
    fn step(&mut self, input: Sample) -> Sample {
        if !input.valid {
            return Sample::IDLE;
        }
        let mut out = None;
        self.consume(input.i, input.q, |i, q| {
            out.get_or_insert(Sample::new(i, q));
        });
        self.pending_last |= input.last;
        match out {
            Some(sample) => sample.with_last(std::mem::take(&mut self.pending_last)),
            None => Sample::IDLE,
        }
    }

    fn reset(&mut self) {
        self.history_i.fill(0);
        self.history_q.fill(0);
        self.newest = 0;
        self.phase = 0;
        self.pending_last = false;
        debug!("Resampler reset");
    }
}

fn check_ratio(interpolate: usize, decimate: usize) -> Result<(), ConfigError> {
    if interpolate == 0 || decimate == 0 {
        return Err(ConfigError::UnsupportedRatio { interpolate, decimate });
    }
    Ok(())
}

/// Find rational approximation of a decimal number
pub fn rational_approximation(value: f64, max_denominator: usize) -> (usize, usize) {
    // Continued fraction convergents
    let mut a = value.floor() as i64;
    let mut h1 = 1i64;
    let mut k1 = 0i64;
    let mut h = a;
    let mut k = 1i64;

    let mut remainder = value - a as f64;

    while remainder.abs() > 1e-6 {
        let x = 1.0 / remainder;
        a = x.floor() as i64;
        remainder = x - a as f64;

        let next_h = a * h + h1;
        let next_k = a * k + k1;
        if next_k > max_denominator as i64 {
            break;
        }
        h1 = h;
        k1 = k;
        h = next_h;
        k = next_k;
    }

    (h.unsigned_abs() as usize, k.unsigned_abs() as usize)
}

/// Design lowpass FIR filter using windowed sinc method; `cutoff` is a
/// fraction of the sample rate
pub fn design_lowpass_filter(num_taps: usize, cutoff: f64) -> Vec<f64> {
    if num_taps == 1 {
        return vec![1.0];
    }
    let center = (num_taps - 1) as f64 / 2.0;
    let omega_c = 2.0 * PI * cutoff;

    let mut taps: Vec<f64> = (0..num_taps)
        .map(|i| {
            let n = i as f64 - center;

            // Sinc function
            let sinc = if n.abs() < 1e-10 { omega_c / PI } else { (omega_c * n).sin() / (PI * n) };

            // Hamming window
            let window = 0.54 - 0.46 * (2.0 * PI * i as f64 / (num_taps - 1) as f64).cos();

            sinc * window
        })
        .collect();

    // Normalize filter
    let sum: f64 = taps.iter().sum();
    for tap in &mut taps {
        *tap /= sum;
    }

    taps
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn resampler(interpolate: usize, decimate: usize, taps: Vec<i64>) -> Resampler {
        Resampler::with_taps(interpolate, decimate, TapSet::new(taps, 18).unwrap(), 0, 32).unwrap()
    }

    /// Zero-stuff, filter with the full prototype, keep every `decimate`-th
    fn brute_force(interpolate: usize, decimate: usize, taps: &[i64], input: &[i64]) -> Vec<i64> {
        let mut stuffed = vec![0i64; input.len() * interpolate];
        for (n, &x) in input.iter().enumerate() {
            stuffed[n * interpolate] = x;
        }
        (0..stuffed.len())
            .step_by(decimate)
            .map(|t| taps.iter().enumerate().filter(|(k, _)| *k <= t).map(|(k, &h)| h * stuffed[t - k]).sum())
            .collect()
    }

    #[test]
    fn test_rational_approximation() {
        assert_eq!(rational_approximation(0.75, 100), (3, 4));
        assert_eq!(rational_approximation(0.5, 100), (1, 2));
        assert_eq!(rational_approximation(0.333333, 100), (1, 3));
        assert_eq!(rational_approximation(1.25, 100), (5, 4));
    }

    #[test]
    fn test_from_rates() {
        let config = ResamplerConfig::from_rates(15.36e6, 11.52e6).unwrap();
        assert_eq!((config.interpolate, config.decimate), (3, 4));
        assert!(ResamplerConfig::from_rates(0.0, 1.0).is_err());
    }

    #[test]
    fn test_rate_identity() {
        for &(interp, decim) in &[(3, 4), (4, 3), (1, 5), (5, 1), (2, 7), (7, 2), (6, 6)] {
            let mut rs = resampler(interp, decim, vec![1; 2 * interp]);
            let input = vec![Sample::new(1, 1); 1000];
            assert_eq!(rs.output_len(input.len()), (1000 * interp).div_ceil(decim));
            let out = rs.process(&input);
            let floor = 1000 * interp / decim;
            assert!(out.len() >= floor && out.len() <= floor + 1, "L={} M={}: {}", interp, decim, out.len());
        }
    }

    #[test]
    fn test_polyphase_matches_zero_stuffing() {
        let mut rng = StdRng::seed_from_u64(7);
        for &(interp, decim) in &[(3, 4), (4, 3), (2, 5), (5, 2), (1, 1)] {
            let taps: Vec<i64> = (0..4 * interp + 1).map(|_| rng.gen_range(-1000..1000)).collect();
            let input: Vec<i64> = (0..64).map(|_| rng.gen_range(-2000..2000)).collect();
            let expected = brute_force(interp, decim, &taps, &input);

            let mut rs = resampler(interp, decim, taps);
            let samples: Vec<Sample> = input.iter().map(|&x| Sample::new(x, -x)).collect();
            let out = rs.process(&samples);

            assert_eq!(out.len(), expected.len());
            for (o, e) in out.iter().zip(&expected) {
                assert_eq!((o.i, o.q), (*e, -*e), "L={} M={}", interp, decim);
            }
        }
    }

    #[test]
    fn test_constant_input_gives_branch_sums() {
        let taps = vec![1, 2, 3, 4, 5, 6, 7, 8, 9];
        let (interp, decim) = (3, 2);
        let mut rs = resampler(interp, decim, taps);
        let out = rs.process(&vec![Sample::new(1, 0); 12]);
        let sums: Vec<i64> = (0..interp).map(|k| rs.branch(k).iter().sum()).collect();
        assert_eq!(sums, vec![12, 15, 18]);
        // after the history fills, output i sits on branch (i * M) mod L
        for (i, s) in out.iter().enumerate().skip(2 * interp) {
            assert_eq!(s.i, sums[(i * decim) % interp], "output {}", i);
        }
    }

    #[test]
    fn test_designed_filter_passes_dc() {
        let mut rs = Resampler::new(ResamplerConfig::default()).unwrap();
        let out = rs.process(&vec![Sample::new(1000, -1000); 400]);
        assert_eq!(out.len(), 300);
        for s in &out[100..] {
            assert!((s.i - 1000).abs() <= 30, "DC not preserved: {}", s.i);
            assert!((s.q + 1000).abs() <= 30);
        }
    }

    #[test]
    fn test_fixed_clock_ratio() {
        let config = ResamplerConfig { interpolate: 4, decimate: 3, ..Default::default() };
        assert!(matches!(
            Resampler::for_fixed_clock(config),
            Err(ConfigError::UnsupportedRatio { interpolate: 4, decimate: 3 })
        ));
        assert!(Resampler::new(ResamplerConfig { interpolate: 0, ..Default::default() }).is_err());

        let mut rs = Resampler::for_fixed_clock(ResamplerConfig::default()).unwrap();
        let outputs = (0..40)
            .map(|n| rs.step(Sample::new(100, 100).with_last(n == 38)))
            .filter(|s| s.valid)
            .collect::<Vec<_>>();
        assert_eq!(outputs.len(), 30);
        assert!(outputs[29].last);
    }
}
