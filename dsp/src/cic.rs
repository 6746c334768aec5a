//! Cascaded Integrator-Comb Rate Converter
//!
//! Decimation runs `order` integrators, a downsampler and `order` combs;
//! interpolation runs combs, a zero-filling upsampler and integrators. That
//! ordering keeps internal growth within `order * log2(rate * delay)` bits.
//!
//! Decimator registers are pruned with Hogenauer's method: stage `j` of
//! `2N` may discard `B_j` low bits as long as the rounding noise it injects,
//! weighted by its noise gain to the output `F_j^2`, stays below `1/(2N)` of
//! the noise from the final output truncation. The plan is a pure function
//! of the filter parameters, see [`stage_discard`] and [`stage_width`].
//! Registers wrap in two's complement, which is exact as long as every stage
//! keeps the same most significant bit.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::range::{cic_max_width, clog2};
use common::{CicParams, ConfigError, RateMode, Sample, SampleFormat};

use crate::ClockedStage;

/// Widest register the `i64` datapath can hold, guard bit included
const MAX_REGISTER_WIDTH: u32 = SampleFormat::MAX_WIDTH as u32;

/// CIC filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CicConfig {
    pub mode: RateMode,
    /// Number of integrator/comb pairs
    pub order: u32,
    /// Comb differential delay
    pub delay: u32,
    /// Largest rate the filter will run at; the plan is sized for it
    pub max_rate: u32,
    pub input_width: u8,
    pub output_width: u8,
    /// Apply Hogenauer pruning to decimator registers
    pub prune: bool,
}

impl Default for CicConfig {
    fn default() -> Self {
        Self {
            mode: RateMode::Decimate,
            order: 3,
            delay: 1,
            max_rate: 16,
            input_width: 10,
            output_width: 16,
            prune: true,
        }
    }
}

/// Static bit-width plan of a CIC filter
#[derive(Debug, Clone, PartialEq)]
pub struct CicPlan {
    pub mode: RateMode,
    pub params: CicParams,
    pub input_width: u32,
    pub output_width: u32,
    /// `ceil(N * log2(R * M)) + input_width`
    pub max_width: u32,
    /// Low bits discarded at each of the `2N` stages, in signal order
    pub discards: Vec<u32>,
    /// Low bits discarded by the output truncation, `B_{2N+1}`
    pub output_discard: u32,
    /// Register width of each stage, guard bit included
    pub widths: Vec<u32>,
    /// Noise power gain `F_j^2` from each stage to the output
    pub variance_gains: Vec<f64>,
    /// Sum of absolute impulse response values from each stage to the output
    pub error_gains: Vec<f64>,
}

fn too_large(params: &CicParams) -> ConfigError {
    ConfigError::InvalidCicParams(format!("{:?} is too large to plan", params))
}

fn binomial(n: i64, k: i64, params: &CicParams) -> Result<i128, ConfigError> {
    if n < 0 || k < 0 || k > n {
        return Ok(0);
    }
    let k = k.min(n - k);
    let mut result: i128 = 1;
    for i in 0..k {
        result = result.checked_mul((n - i) as i128).ok_or_else(|| too_large(params))? / (i + 1) as i128;
    }
    Ok(result)
}

/// Impulse response from the input of integrator `j` (1-based) to the
/// decimator output, at the input rate
fn integrator_response(params: &CicParams, j: u32) -> Result<Vec<i128>, ConfigError> {
    let n = params.order as i64;
    let rm = params.rate as i64 * params.delay as i64;
    let j = j as i64;
    let len = (rm - 1) * n + j;

    (0..len)
        .map(|k| {
            let mut h: i128 = 0;
            for l in 0..=n {
                let m = k - rm * l;
                if m < 0 {
                    break;
                }
                let term = binomial(n, l, params)?
                    .checked_mul(binomial(n - j + m, m, params)?)
                    .ok_or_else(|| too_large(params))?;
                h = if l % 2 == 0 { h + term } else { h - term };
            }
            Ok(h)
        })
        .collect()
}

/// `(F_j^2, sum |h_j|)` for every decimator stage
fn noise_gains(params: &CicParams) -> Result<(Vec<f64>, Vec<f64>), ConfigError> {
    let n = params.order;
    let mut variance = Vec::with_capacity(2 * n as usize);
    let mut error = Vec::with_capacity(2 * n as usize);

    for j in 1..=n {
        let h = integrator_response(params, j)?;
        variance.push(h.iter().map(|&v| (v as f64) * (v as f64)).sum());
        error.push(h.iter().map(|&v| (v as f64).abs()).sum());
    }
    for j in (n + 1)..=(2 * n) {
        let taps = (2 * n + 1 - j) as i64;
        let mut f2 = 0.0;
        for k in 0..=taps {
            let c = binomial(taps, k, params)? as f64;
            f2 += c * c;
        }
        variance.push(f2);
        error.push(2f64.powi(taps as i32));
    }
    Ok((variance, error))
}

/// `ceil(log2(num / den))` for `num >= den > 0`
fn clog2_ratio(num: u128, den: u128) -> u32 {
    clog2(num.div_ceil(den))
}

fn check_register_width(width: u32) -> Result<(), ConfigError> {
    if width > MAX_REGISTER_WIDTH {
        return Err(ConfigError::InvalidWidth { width, max: MAX_REGISTER_WIDTH });
    }
    Ok(())
}

impl CicPlan {
    /// Plan a decimator; `prune` selects Hogenauer pruning
    pub fn decimator(params: CicParams, input_width: u8, output_width: u8, prune: bool) -> Result<Self, ConfigError> {
        let input_width = input_width as u32;
        let output_width = output_width as u32;
        let max_width = cic_max_width(input_width, &params)?;
        check_register_width(max_width + 1)?;

        if output_width < input_width {
            return Err(ConfigError::WidthTooNarrow {
                name: "cic output".to_string(),
                required: input_width,
                requested: output_width,
            });
        }
        if output_width > max_width {
            return Err(ConfigError::WidthTooWide { requested: output_width, available: max_width });
        }

        let stages = 2 * params.order as usize;
        let output_discard = max_width - output_width;
        let (variance_gains, error_gains) = noise_gains(&params)?;

        let discards = if prune && output_discard > 0 {
            let log2_sigma_t = output_discard as f64 - 0.5 * 12f64.log2();
            let log2_share = 0.5 * (6.0 / params.order as f64).log2();
            let mut discards: Vec<u32> = variance_gains
                .iter()
                .map(|&f2| {
                    let b = (-0.5 * f2.log2() + log2_sigma_t + log2_share - 1e-9).floor();
                    b.clamp(0.0, output_discard as f64) as u32
                })
                .collect();
            // registers may only narrow along the signal path
            for j in (0..stages - 1).rev() {
                discards[j] = discards[j].min(discards[j + 1]);
            }
            discards
        } else {
            vec![0; stages]
        };

        let widths = discards.iter().map(|&b| max_width + 1 - b).collect();

        Ok(Self {
            mode: RateMode::Decimate,
            params,
            input_width,
            output_width,
            max_width,
            discards,
            output_discard,
            widths,
            variance_gains,
            error_gains,
        })
    }

    /// Plan an interpolator; interpolator registers are never pruned
    pub fn interpolator(params: CicParams, input_width: u8, output_width: u8) -> Result<Self, ConfigError> {
        let input_width = input_width as u32;
        let output_width = output_width as u32;
        let n = params.order;
        let rm = params.rate as u128 * params.delay as u128;
        let rate = params.rate as u128;
        let max_width = cic_max_width(input_width, &params)?;

        let mut widths = Vec::with_capacity(2 * n as usize);
        for j in 1..=n {
            widths.push(input_width + j + 1);
        }
        for j in (n + 1)..=(2 * n) {
            let growth = (1u128 << (2 * n - j))
                .checked_mul(rm.checked_pow(j - n).ok_or_else(|| too_large(&params))?)
                .ok_or_else(|| too_large(&params))?;
            widths.push(input_width + clog2_ratio(growth, rate) + 1);
        }
        for &w in &widths {
            check_register_width(w)?;
        }

        let full_width = widths[widths.len() - 1] - 1;
        if output_width < input_width {
            return Err(ConfigError::WidthTooNarrow {
                name: "cic output".to_string(),
                required: input_width,
                requested: output_width,
            });
        }
        if output_width > full_width {
            return Err(ConfigError::WidthTooWide { requested: output_width, available: full_width });
        }

        Ok(Self {
            mode: RateMode::Interpolate,
            params,
            input_width,
            output_width,
            max_width,
            discards: vec![0; 2 * n as usize],
            output_discard: full_width - output_width,
            widths,
            variance_gains: Vec::new(),
            error_gains: Vec::new(),
        })
    }

    /// Worst-case deviation of a pruned decimator from the unpruned one,
    /// in output LSBs
    pub fn worst_case_error(&self) -> f64 {
        let lsb = 2f64.powi(self.output_discard as i32);
        let mut previous = 0u32;
        let mut bound = 0.0;
        for (j, &b) in self.discards.iter().enumerate() {
            if b > previous {
                let step = 2f64.powi(b as i32) - 2f64.powi(previous as i32);
                bound += step * self.error_gains.get(j).copied().unwrap_or(0.0);
            }
            previous = b;
        }
        bound / lsb + 1.0
    }
}

fn decimator_plan(
    input_width: u32,
    output_width: u32,
    rate: u32,
    order: u32,
    delay: u32,
) -> Result<CicPlan, ConfigError> {
    let params = CicParams::new(order, delay, rate)?;
    let narrow = |w: u32| u8::try_from(w).map_err(|_| ConfigError::InvalidWidth { width: w, max: MAX_REGISTER_WIDTH });
    CicPlan::decimator(params, narrow(input_width)?, narrow(output_width)?, true)
}

fn check_stage(stage: u32, order: u32) -> Result<usize, ConfigError> {
    if stage == 0 || stage > 2 * order + 1 {
        return Err(ConfigError::InvalidCicParams(format!(
            "stage {} outside 1..={}",
            stage,
            2 * order + 1
        )));
    }
    Ok(stage as usize - 1)
}

/// Low bits a pruned decimator discards at stage `stage` (1-based; stage
/// `2N + 1` is the output truncation)
pub fn stage_discard(
    input_width: u32,
    output_width: u32,
    rate: u32,
    order: u32,
    delay: u32,
    stage: u32,
) -> Result<u32, ConfigError> {
    let idx = check_stage(stage, order)?;
    let plan = decimator_plan(input_width, output_width, rate, order, delay)?;
    Ok(plan.discards.get(idx).copied().unwrap_or(plan.output_discard))
}

/// Register width of a pruned decimator at stage `stage` (1-based; stage
/// `2N + 1` is the output register)
pub fn stage_width(
    input_width: u32,
    output_width: u32,
    rate: u32,
    order: u32,
    delay: u32,
    stage: u32,
) -> Result<u32, ConfigError> {
    let idx = check_stage(stage, order)?;
    let plan = decimator_plan(input_width, output_width, rate, order, delay)?;
    Ok(plan.widths.get(idx).copied().unwrap_or(plan.output_width))
}

/// Shift an already-scaled value by a signed amount, right when positive
fn shift(value: i64, amount: i32) -> i64 {
    if amount >= 0 {
        value >> amount.min(63)
    } else {
        value << (-amount).min(63)
    }
}

/// One rail of the filter registers
#[derive(Debug, Clone)]
struct Rail {
    integrators: Vec<i64>,
    combs: Vec<VecDeque<i64>>,
}

impl Rail {
    fn new(order: usize, delay: usize) -> Self {
        Self {
            integrators: vec![0; order],
            combs: (0..order).map(|_| VecDeque::from(vec![0; delay])).collect(),
        }
    }

    fn clear(&mut self) {
        self.integrators.fill(0);
        for line in &mut self.combs {
            line.iter_mut().for_each(|v| *v = 0);
        }
    }

    fn comb(&mut self, stage: usize, x: i64, format: &SampleFormat) -> i64 {
        let line = &mut self.combs[stage];
        let delayed = line.pop_front().unwrap_or(0);
        line.push_back(x);
        format.wrap(x - delayed)
    }

    fn integrate(&mut self, stage: usize, x: i64, format: &SampleFormat) -> i64 {
        let acc = format.wrap(self.integrators[stage] + x);
        self.integrators[stage] = acc;
        acc
    }
}

/// CIC decimator or interpolator
///
/// A decimator is re-planned whenever its rate changes: pruning is only
/// valid for the rate it was computed for.
#[derive(Debug, Clone)]
pub struct Cic {
    config: CicConfig,
    plan: CicPlan,
    formats: Vec<SampleFormat>,
    output_format: SampleFormat,
    rate: u32,
    output_shift: i32,
    i: Rail,
    q: Rail,
    counter: u32,
    pending_last: bool,
    hold: u32,
    hold_last: bool,
}

fn register_formats(plan: &CicPlan) -> Result<Vec<SampleFormat>, ConfigError> {
    plan.widths.iter().map(|&w| SampleFormat::signed(w as u8)).collect()
}

impl Cic {
    /// Create a new filter running at its maximum rate
    pub fn new(config: CicConfig) -> Result<Self, ConfigError> {
        let params = CicParams::new(config.order, config.delay, config.max_rate)?;
        let plan = match config.mode {
            RateMode::Decimate => CicPlan::decimator(params, config.input_width, config.output_width, config.prune)?,
            RateMode::Interpolate => CicPlan::interpolator(params, config.input_width, config.output_width)?,
        };
        let formats = register_formats(&plan)?;
        let output_format = SampleFormat::signed(config.output_width)?;

        info!(
            "CIC {:?}: N={} M={} R<={} {}->{} bits, max width {}, discards {:?}",
            plan.mode, params.order, params.delay, params.rate, plan.input_width, plan.output_width,
            plan.max_width, plan.discards
        );

        let order = params.order as usize;
        let delay = params.delay as usize;
        let mut cic = Self {
            config,
            plan,
            formats,
            output_format,
            rate: params.rate,
            output_shift: 0,
            i: Rail::new(order, delay),
            q: Rail::new(order, delay),
            counter: 0,
            pending_last: false,
            hold: 0,
            hold_last: false,
        };
        cic.apply_rate(params.rate)?;
        Ok(cic)
    }

    /// Plan of the rate currently in use
    pub fn plan(&self) -> &CicPlan {
        &self.plan
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Change the runtime rate; the output is rescaled so full scale in
    /// stays full scale out
    pub fn set_rate(&mut self, rate: u32) {
        let max = self.config.max_rate;
        let rate = if rate == 0 {
            1
        } else if rate > max {
            warn!("CIC rate {} above planned maximum {}, clamped", rate, max);
            max
        } else {
            rate
        };
        if rate == self.rate {
            return;
        }
        if let Err(e) = self.apply_rate(rate) {
            warn!("CIC rate {} rejected, staying at {}: {}", rate, self.rate, e);
        }
    }

    fn apply_rate(&mut self, rate: u32) -> Result<(), ConfigError> {
        let params = CicParams::new(self.config.order, self.config.delay, rate)?;
        let input = self.config.input_width as u32;
        let output = self.config.output_width as u32;
        let gain = params.gain()?;

        match self.config.mode {
            RateMode::Decimate => {
                // below full width there is nothing to prune; the output is
                // shifted up instead
                let full = input + clog2(gain);
                let planned = full.min(output);
                let plan = CicPlan::decimator(params, input as u8, planned as u8, self.config.prune)?;
                let last_discard = plan.discards[plan.discards.len() - 1] as i32;
                self.output_shift = plan.output_discard as i32 - last_discard - (output - planned) as i32;
                self.formats = register_formats(&plan)?;
                self.plan = plan;
            }
            RateMode::Interpolate => {
                self.output_shift = clog2_ratio(gain, rate as u128) as i32 + input as i32 - output as i32;
            }
        }
        self.rate = rate;
        self.counter = 0;
        self.i.clear();
        self.q.clear();
        debug!(
            "CIC {:?} rate {} output shift {} discards {:?}",
            self.config.mode, rate, self.output_shift, self.plan.discards
        );
        Ok(())
    }

    fn decimate(&mut self, input: Sample) -> Sample {
        if !input.valid {
            return Sample::IDLE;
        }
        let order = self.plan.params.order as usize;
        let (mut vi, mut vq) = (input.i, input.q);
        let mut previous = 0u32;

        for j in 0..order {
            let drop = self.plan.discards[j] - previous;
            vi = self.i.integrate(j, vi >> drop, &self.formats[j]);
            vq = self.q.integrate(j, vq >> drop, &self.formats[j]);
            previous = self.plan.discards[j];
        }

        self.pending_last |= input.last;
        self.counter += 1;
        if self.counter < self.rate {
            return Sample::IDLE;
        }
        self.counter = 0;

        for j in 0..order {
            let stage = order + j;
            let drop = self.plan.discards[stage] - previous;
            vi = self.i.comb(j, vi >> drop, &self.formats[stage]);
            vq = self.q.comb(j, vq >> drop, &self.formats[stage]);
            previous = self.plan.discards[stage];
        }

        let last = std::mem::take(&mut self.pending_last);
        Sample {
            valid: true,
            last,
            i: self.output_format.wrap(shift(vi, self.output_shift)),
            q: self.output_format.wrap(shift(vq, self.output_shift)),
        }
    }

    fn interpolate(&mut self, input: Sample) -> Sample {
        let order = self.plan.params.order as usize;
        let (mut vi, mut vq) = if input.valid {
            let (mut vi, mut vq) = (input.i, input.q);
            for j in 0..order {
                vi = self.i.comb(j, vi, &self.formats[j]);
                vq = self.q.comb(j, vq, &self.formats[j]);
            }
            self.hold = self.rate - 1;
            self.hold_last = input.last;
            (vi, vq)
        } else if self.hold > 0 {
            self.hold -= 1;
            (0, 0)
        } else {
            return Sample::IDLE;
        };

        for j in 0..order {
            let stage = order + j;
            vi = self.i.integrate(j, vi, &self.formats[stage]);
            vq = self.q.integrate(j, vq, &self.formats[stage]);
        }

        Sample {
            valid: true,
            last: self.hold_last && self.hold == 0,
            i: self.output_format.wrap(shift(vi, self.output_shift)),
            q: self.output_format.wrap(shift(vq, self.output_shift)),
        }
    }
}

impl ClockedStage for Cic {
    fn name(&self) -> &'static str {
        match self.plan.mode {
            RateMode::Decimate => "cic-decimator",
            RateMode::Interpolate => "cic-interpolator",
        }
    }

    fn step(&mut self, input: Sample) -> Sample {
        match self.plan.mode {
            RateMode::Decimate => self.decimate(input),
            RateMode::Interpolate => self.interpolate(input),
        }
    }

    fn reset(&mut self) {
        self.i.clear();
        self.q.clear();
        self.counter = 0;
        self.pending_last = false;
        self.hold = 0;
        self.hold_last = false;
    }
}
