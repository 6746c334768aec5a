//! Receive Chain (Digital Down-Converter)
//!
//! ADC (or loopback) -> offset -> mixer -> CIC decimator / decimator ->
//! resampler -> receive queue
//!
//! The mixer runs whenever the receive frequency word is non-zero; the
//! resampler runs whenever the resample register holds a reducing ratio.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use common::{pack_sample_word, ConfigError, RateMode, Sample, SampleFormat};
use interfaces::{RxControl, StreamingQueue};

use crate::cic::{Cic, CicConfig};
use crate::conditioning::OffsetCorrector;
use crate::nco::{Mixer, NcoConfig};
use crate::rate::Decimator;
use crate::resampler::{Resampler, ResamplerConfig};
use crate::{ClockedStage, DspError};

/// Largest prototype filter the receive resampler will design
const MAX_RESAMPLER_TAPS: usize = 4096;

/// Receive chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdcConfig {
    pub adc_width: u8,
    /// Rail width of queued samples
    pub sample_width: u8,
    pub cic_order: u32,
    pub cic_delay: u32,
    /// Largest decimation the CIC is planned for
    pub max_decim: u32,
    /// Hogenauer pruning of the decimator registers
    pub prune: bool,
    pub nco: NcoConfig,
    /// Filter design used whenever the resample ratio changes
    pub resampler: ResamplerConfig,
}

impl Default for DdcConfig {
    fn default() -> Self {
        Self {
            adc_width: 10,
            sample_width: 16,
            cic_order: 3,
            cic_delay: 1,
            max_decim: 2047,
            prune: true,
            nco: NcoConfig::default(),
            resampler: ResamplerConfig::default(),
        }
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Reduce a receive resample ratio; `None` bypasses the resampler
///
/// The receive resampler runs on the sample clock and produces at most one
/// output per input, so a widening ratio is rejected, as is one whose
/// prototype filter would exceed the tap budget.
pub fn check_resample_ratio(
    interpolate: u16,
    decimate: u16,
    filter_order: usize,
) -> Result<Option<(usize, usize)>, ConfigError> {
    let (interpolate, decimate) = (interpolate as usize, decimate as usize);
    if interpolate == decimate {
        return Ok(None);
    }
    if interpolate == 0 || decimate == 0 || interpolate > decimate {
        return Err(ConfigError::UnsupportedRatio { interpolate, decimate });
    }
    let divisor = gcd(interpolate, decimate);
    let (interpolate, decimate) = (interpolate / divisor, decimate / divisor);
    let taps = interpolate * filter_order.max(1);
    if taps > MAX_RESAMPLER_TAPS {
        return Err(ConfigError::InvalidTaps(format!(
            "resample ratio {}/{} needs {} taps, at most {}",
            interpolate, decimate, taps, MAX_RESAMPLER_TAPS
        )));
    }
    Ok(Some((interpolate, decimate)))
}

/// Receive datapath
#[derive(Debug, Clone)]
pub struct Ddc {
    config: DdcConfig,
    offset: OffsetCorrector,
    mixer: Mixer,
    cic: Cic,
    decimator: Decimator,
    widen: u32,
    resampler: Option<Resampler>,
    resample_ratio: (u16, u16),
    resample_rejected: bool,
    /// A sample was queued and its burst has not ended yet
    in_burst: bool,
    drained: bool,
    drained_by_stop: bool,
}

impl Ddc {
    pub fn new(config: DdcConfig) -> Result<Self, DspError> {
        let adc_format = SampleFormat::signed(config.adc_width)?;
        SampleFormat::signed(config.sample_width)?;
        if config.sample_width < config.adc_width {
            return Err(ConfigError::WidthTooNarrow {
                name: "rx samples".to_string(),
                required: config.adc_width as u32,
                requested: config.sample_width as u32,
            }
            .into());
        }

        let cic = Cic::new(CicConfig {
            mode: RateMode::Decimate,
            order: config.cic_order,
            delay: config.cic_delay,
            max_rate: config.max_decim,
            input_width: config.adc_width,
            output_width: config.sample_width,
            prune: config.prune,
        })?;

        info!(
            "DDC: {}-bit ADC -> {}-bit samples, CIC N={} up to /{}",
            config.adc_width, config.sample_width, config.cic_order, config.max_decim
        );

        Ok(Self {
            offset: OffsetCorrector::saturating(adc_format),
            mixer: Mixer::new(config.nco.clone(), config.adc_width)?,
            cic,
            decimator: Decimator::new(1),
            widen: (config.sample_width - config.adc_width) as u32,
            resampler: None,
            resample_ratio: (0, 0),
            resample_rejected: false,
            in_burst: false,
            drained: false,
            drained_by_stop: false,
            config,
        })
    }

    /// The burst ended and its final sample is queued
    pub fn drained(&self) -> bool {
        self.drained
    }

    pub fn resampling(&self) -> bool {
        self.resampler.is_some()
    }

    /// The programmed resample ratio was rejected and is being bypassed
    pub fn resample_rejected(&self) -> bool {
        self.resample_rejected
    }

    fn update_resampler(&mut self, control: &RxControl) {
        let ratio = (control.resample_interpolate, control.resample_decimate);
        if ratio == self.resample_ratio {
            return;
        }
        self.resample_ratio = ratio;
        self.resampler = None;
        self.resample_rejected = false;

        let built = check_resample_ratio(ratio.0, ratio.1, self.config.resampler.filter_order).and_then(|reduced| {
            reduced
                .map(|(interpolate, decimate)| {
                    Resampler::for_fixed_clock(ResamplerConfig {
                        interpolate,
                        decimate,
                        data_width: self.config.sample_width,
                        ..self.config.resampler.clone()
                    })
                })
                .transpose()
        });
        match built {
            Ok(Some(resampler)) => self.resampler = Some(resampler),
            Ok(None) => debug!("RX resampler bypassed"),
            Err(e) => {
                warn!("RX resample ratio {}/{} rejected: {}", ratio.0, ratio.1, e);
                self.resample_rejected = true;
            }
        }
    }

    /// Advance one sample tick; returns the sample offered to the queue
    pub fn step(&mut self, control: &RxControl, input: Sample, queue: &mut StreamingQueue) -> Sample {
        if !control.enable || (self.drained_by_stop && !control.stop) {
            self.drained = false;
            self.drained_by_stop = false;
        }
        if !control.enable {
            self.in_burst = false;
        }

        self.offset.set_offsets(control.correct_i as i64, control.correct_q as i64);
        let corrected = self.offset.step(input);

        let mixed = if control.fcw != 0 {
            self.mixer.set_fcw(control.fcw);
            self.mixer.step(corrected)
        } else {
            corrected
        };

        let rate = (control.decim as u32).max(1);
        let decimated = if control.filter_enable {
            self.cic.set_rate(rate);
            self.cic.step(mixed)
        } else {
            self.decimator.set_rate(rate);
            let widen = self.widen;
            self.decimator.step(mixed).map(|v| v << widen)
        };

        self.update_resampler(control);
        let resampled = match self.resampler.as_mut() {
            Some(resampler) => resampler.step(decimated),
            None => decimated,
        };

        if !resampled.valid || !control.enable || self.drained {
            return Sample::IDLE;
        }

        // a stop only cuts the stream between bursts
        let out = resampled.with_last(resampled.last || (control.stop && !self.in_burst));
        queue.push(pack_sample_word(out.i, out.q));
        self.in_burst = !out.last;
        if out.last {
            debug!("RX drained (stop={})", control.stop);
            self.drained = true;
            self.drained_by_stop = control.stop;
        }
        out
    }

    /// Return every stage to its post-reset state
    pub fn reset(&mut self) {
        self.offset.reset();
        self.mixer.reset();
        self.cic.reset();
        self.decimator.reset();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.in_burst = false;
        self.drained = false;
        self.drained_by_stop = false;
    }
}
