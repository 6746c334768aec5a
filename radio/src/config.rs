//! TOML Configuration for the simulation driver
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) runs the stock loopback scenario.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use dsp::ddc::check_resample_ratio;
use dsp::scheduler::ClockConfig;
use dsp::transceiver::TransceiverConfig;
use interfaces::QueueConfig;

/// Taps addressable in one FIR bank
const FIR_MAX_TAPS: usize = 127;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RadioConfig {
    pub clocks: ClockConfig,
    pub queues: QueuesConfig,
    pub transmit: TransmitConfig,
    pub receive: ReceiveConfig,
    pub scenario: ScenarioConfig,
    pub log: LogConfig,
}

/// Queue geometry
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct QueuesConfig {
    pub tx: QueueConfig,
    pub rx: QueueConfig,
}

/// Transmit register programming
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransmitConfig {
    pub interp: u16,
    /// CIC interpolator instead of sample-and-hold
    pub cic: bool,
    /// Carrier offset in Hz; the mixer is off at 0
    pub frequency_hz: f64,
    pub gain_i: u16,
    pub gain_q: u16,
    pub correction_i: i16,
    pub correction_q: i16,
    /// FIR coefficients loaded into bank 0; empty leaves the FIR off
    pub fir_taps: Vec<i64>,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            interp: 16,
            cic: true,
            frequency_hz: 0.0,
            gain_i: 512,
            gain_q: 512,
            correction_i: 0,
            correction_q: 0,
            fir_taps: Vec::new(),
        }
    }
}

/// Receive register programming
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReceiveConfig {
    pub decim: u16,
    /// CIC decimator instead of plain decimation
    pub cic: bool,
    pub frequency_hz: f64,
    pub correction_i: i16,
    pub correction_q: i16,
    /// Resampler ratio as `[interpolate, decimate]`; `[0, 0]` bypasses it
    pub resample: [u16; 2],
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            decim: 16,
            cic: true,
            frequency_hz: 0.0,
            correction_i: 0,
            correction_q: 0,
            resample: [0, 0],
        }
    }
}

/// What to stream through the transceiver
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Number of baseband samples in the transmit burst
    pub burst_len: usize,
    /// Baseband tone in cycles per baseband sample
    pub tone: f64,
    /// Tone amplitude as a fraction of full scale
    pub amplitude: f64,
    /// Route the transmit chain into the receive chain
    pub loopback: bool,
    /// ADC tone in cycles per sample clock when not in loopback
    pub adc_tone: Option<f64>,
    /// Bus cycles to wait for the datapath before giving up
    pub timeout_cycles: u64,
    /// Raw little-endian dump of the received words
    pub capture_path: Option<String>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            burst_len: 256,
            tone: 1.0 / 32.0,
            amplitude: 0.5,
            loopback: true,
            adc_tone: None,
            timeout_cycles: 2_000_000,
            capture_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RadioConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: RadioConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.clocks.validate()?;
        if self.transmit.interp == 0 || self.receive.decim == 0 {
            anyhow::bail!("interpolation and decimation must be at least 1");
        }
        if self.scenario.loopback && self.transmit.interp != self.receive.decim {
            tracing::warn!(
                "Loopback with interp {} and decim {}: received rate differs from transmitted",
                self.transmit.interp,
                self.receive.decim
            );
        }
        if self.transmit.fir_taps.len() > FIR_MAX_TAPS {
            anyhow::bail!("{} FIR taps, at most {} fit a bank", self.transmit.fir_taps.len(), FIR_MAX_TAPS);
        }
        if !self.transmit.fir_taps.is_empty() && (self.transmit.interp as usize) < self.transmit.fir_taps.len() + 4 {
            tracing::warn!(
                "FIR with {} taps needs interp >= {}, samples will be dropped",
                self.transmit.fir_taps.len(),
                self.transmit.fir_taps.len() + 4
            );
        }
        let [interpolate, decimate] = self.receive.resample;
        check_resample_ratio(interpolate, decimate, self.transceiver().ddc.resampler.filter_order)
            .context("receive resample ratio")?;
        if !(0.0..=1.0).contains(&self.scenario.amplitude) {
            anyhow::bail!("amplitude {} outside 0..=1", self.scenario.amplitude);
        }
        Ok(())
    }

    /// Datapath construction parameters
    pub fn transceiver(&self) -> TransceiverConfig {
        TransceiverConfig {
            tx_queue: self.queues.tx.clone(),
            rx_queue: self.queues.rx.clone(),
            ..Default::default()
        }
    }
}
