//! Burst scenario
//!
//! Programs the transceiver through the register bus, streams a tone burst
//! through the transmit chain with status-flag flow control, and collects
//! whatever the receive chain produces.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use common::registers::{
    Register, StatusFlags, CORRECTION_I, CORRECTION_Q, FIR_ACCESS, FIR_COEFFICIENT, FIR_TAPS, GAIN_I, GAIN_Q,
    RESAMPLE_DECIMATE, RESAMPLE_INTERPOLATE, RUNS_HIGH, RUNS_LOW,
};
use common::{pack_sample_word, pack_words, unpack_sample_word};
use dsp::nco::{fcw_for_frequency, NcoConfig};
use dsp::scheduler::{AdcSource, Simulator, Tone};
use dsp::transceiver::Transceiver;

use crate::config::RadioConfig;

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub tx_words: usize,
    pub rx_words: usize,
    pub dac_words: usize,
    pub tx_underruns: u16,
    pub tx_overruns: u16,
    pub rx_overruns: u16,
    pub rx_underruns: u16,
    pub rx_peak: i64,
    pub bus_cycles: u64,
    pub sample_cycles: u64,
    pub simulated_us: f64,
    pub cancelled: bool,
}

enum Wait {
    Done,
    Expired,
    Cancelled,
}

struct Runner<'a> {
    config: &'a RadioConfig,
    cancel: &'a AtomicBool,
    sim: Simulator,
    received: Vec<u32>,
    dac_words: usize,
}

impl<'a> Runner<'a> {
    fn status(&mut self, register: Register) -> Result<StatusFlags> {
        Ok(StatusFlags::from_bits_truncate(self.sim.read_register(register)?))
    }

    /// Poll `register` until `done` holds, draining the receive queue meanwhile
    fn wait_for(&mut self, register: Register, limit: u64, done: impl Fn(StatusFlags) -> bool) -> Result<Wait> {
        let start = self.sim.cycles().0;
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(Wait::Cancelled);
            }
            if done(self.status(register)?) {
                return Ok(Wait::Done);
            }
            self.drain_rx()?;
            if self.sim.cycles().0 - start > limit {
                return Ok(Wait::Expired);
            }
        }
    }

    fn drain_rx(&mut self) -> Result<()> {
        let available = self.sim.read_register(Register::RxAvailable)?;
        for _ in 0..available {
            let word = self.sim.read_register(Register::RxSample)?;
            self.received.push(word);
        }
        self.dac_words += self.sim.take_dac_words().iter().filter(|w| w.enable).count();
        Ok(())
    }

    fn program(&mut self) -> Result<()> {
        let config = self.config;
        let tx = &config.transmit;
        let rx = &config.receive;
        let sample_rate = config.clocks.sample_rate_hz();
        let phase_bits = NcoConfig::default().phase_bits;
        let sim = &mut self.sim;

        sim.write_register(Register::TxInterp, tx.interp as u32)?;
        let fcw = fcw_for_frequency(tx.frequency_hz, sample_rate, phase_bits).context("transmit carrier")?;
        sim.write_register(Register::TxFcw, fcw)?;
        sim.write_register(Register::TxGain, GAIN_Q.set(GAIN_I.set(0, tx.gain_i as i64), tx.gain_q as i64))?;
        sim.write_register(
            Register::TxCorrection,
            CORRECTION_Q.set(CORRECTION_I.set(0, tx.correction_i as i64), tx.correction_q as i64),
        )?;

        if !tx.fir_taps.is_empty() {
            let word = FIR_ACCESS.set(FIR_TAPS.set(0, tx.fir_taps.len() as i64), 1);
            sim.write_register(Register::TxFir, word)?;
            for &tap in &tx.fir_taps {
                sim.write_register(Register::TxFir, FIR_COEFFICIENT.set(0, tap))?;
            }
            debug!("Loaded {} FIR taps", tx.fir_taps.len());
        }

        sim.write_register(Register::RxDecim, rx.decim as u32)?;
        let fcw = fcw_for_frequency(rx.frequency_hz, sample_rate, phase_bits).context("receive carrier")?;
        sim.write_register(Register::RxFcw, fcw)?;
        sim.write_register(
            Register::RxCorrection,
            CORRECTION_Q.set(CORRECTION_I.set(0, rx.correction_i as i64), rx.correction_q as i64),
        )?;
        let [interpolate, decimate] = rx.resample;
        sim.write_register(
            Register::RxResample,
            RESAMPLE_DECIMATE.set(RESAMPLE_INTERPOLATE.set(0, interpolate as i64), decimate as i64),
        )?;
        Ok(())
    }

    fn burst(&self) -> Result<Vec<u32>> {
        let scenario = &self.config.scenario;
        let width = self.config.transceiver().duc.sample_width;
        let mut tone = Tone::new(scenario.tone, scenario.amplitude, width).context("baseband tone")?;
        Ok((0..scenario.burst_len)
            .map(|_| {
                let s = tone.next_sample();
                pack_sample_word(s.i, s.q)
            })
            .collect())
    }

    /// Returns false when cancelled
    fn stream(&mut self) -> Result<bool> {
        let config = self.config;
        let tx = &config.transmit;
        let rx = &config.receive;
        let scenario = &config.scenario;
        let timeout = scenario.timeout_cycles;
        let rx_active = scenario.loopback || scenario.adc_tone.is_some();

        let mut tx_mode = StatusFlags::TXEN;
        tx_mode.set(StatusFlags::TX_FILTEREN, tx.cic);
        tx_mode.set(StatusFlags::DDSEN, tx.frequency_hz != 0.0);
        tx_mode.set(StatusFlags::FIREN, !tx.fir_taps.is_empty());
        tx_mode.set(StatusFlags::LOOPEN, scenario.loopback);

        if rx_active {
            let mut rx_mode = StatusFlags::RXEN;
            rx_mode.set(StatusFlags::RX_FILTEREN, rx.cic);
            rx_mode.set(StatusFlags::LOOPEN, scenario.loopback);
            self.sim.write_register(Register::RxStatus, rx_mode.bits())?;
        }

        let burst = self.burst()?;
        let mut words = burst.into_iter();
        for word in words.by_ref().take(config.queues.tx.depth) {
            self.sim.write_register(Register::TxSample, word)?;
        }
        self.sim.write_register(Register::TxStatus, tx_mode.bits())?;
        info!("Transmit enabled ({:?})", tx_mode);

        for word in words {
            match self.wait_for(Register::TxStatus, timeout, |f| f.contains(StatusFlags::TX_SPACE))? {
                Wait::Done => self.sim.write_register(Register::TxSample, word)?,
                Wait::Expired => anyhow::bail!("transmit queue never drained"),
                Wait::Cancelled => return Ok(false),
            }
        }

        self.sim.write_register(Register::TxStatus, StatusFlags::TXSTOP.bits())?;
        match self.wait_for(Register::TxStatus, timeout, |f| !f.contains(StatusFlags::TXEN))? {
            Wait::Done => info!("Transmit burst drained"),
            Wait::Expired => anyhow::bail!("transmit burst never drained"),
            Wait::Cancelled => return Ok(false),
        }

        if rx_active {
            // the end-of-burst marker follows the transmit chain in loopback;
            // an ADC stream carries none, so a stop there only ends it between bursts
            let clocks = config.clocks;
            let limit = rx.decim as u64 * 8 * clocks.sample_period_ps / clocks.bus_period_ps + 64;
            if !scenario.loopback {
                self.sim.write_register(Register::RxStatus, StatusFlags::RXSTOP.bits())?;
            }
            match self.wait_for(Register::RxStatus, limit, |f| !f.contains(StatusFlags::RXEN))? {
                Wait::Done => info!("Receive burst drained"),
                Wait::Expired => {
                    if scenario.loopback {
                        warn!("Receive burst did not end on its own, disabling receive");
                    } else {
                        info!("Receive stream has no end-of-burst marker, disabling receive");
                    }
                    self.sim.write_register(Register::RxStatus, 0)?;
                }
                Wait::Cancelled => return Ok(false),
            }
        }

        self.drain_rx()?;
        Ok(true)
    }

    fn stats(&mut self, cancelled: bool) -> Result<RunStats> {
        let tx_runs = self.sim.read_register(Register::TxRuns)?;
        let rx_runs = self.sim.read_register(Register::RxRuns)?;
        let (bus_cycles, sample_cycles) = self.sim.cycles();
        let rx_peak = self
            .received
            .iter()
            .map(|&w| {
                let (i, q) = unpack_sample_word(w);
                i.abs().max(q.abs())
            })
            .max()
            .unwrap_or(0);

        Ok(RunStats {
            tx_words: self.config.scenario.burst_len,
            rx_words: self.received.len(),
            dac_words: self.dac_words,
            tx_underruns: RUNS_HIGH.get(tx_runs) as u16,
            tx_overruns: RUNS_LOW.get(tx_runs) as u16,
            rx_overruns: RUNS_HIGH.get(rx_runs) as u16,
            rx_underruns: RUNS_LOW.get(rx_runs) as u16,
            rx_peak,
            bus_cycles,
            sample_cycles,
            simulated_us: self.sim.time_ps() as f64 / 1e6,
            cancelled,
        })
    }
}

/// Run the configured burst to completion or until `cancel` is raised
pub fn run(config: &RadioConfig, cancel: &AtomicBool) -> Result<RunStats> {
    let transceiver = Transceiver::new(config.transceiver()).context("building transceiver")?;
    let sim = Simulator::new(transceiver, config.clocks).context("starting clocks")?;
    let mut runner = Runner { config, cancel, sim, received: Vec::new(), dac_words: 0 };

    let timeout = config.scenario.timeout_cycles;
    match runner.wait_for(Register::TxStatus, timeout, |f| !f.contains(StatusFlags::CLEAR))? {
        Wait::Done => debug!("Power-up clear complete"),
        Wait::Expired => anyhow::bail!("datapath never left clear"),
        Wait::Cancelled => return runner.stats(true),
    }

    if !config.scenario.loopback {
        if let Some(frequency) = config.scenario.adc_tone {
            let width = config.transceiver().ddc.adc_width;
            let adc: Box<dyn AdcSource> =
                Box::new(Tone::new(frequency, config.scenario.amplitude, width).context("ADC tone")?);
            runner.sim.set_adc(adc);
        }
        runner.sim.capture_dac(true);
    }

    runner.program()?;
    let completed = runner.stream()?;

    if let Some(path) = &config.scenario.capture_path {
        std::fs::write(path, pack_words(&runner.received)).with_context(|| format!("writing {}", path))?;
        info!("Wrote {} received words to {}", runner.received.len(), path);
    }

    runner.stats(!completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_burst() {
        let config = RadioConfig::default();
        let stats = run(&config, &AtomicBool::new(false)).unwrap();
        assert!(!stats.cancelled);
        assert_eq!(stats.tx_underruns, 0);
        assert_eq!(stats.rx_overruns, 0);
        assert!((stats.rx_words as i64 - config.scenario.burst_len as i64).abs() <= 2, "{:?}", stats);
        assert!(stats.rx_peak > 4000, "{:?}", stats);
        assert_eq!(stats.dac_words, 0);
    }

    #[test]
    fn test_transmit_only_reaches_dac() {
        let mut config = RadioConfig::default();
        config.scenario.loopback = false;
        config.scenario.burst_len = 32;
        config.transmit.interp = 4;
        config.transmit.cic = false;
        let stats = run(&config, &AtomicBool::new(false)).unwrap();
        assert_eq!(stats.rx_words, 0);
        assert_eq!(stats.dac_words, 32 * 4 * 2);
    }

    #[test]
    fn test_cancel_before_start() {
        let stats = run(&RadioConfig::default(), &AtomicBool::new(true)).unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.rx_words, 0);
    }
}
