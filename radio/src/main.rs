//! Transceiver Simulation Driver
//!
//! Loads a TOML configuration, runs a transmit/receive burst through the
//! cycle-level transceiver model and reports the datapath counters.

mod config;
mod scenario;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::RadioConfig;

/// Transceiver datapath simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "radio.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Baseband samples in the transmit burst
    #[arg(long)]
    burst_len: Option<usize>,

    /// Transmit interpolation factor
    #[arg(long)]
    interp: Option<u16>,

    /// Receive decimation factor
    #[arg(long)]
    decim: Option<u16>,

    /// Drive the DAC instead of looping back into the receive chain
    #[arg(long)]
    no_loopback: bool,

    /// Write the run statistics as JSON to this path
    #[arg(long)]
    json: Option<String>,
}

/// Configuration with command line overrides; false when the file is missing
fn load_config(args: &Args) -> Result<(RadioConfig, bool)> {
    let found = Path::new(&args.config).exists();
    let mut config = if found { RadioConfig::from_toml_file(&args.config)? } else { RadioConfig::default() };

    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(burst_len) = args.burst_len {
        config.scenario.burst_len = burst_len;
    }
    if let Some(interp) = args.interp {
        config.transmit.interp = interp;
    }
    if let Some(decim) = args.decim {
        config.receive.decim = decim;
    }
    if args.no_loopback {
        config.scenario.loopback = false;
    }

    Ok((config, found))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, found) = load_config(&args)?;

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_line_number(true)
        .init();

    info!("Starting transceiver simulation");
    if found {
        info!("Configuration file: {}", args.config);
    } else {
        warn!("Configuration file {} not found, using defaults", args.config);
    }
    config.validate().context("invalid configuration")?;

    info!("Run configuration:");
    info!("  Bus clock: {} ps, sample clock: {} ps", config.clocks.bus_period_ps, config.clocks.sample_period_ps);
    info!("  Interp: {}, decim: {}", config.transmit.interp, config.receive.decim);
    info!("  Burst: {} samples, loopback: {}", config.scenario.burst_len, config.scenario.loopback);

    let cancel = Arc::new(AtomicBool::new(false));
    let mut handle = {
        let cancel = cancel.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || scenario::run(&config, &cancel))
    };

    // Wait for completion or a shutdown signal
    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            cancel.store(true, Ordering::Relaxed);
            handle.await
        }
    };

    let stats = match joined.context("simulation task panicked")? {
        Ok(stats) => stats,
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            return Err(e);
        }
    };

    info!("Run statistics:");
    info!("  TX words: {}, RX words: {}, DAC words: {}", stats.tx_words, stats.rx_words, stats.dac_words);
    info!("  TX underruns: {}, RX overruns: {}", stats.tx_underruns, stats.rx_overruns);
    info!("  RX peak: {}", stats.rx_peak);
    info!(
        "  Bus cycles: {}, sample cycles: {}, simulated {:.3} us",
        stats.bus_cycles, stats.sample_cycles, stats.simulated_us
    );
    if stats.cancelled {
        warn!("Run was cancelled before the burst completed");
    }

    if let Some(path) = &args.json {
        let report = serde_json::to_string_pretty(&stats)?;
        std::fs::write(path, report).with_context(|| format!("writing {}", path))?;
        info!("Statistics written to {}", path);
    }

    info!("Simulation complete");
    Ok(())
}
