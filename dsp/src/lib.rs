//! Transceiver Datapath Library
//!
//! This crate implements the sample-processing stages of the transceiver
//! front end and assembles them into the transmit and receive chains.
//! Every stage is a plain state struct advanced once per clock edge.

pub mod cic;
pub mod conditioning;
pub mod ddc;
pub mod duc;
pub mod fir;
pub mod nco;
pub mod rate;
pub mod resampler;
pub mod scheduler;
pub mod transceiver;

use common::{ConfigError, Sample};
use interfaces::InterfaceError;
use thiserror::Error;

/// Datapath errors
#[derive(Error, Debug)]
pub enum DspError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),
}

/// A stage that consumes and produces one sample per clock edge
pub trait ClockedStage {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Advance one clock edge
    fn step(&mut self, input: Sample) -> Sample;

    /// Return to the post-reset state
    fn reset(&mut self);
}

/// Drive a stage with a sequence of inputs and collect every output
pub fn run_stage<S: ClockedStage + ?Sized>(stage: &mut S, inputs: impl IntoIterator<Item = Sample>) -> Vec<Sample> {
    inputs.into_iter().map(|s| stage.step(s)).collect()
}
