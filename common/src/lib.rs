//! Common Types and Utilities Library
//!
//! This crate provides the sample channel model, the fixed-point range
//! calculator, the register map and the word-level helpers shared across
//! the transceiver datapath.

pub mod types;
pub mod range;
pub mod registers;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use range::*;
pub use utils::*;

use thiserror::Error;

/// Design-time configuration errors
///
/// Every one of these is raised while a component is being built, never
/// while samples are flowing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid bit width {width} (supported 1..={max})")]
    InvalidWidth { width: u32, max: u32 },

    #[error("Channel {name} needs {required} bits but only {requested} were requested")]
    WidthTooNarrow { name: String, required: u32, requested: u32 },

    #[error("Output width {requested} exceeds the {available} bits the stage can produce")]
    WidthTooWide { requested: u32, available: u32 },

    #[error("Truncation cannot widen a channel ({from} -> {to} bits)")]
    TruncationWidens { from: u8, to: u8 },

    #[error("Invalid gain: {0}")]
    InvalidGain(u128),

    #[error("Invalid CIC parameters: {0}")]
    InvalidCicParams(String),

    #[error("Unsupported rate ratio {interpolate}/{decimate}")]
    UnsupportedRatio { interpolate: usize, decimate: usize },

    #[error("Invalid tap set: {0}")]
    InvalidTaps(String),

    #[error("Mismatched memory port widths: port A {port_a} bits, port B {port_b} bits")]
    PortWidthMismatch { port_a: u8, port_b: u8 },

    #[error("Frequency {frequency} Hz outside +/-{nyquist} Hz")]
    InvalidFrequency { frequency: f64, nyquist: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
