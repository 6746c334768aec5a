//! Fixed-Point Range Calculator
//!
//! Derives the minimal safe width of a channel after a known arithmetic
//! operation. Every check here runs while the datapath is being built; an
//! underspecified width is reported as a [`ConfigError`], never discovered
//! per sample.

use tracing::trace;

use crate::types::{CicParams, SampleFormat};
use crate::ConfigError;

/// Arithmetic operations with a statically known bit growth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// Sum with another channel
    Add(SampleFormat),
    /// Multiply by a known positive integer gain
    Scale(u128),
    /// Keep the top `n` bits (sign included)
    Truncate(u8),
    /// Product with another channel
    Multiply(SampleFormat),
    /// Running sum of up to `n` terms
    Accumulate(u128),
}

/// `ceil(log2(x))`, with `clog2(0) == clog2(1) == 0`
pub fn clog2(x: u128) -> u32 {
    if x <= 1 {
        0
    } else {
        128 - (x - 1).leading_zeros()
    }
}

/// Bits needed to represent a gain of `gain`
pub fn bit_growth(gain: u128) -> Result<u32, ConfigError> {
    if gain == 0 {
        return Err(ConfigError::InvalidGain(gain));
    }
    Ok(clog2(gain))
}

fn checked_format(signed: bool, width: u32) -> Result<SampleFormat, ConfigError> {
    if width > SampleFormat::MAX_WIDTH as u32 {
        return Err(ConfigError::InvalidWidth {
            width,
            max: SampleFormat::MAX_WIDTH as u32,
        });
    }
    SampleFormat::new(signed, width as u8)
}

/// Width a format needs once it has to share a signed representation
fn signed_width(format: SampleFormat) -> u32 {
    format.width as u32 + u32::from(!format.signed)
}

/// Format of the result of `op` applied to a channel of format `format`
pub fn derive_format(format: SampleFormat, op: RangeOp) -> Result<SampleFormat, ConfigError> {
    let derived = match op {
        RangeOp::Add(other) => {
            if format.signed == other.signed {
                checked_format(format.signed, format.width.max(other.width) as u32 + 1)?
            } else {
                checked_format(true, signed_width(format).max(signed_width(other)) + 1)?
            }
        }
        RangeOp::Scale(gain) => checked_format(format.signed, format.width as u32 + bit_growth(gain)?)?,
        RangeOp::Truncate(width) => {
            if width > format.width {
                return Err(ConfigError::TruncationWidens { from: format.width, to: width });
            }
            SampleFormat::new(format.signed, width)?
        }
        RangeOp::Multiply(other) => {
            let signed = format.signed || other.signed;
            checked_format(signed, format.width as u32 + other.width as u32)?
        }
        RangeOp::Accumulate(terms) => {
            checked_format(format.signed, format.width as u32 + bit_growth(terms)?)?
        }
    };

    trace!("Range {:?} applied to {:?} -> {:?}", op, format, derived);
    Ok(derived)
}

/// Theoretical maximum register width of a CIC filter,
/// `ceil(order * log2(rate * delay)) + input_width`
pub fn cic_max_width(input_width: u32, params: &CicParams) -> Result<u32, ConfigError> {
    Ok(clog2(params.gain()?) + input_width)
}

/// Width of an accumulator that sums `terms` products of two formats
pub fn mac_width(a: SampleFormat, b: SampleFormat, terms: u128) -> Result<u8, ConfigError> {
    let product = derive_format(a, RangeOp::Multiply(b))?;
    Ok(derive_format(product, RangeOp::Accumulate(terms))?.width)
}
