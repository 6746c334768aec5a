//! Common Types for the Transceiver Datapath
//!
//! Defines the fixed-point sample model used by every stage

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};

use crate::range::{self, RangeOp};
use crate::ConfigError;

/// Fixed-point format of one rail of a quadrature channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleFormat {
    /// Two's complement when true, plain binary otherwise
    pub signed: bool,
    /// Bits per rail
    pub width: u8,
}

impl SampleFormat {
    /// Widest rail that fits in the `i64` sample representation
    pub const MAX_WIDTH: u8 = 63;

    /// Create a new format with validation
    pub fn new(signed: bool, width: u8) -> Result<Self, ConfigError> {
        if width == 0 || width > Self::MAX_WIDTH {
            return Err(ConfigError::InvalidWidth {
                width: width as u32,
                max: Self::MAX_WIDTH as u32,
            });
        }
        Ok(Self { signed, width })
    }

    /// Two's complement format
    pub fn signed(width: u8) -> Result<Self, ConfigError> {
        Self::new(true, width)
    }

    /// Plain binary format
    pub fn unsigned(width: u8) -> Result<Self, ConfigError> {
        Self::new(false, width)
    }

    /// Smallest representable value
    pub fn min_value(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.width - 1))
        } else {
            0
        }
    }

    /// Largest representable value
    pub fn max_value(&self) -> i64 {
        if self.signed {
            (1i64 << (self.width - 1)) - 1
        } else {
            (1i64 << self.width) - 1
        }
    }

    /// Check that a value lies within the format's range
    pub fn contains(&self, value: i64) -> bool {
        value >= self.min_value() && value <= self.max_value()
    }

    /// Keep the low `width` bits, reinterpreted in this format
    pub fn wrap(&self, value: i64) -> i64 {
        if self.signed {
            crate::utils::sign_extend(value as u64, self.width)
        } else {
            value & self.max_value()
        }
    }

    /// Clamp a value into the format's range
    pub fn saturate(&self, value: i64) -> i64 {
        value.clamp(self.min_value(), self.max_value())
    }
}

/// One tick's worth of a quadrature stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// The rails carry a meaningful value this tick
    pub valid: bool,
    /// End-of-burst marker
    pub last: bool,
    /// In-phase rail
    pub i: i64,
    /// Quadrature rail
    pub q: i64,
}

impl Sample {
    /// No sample this tick
    pub const IDLE: Self = Self { valid: false, last: false, i: 0, q: 0 };

    /// Create a valid sample
    pub fn new(i: i64, q: i64) -> Self {
        Self { valid: true, last: false, i, q }
    }

    /// Set the end-of-burst marker
    pub fn with_last(mut self, last: bool) -> Self {
        self.last = last;
        self
    }

    /// Rails as seen by a consumer: zero when the sample is not valid
    pub fn rails(&self) -> (i64, i64) {
        if self.valid {
            (self.i, self.q)
        } else {
            (0, 0)
        }
    }

    /// Apply the same function to both rails, keeping the flags
    pub fn map(self, f: impl Fn(i64) -> i64) -> Self {
        if !self.valid {
            return Self::IDLE;
        }
        Self { valid: true, last: self.last, i: f(self.i), q: f(self.q) }
    }
}

/// A named fixed-point quadrature stream descriptor
///
/// The width of a channel never changes once it is built; deriving a new
/// width always yields a new channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    name: String,
    format: SampleFormat,
}

impl Channel {
    /// Create a new channel descriptor
    pub fn new(name: impl Into<String>, format: SampleFormat) -> Self {
        Self { name: name.into(), format }
    }

    /// Convenience constructor for a signed channel
    pub fn signed(name: impl Into<String>, width: u8) -> Result<Self, ConfigError> {
        Ok(Self::new(name, SampleFormat::signed(width)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn width(&self) -> u8 {
        self.format.width
    }

    /// Check a sample against this channel's range
    ///
    /// Invalid samples always pass since their rails carry nothing.
    pub fn accepts(&self, sample: &Sample) -> bool {
        !sample.valid || (self.format.contains(sample.i) && self.format.contains(sample.q))
    }

    /// Derive the channel produced by a known arithmetic operation
    pub fn derive(&self, name: impl Into<String>, op: RangeOp) -> Result<Channel, ConfigError> {
        let format = range::derive_format(self.format, op)?;
        Ok(Channel::new(name, format))
    }

    /// Derive a channel scaled by a known integer gain
    pub fn gained(&self, name: impl Into<String>, gain: u128) -> Result<Channel, ConfigError> {
        self.derive(name, RangeOp::Scale(gain))
    }

    /// Derive a channel truncated to `width` bits
    pub fn truncated(&self, name: impl Into<String>, width: u8) -> Result<Channel, ConfigError> {
        self.derive(name, RangeOp::Truncate(width))
    }

    /// Check that this channel fits into a requested width
    pub fn require_width(&self, requested: u8) -> Result<(), ConfigError> {
        if requested < self.format.width {
            return Err(ConfigError::WidthTooNarrow {
                name: self.name.clone(),
                required: self.format.width as u32,
                requested: requested as u32,
            });
        }
        Ok(())
    }
}

/// Rate-conversion parameters of a CIC filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CicParams {
    /// Number of integrator/comb stage pairs
    pub order: u32,
    /// Comb differential delay
    pub delay: u32,
    /// Integer rate change factor
    pub rate: u32,
}

impl CicParams {
    /// Create new parameters with validation
    pub fn new(order: u32, delay: u32, rate: u32) -> Result<Self, ConfigError> {
        if order == 0 || delay == 0 || rate == 0 {
            return Err(ConfigError::InvalidCicParams(format!(
                "order={} delay={} rate={} must all be at least 1",
                order, delay, rate
            )));
        }
        Ok(Self { order, delay, rate })
    }

    /// Total DC gain `(rate * delay) ^ order`
    pub fn gain(&self) -> Result<u128, ConfigError> {
        (self.rate as u128 * self.delay as u128)
            .checked_pow(self.order)
            .ok_or_else(|| ConfigError::InvalidCicParams(format!("gain of {:?} overflows", self)))
    }
}

/// Direction of a rate change
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum RateMode {
    /// Integrate, downsample, comb
    Decimate = 0,
    /// Comb, upsample, integrate
    Interpolate = 1,
}

/// An immutable ordered set of filter coefficients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapSet {
    taps: Vec<i64>,
    format: SampleFormat,
}

impl TapSet {
    /// Create a tap set, checking every coefficient fits the width
    pub fn new(taps: Vec<i64>, width: u8) -> Result<Self, ConfigError> {
        let format = SampleFormat::signed(width)?;
        if taps.is_empty() {
            return Err(ConfigError::InvalidTaps("empty tap set".to_string()));
        }
        if let Some((idx, tap)) = taps.iter().enumerate().find(|(_, t)| !format.contains(**t)) {
            return Err(ConfigError::InvalidTaps(format!(
                "tap {} = {} does not fit in {} bits",
                idx, tap, width
            )));
        }
        Ok(Self { taps, format })
    }

    pub fn taps(&self) -> &[i64] {
        &self.taps
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn width(&self) -> u8 {
        self.format.width
    }

    /// Copy of the tap set padded with trailing zeros to a multiple of `n`
    pub fn padded_to_multiple(&self, n: usize) -> TapSet {
        let mut taps = self.taps.clone();
        let len = taps.len().div_ceil(n.max(1)) * n.max(1);
        taps.resize(len, 0);
        TapSet { taps, format: self.format }
    }

    /// Taps `{h[k], h[k+n], h[k+2n], ...}` of polyphase branch `k` out of `n`
    pub fn polyphase_branch(&self, k: usize, n: usize) -> Vec<i64> {
        self.taps.iter().skip(k).step_by(n.max(1)).copied().collect()
    }
}
