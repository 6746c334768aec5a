//! Unfiltered rate changers
//!
//! Used in place of the CIC filters when filtering is disabled.

use tracing::trace;

use common::Sample;

use crate::ClockedStage;

/// Sample-and-hold upsampler: each valid input is repeated for `rate` ticks
#[derive(Debug, Clone, Default)]
pub struct Upsampler {
    rate: u32,
    held: Sample,
    remaining: u32,
}

impl Upsampler {
    pub fn new(rate: u32) -> Self {
        Self { rate: rate.max(1), held: Sample::IDLE, remaining: 0 }
    }

    pub fn set_rate(&mut self, rate: u32) {
        self.rate = rate.max(1);
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }
}

impl ClockedStage for Upsampler {
    fn name(&self) -> &'static str {
        "upsampler"
    }

    fn step(&mut self, input: Sample) -> Sample {
        if input.valid {
            self.held = input;
            self.remaining = self.rate;
        }
        if self.remaining == 0 {
            return Sample::IDLE;
        }
        self.remaining -= 1;
        // only the final repetition carries the burst marker
        Sample { last: self.held.last && self.remaining == 0, ..self.held }
    }

    fn reset(&mut self) {
        self.held = Sample::IDLE;
        self.remaining = 0;
    }
}

/// Keeps every `rate`-th valid sample
#[derive(Debug, Clone, Default)]
pub struct Decimator {
    rate: u32,
    counter: u32,
    pending_last: bool,
}

impl Decimator {
    pub fn new(rate: u32) -> Self {
        Self { rate: rate.max(1), counter: 0, pending_last: false }
    }

    pub fn set_rate(&mut self, rate: u32) {
        let rate = rate.max(1);
        if rate != self.rate {
            trace!("Decimator rate {} -> {}", self.rate, rate);
            self.rate = rate;
            self.counter = 0;
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }
}

impl ClockedStage for Decimator {
    fn name(&self) -> &'static str {
        "decimator"
    }

    fn step(&mut self, input: Sample) -> Sample {
        if !input.valid {
            return Sample::IDLE;
        }
        self.pending_last |= input.last;
        self.counter += 1;
        if self.counter < self.rate {
            return Sample::IDLE;
        }
        self.counter = 0;
        let last = std::mem::take(&mut self.pending_last);
        input.with_last(last)
    }

    fn reset(&mut self) {
        self.counter = 0;
        self.pending_last = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_stage;

    #[test]
    fn test_upsampler_holds() {
        let mut up = Upsampler::new(3);
        let inputs = [Sample::new(5, -5).with_last(true), Sample::IDLE, Sample::IDLE, Sample::IDLE];
        let out = run_stage(&mut up, inputs);
        assert!(out[..3].iter().all(|s| s.valid && s.i == 5 && s.q == -5));
        assert_eq!(out.iter().map(|s| s.last).collect::<Vec<_>>(), vec![false, false, true, false]);
        assert!(!out[3].valid);
    }

    #[test]
    fn test_upsampler_rate_zero_is_passthrough() {
        let mut up = Upsampler::new(0);
        let out = run_stage(&mut up, [Sample::new(1, 2), Sample::IDLE]);
        assert_eq!(out, vec![Sample::new(1, 2), Sample::IDLE]);
    }

    #[test]
    fn test_decimator_keeps_every_nth() {
        let mut dec = Decimator::new(4);
        let inputs = (0..12).map(|n| Sample::new(n, -n).with_last(n == 9));
        let out: Vec<Sample> = run_stage(&mut dec, inputs).into_iter().filter(|s| s.valid).collect();
        assert_eq!(out.iter().map(|s| s.i).collect::<Vec<_>>(), vec![3, 7, 11]);
        assert!(!out[1].last);
        assert!(out[2].last);
    }
}
