//! Clock Domain Synchronizer
//!
//! A fixed-depth register chain clocked by the receiving domain. A value
//! presented at the input appears at the output exactly `DEPTH` receiving
//! edges later, and values are never reordered.
//!
//! Multi-bit words are carried whole. That is only sound when the producer
//! holds the word stable for at least `DEPTH` receiving edges, which holds
//! for configuration registers and for slowly moving counters.

/// Register chain of `DEPTH` stages
#[derive(Debug, Clone)]
pub struct Synchronizer<T: Copy + Default, const DEPTH: usize = 2> {
    stages: [T; DEPTH],
}

impl<T: Copy + Default, const DEPTH: usize> Default for Synchronizer<T, DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const DEPTH: usize> Synchronizer<T, DEPTH> {
    /// Observation latency in receiving-domain edges
    pub const LATENCY: usize = DEPTH;

    pub fn new() -> Self {
        Self::with_initial(T::default())
    }

    /// Chain preloaded with a reset value
    pub fn with_initial(value: T) -> Self {
        Self { stages: [value; DEPTH] }
    }

    /// Clock the chain once and return the new output
    pub fn tick(&mut self, input: T) -> T {
        self.stages.rotate_right(1);
        self.stages[0] = input;
        self.output()
    }

    /// Current output without clocking
    pub fn output(&self) -> T {
        self.stages[DEPTH - 1]
    }

    /// Force every stage to a value
    pub fn reset(&mut self, value: T) {
        self.stages = [value; DEPTH];
    }
}
