//! Flow-Controlled Streaming Queue
//!
//! Fixed-capacity word queue between the register bus and the sample
//! pipeline. The write side and the read side are driven from different
//! clock domains; occupancy and all flags are recomputed on every push and
//! pop so each side always sees flags consistent with the current count.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use common::ConfigError;

use crate::InterfaceError;

/// Largest threshold the 10-bit threshold fields can express
pub const MAX_THRESHOLD: usize = 1023;

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity in words
    pub depth: usize,
    /// Word width in bits
    pub width: u8,
    /// `near_full` asserts when occupancy >= this value
    pub near_full: usize,
    /// `near_empty` asserts when occupancy <= this value
    pub near_empty: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            depth: 1024,
            width: 32,
            near_full: 1023,
            near_empty: 0,
        }
    }
}

impl QueueConfig {
    /// Configuration with default thresholds for a given depth
    pub fn with_depth(depth: usize) -> Self {
        Self {
            depth,
            near_full: depth.saturating_sub(1),
            ..Self::default()
        }
    }
}

/// Snapshot of the queue flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueFlags {
    pub full: bool,
    pub empty: bool,
    pub near_full: bool,
    pub near_empty: bool,
}

/// Streaming queue with overrun/underrun bookkeeping
///
/// Both counters are 16 bits wide and wrap on overflow.
#[derive(Debug, Clone)]
pub struct StreamingQueue {
    buffer: Vec<u32>,
    read_idx: usize,
    write_idx: usize,
    count: usize,
    mask: u32,
    near_full: usize,
    near_empty: usize,
    flags: QueueFlags,
    overruns: u16,
    underruns: u16,
}

impl StreamingQueue {
    /// Create a new queue
    pub fn new(config: QueueConfig) -> Result<Self, InterfaceError> {
        if config.depth == 0 {
            return Err(ConfigError::InvalidConfig("queue depth must be at least 1".to_string()).into());
        }
        if config.width == 0 || config.width > 32 {
            return Err(ConfigError::InvalidWidth { width: config.width as u32, max: 32 }.into());
        }
        if config.near_full > config.depth || config.near_empty > config.depth {
            return Err(ConfigError::InvalidConfig(format!(
                "thresholds near_full={} near_empty={} exceed depth {}",
                config.near_full, config.near_empty, config.depth
            ))
            .into());
        }

        let mask = if config.width == 32 { u32::MAX } else { (1u32 << config.width) - 1 };

        debug!(
            "Streaming queue: depth={} width={} near_full={} near_empty={}",
            config.depth, config.width, config.near_full, config.near_empty
        );

        let mut queue = Self {
            buffer: vec![0; config.depth],
            read_idx: 0,
            write_idx: 0,
            count: 0,
            mask,
            near_full: config.near_full,
            near_empty: config.near_empty,
            flags: QueueFlags::default(),
            overruns: 0,
            underruns: 0,
        };
        queue.update_flags();
        Ok(queue)
    }

    fn update_flags(&mut self) {
        self.flags = QueueFlags {
            full: self.count == self.buffer.len(),
            empty: self.count == 0,
            near_full: self.count >= self.near_full,
            near_empty: self.count <= self.near_empty,
        };
    }

    /// Push a word; a push into a full queue is an overrun and the word is dropped
    pub fn push(&mut self, word: u32) -> bool {
        if self.flags.full {
            self.overruns = self.overruns.wrapping_add(1);
            warn!("Queue overrun: dropped word {:08x} (overruns={})", word, self.overruns);
            return false;
        }

        self.buffer[self.write_idx] = word & self.mask;
        self.write_idx = (self.write_idx + 1) % self.buffer.len();
        self.count += 1;
        self.update_flags();
        trace!("Queue push {:08x}: {}/{}", word, self.count, self.buffer.len());
        true
    }

    /// Pop the oldest word; popping an empty queue is an underrun
    pub fn pop(&mut self) -> Option<u32> {
        if self.flags.empty {
            self.underruns = self.underruns.wrapping_add(1);
            warn!("Queue underrun (underruns={})", self.underruns);
            return None;
        }

        let word = self.buffer[self.read_idx];
        self.read_idx = (self.read_idx + 1) % self.buffer.len();
        self.count -= 1;
        self.update_flags();
        trace!("Queue pop {:08x}: {}/{}", word, self.count, self.buffer.len());
        Some(word)
    }

    /// Oldest word without removing it
    pub fn peek(&self) -> Option<u32> {
        if self.flags.empty {
            None
        } else {
            Some(self.buffer[self.read_idx])
        }
    }

    /// Update the threshold comparisons at runtime
    ///
    /// Values beyond the depth are clamped; the flags are recomputed at once.
    pub fn set_thresholds(&mut self, near_full: usize, near_empty: usize) {
        let depth = self.buffer.len();
        if near_full > depth || near_empty > depth {
            warn!(
                "Queue thresholds near_full={} near_empty={} clamped to depth {}",
                near_full, near_empty, depth
            );
        }
        self.near_full = near_full.min(depth);
        self.near_empty = near_empty.min(depth);
        self.update_flags();
    }

    pub fn thresholds(&self) -> (usize, usize) {
        (self.near_full, self.near_empty)
    }

    /// Clear occupancy, flags and counters
    pub fn reset(&mut self) {
        self.read_idx = 0;
        self.write_idx = 0;
        self.count = 0;
        self.overruns = 0;
        self.underruns = 0;
        self.update_flags();
    }

    pub fn flags(&self) -> QueueFlags {
        self.flags
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.flags.empty
    }

    pub fn is_full(&self) -> bool {
        self.flags.full
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn free_space(&self) -> usize {
        self.buffer.len() - self.count
    }

    pub fn overruns(&self) -> u16 {
        self.overruns
    }

    pub fn underruns(&self) -> u16 {
        self.underruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::VecDeque;

    fn queue(depth: usize) -> StreamingQueue {
        StreamingQueue::new(QueueConfig::with_depth(depth)).unwrap()
    }

    fn assert_flags_consistent(q: &StreamingQueue) {
        let flags = q.flags();
        let (near_full, near_empty) = q.thresholds();
        assert_eq!(flags.full, q.len() == q.capacity());
        assert_eq!(flags.empty, q.len() == 0);
        assert_eq!(flags.near_full, q.len() >= near_full);
        assert_eq!(flags.near_empty, q.len() <= near_empty);
    }

    #[test]
    fn test_invalid_config() {
        assert!(StreamingQueue::new(QueueConfig::with_depth(0)).is_err());
        let config = QueueConfig { depth: 4, near_full: 5, ..QueueConfig::with_depth(4) };
        assert!(StreamingQueue::new(config).is_err());
        let config = QueueConfig { width: 33, ..QueueConfig::with_depth(4) };
        assert!(StreamingQueue::new(config).is_err());
    }

    #[test]
    fn test_near_full_scenario() {
        let mut q = queue(4);
        q.set_thresholds(3, 0);
        q.push(1);
        q.push(2);
        assert!(!q.flags().near_full);
        q.push(3);
        assert!(q.flags().near_full);
        q.pop();
        assert_eq!(q.len(), 2);
        assert!(!q.flags().near_full);
    }

    #[test]
    fn test_randomized_ordering_and_flags() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut q = queue(16);
        q.set_thresholds(12, 3);
        let mut model = VecDeque::new();
        let mut next = 0u32;

        for _ in 0..10_000 {
            if rng.gen_bool(0.5) {
                if model.len() < 16 {
                    assert!(q.push(next));
                    model.push_back(next);
                    next += 1;
                }
            } else if !model.is_empty() {
                assert_eq!(q.pop(), model.pop_front());
            }
            assert_eq!(q.len(), model.len());
            assert_flags_consistent(&q);
        }
        assert_eq!(q.overruns(), 0);
        assert_eq!(q.underruns(), 0);
    }

    #[test]
    fn test_overrun_leaves_data_unchanged() {
        let mut q = queue(4);
        for w in 0..4 {
            assert!(q.push(w));
        }
        for _ in 0..7 {
            assert!(!q.push(0xdead));
        }
        assert_eq!(q.overruns(), 7);
        assert_eq!((0..4).map(|_| q.pop().unwrap()).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_underrun_counting() {
        let mut q = queue(4);
        for _ in 0..5 {
            assert_eq!(q.pop(), None);
        }
        assert_eq!(q.underruns(), 5);
        assert!(q.is_empty());
        assert_flags_consistent(&q);
    }

    #[test]
    fn test_counters_wrap() {
        let mut q = queue(1);
        for _ in 0..=u16::MAX as u32 {
            q.pop();
        }
        assert_eq!(q.underruns(), 0);
        q.pop();
        assert_eq!(q.underruns(), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut q = queue(2);
        q.push(1);
        q.push(2);
        q.push(3);
        q.reset();
        assert!(q.is_empty());
        assert_eq!(q.overruns(), 0);
        assert_eq!(q.peek(), None);
        assert_flags_consistent(&q);
    }

    #[test]
    fn test_word_width_mask() {
        let config = QueueConfig { width: 8, ..QueueConfig::with_depth(2) };
        let mut q = StreamingQueue::new(config).unwrap();
        q.push(0x1ff);
        assert_eq!(q.pop(), Some(0xff));
    }
}
