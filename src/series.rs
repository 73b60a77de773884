//! Rolling dose-rate window for the chart.

use std::collections::VecDeque;

use crate::domain::Sample;

/// Default window size (samples).
pub const DEFAULT_MAX_POINTS: usize = 20;

/// Last `capacity` samples in arrival order, oldest first.
///
/// Insertion order is kept as-is; samples are never re-sorted by timestamp.
#[derive(Debug, Clone)]
pub struct SeriesBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SeriesBuffer {
    /// `capacity` is clamped to at least one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SeriesBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POINTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(v: f64) -> Sample {
        Sample::new(v, Utc::now())
    }

    #[test]
    fn empty_then_one() {
        let mut buf = SeriesBuffer::default();
        assert!(buf.snapshot().is_empty());
        buf.push(sample(0.5));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.snapshot()[0].dose_usv_h, 0.5);
    }

    #[test]
    fn keeps_last_twenty_oldest_first() {
        let mut buf = SeriesBuffer::default();
        for v in 1..=25 {
            buf.push(sample(v as f64));
        }
        let values: Vec<f64> = buf.snapshot().iter().map(|s| s.dose_usv_h).collect();
        let expected: Vec<f64> = (6..=25).map(|v| v as f64).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn clear_empties_window() {
        let mut buf = SeriesBuffer::new(3);
        buf.push(sample(1.0));
        buf.push(sample(2.0));
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 3);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buf = SeriesBuffer::new(0);
        buf.push(sample(1.0));
        buf.push(sample(2.0));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.snapshot()[0].dose_usv_h, 2.0);
    }
}
