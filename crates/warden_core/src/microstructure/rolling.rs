//! Bounded rolling buffer with percentile reads.

use std::collections::VecDeque;

/// Linear-interpolation percentile over an already-sorted slice.
/// `pct` is in `[0, 100]`; out-of-range values clamp to the ends.
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let pct = pct.clamp(0.0, 100.0);
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Fixed-capacity FIFO of recent observations. Non-finite values are
/// dropped on push so one bad tick cannot poison every later percentile.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buf: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RollingWindow {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Percentile over the retained values; `None` while empty.
    pub fn percentile(&self, pct: f64) -> Option<f64> {
        let mut values: Vec<f64> = self.buf.iter().copied().collect();
        values.sort_by(f64::total_cmp);
        percentile(&values, pct)
    }
}
