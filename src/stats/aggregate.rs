//! Exact running count/sum/min/max/average over a multiset of numbers.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StatsError};

/// Running aggregate that supports removal.
///
/// Every retained value is kept in `values` so that `min` and `max` can be
/// recomputed when the current extremum is removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateAccumulator {
    pub count: u64,
    pub total: f64,
    /// None when empty
    pub min: Option<f64>,
    /// None when empty
    pub max: Option<f64>,
    pub avg: f64,
    #[serde(default)]
    pub values: Vec<f64>,
}

impl AggregateAccumulator {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Add one observation. NaN is ignored.
    pub fn add(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }

        self.count += 1;
        self.total += value;
        self.values.push(value);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.avg = self.total / self.count as f64;
    }

    /// Add an optional observation; `None` is a no-op.
    #[inline]
    pub fn add_opt(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.add(v);
        }
    }

    /// Remove one occurrence of `value`.
    ///
    /// Returns false (and logs) when the value is not held, leaving the
    /// accumulator untouched. NaN is ignored and reports true.
    pub fn remove(&mut self, value: f64) -> bool {
        match self.try_remove(value) {
            Ok(()) => true,
            Err(e) => {
                warn!(count = self.count, "{e}");
                false
            }
        }
    }

    pub fn try_remove(&mut self, value: f64) -> Result<()> {
        if value.is_nan() {
            return Ok(());
        }

        let pos = self
            .values
            .iter()
            .rposition(|&v| v == value)
            .ok_or(StatsError::AccumulatorConsistency { value })?;
        self.values.remove(pos);

        self.count -= 1;
        if self.count == 0 {
            self.total = 0.0;
            self.avg = 0.0;
            self.min = None;
            self.max = None;
            return Ok(());
        }

        self.total -= value;
        self.avg = self.total / self.count as f64;

        if self.min == Some(value) {
            self.min = self.values.iter().copied().reduce(f64::min);
        }
        if self.max == Some(value) {
            self.max = self.values.iter().copied().reduce(f64::max);
        }
        Ok(())
    }

    #[inline]
    pub fn remove_opt(&mut self, value: Option<f64>) -> bool {
        value.is_none_or(|v| self.remove(v))
    }

    /// Add every value held by `other`.
    pub fn merge(&mut self, other: &AggregateAccumulator) {
        if self.is_empty() {
            self.clone_from(other);
            return;
        }
        for &v in &other.values {
            self.add(v);
        }
    }

    /// Remove every value held by `other`, one occurrence each.
    /// Returns the number of values that could not be found.
    pub fn unmerge(&mut self, other: &AggregateAccumulator) -> usize {
        other.values.iter().filter(|&&v| !self.remove(v)).count()
    }
}
