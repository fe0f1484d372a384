//! Relative-error quantile sketch.
//!
//! Values are mapped to logarithmic buckets `⌈log_γ(v)⌉` with
//! `γ = (1 + α) / (1 − α)`, so any quantile read back from the sketch is within
//! `α` (relative) of the true value. Bucket indices are signed 16-bit for the
//! whole `Duration` range in nanoseconds; [`Histogram::new`] refuses an
//! accuracy for which that does not hold.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::HistogramError;

/// Accuracy used for every leaf metric.
pub const RELATIVE_ACCURACY: f64 = 0.01;

/// Values at or below this share bucket 0 (one nanosecond).
const MIN_INDEXABLE_VALUE: f64 = 1.0;

/// `Duration::MAX` expressed in nanoseconds.
const MAX_TRACKED_VALUE: f64 = 1.844_674_407_370_955_2e28;

#[derive(Debug, Clone)]
pub struct Histogram {
    relative_accuracy: f64,
    gamma: f64,
    ln_gamma: f64,
    bins: BTreeMap<i16, u32>,
    /// Exact zeros, kept apart so quantiles can report them as 0.
    zero_count: u64,
    count: u64,
}

impl Histogram {
    pub fn new(relative_accuracy: f64) -> Result<Self, HistogramError> {
        if !(relative_accuracy > 0.0 && relative_accuracy < 1.0) {
            return Err(HistogramError::InvalidAccuracy(relative_accuracy));
        }

        let gamma = (1.0 + relative_accuracy) / (1.0 - relative_accuracy);
        let ln_gamma = gamma.ln();
        let max_index = (MAX_TRACKED_VALUE.ln() / ln_gamma).ceil();
        if max_index > f64::from(i16::MAX) {
            return Err(HistogramError::InvalidAccuracy(relative_accuracy));
        }

        Ok(Self {
            relative_accuracy,
            gamma,
            ln_gamma,
            bins: BTreeMap::new(),
            zero_count: 0,
            count: 0,
        })
    }

    /// Histogram at [`RELATIVE_ACCURACY`].
    pub fn with_default_accuracy() -> Self {
        Self {
            relative_accuracy: RELATIVE_ACCURACY,
            gamma: (1.0 + RELATIVE_ACCURACY) / (1.0 - RELATIVE_ACCURACY),
            ln_gamma: ((1.0 + RELATIVE_ACCURACY) / (1.0 - RELATIVE_ACCURACY)).ln(),
            bins: BTreeMap::new(),
            zero_count: 0,
            count: 0,
        }
    }

    pub fn relative_accuracy(&self) -> f64 {
        self.relative_accuracy
    }

    /// Check that `value` would be accepted by [`add`](Self::add) without
    /// inserting it.
    pub fn validate(&self, value: f64) -> Result<(), HistogramError> {
        self.index(value).map(|_| ())
    }

    /// Insert one non-negative, finite value.
    pub fn add(&mut self, value: f64) -> Result<(), HistogramError> {
        let index = self.index(value)?;
        if value == 0.0 {
            self.zero_count += 1;
        } else {
            let bin = self.bins.entry(index).or_insert(0);
            *bin = bin.saturating_add(1);
        }
        self.count += 1;
        Ok(())
    }

    /// Insert a duration, measured in nanoseconds.
    pub fn add_duration(&mut self, duration: Duration) -> Result<(), HistogramError> {
        self.add(duration.as_nanos() as f64)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `(bucket index, count)` pairs in ascending index order. Exact zeros
    /// are reported under bucket 0.
    pub fn bins(&self) -> impl Iterator<Item = (i16, u32)> + '_ {
        self.wire_bins().into_iter()
    }

    /// Approximate value at quantile `q` (0.0 ..= 1.0).
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.is_empty() || !(0.0..=1.0).contains(&q) {
            return None;
        }

        let rank = (q * (self.count - 1) as f64).floor() as u64;
        if self.zero_count > rank {
            return Some(0.0);
        }
        let mut cumulative = self.zero_count;
        for (&index, &count) in &self.bins {
            cumulative += u64::from(count);
            if cumulative > rank {
                return Some(self.value(index));
            }
        }
        self.bins.keys().next_back().map(|&index| self.value(index))
    }

    fn wire_bins(&self) -> BTreeMap<i16, u32> {
        let mut bins = self.bins.clone();
        if self.zero_count > 0 {
            let zeros = u32::try_from(self.zero_count).unwrap_or(u32::MAX);
            let bin = bins.entry(0).or_insert(0);
            *bin = bin.saturating_add(zeros);
        }
        bins
    }

    fn index(&self, value: f64) -> Result<i16, HistogramError> {
        if !value.is_finite() || value < 0.0 {
            return Err(HistogramError::InvalidInput(value));
        }
        if value <= MIN_INDEXABLE_VALUE {
            return Ok(0);
        }
        let index = (value.ln() / self.ln_gamma).ceil();
        if index > f64::from(i16::MAX) {
            return Err(HistogramError::InvalidInput(value));
        }
        Ok(index as i16)
    }

    /// Midpoint (in relative terms) of bucket `index`.
    fn value(&self, index: i16) -> f64 {
        2.0 * self.gamma.powi(i32::from(index)) / (self.gamma + 1.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::with_default_accuracy()
    }
}

/// Wire form: `{"indexes": [i16...], "counts": [i32...]}`.
impl Serialize for Histogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bins = self.wire_bins();
        let indexes: Vec<i16> = bins.keys().copied().collect();
        let counts: Vec<i32> = bins
            .values()
            .map(|&c| i32::try_from(c).unwrap_or(i32::MAX))
            .collect();

        let mut state = serializer.serialize_struct("Histogram", 2)?;
        state.serialize_field("indexes", &indexes)?;
        state.serialize_field("counts", &counts)?;
        state.end()
    }
}
