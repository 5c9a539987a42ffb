//! Robust statistics used for bin finalization and event aggregation.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use serde::{Deserialize, Serialize};

/// Lower edge of the central 68% interval.
pub const Q16: f64 = 0.158_655_253_9;
/// Upper edge of the central 68% interval.
pub const Q84: f64 = 0.841_344_746_1;

/// Quantile of already sorted data with linear interpolation between ranks.
#[must_use]
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let q = q.clamp(0.0, 1.0);
            let pos = q * (n - 1) as f64;
            let i = pos.floor() as usize;
            let j = pos.ceil() as usize;
            if i == j {
                return Some(sorted[i]);
            }
            let t = pos - i as f64;
            Some((1.0 - t) * sorted[i] + t * sorted[j])
        }
    }
}

/// Median of unsorted data (NaNs are ignored).
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    quantile_linear_sorted(&sorted, 0.5)
}

/// Median absolute deviation of `values` around `center`.
#[must_use]
pub fn median_absolute_deviation(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Weighted quantiles of `(value, weight)` samples.
///
/// Samples are sorted by value (ties by weight), so the result does not
/// depend on insertion order. Sample `i` sits at cumulative position
/// `(C_i - w_i / 2) / W`; quantiles between positions are interpolated
/// linearly and clamp to the extreme values outside.
#[must_use]
pub fn weighted_quantiles(samples: &[(f64, f64)], probs: &[f64]) -> Option<Vec<f64>> {
    let mut sorted: Vec<(f64, f64)> = samples
        .iter()
        .copied()
        .filter(|(v, w)| v.is_finite() && *w > 0.0)
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let total: f64 = sorted.iter().map(|(_, w)| w).sum();
    let mut positions = Vec::with_capacity(sorted.len());
    let mut cumulative = 0.0;
    for (_, w) in &sorted {
        cumulative += w;
        positions.push((cumulative - 0.5 * w) / total);
    }

    let last = sorted.len() - 1;
    let result = probs
        .iter()
        .map(|&q| {
            if q <= positions[0] {
                return sorted[0].0;
            }
            if q >= positions[last] {
                return sorted[last].0;
            }
            // First position strictly above q; the one before is <= q.
            let upper = positions.partition_point(|&p| p <= q);
            let lower = upper - 1;
            let span = positions[upper] - positions[lower];
            if span <= 0.0 {
                return sorted[lower].0;
            }
            let t = (q - positions[lower]) / span;
            sorted[lower].0 + (sorted[upper].0 - sorted[lower].0) * t
        })
        .collect();
    Some(result)
}

/// Fixed-range weighted histogram of target values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueHistogram {
    /// Lower bound of histogram range.
    min: f64,
    /// Upper bound of histogram range.
    max: f64,
    /// Weighted bin contents.
    counts: Vec<f64>,
    /// Weight below `min`.
    underflow: f64,
    /// Weight at or above `max`.
    overflow: f64,
}

impl ValueHistogram {
    /// Create a histogram with the given range and number of bins.
    #[must_use]
    pub fn new(min: f64, max: f64, num_bins: usize) -> Self {
        Self {
            min,
            max,
            counts: vec![0.0; num_bins.max(1)],
            underflow: 0.0,
            overflow: 0.0,
        }
    }

    /// Build a histogram from weighted samples.
    #[must_use]
    pub fn from_samples(min: f64, max: f64, num_bins: usize, samples: &[(f64, f64)]) -> Self {
        let mut hist = Self::new(min, max, num_bins);
        for &(value, weight) in samples {
            hist.add(value, weight);
        }
        hist
    }

    #[must_use]
    pub fn num_bins(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn bin_width(&self) -> f64 {
        (self.max - self.min) / self.counts.len() as f64
    }

    #[must_use]
    pub fn bin_center(&self, index: usize) -> f64 {
        self.min + (index as f64 + 0.5) * self.bin_width()
    }

    #[must_use]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Weight inside the histogram range.
    #[must_use]
    pub fn in_range(&self) -> f64 {
        self.counts.iter().sum()
    }

    #[must_use]
    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    #[must_use]
    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    /// Add a weighted sample.
    #[inline]
    pub fn add(&mut self, value: f64, weight: f64) {
        if value < self.min {
            self.underflow += weight;
        } else if value >= self.max {
            self.overflow += weight;
        } else {
            let bin = ((value - self.min) / self.bin_width()) as usize;
            let last = self.counts.len() - 1;
            self.counts[bin.min(last)] += weight;
        }
    }

    /// Quantile from the cumulative distribution, linear inside each bin.
    #[must_use]
    pub fn quantile(&self, q: f64) -> Option<f64> {
        let total = self.in_range();
        if total <= 0.0 {
            return None;
        }
        let target = q.clamp(0.0, 1.0) * total;
        let width = self.bin_width();
        let mut cumulative = 0.0;
        for (i, &count) in self.counts.iter().enumerate() {
            if count > 0.0 && cumulative + count >= target {
                let fraction = ((target - cumulative) / count).clamp(0.0, 1.0);
                return Some(self.min + (i as f64 + fraction) * width);
            }
            cumulative += count;
        }
        Some(self.max)
    }

    /// Index of the bin with the largest content.
    #[must_use]
    pub fn mode_bin(&self) -> Option<usize> {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}
