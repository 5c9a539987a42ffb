//! Two-dimensional binned statistic table.
//!
//! The grid spans log10(amplitude) on the first axis and impact distance on
//! the second. Each bin accumulates weighted samples of one target quantity
//! in write mode; `finalize` turns them into robust per-bin statistics that
//! are then queried with bilinear interpolation in read mode.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use serde::{Deserialize, Serialize};

use crate::fit::{fit_landau, LandauGuess};
use crate::stats::{weighted_quantiles, ValueHistogram, Q16, Q84};
use crate::{Error, Result};

/// Fixed-width binning of one table axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub min: f64,
    pub max: f64,
    pub bins: usize,
}

impl Axis {
    #[must_use]
    pub fn new(min: f64, max: f64, bins: usize) -> Self {
        Self { min, max, bins }
    }

    #[must_use]
    pub fn bin_width(&self) -> f64 {
        (self.max - self.min) / self.bins as f64
    }

    /// Bin index of `x`, `None` outside `[min, max)`.
    #[inline]
    #[must_use]
    pub fn index(&self, x: f64) -> Option<usize> {
        if !(x >= self.min && x < self.max) {
            return None;
        }
        let bin = ((x - self.min) / self.bin_width()) as usize;
        Some(bin.min(self.bins - 1))
    }

    #[must_use]
    pub fn center(&self, index: usize) -> f64 {
        self.min + (index as f64 + 0.5) * self.bin_width()
    }

    /// Position of `x` in bin-centre units, clamped to the outermost centres.
    fn center_coordinate(&self, x: f64) -> f64 {
        ((x - self.min) / self.bin_width() - 0.5).clamp(0.0, (self.bins - 1) as f64)
    }

    /// Checks that the axis has bins and a positive range.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the axis.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.bins == 0 || !(self.max > self.min) || !self.min.is_finite() || !self.max.is_finite()
        {
            return Err(Error::Config(format!(
                "axis '{name}' needs bins > 0 and finite min < max (got [{}, {}) with {} bins)",
                self.min, self.max, self.bins
            )));
        }
        Ok(())
    }
}

/// Per-table statistic settings fixed at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSettings {
    /// Bins with fewer fills are treated as empty.
    pub min_entries: u64,
    /// Above this many samples a bin switches to its value histogram.
    pub exact_quantile_limit: usize,
    /// Value domain (table units) and histogram resolution.
    pub value_min: f64,
    pub value_max: f64,
    pub value_bins: usize,
    /// Fit a skewed curve for the most probable value.
    pub fit_most_probable: bool,
    pub mpv_min_entries: u64,
    /// Minimum `|upper - lower half width| / full width` that triggers a fit.
    pub mpv_min_asymmetry: f64,
    /// Store the per-bin value histogram with the statistics.
    pub keep_histograms: bool,
}

impl Default for BinSettings {
    fn default() -> Self {
        Self {
            min_entries: 5,
            exact_quantile_limit: 20_000,
            value_min: 0.0,
            value_max: 1.0,
            value_bins: 500,
            fit_most_probable: false,
            mpv_min_entries: 100,
            mpv_min_asymmetry: 0.1,
            keep_histograms: false,
        }
    }
}

impl BinSettings {
    fn histogram(&self) -> ValueHistogram {
        ValueHistogram::new(self.value_min, self.value_max, self.value_bins)
    }

    fn contains_value(&self, value: f64) -> bool {
        value >= self.value_min && value < self.value_max
    }
}

/// Frozen statistics of one bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinStats {
    /// Number of fills.
    pub entries: u64,
    /// Sum of fill weights.
    pub weight: f64,
    pub mean: f64,
    pub median: f64,
    /// Width of the 16%–84% quantile interval.
    pub spread: f64,
    /// Most probable value from the skewed fit, when one was made.
    #[serde(default)]
    pub most_probable: Option<f64>,
    #[serde(default)]
    pub histogram: Option<ValueHistogram>,
}

/// Which per-bin statistic a query interpolates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Median,
    Spread,
    Mean,
    /// Most probable value, falling back to the median where no fit exists.
    MostProbable,
}

impl BinStats {
    #[must_use]
    pub fn get(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Median => self.median,
            Statistic::Spread => self.spread,
            Statistic::Mean => self.mean,
            Statistic::MostProbable => self.most_probable.unwrap_or(self.median),
        }
    }
}

/// Write-mode sample store of one bin.
#[derive(Debug, Clone, Default)]
struct BinAccumulator {
    entries: u64,
    sum_weight: f64,
    sum_weighted_value: f64,
    samples: Vec<(f64, f64)>,
    histogram: Option<ValueHistogram>,
}

impl BinAccumulator {
    fn add(&mut self, value: f64, weight: f64, settings: &BinSettings) {
        self.entries += 1;
        self.sum_weight += weight;
        self.sum_weighted_value += weight * value;

        if let Some(histogram) = self.histogram.as_mut() {
            histogram.add(value, weight);
            return;
        }
        self.samples.push((value, weight));
        if self.samples.len() > settings.exact_quantile_limit {
            let mut histogram = settings.histogram();
            for &(v, w) in &self.samples {
                histogram.add(v, w);
            }
            self.histogram = Some(histogram);
            self.samples = Vec::new();
        }
    }

    fn value_histogram(&self, settings: &BinSettings) -> ValueHistogram {
        self.histogram.clone().unwrap_or_else(|| {
            ValueHistogram::from_samples(
                settings.value_min,
                settings.value_max,
                settings.value_bins,
                &self.samples,
            )
        })
    }

    fn summarize(&self, settings: &BinSettings) -> Option<BinStats> {
        if self.entries == 0 || self.entries < settings.min_entries || self.sum_weight <= 0.0 {
            return None;
        }

        let probs = [Q16, 0.5, Q84];
        let quantiles = match &self.histogram {
            Some(histogram) => probs
                .iter()
                .map(|&q| histogram.quantile(q))
                .collect::<Option<Vec<f64>>>()?,
            None => weighted_quantiles(&self.samples, &probs)?,
        };
        let (q16, median, q84) = (quantiles[0], quantiles[1], quantiles[2]);
        let spread = q84 - q16;

        let most_probable = if settings.fit_most_probable
            && self.entries >= settings.mpv_min_entries
            && spread > 0.0
            && ((q84 - median) - (median - q16)).abs() / spread >= settings.mpv_min_asymmetry
        {
            let histogram = self.value_histogram(settings);
            histogram.mode_bin().and_then(|mode| {
                let guess = LandauGuess {
                    mpv: histogram.bin_center(mode),
                    width: (spread / 3.0).max(histogram.bin_width()),
                    norm: histogram.in_range(),
                };
                fit_landau(&histogram, guess).map(|fit| fit.mpv)
            })
        } else {
            None
        };

        Some(BinStats {
            entries: self.entries,
            weight: self.sum_weight,
            mean: self.sum_weighted_value / self.sum_weight,
            median,
            spread,
            most_probable,
            histogram: settings
                .keep_histograms
                .then(|| self.value_histogram(settings)),
        })
    }
}

/// Binned statistic table over (log10 amplitude, impact distance).
///
/// A table built with [`BinnedStatisticTable::new`] is writable. A table
/// restored from a snapshot carries only its frozen statistics and ignores
/// further fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinnedStatisticTable {
    log_amplitude: Axis,
    distance: Axis,
    settings: BinSettings,
    stats: Vec<Option<BinStats>>,
    #[serde(skip)]
    accumulators: Vec<BinAccumulator>,
    #[serde(skip)]
    dirty: bool,
}

impl BinnedStatisticTable {
    /// Creates an empty, writable table.
    #[must_use]
    pub fn new(log_amplitude: Axis, distance: Axis, settings: BinSettings) -> Self {
        let n = log_amplitude.bins * distance.bins;
        Self {
            log_amplitude,
            distance,
            settings,
            stats: vec![None; n],
            accumulators: vec![BinAccumulator::default(); n],
            dirty: false,
        }
    }

    #[must_use]
    pub fn log_amplitude_axis(&self) -> &Axis {
        &self.log_amplitude
    }

    #[must_use]
    pub fn distance_axis(&self) -> &Axis {
        &self.distance
    }

    #[must_use]
    pub fn settings(&self) -> &BinSettings {
        &self.settings
    }

    /// True once loaded from a snapshot (no samples to refill from).
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// True when the statistics reflect every fill so far.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        !self.dirty
    }

    #[inline]
    fn bin_index(&self, ix: usize, iy: usize) -> usize {
        iy * self.log_amplitude.bins + ix
    }

    /// Frozen statistics of bin `(ix, iy)`.
    #[must_use]
    pub fn bin(&self, ix: usize, iy: usize) -> Option<&BinStats> {
        if ix >= self.log_amplitude.bins || iy >= self.distance.bins {
            return None;
        }
        self.stats[self.bin_index(ix, iy)].as_ref()
    }

    /// Number of bins holding statistics.
    #[must_use]
    pub fn populated_bins(&self) -> usize {
        self.stats.iter().filter(|s| s.is_some()).count()
    }

    /// Total fills over populated bins.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.stats.iter().flatten().map(|s| s.entries).sum()
    }

    /// Accumulates one weighted value.
    ///
    /// Returns `false` without touching the table when the point lies
    /// outside the grid, the value lies outside the value domain, the
    /// inputs are not finite, the weight is not positive, or the table is
    /// read-only.
    #[must_use]
    pub fn fill(&mut self, log_amplitude: f64, distance: f64, value: f64, weight: f64) -> bool {
        if self.is_read_only()
            || !value.is_finite()
            || !(weight > 0.0 && weight.is_finite())
            || !self.settings.contains_value(value)
        {
            return false;
        }
        let (Some(ix), Some(iy)) = (
            self.log_amplitude.index(log_amplitude),
            self.distance.index(distance),
        ) else {
            return false;
        };
        let index = self.bin_index(ix, iy);
        self.accumulators[index].add(value, weight, &self.settings);
        self.dirty = true;
        true
    }

    /// Recomputes all bin statistics from the accumulated samples.
    ///
    /// Calling it again without new fills yields identical statistics.
    /// Read-only tables are left unchanged.
    pub fn finalize(&mut self) {
        if self.is_read_only() {
            return;
        }
        let settings = &self.settings;
        self.stats = self
            .accumulators
            .iter()
            .map(|acc| acc.summarize(settings))
            .collect();
        self.dirty = false;
    }

    /// Interpolated statistic at `(log_amplitude, distance)`.
    ///
    /// Uses bilinear weights over the four surrounding bin centres when all
    /// of them are populated, and inverse-distance weights over the
    /// populated ones otherwise. Points outside the grid clamp to the edge
    /// bins. Returns `None` when no neighbour is populated.
    #[must_use]
    pub fn query(&self, log_amplitude: f64, distance: f64, statistic: Statistic) -> Option<f64> {
        if !log_amplitude.is_finite() || !distance.is_finite() {
            return None;
        }
        let u = self.log_amplitude.center_coordinate(log_amplitude);
        let v = self.distance.center_coordinate(distance);
        let (i0, i1, fx) = bracket(u, self.log_amplitude.bins);
        let (j0, j1, fy) = bracket(v, self.distance.bins);

        let neighbours = [
            (i0, j0, (1.0 - fx) * (1.0 - fy)),
            (i1, j0, fx * (1.0 - fy)),
            (i0, j1, (1.0 - fx) * fy),
            (i1, j1, fx * fy),
        ];
        let values: Vec<Option<f64>> = neighbours
            .iter()
            .map(|&(i, j, _)| self.bin(i, j).map(|s| s.get(statistic)))
            .collect();

        if values.iter().all(Option::is_some) {
            return Some(
                neighbours
                    .iter()
                    .zip(&values)
                    .map(|(&(_, _, w), value)| w * value.unwrap_or_default())
                    .sum(),
            );
        }

        let mut seen: Vec<(usize, usize)> = Vec::with_capacity(4);
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (&(i, j, _), value) in neighbours.iter().zip(&values) {
            let Some(value) = *value else { continue };
            if seen.contains(&(i, j)) {
                continue;
            }
            seen.push((i, j));
            let d = (u - i as f64).hypot(v - j as f64);
            if d < 1e-9 {
                return Some(value);
            }
            weighted += value / d;
            total += 1.0 / d;
        }
        (total > 0.0).then(|| weighted / total)
    }

    /// Checks that the statistics vector matches the grid.
    ///
    /// # Errors
    /// Returns `Error::Config` for malformed axes or a size mismatch.
    pub fn validate(&self) -> Result<()> {
        self.log_amplitude.validate("log_amplitude")?;
        self.distance.validate("distance")?;
        let expected = self.log_amplitude.bins * self.distance.bins;
        if self.stats.len() != expected {
            return Err(Error::Config(format!(
                "table holds {} bins, grid needs {expected}",
                self.stats.len()
            )));
        }
        Ok(())
    }
}

/// Lower/upper neighbour indices and fraction for a clamped centre coordinate.
fn bracket(coordinate: f64, bins: usize) -> (usize, usize, f64) {
    let lower = (coordinate.floor() as usize).min(bins - 1);
    let upper = (lower + 1).min(bins - 1);
    let fraction = if upper == lower {
        0.0
    } else {
        coordinate - lower as f64
    };
    (lower, upper, fraction)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::fit::moyal_pdf;
    use approx::assert_abs_diff_eq;

    struct Lcg(u64);

    impl Lcg {
        fn uniform(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    fn small_table(settings: BinSettings) -> BinnedStatisticTable {
        BinnedStatisticTable::new(Axis::new(2.0, 4.0, 2), Axis::new(0.0, 300.0, 3), settings)
    }

    #[test]
    fn test_axis_index_bounds() {
        let axis = Axis::new(0.0, 300.0, 3);
        assert_eq!(axis.index(0.0), Some(0));
        assert_eq!(axis.index(299.9), Some(2));
        assert_eq!(axis.index(300.0), None);
        assert_eq!(axis.index(-0.1), None);
        assert_eq!(axis.index(f64::NAN), None);
        assert_abs_diff_eq!(axis.center(1), 150.0);
        assert!(Axis::new(1.0, 1.0, 3).validate("x").is_err());
        assert!(Axis::new(0.0, 1.0, 0).validate("x").is_err());
    }

    #[test]
    fn test_fill_rejects_out_of_range() {
        let mut table = small_table(BinSettings::default());
        assert!(!table.fill(1.9, 100.0, 0.5, 1.0));
        assert!(!table.fill(3.0, 350.0, 0.5, 1.0));
        assert!(!table.fill(3.0, 100.0, 1.5, 1.0));
        assert!(!table.fill(3.0, 100.0, 0.5, 0.0));
        assert!(!table.fill(3.0, 100.0, f64::NAN, 1.0));
        assert!(table.fill(3.0, 100.0, 0.5, 1.0));
        assert!(!table.is_finalized());
    }

    #[test]
    fn test_single_bin_round_trip_is_order_independent() {
        let values: Vec<f64> = (0..=1000).map(|i| 0.45 + f64::from(i) / 10_000.0).collect();

        let mut forward = small_table(BinSettings::default());
        for &v in &values {
            assert!(forward.fill(2.5, 50.0, v, 1.0));
        }
        let mut shuffled = small_table(BinSettings::default());
        for k in 0..values.len() {
            // 389 is coprime with 1001, so this visits every index once.
            let v = values[(k * 389) % values.len()];
            assert!(shuffled.fill(2.5, 50.0, v, 1.0));
        }
        forward.finalize();
        shuffled.finalize();

        let a = forward.bin(0, 0).unwrap();
        let b = shuffled.bin(0, 0).unwrap();
        assert_eq!(a.median, b.median);
        assert_eq!(a.spread, b.spread);
        assert_eq!(a.entries, 1001);
        assert_eq!(b.entries, 1001);
        assert_abs_diff_eq!(a.median, 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(a.spread, 0.06827, epsilon = 2e-4);
        assert_abs_diff_eq!(a.mean, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut table = small_table(BinSettings::default());
        for i in 0..50 {
            let _ = table.fill(3.1, 120.0 + f64::from(i), 0.1 + 0.01 * f64::from(i % 7), 1.0);
        }
        table.finalize();
        let first: Vec<_> = (0..3).map(|j| table.bin(1, j).cloned()).collect();
        table.finalize();
        let second: Vec<_> = (0..3).map(|j| table.bin(1, j).cloned()).collect();
        assert_eq!(first, second);
        assert!(table.is_finalized());
    }

    #[test]
    fn test_sparse_bin_is_empty() {
        let mut table = small_table(BinSettings {
            min_entries: 5,
            ..BinSettings::default()
        });
        for _ in 0..4 {
            assert!(table.fill(2.5, 50.0, 0.3, 1.0));
        }
        table.finalize();
        assert!(table.bin(0, 0).is_none());
        assert_eq!(table.populated_bins(), 0);
        assert_eq!(table.query(2.5, 50.0, Statistic::Median), None);
    }

    #[test]
    fn test_query_bilinear_and_clamped() {
        let mut table = small_table(BinSettings {
            min_entries: 1,
            ..BinSettings::default()
        });
        // Value grows with the distance bin: 0.1, 0.2, 0.3.
        for ix in 0..2 {
            for iy in 0..3 {
                let la = 2.5 + f64::from(ix);
                let d = 50.0 + 100.0 * f64::from(iy);
                assert!(table.fill(la, d, 0.1 * f64::from(iy + 1), 1.0));
            }
        }
        table.finalize();

        assert_abs_diff_eq!(table.query(2.5, 50.0, Statistic::Median).unwrap(), 0.1);
        assert_abs_diff_eq!(
            table.query(3.0, 100.0, Statistic::Median).unwrap(),
            0.15,
            epsilon = 1e-12
        );
        // Beyond the grid the edge bins are used.
        assert_abs_diff_eq!(
            table.query(9.0, 1000.0, Statistic::Median).unwrap(),
            0.3,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            table.query(0.0, -50.0, Statistic::Median).unwrap(),
            0.1,
            epsilon = 1e-12
        );
        assert_eq!(table.query(f64::NAN, 10.0, Statistic::Median), None);
    }

    #[test]
    fn test_query_skips_empty_neighbours() {
        let mut table = small_table(BinSettings {
            min_entries: 1,
            ..BinSettings::default()
        });
        assert!(table.fill(2.5, 50.0, 0.2, 1.0));
        assert!(table.fill(2.5, 150.0, 0.4, 1.0));
        table.finalize();

        // Midway between the two populated centres, the two empty bins of
        // the second amplitude column are ignored.
        let value = table.query(2.5, 100.0, Statistic::Median).unwrap();
        assert_abs_diff_eq!(value, 0.3, epsilon = 1e-12);
        // Far corner with no populated neighbour at all.
        assert_eq!(table.query(3.5, 250.0, Statistic::Median), None);
    }

    #[test]
    fn test_histogram_approximation_for_large_bins() {
        let settings = BinSettings {
            exact_quantile_limit: 100,
            value_bins: 100,
            ..BinSettings::default()
        };
        let mut table = small_table(settings);
        for i in 0..1000 {
            assert!(table.fill(2.5, 50.0, (f64::from(i) + 0.5) / 1000.0, 1.0));
        }
        table.finalize();
        let stats = table.bin(0, 0).unwrap();
        assert_eq!(stats.entries, 1000);
        assert_abs_diff_eq!(stats.median, 0.5, epsilon = 1e-2);
        assert_abs_diff_eq!(stats.spread, Q84 - Q16, epsilon = 1e-2);
    }

    #[test]
    fn test_most_probable_fit_on_skewed_bin() {
        let settings = BinSettings {
            value_min: 0.0,
            value_max: 4.0,
            value_bins: 80,
            fit_most_probable: true,
            mpv_min_entries: 100,
            keep_histograms: true,
            ..BinSettings::default()
        };
        let mut table = small_table(settings);
        let mut rng = Lcg(7);
        let peak = moyal_pdf(1.0, 1.0, 0.2);
        let mut accepted = 0;
        while accepted < 5000 {
            let x = 4.0 * rng.uniform();
            if rng.uniform() * peak < moyal_pdf(x, 1.0, 0.2) {
                assert!(table.fill(2.5, 50.0, x, 1.0));
                accepted += 1;
            }
        }
        table.finalize();
        let stats = table.bin(0, 0).unwrap();
        let mpv = stats.most_probable.expect("skewed bin should be fitted");
        assert_abs_diff_eq!(mpv, 1.0, epsilon = 0.05);
        assert!(mpv < stats.median);
        assert!(stats.histogram.is_some());
        assert_abs_diff_eq!(
            table.query(2.5, 50.0, Statistic::MostProbable).unwrap(),
            mpv
        );
    }

    #[test]
    fn test_snapshot_is_read_only() {
        let mut table = small_table(BinSettings {
            min_entries: 1,
            ..BinSettings::default()
        });
        assert!(table.fill(2.5, 50.0, 0.2, 1.0));
        table.finalize();

        let json = serde_json::to_string(&table).unwrap();
        let mut restored: BinnedStatisticTable = serde_json::from_str(&json).unwrap();
        assert!(restored.is_read_only());
        assert!(restored.validate().is_ok());
        assert_eq!(restored.bin(0, 0), table.bin(0, 0));
        assert!(!restored.fill(2.5, 50.0, 0.3, 1.0));
        restored.finalize();
        assert_eq!(restored.bin(0, 0), table.bin(0, 0));
    }
}
