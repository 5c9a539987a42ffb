//! Array-level combination of per-telescope predictions.
#![allow(clippy::cast_precision_loss)]

use serde::{Deserialize, Serialize};
use showerlut_core::stats::{median, median_absolute_deviation};
use showerlut_core::{Aggregation, LookupConfig, Quantity};

use crate::table_set::Prediction;

/// Per-telescope input to the aggregation, in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    /// Measured value (shape quantities only).
    pub measured: Option<f64>,
    /// Interpolated prediction in physical units.
    pub prediction: Prediction,
    /// Distance between shower core and telescope (m).
    pub impact_distance_m: f64,
}

/// Event-level estimate of one quantity. `None` fields are undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantityEstimate {
    /// Spread-weighted residual (shape) or combined energy (TeV).
    pub value: Option<f64>,
    /// Mean of measured / predicted (shape only).
    pub mean_scaled: Option<f64>,
    pub chi2: Option<f64>,
    /// Degrees of freedom, `n_used - 1`.
    pub dof: Option<usize>,
    /// Uncertainty of `value`.
    pub resolution: Option<f64>,
    /// Telescopes entering the combination.
    pub n_used: usize,
    /// Telescopes dropped as outliers.
    pub n_rejected: usize,
}

impl QuantityEstimate {
    /// Whether the combined value exists.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.value.is_some()
    }
}

/// Combines telescope predictions with the shape or energy rule.
#[derive(Debug, Clone, Copy)]
pub struct EventAggregator<'a> {
    config: &'a LookupConfig,
}

impl<'a> EventAggregator<'a> {
    /// Creates an aggregator using the outlier and radial settings of `config`.
    #[must_use]
    pub fn new(config: &'a LookupConfig) -> Self {
        Self { config }
    }

    /// Applies the rule belonging to `quantity`.
    #[must_use]
    pub fn aggregate(&self, quantity: Quantity, contributions: &[Contribution]) -> QuantityEstimate {
        match quantity.aggregation() {
            Aggregation::ShapeResidual => self.shape(contributions),
            Aggregation::EnergyMean => self.energy(contributions),
        }
    }

    /// Spread-weighted residual `Σ r·p²/s² / Σ p²/s²` with `r = (m - p)/s`.
    #[must_use]
    pub fn shape(&self, contributions: &[Contribution]) -> QuantityEstimate {
        let used: Vec<(f64, Prediction)> = contributions
            .iter()
            .filter_map(|c| {
                let m = c.measured?;
                let p = c.prediction;
                (m.is_finite() && p.value.is_finite() && p.spread > 0.0 && p.spread.is_finite())
                    .then_some((m, p))
            })
            .collect();
        if used.is_empty() {
            return QuantityEstimate::default();
        }

        let mut sum_w = 0.0;
        let mut sum_w2 = 0.0;
        let mut sum_rw = 0.0;
        for &(m, p) in &used {
            let w = (p.value / p.spread).powi(2);
            sum_w += w;
            sum_w2 += w * w;
            sum_rw += (m - p.value) / p.spread * w;
        }
        let value = (sum_w > 0.0).then(|| sum_rw / sum_w);

        let scaled: Vec<f64> = used
            .iter()
            .filter(|(_, p)| p.value != 0.0)
            .map(|(m, p)| m / p.value)
            .collect();
        let mean_scaled =
            (!scaled.is_empty()).then(|| scaled.iter().sum::<f64>() / scaled.len() as f64);

        let n = used.len();
        let (chi2, dof, resolution) = match value {
            Some(v) if n >= 2 => {
                let chi2 = used
                    .iter()
                    .map(|&(m, p)| ((m - p.value) / p.spread - v).powi(2))
                    .sum();
                (Some(chi2), Some(n - 1), Some(sum_w2.sqrt() / sum_w))
            }
            _ => (None, None, None),
        };

        QuantityEstimate {
            value,
            mean_scaled,
            chi2,
            dof,
            resolution,
            n_used: n,
            n_rejected: 0,
        }
    }

    /// Outlier-rejected weighted mean with weights `p/s²` times the radial
    /// factor.
    #[must_use]
    pub fn energy(&self, contributions: &[Contribution]) -> QuantityEstimate {
        let usable: Vec<&Contribution> = contributions
            .iter()
            .filter(|c| {
                let p = c.prediction;
                p.value > 0.0 && p.value.is_finite() && p.spread > 0.0 && p.spread.is_finite()
            })
            .collect();
        if usable.is_empty() {
            return QuantityEstimate::default();
        }

        let kept = self.reject_outliers(&usable);
        let n_rejected = usable.len() - kept.len();

        let mut sum_w = 0.0;
        let mut sum_wp = 0.0;
        let mut sum_inv_var = 0.0;
        for c in &kept {
            let p = c.prediction;
            let w = p.value / (p.spread * p.spread) * self.radial_factor(c.impact_distance_m);
            sum_w += w;
            sum_wp += w * p.value;
            sum_inv_var += 1.0 / (p.spread * p.spread);
        }
        let value = (sum_w > 0.0).then(|| sum_wp / sum_w);

        let n = kept.len();
        let (chi2, dof, resolution) = match value {
            Some(e) if n >= 2 => {
                let chi2 = kept
                    .iter()
                    .map(|c| ((c.prediction.value - e) / c.prediction.spread).powi(2))
                    .sum();
                (Some(chi2), Some(n - 1), Some(1.0 / sum_inv_var.sqrt()))
            }
            _ => (None, None, None),
        };

        QuantityEstimate {
            value,
            mean_scaled: None,
            chi2,
            dof,
            resolution,
            n_used: n,
            n_rejected,
        }
    }

    /// Drops predictions further than `sigma` deviations from the median.
    ///
    /// The deviation scale is the median absolute deviation, floored at
    /// `min_relative_mad·|median|` and at `median(spread)/sigma`, so a
    /// prediction within one typical quoted spread of the median is kept.
    fn reject_outliers<'c>(&self, usable: &[&'c Contribution]) -> Vec<&'c Contribution> {
        let outlier = &self.config.outlier;
        if usable.len() < outlier.min_multiplicity || outlier.sigma <= 0.0 {
            return usable.to_vec();
        }
        let values: Vec<f64> = usable.iter().map(|c| c.prediction.value).collect();
        let Some(center) = median(&values) else {
            return usable.to_vec();
        };
        let spreads: Vec<f64> = usable.iter().map(|c| c.prediction.spread).collect();
        let typical_spread = median(&spreads).unwrap_or(0.0);
        let deviation = median_absolute_deviation(&values, center)
            .unwrap_or(0.0)
            .max(outlier.min_relative_mad * center.abs())
            .max(typical_spread / outlier.sigma);
        if deviation <= 0.0 {
            return usable.to_vec();
        }
        usable
            .iter()
            .copied()
            .filter(|c| (c.prediction.value - center).abs() <= outlier.sigma * deviation)
            .collect()
    }

    /// 1 inside the containment radius, `(R/d)^4` outside.
    fn radial_factor(&self, impact_distance_m: f64) -> f64 {
        let radius = self.config.energy_containment_radius_m;
        if impact_distance_m <= radius {
            1.0
        } else {
            (radius / impact_distance_m).powi(4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn energy(value: f64, spread: f64, distance: f64) -> Contribution {
        Contribution {
            measured: None,
            prediction: Prediction::new(value, spread),
            impact_distance_m: distance,
        }
    }

    fn shape(measured: f64, value: f64, spread: f64) -> Contribution {
        Contribution {
            measured: Some(measured),
            prediction: Prediction::new(value, spread),
            impact_distance_m: 100.0,
        }
    }

    #[test]
    fn test_shape_residual() {
        let config = LookupConfig::default();
        let agg = EventAggregator::new(&config);
        // residuals +1 and -1 with weights 4 and 1
        let est = agg.shape(&[shape(0.15, 0.10, 0.05), shape(0.0, 0.20, 0.20)]);
        assert_relative_eq!(est.value.unwrap(), (4.0 - 1.0) / 5.0, epsilon = 1e-9);
        assert_relative_eq!(est.mean_scaled.unwrap(), (1.5 + 0.0) / 2.0, epsilon = 1e-9);
        assert_eq!(est.n_used, 2);
        assert_eq!(est.dof, Some(1));
    }

    #[test]
    fn test_shape_skips_zero_spread_and_missing() {
        let config = LookupConfig::default();
        let agg = EventAggregator::new(&config);
        let mut missing = shape(0.1, 0.1, 0.05);
        missing.measured = None;
        let est = agg.shape(&[shape(0.2, 0.1, 0.0), missing, shape(0.12, 0.1, 0.02)]);
        assert_eq!(est.n_used, 1);
        assert_relative_eq!(est.value.unwrap(), 1.0, epsilon = 1e-9);
        assert!(est.chi2.is_none());
        assert!(est.resolution.is_none());
    }

    #[test]
    fn test_outlier_is_rejected() {
        let config = LookupConfig::default();
        let agg = EventAggregator::new(&config);
        let values = [1.0, 1.02, 0.98, 1.03, 10.0];
        let contributions: Vec<Contribution> =
            values.iter().map(|&v| energy(v, 0.2, 100.0)).collect();
        let est = agg.energy(&contributions);
        assert_eq!(est.n_used, 4);
        assert_eq!(est.n_rejected, 1);
        let mean = (1.0 + 1.02 + 0.98 + 1.03) / 4.0;
        assert_relative_eq!(est.value.unwrap(), mean, max_relative = 0.01);
        assert_eq!(est.dof, Some(3));
        assert_relative_eq!(est.resolution.unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_agreement_within_spread_is_kept() {
        let config = LookupConfig::default();
        let agg = EventAggregator::new(&config);
        for values in [[1.0, 1.0, 1.0, 1.0, 1.06], [1.0, 1.01, 0.99, 1.0, 1.15]] {
            let contributions: Vec<Contribution> =
                values.iter().map(|&v| energy(v, 0.2 * v, 100.0)).collect();
            let est = agg.energy(&contributions);
            assert_eq!(est.n_used, 5, "{values:?}");
            assert_eq!(est.n_rejected, 0, "{values:?}");
        }

        let far: Vec<Contribution> = [1.0, 1.05, 0.95, 1.0, 10.0]
            .iter()
            .map(|&v| energy(v, 0.2 * v, 100.0))
            .collect();
        let est = agg.energy(&far);
        assert_eq!(est.n_used, 4);
        assert_eq!(est.n_rejected, 1);
    }

    #[test]
    fn test_tight_spreads_reject_small_deviation() {
        let config = LookupConfig::default();
        let agg = EventAggregator::new(&config);
        let contributions: Vec<Contribution> = [1.0, 1.01, 0.99, 1.0, 1.3]
            .iter()
            .map(|&v| energy(v, 0.01, 100.0))
            .collect();
        let est = agg.energy(&contributions);
        assert_eq!(est.n_rejected, 1);
    }

    #[test]
    fn test_no_rejection_below_multiplicity() {
        let config = LookupConfig::default();
        let agg = EventAggregator::new(&config);
        let est = agg.energy(&[energy(1.0, 0.2, 0.0), energy(1.0, 0.2, 0.0), energy(10.0, 0.2, 0.0)]);
        assert_eq!(est.n_used, 3);
        assert_eq!(est.n_rejected, 0);
    }

    #[test]
    fn test_radial_deweighting() {
        let config = LookupConfig::default().with_energy_containment_radius(100.0);
        let agg = EventAggregator::new(&config);
        let est = agg.energy(&[energy(1.0, 0.1, 50.0), energy(2.0, 0.1 * 2f64.sqrt(), 200.0)]);
        // weights 100 and 2/0.02/16 = 6.25
        let expected = (100.0 * 1.0 + 6.25 * 2.0) / 106.25;
        assert_relative_eq!(est.value.unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_nothing_usable_is_undefined() {
        let config = LookupConfig::default();
        let agg = EventAggregator::new(&config);
        let est = agg.aggregate(Quantity::Energy, &[energy(-1.0, 0.1, 0.0)]);
        assert_eq!(est, QuantityEstimate::default());
        assert!(!est.is_defined());
        assert!(!agg.aggregate(Quantity::Width, &[]).is_defined());
    }
}
