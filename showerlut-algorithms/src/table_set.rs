//! One binned table bound to its coordinate, value scale and cuts.

use serde::{Deserialize, Serialize};
use showerlut_core::{
    BinnedStatisticTable, LookupConfig, Quantity, ReferenceEvent, Rejection, SelectionCuts,
    Statistic, TableKey, TelescopeImage, ValueScale,
};

/// Interpolated expectation and spread of one quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Expected value.
    pub value: f64,
    /// Width of the central 68% interval.
    pub spread: f64,
}

impl Prediction {
    /// Creates a prediction from value and spread.
    #[must_use]
    pub fn new(value: f64, spread: f64) -> Self {
        Self { value, spread }
    }
}

/// A table instance for one (telescope type, noise, zenith, offset,
/// azimuth sector, quantity) combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSet {
    /// Coordinate and quantity of this table.
    pub key: TableKey,
    /// Mapping of physical values into table units.
    pub scale: ValueScale,
    /// Cuts applied before a reference image contributes.
    pub cuts: SelectionCuts,
    /// Binned statistics over (log10 amplitude, impact distance).
    pub table: BinnedStatisticTable,
}

impl TableSet {
    /// Creates an empty set with the grid, scale and cuts of its quantity.
    #[must_use]
    pub fn new(key: TableKey, config: &LookupConfig) -> Self {
        let quantity = key.quantity;
        let qc = config.quantities.get(quantity);
        Self {
            key,
            scale: qc.scale,
            cuts: config.cuts_for(quantity).clone(),
            table: BinnedStatisticTable::new(
                qc.log_amplitude,
                qc.distance,
                config.bin_settings(quantity),
            ),
        }
    }

    /// Quantity stored in this table.
    #[must_use]
    pub fn quantity(&self) -> Quantity {
        self.key.quantity
    }

    /// Why `image` of `event` may not enter this table, if it may not.
    #[must_use]
    pub fn rejection(&self, event: &ReferenceEvent, image: &TelescopeImage) -> Option<Rejection> {
        self.cuts
            .check_core(event.core_distance_m)
            .or_else(|| self.cuts.check_image(image))
    }

    /// Fills one physical value; `false` if it was skipped.
    #[must_use]
    pub fn fill(&mut self, log_amplitude: f64, distance: f64, value: f64, weight: f64) -> bool {
        match self.scale.to_table(value) {
            Some(scaled) => self.table.fill(log_amplitude, distance, scaled, weight),
            None => false,
        }
    }

    /// Computes per-bin statistics from the accumulated samples.
    pub fn finalize(&mut self) {
        self.table.finalize();
    }

    /// Expected value and spread in table units.
    ///
    /// `None` when either statistic has no populated neighbour.
    #[must_use]
    pub fn predict(
        &self,
        log_amplitude: f64,
        distance: f64,
        statistic: Statistic,
    ) -> Option<Prediction> {
        let value = self.table.query(log_amplitude, distance, statistic)?;
        let spread = self.table.query(log_amplitude, distance, Statistic::Spread)?;
        Some(Prediction::new(value, spread))
    }

    /// Converts a table-unit prediction into physical units.
    #[must_use]
    pub fn to_physical(scale: &ValueScale, prediction: Prediction) -> Prediction {
        let (value, spread) = scale.to_physical(prediction.value, prediction.spread);
        Prediction::new(value, spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use showerlut_core::{Axis, QuantityConfig, TableCoord};

    fn width_config() -> LookupConfig {
        LookupConfig::default()
            .with_min_entries_per_bin(1)
            .with_quantity(
                Quantity::Width,
                QuantityConfig {
                    log_amplitude: Axis::new(2.0, 4.0, 1),
                    distance: Axis::new(0.0, 100.0, 1),
                    scale: ValueScale::Linear { min: 0.0, max: 0.5 },
                    value_bins: 100,
                },
            )
    }

    #[test]
    fn test_fill_scales_into_table_units() {
        let config = width_config();
        let key = TableKey::new(TableCoord::from_physical(1, 2.0, 20.0, 0.5, 0), Quantity::Width);
        let mut set = TableSet::new(key, &config);
        for _ in 0..10 {
            assert!(set.fill(3.0, 50.0, 0.1, 1.0));
        }
        // outside [0, 0.5]
        assert!(!set.fill(3.0, 50.0, 0.7, 1.0));
        set.finalize();

        let p = set.predict(3.0, 50.0, Statistic::Median).unwrap();
        assert_abs_diff_eq!(p.value, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(p.spread, 0.0, epsilon = 1e-12);

        let physical = TableSet::to_physical(&set.scale, p);
        assert_abs_diff_eq!(physical.value, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_energy_uses_log_scale() {
        let config = LookupConfig::default().with_min_entries_per_bin(1);
        let key = TableKey::new(TableCoord::from_physical(1, 2.0, 20.0, 0.5, 0), Quantity::Energy);
        let mut set = TableSet::new(key, &config);
        assert!(set.fill(3.0, 100.0, 10.0, 1.0));
        assert!(!set.fill(3.0, 100.0, -1.0, 1.0));
        set.finalize();
        let p = set.predict(3.0, 100.0, Statistic::Median).unwrap();
        assert_abs_diff_eq!(p.value, 1.0, epsilon = 1e-12);
    }
}
