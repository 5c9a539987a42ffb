//! Read-mode evaluation: bracket search over noise, zenith and offset,
//! nested interpolation of per-telescope predictions and array-level
//! aggregation.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use showerlut_core::coords::{from_key_units, NOISE_SCALE, OFFSET_SCALE, ZENITH_SCALE};
use showerlut_core::{
    LookupConfig, ObservedEvent, PerQuantity, Quantity, Result, Statistic, TableCoord, TableKey,
    TelescopeImage, TelescopeType, ValueScale,
};

use crate::aggregate::{Contribution, EventAggregator, QuantityEstimate};
use crate::hierarchy::{index_boundary, TableAxes, TableHierarchy};
use crate::table_set::{Prediction, TableSet};

/// Per-telescope interpolated predictions in physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelescopeResult {
    /// Type of the telescope the predictions belong to.
    pub telescope_type: TelescopeType,
    /// Prediction per quantity; `None` when undefined.
    pub predictions: PerQuantity<Option<Prediction>>,
}

/// Reconstruction output of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    /// Identifier copied from the observed event.
    pub event_id: u64,
    /// Array-level estimate per quantity.
    pub estimates: PerQuantity<QuantityEstimate>,
    /// Per-telescope predictions in input order.
    pub telescopes: Vec<TelescopeResult>,
}

/// Blend `lower` toward `upper` by `weight` in `[0, 1]`.
///
/// A missing side is replaced by the other one; equal inputs come back
/// unchanged for every weight.
#[must_use]
pub fn blend(
    lower: Option<Prediction>,
    upper: Option<Prediction>,
    weight: f64,
) -> Option<Prediction> {
    match (lower, upper) {
        (Some(a), Some(b)) => Some(Prediction::new(
            a.value + weight * (b.value - a.value),
            a.spread + weight * (b.spread - a.spread),
        )),
        (Some(p), None) | (None, Some(p)) => Some(p),
        (None, None) => None,
    }
}

/// Linear blend weight of `x` between `lower` and `upper`.
#[must_use]
pub fn linear_weight(lower: f64, upper: f64, x: f64) -> f64 {
    if upper > lower {
        ((x - lower) / (upper - lower)).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Blend weight in zenith, linear in `cos(zenith)`.
#[must_use]
pub fn cosine_zenith_weight(lower_deg: f64, upper_deg: f64, zenith_deg: f64) -> f64 {
    let (lo, up) = (lower_deg.to_radians().cos(), upper_deg.to_radians().cos());
    if (up - lo).abs() < f64::EPSILON {
        return linear_weight(lower_deg, upper_deg, zenith_deg);
    }
    ((zenith_deg.to_radians().cos() - lo) / (up - lo)).clamp(0.0, 1.0)
}

fn interpolate_pair<F>(
    axis: &[f64],
    x: f64,
    weight: fn(f64, f64, f64) -> f64,
    mut corner: F,
) -> Option<Prediction>
where
    F: FnMut(usize) -> Option<Prediction>,
{
    let (low, up) = index_boundary(axis, x)?;
    if low == up {
        return corner(low);
    }
    let lower = corner(low);
    let upper = corner(up);
    blend(lower, upper, weight(axis[low], axis[up], x))
}

/// Axis lists of one telescope type in key and physical units.
#[derive(Debug, Clone)]
struct TypeGrid {
    keys: TableAxes,
    noise: Vec<f64>,
    zenith: Vec<f64>,
    offset: Vec<f64>,
}

impl TypeGrid {
    fn new(keys: TableAxes) -> Self {
        let physical = |values: &[i32], scale| {
            values
                .iter()
                .map(|&v| from_key_units(v, scale))
                .collect::<Vec<f64>>()
        };
        Self {
            noise: physical(&keys.noise, NOISE_SCALE),
            zenith: physical(&keys.zenith, ZENITH_SCALE),
            offset: physical(&keys.offset, OFFSET_SCALE),
            keys,
        }
    }
}

/// Evaluates observed events against a validated table hierarchy.
///
/// The engine only reads the hierarchy, so one instance can serve many
/// threads.
#[derive(Debug)]
pub struct LookupEngine<'a> {
    tables: &'a TableHierarchy,
    config: &'a LookupConfig,
    grids: BTreeMap<TelescopeType, TypeGrid>,
    scales: PerQuantity<Option<ValueScale>>,
}

impl<'a> LookupEngine<'a> {
    /// Validates the hierarchy and prepares the bracket axes.
    ///
    /// # Errors
    /// Returns the first axis or scale inconsistency of the hierarchy.
    pub fn new(tables: &'a TableHierarchy, config: &'a LookupConfig) -> Result<Self> {
        config.validate()?;
        let grids = tables
            .axes()?
            .into_iter()
            .map(|(ty, axes)| (ty, TypeGrid::new(axes)))
            .collect::<BTreeMap<_, _>>();
        for (ty, grid) in &grids {
            log::info!(
                "telescope type {ty}: {} noise levels, {} zenith angles, {} offsets, {} sectors",
                grid.noise.len(),
                grid.zenith.len(),
                grid.offset.len(),
                grid.keys.sectors.len()
            );
        }
        Ok(Self {
            tables,
            config,
            grids,
            scales: PerQuantity::from_fn(|q| tables.scale(q)),
        })
    }

    fn statistic(&self, quantity: Quantity) -> Statistic {
        if quantity.fits_most_probable() && self.config.mpv.use_for_lookup {
            Statistic::MostProbable
        } else {
            Statistic::Median
        }
    }

    /// Interpolated prediction of one telescope in table units.
    ///
    /// Offsets are blended first, then zenith angles, then noise levels.
    /// Coordinates outside an axis clamp to its nearest end.
    #[must_use]
    pub fn predict_table_units(
        &self,
        event: &ObservedEvent,
        sector: u8,
        image: &TelescopeImage,
        quantity: Quantity,
    ) -> Option<Prediction> {
        let grid = self.grids.get(&image.telescope_type)?;
        let log_amplitude = image.log_amplitude()?;
        let statistic = self.statistic(quantity);
        let corner = |ni: usize, zi: usize, oi: usize| {
            let key = TableKey::new(
                TableCoord {
                    telescope_type: image.telescope_type,
                    noise: grid.keys.noise[ni],
                    zenith: grid.keys.zenith[zi],
                    offset: grid.keys.offset[oi],
                    azimuth: sector,
                },
                quantity,
            );
            self.tables
                .get(&key)?
                .predict(log_amplitude, image.impact_distance_m, statistic)
        };

        interpolate_pair(&grid.noise, image.noise, linear_weight, |ni| {
            interpolate_pair(
                &grid.zenith,
                event.zenith_deg,
                cosine_zenith_weight,
                |zi| {
                    interpolate_pair(&grid.offset, event.offset_deg, linear_weight, |oi| {
                        corner(ni, zi, oi)
                    })
                },
            )
        })
    }

    /// Interpolated prediction of one telescope in physical units, `None`
    /// when the image fails the cuts of `quantity` or no table covers it.
    #[must_use]
    pub fn predict(
        &self,
        event: &ObservedEvent,
        sector: u8,
        image: &TelescopeImage,
        quantity: Quantity,
    ) -> Option<Prediction> {
        if self.config.cuts_for(quantity).check_image(image).is_some() {
            return None;
        }
        let scale = self.scales.get(quantity).as_ref()?;
        let prediction = self.predict_table_units(event, sector, image, quantity)?;
        Some(TableSet::to_physical(scale, prediction))
    }

    /// Reconstructs one event. Never fails: missing information yields
    /// undefined estimates.
    #[must_use]
    pub fn evaluate(&self, event: &ObservedEvent) -> EventResult {
        let sector = self.config.azimuth.sector(event.azimuth_deg);
        if sector.is_none() {
            log::debug!(
                "event {}: azimuth {} is outside every sector",
                event.event_id,
                event.azimuth_deg
            );
        }

        let telescopes: Vec<TelescopeResult> = event
            .telescopes
            .iter()
            .map(|image| TelescopeResult {
                telescope_type: image.telescope_type,
                predictions: PerQuantity::from_fn(|q| {
                    sector.and_then(|s| self.predict(event, s, image, q))
                }),
            })
            .collect();

        let aggregator = EventAggregator::new(self.config);
        let estimates = PerQuantity::from_fn(|q| {
            let contributions: Vec<Contribution> = event
                .telescopes
                .iter()
                .zip(&telescopes)
                .filter_map(|(image, result)| {
                    let prediction = (*result.predictions.get(q))?;
                    Some(Contribution {
                        measured: measured_value(image, q),
                        prediction,
                        impact_distance_m: image.impact_distance_m,
                    })
                })
                .collect();
            aggregator.aggregate(q, &contributions)
        });

        EventResult {
            event_id: event.event_id,
            estimates,
            telescopes,
        }
    }

    /// Evaluates a batch in parallel, keeping input order.
    #[must_use]
    pub fn evaluate_batch(&self, events: &[ObservedEvent]) -> Vec<EventResult> {
        events.par_iter().map(|event| self.evaluate(event)).collect()
    }
}

/// Measured value of a shape quantity.
#[must_use]
pub fn measured_value(image: &TelescopeImage, quantity: Quantity) -> Option<f64> {
    match quantity {
        Quantity::Width => Some(image.width),
        Quantity::Length => Some(image.length),
        Quantity::Energy => None,
    }
}
