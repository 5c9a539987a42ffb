//! Run configuration shared by the filler, the lookup engine and the
//! aggregator.
//!
//! A `LookupConfig` is built once, validated and then passed by reference.
//! JSON files may omit any top-level field; omitted fields keep their
//! defaults.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::coords::AzimuthBinning;
use crate::event::TelescopeImage;
use crate::table::{Axis, BinSettings};
use crate::{Error, PerQuantity, Quantity, Result};

/// Mapping between physical values and table units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueScale {
    /// Rescale `[min, max]` onto `[0, 1]`.
    Linear { min: f64, max: f64 },
    /// log10 of the value; `min`/`max` bound the log10 domain.
    Log10 { min: f64, max: f64 },
}

impl ValueScale {
    /// Physical value in table units, `None` where undefined (log of a
    /// non-positive value).
    #[must_use]
    pub fn to_table(&self, value: f64) -> Option<f64> {
        match *self {
            ValueScale::Linear { min, max } => Some((value - min) / (max - min)),
            ValueScale::Log10 { .. } => (value > 0.0).then(|| value.log10()),
        }
    }

    /// Value domain in table units.
    #[must_use]
    pub fn domain(&self) -> (f64, f64) {
        match *self {
            ValueScale::Linear { .. } => (0.0, 1.0),
            ValueScale::Log10 { min, max } => (min, max),
        }
    }

    /// Converts a table-unit value and spread to physical units.
    ///
    /// Log spreads are propagated to first order.
    #[must_use]
    pub fn to_physical(&self, value: f64, spread: f64) -> (f64, f64) {
        match *self {
            ValueScale::Linear { min, max } => (min + value * (max - min), spread * (max - min)),
            ValueScale::Log10 { .. } => {
                let physical = 10f64.powf(value);
                (physical, physical * std::f64::consts::LN_10 * spread)
            }
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let (min, max) = match *self {
            ValueScale::Linear { min, max } | ValueScale::Log10 { min, max } => (min, max),
        };
        if !(min.is_finite() && max.is_finite() && max > min) {
            return Err(Error::Config(format!(
                "value scale of '{name}' needs finite min < max (got {min}, {max})"
            )));
        }
        Ok(())
    }
}

/// Reason a telescope image or event was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    CoreDistance,
    Amplitude,
    Loss,
    CameraDistance,
    ImpactDistance,
}

/// Event-selection thresholds; `None` disables a cut.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionCuts {
    /// Minimum shower core distance from the array centre (m).
    pub min_core_distance_m: Option<f64>,
    /// Maximum shower core distance from the array centre (m).
    pub max_core_distance_m: Option<f64>,
    /// Maximum fraction of the image lost at the camera edge.
    pub max_loss: Option<f64>,
    /// Maximum image centroid distance from the camera centre (deg).
    pub max_camera_distance_deg: Option<f64>,
    /// Maximum core distance from the telescope (m).
    pub max_impact_distance_m: Option<f64>,
}

impl SelectionCuts {
    /// Core-distance cut of a reference event.
    #[must_use]
    pub fn check_core(&self, core_distance_m: Option<f64>) -> Option<Rejection> {
        let core = core_distance_m?;
        let too_close = self.min_core_distance_m.is_some_and(|min| core < min);
        let too_far = self.max_core_distance_m.is_some_and(|max| core > max);
        (too_close || too_far).then_some(Rejection::CoreDistance)
    }

    /// Per-telescope image cuts.
    #[must_use]
    pub fn check_image(&self, image: &TelescopeImage) -> Option<Rejection> {
        if image.log_amplitude().is_none() {
            return Some(Rejection::Amplitude);
        }
        if self.max_loss.is_some_and(|max| image.loss > max) {
            return Some(Rejection::Loss);
        }
        if let (Some(max), Some(distance)) =
            (self.max_camera_distance_deg, image.camera_distance_deg)
        {
            if distance > max {
                return Some(Rejection::CameraDistance);
            }
        }
        if !image.impact_distance_m.is_finite()
            || self
                .max_impact_distance_m
                .is_some_and(|max| image.impact_distance_m > max)
        {
            return Some(Rejection::ImpactDistance);
        }
        None
    }
}

/// Grid and value scale of one quantity's tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityConfig {
    pub log_amplitude: Axis,
    pub distance: Axis,
    pub scale: ValueScale,
    /// Resolution of the per-bin value histogram.
    pub value_bins: usize,
}

impl QuantityConfig {
    /// Default grid for `quantity`.
    #[must_use]
    pub fn default_for(quantity: Quantity) -> Self {
        let (scale, value_bins) = match quantity {
            Quantity::Width => (ValueScale::Linear { min: 0.0, max: 0.5 }, 500),
            Quantity::Length => (ValueScale::Linear { min: 0.0, max: 1.0 }, 500),
            Quantity::Energy => (ValueScale::Log10 { min: -2.5, max: 3.0 }, 550),
        };
        Self {
            log_amplitude: Axis::new(1.0, 7.0, 60),
            distance: Axis::new(0.0, 1000.0, 50),
            scale,
            value_bins,
        }
    }
}

/// Robust outlier rejection for energy aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Rejection threshold in units of the deviation scale. The scale is the
    /// median absolute deviation, floored at `min_relative_mad·|median|` and
    /// at the median quoted spread divided by `sigma`.
    pub sigma: f64,
    /// Fewer contributing telescopes disable rejection.
    pub min_multiplicity: usize,
    /// Floor of the deviation scale relative to the median.
    pub min_relative_mad: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            sigma: 5.0,
            min_multiplicity: 5,
            min_relative_mad: 0.01,
        }
    }
}

/// Most-probable-value fit of energy bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpvConfig {
    pub enabled: bool,
    pub min_entries: u64,
    pub min_asymmetry: f64,
    /// Query the fitted value instead of the median at lookup time.
    pub use_for_lookup: bool,
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_entries: 100,
            min_asymmetry: 0.1,
            use_for_lookup: false,
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Bins with fewer reference showers are empty.
    pub min_entries_per_bin: u64,
    /// Per-bin sample count above which quantiles come from the histogram.
    pub exact_quantile_limit: usize,
    /// Cuts for the shape quantities.
    pub cuts: SelectionCuts,
    /// Cuts for the energy quantity.
    pub energy_cuts: SelectionCuts,
    pub quantities: PerQuantity<QuantityConfig>,
    pub azimuth: AzimuthBinning,
    /// Reference runs below this zenith fill every azimuth sector.
    pub symmetric_zenith_deg: f64,
    pub outlier: OutlierConfig,
    /// Telescopes beyond this impact distance are de-weighted in energy.
    pub energy_containment_radius_m: f64,
    pub mpv: MpvConfig,
    /// Persist per-bin value histograms.
    pub keep_histograms: bool,
    /// Events between progress log lines.
    pub progress_interval: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        let shape_cuts = SelectionCuts {
            max_loss: Some(0.2),
            max_camera_distance_deg: Some(2.0),
            ..SelectionCuts::default()
        };
        Self {
            min_entries_per_bin: 5,
            exact_quantile_limit: 20_000,
            energy_cuts: shape_cuts.clone(),
            cuts: shape_cuts,
            quantities: PerQuantity::from_fn(QuantityConfig::default_for),
            azimuth: AzimuthBinning::default(),
            symmetric_zenith_deg: 3.0,
            outlier: OutlierConfig::default(),
            energy_containment_radius_m: 1000.0,
            mpv: MpvConfig::default(),
            keep_histograms: false,
            progress_interval: 100_000,
        }
    }
}

impl LookupConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// result fails [`LookupConfig::validate`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed or the result fails
    /// validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every numeric setting once, before any event is processed.
    ///
    /// # Errors
    /// Returns `Error::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.min_entries_per_bin == 0 {
            return Err(Error::Config("min_entries_per_bin must be >= 1".into()));
        }
        if self.exact_quantile_limit == 0 {
            return Err(Error::Config("exact_quantile_limit must be >= 1".into()));
        }
        for (quantity, qc) in self.quantities.iter() {
            qc.log_amplitude
                .validate(&format!("{quantity}.log_amplitude"))?;
            qc.distance.validate(&format!("{quantity}.distance"))?;
            qc.scale.validate(quantity.name())?;
            if qc.value_bins == 0 {
                return Err(Error::Config(format!("{quantity}.value_bins must be >= 1")));
            }
        }
        self.azimuth.validate()?;
        if !(self.symmetric_zenith_deg >= 0.0) {
            return Err(Error::Config("symmetric_zenith_deg must be >= 0".into()));
        }
        if !(self.outlier.sigma > 0.0) || !(self.outlier.min_relative_mad >= 0.0) {
            return Err(Error::Config(
                "outlier.sigma must be > 0 and outlier.min_relative_mad >= 0".into(),
            ));
        }
        if !(self.energy_containment_radius_m > 0.0) {
            return Err(Error::Config(
                "energy_containment_radius_m must be > 0".into(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(Error::Config("progress_interval must be >= 1".into()));
        }
        Ok(())
    }

    /// Cuts applied to `quantity`.
    #[must_use]
    pub fn cuts_for(&self, quantity: Quantity) -> &SelectionCuts {
        match quantity {
            Quantity::Energy => &self.energy_cuts,
            Quantity::Width | Quantity::Length => &self.cuts,
        }
    }

    /// Bin settings of new tables for `quantity`.
    #[must_use]
    pub fn bin_settings(&self, quantity: Quantity) -> BinSettings {
        let qc = self.quantities.get(quantity);
        let (value_min, value_max) = qc.scale.domain();
        BinSettings {
            min_entries: self.min_entries_per_bin,
            exact_quantile_limit: self.exact_quantile_limit,
            value_min,
            value_max,
            value_bins: qc.value_bins,
            fit_most_probable: self.mpv.enabled && quantity.fits_most_probable(),
            mpv_min_entries: self.mpv.min_entries,
            mpv_min_asymmetry: self.mpv.min_asymmetry,
            keep_histograms: self.keep_histograms,
        }
    }

    /// Sets the minimum number of showers per bin.
    #[must_use]
    pub fn with_min_entries_per_bin(mut self, entries: u64) -> Self {
        self.min_entries_per_bin = entries;
        self
    }

    /// Sets the grid and scale of one quantity.
    #[must_use]
    pub fn with_quantity(mut self, quantity: Quantity, config: QuantityConfig) -> Self {
        *self.quantities.get_mut(quantity) = config;
        self
    }

    /// Sets the cuts of the shape quantities.
    #[must_use]
    pub fn with_cuts(mut self, cuts: SelectionCuts) -> Self {
        self.cuts = cuts;
        self
    }

    /// Sets the cuts of the energy quantity.
    #[must_use]
    pub fn with_energy_cuts(mut self, cuts: SelectionCuts) -> Self {
        self.energy_cuts = cuts;
        self
    }

    /// Sets the outlier rejection parameters.
    #[must_use]
    pub fn with_outlier(mut self, outlier: OutlierConfig) -> Self {
        self.outlier = outlier;
        self
    }

    /// Sets the energy containment radius.
    #[must_use]
    pub fn with_energy_containment_radius(mut self, radius_m: f64) -> Self {
        self.energy_containment_radius_m = radius_m;
        self
    }

    /// Sets the most-probable-value fit parameters.
    #[must_use]
    pub fn with_mpv(mut self, mpv: MpvConfig) -> Self {
        self.mpv = mpv;
        self
    }
}
