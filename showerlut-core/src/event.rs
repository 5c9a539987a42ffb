//! Event records exchanged with the reader/writer collaborators.

use serde::{Deserialize, Serialize};

use crate::coords::TelescopeType;

/// Parameterised image of one telescope in one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelescopeImage {
    pub telescope_type: TelescopeType,
    /// Noise level of this telescope (unused in fill mode).
    #[serde(default)]
    pub noise: f64,
    /// Shower core distance from the telescope on the ground (m).
    pub impact_distance_m: f64,
    /// Integrated image amplitude (size).
    pub amplitude: f64,
    /// Fraction of the image truncated at the camera edge.
    #[serde(default)]
    pub loss: f64,
    /// Image centroid distance from the camera centre (deg).
    #[serde(default)]
    pub camera_distance_deg: Option<f64>,
    pub width: f64,
    pub length: f64,
}

impl TelescopeImage {
    /// log10 of the amplitude, `None` for non-positive amplitudes.
    #[must_use]
    pub fn log_amplitude(&self) -> Option<f64> {
        (self.amplitude > 0.0 && self.amplitude.is_finite()).then(|| self.amplitude.log10())
    }
}

/// Simulated shower used to fill tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEvent {
    #[serde(default)]
    pub event_id: u64,
    pub zenith_deg: f64,
    pub azimuth_deg: f64,
    pub offset_deg: f64,
    /// Noise level of the simulation file.
    pub noise: f64,
    /// Shower core distance from the array centre (m).
    #[serde(default)]
    pub core_distance_m: Option<f64>,
    pub true_energy_tev: f64,
    /// Per-event fill weight (spectral reweighting).
    #[serde(default = "unit_weight")]
    pub weight: f64,
    pub telescopes: Vec<TelescopeImage>,
}

fn unit_weight() -> f64 {
    1.0
}

/// Measured event to be reconstructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedEvent {
    #[serde(default)]
    pub event_id: u64,
    pub zenith_deg: f64,
    pub azimuth_deg: f64,
    pub offset_deg: f64,
    pub telescopes: Vec<TelescopeImage>,
}

/// Simulation conditions of one reference sample.
///
/// The filler writes into the tables at exactly these conditions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationConditions {
    pub zenith_deg: f64,
    pub noise: f64,
    pub offset_deg: f64,
}

impl SimulationConditions {
    #[must_use]
    pub fn new(zenith_deg: f64, noise: f64, offset_deg: f64) -> Self {
        Self {
            zenith_deg,
            noise,
            offset_deg,
        }
    }

    /// Conditions recorded in a reference event.
    #[must_use]
    pub fn from_event(event: &ReferenceEvent) -> Self {
        Self::new(event.zenith_deg, event.noise, event.offset_deg)
    }
}
