//! Table coordinates, hierarchical keys and azimuth sectors.
#![allow(clippy::cast_possible_truncation, clippy::cast_lossless)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Quantity, Result};

/// Telescope type identifier (optics + camera class).
pub type TelescopeType = u64;

/// Integer scale of noise levels in keys.
pub const NOISE_SCALE: f64 = 100.0;
/// Integer scale of zenith angles (degrees) in keys.
pub const ZENITH_SCALE: f64 = 10.0;
/// Integer scale of pointing offsets (degrees) in keys.
pub const OFFSET_SCALE: f64 = 1000.0;

/// Rounds a physical axis value onto its integer key grid.
#[inline]
#[must_use]
pub fn to_key_units(value: f64, scale: f64) -> i32 {
    (value * scale).round() as i32
}

/// Converts an integer key value back into physical units.
#[inline]
#[must_use]
pub fn from_key_units(value: i32, scale: f64) -> f64 {
    f64::from(value) / scale
}

/// Position of one table instance in the five-dimensional table family.
///
/// Noise, zenith and offset are stored in integer key units so that the
/// coordinate can be used as an exact map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableCoord {
    pub telescope_type: TelescopeType,
    /// Noise level × 100.
    pub noise: i32,
    /// Zenith angle in degrees × 10.
    pub zenith: i32,
    /// Pointing offset in degrees × 1000.
    pub offset: i32,
    /// Azimuth sector index.
    pub azimuth: u8,
}

impl TableCoord {
    /// Builds a coordinate from physical values.
    #[must_use]
    pub fn from_physical(
        telescope_type: TelescopeType,
        noise: f64,
        zenith_deg: f64,
        offset_deg: f64,
        azimuth: u8,
    ) -> Self {
        Self {
            telescope_type,
            noise: to_key_units(noise, NOISE_SCALE),
            zenith: to_key_units(zenith_deg, ZENITH_SCALE),
            offset: to_key_units(offset_deg, OFFSET_SCALE),
            azimuth,
        }
    }

    #[must_use]
    pub fn noise_level(&self) -> f64 {
        from_key_units(self.noise, NOISE_SCALE)
    }

    #[must_use]
    pub fn zenith_deg(&self) -> f64 {
        from_key_units(self.zenith, ZENITH_SCALE)
    }

    #[must_use]
    pub fn offset_deg(&self) -> f64 {
        from_key_units(self.offset, OFFSET_SCALE)
    }
}

/// Key of one table set: coordinate plus target quantity.
///
/// Rendered as `tel_<type>/noise_<n>/ze_<z>/woff_<w>/az_<a>/<quantity>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableKey {
    pub coord: TableCoord,
    pub quantity: Quantity,
}

impl TableKey {
    #[must_use]
    pub fn new(coord: TableCoord, quantity: Quantity) -> Self {
        Self { coord, quantity }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.coord;
        write!(
            f,
            "tel_{}/noise_{:05}/ze_{:03}/woff_{:04}/az_{}/{}",
            c.telescope_type, c.noise, c.zenith, c.offset, c.azimuth, self.quantity
        )
    }
}

fn parse_component<T: FromStr>(part: Option<&str>, prefix: &str, key: &str) -> Result<T> {
    part.and_then(|p| p.strip_prefix(prefix))
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::InvalidKey(format!("'{key}': expected component '{prefix}<n>'")))
}

impl FromStr for TableKey {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        let mut parts = key.split('/');
        let telescope_type = parse_component(parts.next(), "tel_", key)?;
        let noise = parse_component(parts.next(), "noise_", key)?;
        let zenith = parse_component(parts.next(), "ze_", key)?;
        let offset = parse_component(parts.next(), "woff_", key)?;
        let azimuth = parse_component(parts.next(), "az_", key)?;
        let quantity = parts
            .next()
            .ok_or_else(|| Error::InvalidKey(format!("'{key}': missing quantity")))?
            .parse()?;
        if parts.next().is_some() {
            return Err(Error::InvalidKey(format!("'{key}': trailing components")));
        }
        Ok(Self {
            coord: TableCoord {
                telescope_type,
                noise,
                zenith,
                offset,
                azimuth,
            },
            quantity,
        })
    }
}

/// One azimuth sector, `[lower, upper)` in degrees (may wrap through 0°).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AzimuthSector {
    pub lower: f64,
    pub upper: f64,
}

impl AzimuthSector {
    #[must_use]
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    fn span(&self) -> f64 {
        self.upper - self.lower
    }

    /// Checks membership modulo 360°.
    #[must_use]
    pub fn contains(&self, azimuth_deg: f64) -> bool {
        let delta = (azimuth_deg - self.lower).rem_euclid(360.0);
        delta < self.span()
    }
}

/// Fixed discretization of azimuth into sectors (no interpolation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzimuthBinning {
    pub sectors: Vec<AzimuthSector>,
}

impl Default for AzimuthBinning {
    /// Four 90° sectors, the first centred on 0° (north).
    fn default() -> Self {
        Self {
            sectors: vec![
                AzimuthSector::new(-45.0, 45.0),
                AzimuthSector::new(45.0, 135.0),
                AzimuthSector::new(135.0, 225.0),
                AzimuthSector::new(225.0, 315.0),
            ],
        }
    }
}

impl AzimuthBinning {
    /// Number of sectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    /// Returns true if no sector is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Index of the first sector containing `azimuth_deg`.
    #[must_use]
    pub fn sector(&self, azimuth_deg: f64) -> Option<u8> {
        if !azimuth_deg.is_finite() {
            return None;
        }
        self.sectors
            .iter()
            .position(|s| s.contains(azimuth_deg))
            .map(|i| i as u8)
    }

    /// All sector indices.
    pub fn indices(&self) -> impl Iterator<Item = u8> {
        (0..self.sectors.len()).map(|i| i as u8)
    }

    /// Checks sector bounds.
    ///
    /// # Errors
    /// Returns `Error::Config` for an empty list, more than 255 sectors or
    /// sectors with a non-positive or over-full span.
    pub fn validate(&self) -> Result<()> {
        if self.sectors.is_empty() || self.sectors.len() > usize::from(u8::MAX) {
            return Err(Error::Config(format!(
                "azimuth binning needs 1..=255 sectors, got {}",
                self.sectors.len()
            )));
        }
        for (i, s) in self.sectors.iter().enumerate() {
            let span = s.span();
            if !(span > 0.0 && span <= 360.0) {
                return Err(Error::Config(format!(
                    "azimuth sector {i} [{}, {}) has invalid span",
                    s.lower, s.upper
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_units() {
        let coord = TableCoord::from_physical(7, 2.35, 20.0, 0.5, 1);
        assert_eq!(coord.noise, 235);
        assert_eq!(coord.zenith, 200);
        assert_eq!(coord.offset, 500);
        assert!((coord.noise_level() - 2.35).abs() < 1e-12);
        assert!((coord.zenith_deg() - 20.0).abs() < 1e-12);
        assert!((coord.offset_deg() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_table_key_display_and_parse() {
        let key = TableKey::new(
            TableCoord::from_physical(138_704_810, 4.5, 35.0, 1.25, 2),
            Quantity::Energy,
        );
        let text = key.to_string();
        assert_eq!(text, "tel_138704810/noise_00450/ze_350/woff_1250/az_2/energy");
        assert_eq!(text.parse::<TableKey>().unwrap(), key);
    }

    #[test]
    fn test_table_key_parse_errors() {
        assert!("tel_1/noise_100/ze_200".parse::<TableKey>().is_err());
        assert!("tel_x/noise_100/ze_200/woff_500/az_0/width"
            .parse::<TableKey>()
            .is_err());
        assert!("tel_1/noise_100/ze_200/woff_500/az_0/width/extra"
            .parse::<TableKey>()
            .is_err());
        assert!("tel_1/noise_100/ze_200/woff_500/az_0/mscw"
            .parse::<TableKey>()
            .is_err());
    }

    #[test]
    fn test_default_azimuth_sectors() {
        let binning = AzimuthBinning::default();
        assert_eq!(binning.len(), 4);
        assert_eq!(binning.sector(0.0), Some(0));
        assert_eq!(binning.sector(350.0), Some(0));
        assert_eq!(binning.sector(-10.0), Some(0));
        assert_eq!(binning.sector(45.0), Some(1));
        assert_eq!(binning.sector(180.0), Some(2));
        assert_eq!(binning.sector(314.9), Some(3));
        assert_eq!(binning.sector(315.0), Some(0));
        assert_eq!(binning.sector(f64::NAN), None);
        assert!(binning.validate().is_ok());
    }

    #[test]
    fn test_invalid_sector_rejected() {
        let binning = AzimuthBinning {
            sectors: vec![AzimuthSector::new(10.0, 10.0)],
        };
        assert!(binning.validate().is_err());
        assert!(AzimuthBinning { sectors: vec![] }.validate().is_err());
    }
}
