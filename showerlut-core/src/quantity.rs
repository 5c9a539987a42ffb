//! Target quantities reconstructed from the lookup tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// How per-telescope predictions of a quantity are combined into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Spread-weighted residual of measured against predicted shape.
    ShapeResidual,
    /// Outlier-rejected, inverse-variance weighted mean of predictions.
    EnergyMean,
}

/// A quantity with its own table family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    /// Image ellipse width.
    Width,
    /// Image ellipse length.
    Length,
    /// Primary energy in TeV.
    Energy,
}

impl Quantity {
    /// All quantities in table-key order.
    pub const ALL: [Quantity; 3] = [Quantity::Width, Quantity::Length, Quantity::Energy];

    /// Short name used in table keys and output columns.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Quantity::Width => "width",
            Quantity::Length => "length",
            Quantity::Energy => "energy",
        }
    }

    #[must_use]
    pub fn aggregation(self) -> Aggregation {
        match self {
            Quantity::Width | Quantity::Length => Aggregation::ShapeResidual,
            Quantity::Energy => Aggregation::EnergyMean,
        }
    }

    /// Whether bins of this quantity get a most-probable-value fit.
    #[must_use]
    pub fn fits_most_probable(self) -> bool {
        matches!(self, Quantity::Energy)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::ALL
            .into_iter()
            .find(|q| q.name() == s)
            .ok_or_else(|| Error::InvalidKey(format!("unknown quantity '{s}'")))
    }
}

/// One value per quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerQuantity<T> {
    pub width: T,
    pub length: T,
    pub energy: T,
}

impl<T> PerQuantity<T> {
    /// Builds the triple by evaluating `f` for each quantity.
    pub fn from_fn(mut f: impl FnMut(Quantity) -> T) -> Self {
        Self {
            width: f(Quantity::Width),
            length: f(Quantity::Length),
            energy: f(Quantity::Energy),
        }
    }

    #[must_use]
    pub fn get(&self, quantity: Quantity) -> &T {
        match quantity {
            Quantity::Width => &self.width,
            Quantity::Length => &self.length,
            Quantity::Energy => &self.energy,
        }
    }

    pub fn get_mut(&mut self, quantity: Quantity) -> &mut T {
        match quantity {
            Quantity::Width => &mut self.width,
            Quantity::Length => &mut self.length,
            Quantity::Energy => &mut self.energy,
        }
    }

    /// Iterates `(quantity, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Quantity, &T)> {
        Quantity::ALL.into_iter().map(move |q| (q, self.get(q)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_names_round_trip() {
        for q in Quantity::ALL {
            assert_eq!(q.name().parse::<Quantity>().unwrap(), q);
        }
        assert!("mscw".parse::<Quantity>().is_err());
    }

    #[test]
    fn test_aggregation_policy() {
        assert_eq!(Quantity::Width.aggregation(), Aggregation::ShapeResidual);
        assert_eq!(Quantity::Length.aggregation(), Aggregation::ShapeResidual);
        assert_eq!(Quantity::Energy.aggregation(), Aggregation::EnergyMean);
        assert!(Quantity::Energy.fits_most_probable());
        assert!(!Quantity::Width.fits_most_probable());
    }

    #[test]
    fn test_per_quantity_access() {
        let mut values = PerQuantity::from_fn(|q| q.name().len());
        assert_eq!(*values.get(Quantity::Width), 5);
        *values.get_mut(Quantity::Energy) = 0;
        let collected: Vec<_> = values.iter().map(|(q, v)| (q, *v)).collect();
        assert_eq!(
            collected,
            vec![
                (Quantity::Width, 5),
                (Quantity::Length, 6),
                (Quantity::Energy, 0)
            ]
        );
    }
}
