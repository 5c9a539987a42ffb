//! Flat, struct-keyed table hierarchy with per-type axis lists.

use std::collections::{BTreeMap, BTreeSet};

use showerlut_core::coords::{from_key_units, NOISE_SCALE, OFFSET_SCALE, ZENITH_SCALE};
use showerlut_core::{Error, Quantity, Result, TableKey, TelescopeType, ValueScale};

use crate::table_set::TableSet;

/// Sorted axis values of one telescope type, in key units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableAxes {
    /// Noise levels in key units, ascending.
    pub noise: Vec<i32>,
    /// Zenith angles in key units, ascending.
    pub zenith: Vec<i32>,
    /// Wobble offsets in key units, ascending.
    pub offset: Vec<i32>,
    /// Azimuth sectors present.
    pub sectors: Vec<u8>,
    /// Quantities present.
    pub quantities: Vec<Quantity>,
}

/// Finds the axis entries bracketing `x` in an ascending list.
///
/// Returns `(low, up)` with `axis[low] <= x <= axis[up]`. Coordinates at or
/// beyond either end collapse onto that end, and an exact hit returns the
/// same index twice. `None` for an empty axis or a NaN coordinate.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn index_boundary(axis: &[f64], x: f64) -> Option<(usize, usize)> {
    let last = axis.len().checked_sub(1)?;
    if x.is_nan() {
        return None;
    }
    if x <= axis[0] {
        return Some((0, 0));
    }
    if x >= axis[last] {
        return Some((last, last));
    }
    let up = axis.partition_point(|&v| v < x);
    if axis[up] == x {
        return Some((up, up));
    }
    Some((up - 1, up))
}

fn describe(values: &BTreeSet<i32>, scale: f64) -> String {
    let rendered: Vec<String> = values
        .iter()
        .map(|&v| from_key_units(v, scale).to_string())
        .collect();
    format!("[{}]", rendered.join(", "))
}

/// All table sets of a run, keyed by their full coordinate.
#[derive(Debug, Clone, Default)]
pub struct TableHierarchy {
    tables: BTreeMap<TableKey, TableSet>,
}

impl TableHierarchy {
    /// Creates an empty hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one table set.
    ///
    /// # Errors
    /// Returns `Error::DuplicateTable` if the key is already present.
    pub fn insert(&mut self, set: TableSet) -> Result<()> {
        if self.tables.contains_key(&set.key) {
            return Err(Error::DuplicateTable(set.key.to_string()));
        }
        self.tables.insert(set.key, set);
        Ok(())
    }

    /// Moves every table of `other` into `self`.
    ///
    /// # Errors
    /// Returns `Error::DuplicateTable` on the first key present in both.
    pub fn merge(&mut self, other: TableHierarchy) -> Result<()> {
        if let Some(key) = other.tables.keys().find(|k| self.tables.contains_key(k)) {
            return Err(Error::DuplicateTable(key.to_string()));
        }
        self.tables.extend(other.tables);
        Ok(())
    }

    /// Table stored under `key`.
    #[must_use]
    pub fn get(&self, key: &TableKey) -> Option<&TableSet> {
        self.tables.get(key)
    }

    /// Tables in key order.
    pub fn iter(&self) -> impl Iterator<Item = &TableSet> {
        self.tables.values()
    }

    /// Mutable tables in key order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TableSet> {
        self.tables.values_mut()
    }

    /// Number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether no table is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Distinct telescope types in ascending order.
    #[must_use]
    pub fn telescope_types(&self) -> Vec<TelescopeType> {
        let types: BTreeSet<TelescopeType> =
            self.tables.keys().map(|k| k.coord.telescope_type).collect();
        types.into_iter().collect()
    }

    /// Value scale shared by all sets of `quantity`, if any exist.
    #[must_use]
    pub fn scale(&self, quantity: Quantity) -> Option<ValueScale> {
        self.iter()
            .find(|set| set.quantity() == quantity)
            .map(|set| set.scale)
    }

    /// Finalizes every table.
    pub fn finalize(&mut self) {
        for set in self.tables.values_mut() {
            set.finalize();
        }
    }

    /// Checks the hierarchy and returns the axis lists of each telescope
    /// type.
    ///
    /// For one telescope type the zenith angles must be identical for every
    /// noise level, the offsets identical for every (noise, zenith) pair,
    /// and every grid point must hold the same azimuth sectors and
    /// quantities. All sets of one quantity must share a value scale.
    ///
    /// # Errors
    /// Returns `Error::AxisMismatch` or `Error::ScaleMismatch` naming the
    /// offending telescope type or quantity, or `Error::Config` for a
    /// malformed table.
    pub fn axes(&self) -> Result<BTreeMap<TelescopeType, TableAxes>> {
        self.check_scales()?;
        for set in self.tables.values() {
            set.table.validate()?;
        }

        type Point = (i32, i32, i32);
        let mut grid: BTreeMap<TelescopeType, BTreeMap<Point, BTreeSet<(u8, Quantity)>>> =
            BTreeMap::new();
        for key in self.tables.keys() {
            let c = &key.coord;
            grid.entry(c.telescope_type)
                .or_default()
                .entry((c.noise, c.zenith, c.offset))
                .or_default()
                .insert((c.azimuth, key.quantity));
        }

        let mut result = BTreeMap::new();
        for (telescope_type, points) in grid {
            let mismatch = |detail: String| Error::AxisMismatch {
                telescope_type,
                detail,
            };

            let mut zenith_by_noise: BTreeMap<i32, BTreeSet<i32>> = BTreeMap::new();
            let mut offset_by_pair: BTreeMap<(i32, i32), BTreeSet<i32>> = BTreeMap::new();
            for &(noise, zenith, offset) in points.keys() {
                zenith_by_noise.entry(noise).or_default().insert(zenith);
                offset_by_pair
                    .entry((noise, zenith))
                    .or_default()
                    .insert(offset);
            }

            let (&first_noise, zeniths) = zenith_by_noise
                .iter()
                .next()
                .ok_or_else(|| mismatch("no tables".into()))?;
            for (&noise, other) in &zenith_by_noise {
                if other != zeniths {
                    return Err(mismatch(format!(
                        "zenith angles {} at noise {} differ from {} at noise {}",
                        describe(other, ZENITH_SCALE),
                        from_key_units(noise, NOISE_SCALE),
                        describe(zeniths, ZENITH_SCALE),
                        from_key_units(first_noise, NOISE_SCALE),
                    )));
                }
            }

            let (&(n0, z0), offsets) = offset_by_pair
                .iter()
                .next()
                .ok_or_else(|| mismatch("no tables".into()))?;
            for (&(noise, zenith), other) in &offset_by_pair {
                if other != offsets {
                    return Err(mismatch(format!(
                        "offsets {} at noise {} zenith {} differ from {} at noise {} zenith {}",
                        describe(other, OFFSET_SCALE),
                        from_key_units(noise, NOISE_SCALE),
                        from_key_units(zenith, ZENITH_SCALE),
                        describe(offsets, OFFSET_SCALE),
                        from_key_units(n0, NOISE_SCALE),
                        from_key_units(z0, ZENITH_SCALE),
                    )));
                }
            }

            let (_, contents) = points
                .iter()
                .next()
                .ok_or_else(|| mismatch("no tables".into()))?;
            for (&(noise, zenith, offset), other) in &points {
                if other != contents {
                    return Err(mismatch(format!(
                        "azimuth sectors or quantities at noise {} zenith {} offset {} differ \
                         from the other grid points",
                        from_key_units(noise, NOISE_SCALE),
                        from_key_units(zenith, ZENITH_SCALE),
                        from_key_units(offset, OFFSET_SCALE),
                    )));
                }
            }

            let sectors: BTreeSet<u8> = contents.iter().map(|&(s, _)| s).collect();
            let quantities: BTreeSet<Quantity> = contents.iter().map(|&(_, q)| q).collect();
            result.insert(
                telescope_type,
                TableAxes {
                    noise: zenith_by_noise.keys().copied().collect(),
                    zenith: zeniths.iter().copied().collect(),
                    offset: offsets.iter().copied().collect(),
                    sectors: sectors.into_iter().collect(),
                    quantities: quantities.into_iter().collect(),
                },
            );
        }
        Ok(result)
    }

    /// Runs the consistency check without keeping the axes.
    ///
    /// # Errors
    /// See [`TableHierarchy::axes`].
    pub fn validate(&self) -> Result<()> {
        self.axes().map(|_| ())
    }

    fn check_scales(&self) -> Result<()> {
        for quantity in Quantity::ALL {
            let mut sets = self.iter().filter(|set| set.quantity() == quantity);
            let Some(first) = sets.next() else { continue };
            if let Some(other) = sets.find(|set| set.scale != first.scale) {
                return Err(Error::ScaleMismatch {
                    quantity: quantity.name().to_string(),
                    detail: format!(
                        "{} uses {:?}, {} uses {:?}",
                        first.key, first.scale, other.key, other.scale
                    ),
                });
            }
        }
        Ok(())
    }
}

impl FromIterator<TableSet> for TableHierarchy {
    /// Later sets replace earlier ones with the same key.
    fn from_iter<I: IntoIterator<Item = TableSet>>(iter: I) -> Self {
        Self {
            tables: iter.into_iter().map(|set| (set.key, set)).collect(),
        }
    }
}

impl IntoIterator for TableHierarchy {
    type Item = TableSet;
    type IntoIter = std::collections::btree_map::IntoValues<TableKey, TableSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_values()
    }
}
