//! Write-mode table filling from reference events.

use std::collections::BTreeMap;
use std::ops::AddAssign;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use showerlut_core::{
    LookupConfig, Quantity, ReferenceEvent, Result, SimulationConditions,
    TableCoord, TableKey, TelescopeImage, TelescopeType,
};

use crate::hierarchy::TableHierarchy;
use crate::table_set::TableSet;

/// Counters of one fill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillStatistics {
    /// Reference events seen.
    pub events: u64,
    /// Events whose azimuth lies in no sector.
    pub unknown_sector: u64,
    /// Values accumulated into a table (one per sector written).
    pub filled: u64,
    /// Telescope/quantity pairs removed by the selection cuts.
    pub rejected: u64,
    /// Values outside the table grid or value domain.
    pub out_of_range: u64,
}

impl AddAssign for FillStatistics {
    fn add_assign(&mut self, other: Self) {
        self.events += other.events;
        self.unknown_sector += other.unknown_sector;
        self.filled += other.filled;
        self.rejected += other.rejected;
        self.out_of_range += other.out_of_range;
    }
}

/// Target value of `quantity` for one telescope image.
fn target_value(event: &ReferenceEvent, image: &TelescopeImage, quantity: Quantity) -> f64 {
    match quantity {
        Quantity::Width => image.width,
        Quantity::Length => image.length,
        Quantity::Energy => event.true_energy_tev,
    }
}

/// Routing of one event decided before the per-type work.
struct Routed<'e> {
    event: &'e ReferenceEvent,
    sectors: Vec<u8>,
}

/// All tables of one telescope type; filled by exactly one thread.
#[derive(Debug)]
struct TypeShard {
    tables: BTreeMap<TableKey, TableSet>,
}

impl TypeShard {
    fn new(
        telescope_type: TelescopeType,
        conditions: &SimulationConditions,
        config: &LookupConfig,
    ) -> Self {
        let mut tables = BTreeMap::new();
        for azimuth in config.azimuth.indices() {
            let coord = TableCoord::from_physical(
                telescope_type,
                conditions.noise,
                conditions.zenith_deg,
                conditions.offset_deg,
                azimuth,
            );
            for quantity in Quantity::ALL {
                let key = TableKey::new(coord, quantity);
                tables.insert(key, TableSet::new(key, config));
            }
        }
        Self { tables }
    }

    /// Each table applies its own cuts; a rejected image/quantity pair is
    /// counted once however many sectors it targets.
    fn fill(&mut self, telescope_type: TelescopeType, routed: &[Routed<'_>]) -> FillStatistics {
        let mut stats = FillStatistics::default();
        let coord_template = self.tables.keys().next().map(|k| k.coord);
        let Some(template) = coord_template else {
            return stats;
        };

        for r in routed {
            for image in r
                .event
                .telescopes
                .iter()
                .filter(|image| image.telescope_type == telescope_type)
            {
                for quantity in Quantity::ALL {
                    let value = target_value(r.event, image, quantity);
                    let mut rejected = false;
                    for &azimuth in &r.sectors {
                        let key = TableKey::new(TableCoord { azimuth, ..template }, quantity);
                        let Some(set) = self.tables.get_mut(&key) else {
                            continue;
                        };
                        let log_amplitude = match image.log_amplitude() {
                            Some(la) if set.rejection(r.event, image).is_none() => la,
                            _ => {
                                rejected = true;
                                continue;
                            }
                        };
                        if set.fill(log_amplitude, image.impact_distance_m, value, r.event.weight)
                        {
                            stats.filled += 1;
                        } else {
                            stats.out_of_range += 1;
                        }
                    }
                    if rejected {
                        stats.rejected += 1;
                    }
                }
            }
        }
        stats
    }
}

/// Distributes reference events into the tables of one simulation
/// condition.
///
/// Work is sharded by telescope type, so each table has a single writer
/// even though shards run in parallel.
#[derive(Debug)]
pub struct TableFiller<'a> {
    config: &'a LookupConfig,
    conditions: SimulationConditions,
    shards: BTreeMap<TelescopeType, TypeShard>,
    stats: FillStatistics,
}

impl<'a> TableFiller<'a> {
    /// Creates a filler writing at exactly `conditions`.
    ///
    /// # Errors
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(config: &'a LookupConfig, conditions: SimulationConditions) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            conditions,
            shards: BTreeMap::new(),
            stats: FillStatistics::default(),
        })
    }

    /// Simulation condition every table of this run is keyed at.
    #[must_use]
    pub fn conditions(&self) -> &SimulationConditions {
        &self.conditions
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn statistics(&self) -> FillStatistics {
        self.stats
    }

    /// Azimuth sectors an event contributes to.
    ///
    /// Near-vertical runs are replicated into every sector.
    fn sectors_for(&self, event: &ReferenceEvent) -> Vec<u8> {
        if self.conditions.zenith_deg < self.config.symmetric_zenith_deg {
            self.config.azimuth.indices().collect()
        } else {
            self.config
                .azimuth
                .sector(event.azimuth_deg)
                .into_iter()
                .collect()
        }
    }

    /// Fills a batch of reference events.
    pub fn fill_batch(&mut self, events: &[ReferenceEvent]) {
        let mut routed = Vec::with_capacity(events.len());
        for event in events {
            self.stats.events += 1;
            let sectors = self.sectors_for(event);
            if sectors.is_empty() {
                self.stats.unknown_sector += 1;
                continue;
            }
            for image in &event.telescopes {
                let ty = image.telescope_type;
                if !self.shards.contains_key(&ty) {
                    log::debug!("creating tables for telescope type {ty}");
                    self.shards
                        .insert(ty, TypeShard::new(ty, &self.conditions, self.config));
                }
            }
            routed.push(Routed { event, sectors });
        }

        let batch_stats = self
            .shards
            .par_iter_mut()
            .map(|(&ty, shard)| shard.fill(ty, &routed))
            .reduce(FillStatistics::default, |mut a, b| {
                a += b;
                a
            });
        self.stats += batch_stats;
    }

    /// Finalizes every table and returns them with the run counters.
    ///
    /// # Errors
    /// Returns `Error::DuplicateTable` if two shards produced the same key.
    pub fn finish(self) -> Result<(TableHierarchy, FillStatistics)> {
        let mut shards: Vec<TypeShard> = self.shards.into_values().collect();
        shards.par_iter_mut().for_each(|shard| {
            for set in shard.tables.values_mut() {
                set.finalize();
            }
        });

        let mut hierarchy = TableHierarchy::new();
        for shard in shards {
            for set in shard.tables.into_values() {
                log::debug!(
                    "{}: {} populated bins, {} entries",
                    set.key,
                    set.table.populated_bins(),
                    set.table.entries()
                );
                hierarchy.insert(set)?;
            }
        }
        log::info!(
            "filled {} tables from {} events ({} values, {} rejected by cuts, {} out of range)",
            hierarchy.len(),
            self.stats.events,
            self.stats.filled,
            self.stats.rejected,
            self.stats.out_of_range
        );
        Ok((hierarchy, self.stats))
    }
}
