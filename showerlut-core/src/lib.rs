//! showerlut-core: Core types for lookup-table shower reconstruction.
//!
//! This crate provides the table coordinates and keys, event records,
//! run configuration, robust statistics and the two-dimensional binned
//! statistic table that the filling and lookup algorithms build on.
//!

pub mod config;
pub mod coords;
pub mod error;
pub mod event;
pub mod fit;
pub mod quantity;
pub mod stats;
pub mod table;

pub use config::{
    LookupConfig, MpvConfig, OutlierConfig, QuantityConfig, Rejection, SelectionCuts, ValueScale,
};
pub use coords::{AzimuthBinning, AzimuthSector, TableCoord, TableKey, TelescopeType};
pub use error::{Error, Result};
pub use event::{ObservedEvent, ReferenceEvent, SimulationConditions, TelescopeImage};
pub use quantity::{Aggregation, PerQuantity, Quantity};
pub use table::{Axis, BinSettings, BinStats, BinnedStatisticTable, Statistic};
