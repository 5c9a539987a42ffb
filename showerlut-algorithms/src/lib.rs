//! showerlut-algorithms: Table filling and lookup algorithms.
//!
//! This crate provides the write and read paths over the table family:
//! - **TableFiller** - routes reference events into per-condition tables
//! - **TableHierarchy** - flat keyed map with per-type axis validation
//! - **LookupEngine** - bracket search and offset → zenith → noise interpolation
//! - **EventAggregator** - shape residuals and outlier-rejected energy means
//!

#![warn(missing_docs)]

mod aggregate;
mod filler;
mod hierarchy;
mod lookup;
mod processing;
mod table_set;

pub use aggregate::{Contribution, EventAggregator, QuantityEstimate};
pub use filler::{FillStatistics, TableFiller};
pub use hierarchy::{index_boundary, TableAxes, TableHierarchy};
pub use lookup::{
    blend, cosine_zenith_weight, linear_weight, measured_value, EventResult, LookupEngine,
    TelescopeResult,
};
pub use processing::{fill_batches, lookup_batches, BatchOptions, RunSummary};
pub use table_set::{Prediction, TableSet};
