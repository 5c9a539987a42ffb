//! showerlut-io: Table persistence and event stream I/O for showerlut.
//!
//! This crate reads and writes the keyed table store, reads reference and
//! observed events from JSON-lines files in chunks, and writes per-event
//! results as CSV or JSON lines.
//!

mod error;
mod reader;
mod tables;
mod writer;

pub use error::{Error, Result};
pub use reader::{
    JsonLinesReader, ObservedEventReader, ReferenceEventReader, DEFAULT_CHUNK_SIZE,
};
pub use tables::{
    load_merged, load_tables, read_tables, save_tables, write_tables, FORMAT_VERSION,
};
pub use writer::{OutputFormat, ResultWriter, UNDEFINED};
