//! Persisted table hierarchy: a keyed JSON store.
//!
//! Keys follow `tel_<type>/noise_<n>/ze_<z>/woff_<w>/az_<a>/<quantity>` with
//! noise ×100, zenith ×10 and offset ×1000 as integers. Each value is a
//! frozen table snapshot with its scale and cuts.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use showerlut_algorithms::{TableHierarchy, TableSet};
use showerlut_core::TableKey;

use crate::{Error, Result};

/// Version written into every store.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoreRef<'a> {
    format_version: u32,
    tables: BTreeMap<String, &'a TableSet>,
}

#[derive(Deserialize)]
struct StoreOwned {
    format_version: u32,
    tables: BTreeMap<String, TableSet>,
}

/// Writes `tables` as a keyed store.
///
/// # Errors
/// Returns an error if encoding or writing fails.
pub fn write_tables<W: Write>(writer: W, tables: &TableHierarchy) -> Result<()> {
    let store = StoreRef {
        format_version: FORMAT_VERSION,
        tables: tables.iter().map(|set| (set.key.to_string(), set)).collect(),
    };
    serde_json::to_writer(writer, &store)?;
    Ok(())
}

/// Reads a keyed store.
///
/// Every key must parse and agree with the key stored in its snapshot, and
/// every table must hold one statistic per grid bin. Axis consistency
/// across tables is not checked here; callers validate once all stores are
/// loaded.
///
/// # Errors
/// Returns `Error::InvalidFormat` for an unknown version, a key mismatch or
/// a malformed table, and JSON or I/O errors from decoding.
pub fn read_tables<R: Read>(reader: R) -> Result<TableHierarchy> {
    let store: StoreOwned = serde_json::from_reader(reader)?;
    if store.format_version != FORMAT_VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported table format version {} (expected {FORMAT_VERSION})",
            store.format_version
        )));
    }
    let mut hierarchy = TableHierarchy::new();
    for (name, set) in store.tables {
        let key: TableKey = name.parse()?;
        if key != set.key {
            return Err(Error::InvalidFormat(format!(
                "entry '{name}' holds table '{}'",
                set.key
            )));
        }
        set.table
            .validate()
            .map_err(|e| Error::InvalidFormat(format!("table '{name}': {e}")))?;
        hierarchy.insert(set)?;
    }
    Ok(hierarchy)
}

/// Saves `tables` to `path`.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn save_tables<P: AsRef<Path>>(path: P, tables: &TableHierarchy) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    write_tables(&mut writer, tables)?;
    writer.flush()?;
    log::info!("wrote {} tables to {}", tables.len(), path.display());
    Ok(())
}

/// Loads a store from `path`.
///
/// # Errors
/// See [`read_tables`].
pub fn load_tables<P: AsRef<Path>>(path: P) -> Result<TableHierarchy> {
    let path = path.as_ref();
    let tables = read_tables(BufReader::new(File::open(path)?))?;
    log::info!("loaded {} tables from {}", tables.len(), path.display());
    Ok(tables)
}

/// Loads and merges several stores, then checks axis consistency.
///
/// # Errors
/// Returns the first load error, a duplicate key across stores, or an axis
/// or scale inconsistency of the merged hierarchy.
pub fn load_merged<P: AsRef<Path>>(paths: &[P]) -> Result<TableHierarchy> {
    let mut merged = TableHierarchy::new();
    for path in paths {
        merged.merge(load_tables(path)?)?;
    }
    merged.validate()?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use showerlut_core::{LookupConfig, Quantity, TableCoord};

    fn hierarchy() -> TableHierarchy {
        let config = LookupConfig::default();
        let mut tables = TableHierarchy::new();
        for q in Quantity::ALL {
            let key = TableKey::new(TableCoord::from_physical(4, 1.5, 20.0, 0.5, 2), q);
            tables.insert(TableSet::new(key, &config)).unwrap();
        }
        tables.finalize();
        tables
    }

    #[test]
    fn test_keys_are_hierarchical_paths() {
        let mut buffer = Vec::new();
        write_tables(&mut buffer, &hierarchy()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("\"tel_4/noise_00150/ze_200/woff_0500/az_2/width\""));
        assert!(text.contains("\"format_version\":1"));
    }

    #[test]
    fn test_version_and_key_checks() {
        let mut buffer = Vec::new();
        write_tables(&mut buffer, &hierarchy()).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        let wrong_version = text.replace("\"format_version\":1", "\"format_version\":9");
        assert!(matches!(
            read_tables(wrong_version.as_bytes()),
            Err(Error::InvalidFormat(_))
        ));

        let renamed = text.replacen("az_2/width\"", "az_3/width\"", 1);
        assert!(matches!(
            read_tables(renamed.as_bytes()),
            Err(Error::InvalidFormat(_))
        ));

        let garbled = text.replacen("\"tel_4/noise", "\"telescope_4/noise", 1);
        assert!(matches!(read_tables(garbled.as_bytes()), Err(Error::Core(_))));
    }

    #[test]
    fn test_truncated_table_is_rejected() {
        let mut buffer = Vec::new();
        write_tables(&mut buffer, &hierarchy()).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(read_tables(text.as_bytes()).is_ok());

        let truncated = text.replacen("\"stats\":[null,", "\"stats\":[", 1);
        assert_ne!(truncated, text);
        assert!(matches!(
            read_tables(truncated.as_bytes()),
            Err(Error::InvalidFormat(_))
        ));
    }
}
