//! Result writers: CSV with an undefined-value sentinel, or JSON lines.

use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use showerlut_algorithms::{EventResult, Prediction, QuantityEstimate};
use showerlut_core::Quantity;

use crate::{Error, Result};

/// Written in place of an undefined CSV value.
pub const UNDEFINED: f64 = -9999.0;

/// Output layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// One flat row per event; undefined values become [`UNDEFINED`].
    /// Per-telescope types and predictions fill one column each, with the
    /// telescopes separated by `;` in event order.
    Csv,
    /// One full result object per line, including per-telescope
    /// predictions; undefined values are `null`.
    JsonLines,
}

impl OutputFormat {
    /// Format implied by a file extension (`.csv`, `.jsonl`, `.json`).
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "jsonl" | "json" | "ndjson" => Ok(Self::JsonLines),
            other => Err(Error::InvalidFormat(format!("unknown output format '{other}'"))),
        }
    }
}

fn or_undefined(value: Option<f64>) -> f64 {
    value.unwrap_or(UNDEFINED)
}

fn count_or_undefined(value: Option<usize>) -> String {
    value.map_or_else(|| UNDEFINED.to_string(), |v| v.to_string())
}

fn csv_header() -> String {
    let mut columns = vec!["event_id".to_string(), "n_telescopes".to_string()];
    for q in Quantity::ALL {
        for field in [
            "", "_mean_scaled", "_chi2", "_dof", "_resolution", "_n_used", "_n_rejected",
        ] {
            columns.push(format!("{q}{field}"));
        }
    }
    columns.push("telescope_types".to_string());
    for q in Quantity::ALL {
        columns.push(format!("{q}_predicted"));
        columns.push(format!("{q}_predicted_spread"));
    }
    columns.join(",")
}

/// `;`-joined per-telescope cells.
fn csv_list<T, F>(items: &[T], cell: F) -> String
where
    F: Fn(&T) -> String,
{
    items.iter().map(cell).collect::<Vec<_>>().join(";")
}

fn csv_telescopes(result: &EventResult) -> Vec<String> {
    let mut cells = vec![csv_list(&result.telescopes, |t| t.telescope_type.to_string())];
    for q in Quantity::ALL {
        let predictions: Vec<Option<Prediction>> = result
            .telescopes
            .iter()
            .map(|t| *t.predictions.get(q))
            .collect();
        cells.push(csv_list(&predictions, |p| {
            or_undefined(p.map(|p| p.value)).to_string()
        }));
        cells.push(csv_list(&predictions, |p| {
            or_undefined(p.map(|p| p.spread)).to_string()
        }));
    }
    cells
}

fn csv_estimate(estimate: &QuantityEstimate) -> [String; 7] {
    fn cell<T: Display>(v: T) -> String {
        v.to_string()
    }
    [
        cell(or_undefined(estimate.value)),
        cell(or_undefined(estimate.mean_scaled)),
        cell(or_undefined(estimate.chi2)),
        count_or_undefined(estimate.dof),
        cell(or_undefined(estimate.resolution)),
        cell(estimate.n_used),
        cell(estimate.n_rejected),
    ]
}

/// Appends event results, one record per event, in the order given.
pub struct ResultWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    header_pending: bool,
    records: u64,
}

impl ResultWriter<BufWriter<File>> {
    /// Creates a file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, format: OutputFormat, header: bool) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), format, header))
    }
}

impl<W: Write> ResultWriter<W> {
    /// Wraps a writer. `header` only affects CSV.
    pub fn new(writer: W, format: OutputFormat, header: bool) -> Self {
        Self {
            writer,
            format,
            header_pending: header && format == OutputFormat::Csv,
            records: 0,
        }
    }

    /// Records written so far.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Writes a batch of results.
    ///
    /// # Errors
    /// Returns an error if writing or encoding fails.
    pub fn write_results(&mut self, results: &[EventResult]) -> Result<()> {
        if self.header_pending {
            writeln!(self.writer, "{}", csv_header())?;
            self.header_pending = false;
        }
        for result in results {
            match self.format {
                OutputFormat::Csv => {
                    let mut row = vec![
                        result.event_id.to_string(),
                        result.telescopes.len().to_string(),
                    ];
                    for (_, estimate) in result.estimates.iter() {
                        row.extend(csv_estimate(estimate));
                    }
                    row.extend(csv_telescopes(result));
                    writeln!(self.writer, "{}", row.join(","))?;
                }
                OutputFormat::JsonLines => {
                    serde_json::to_writer(&mut self.writer, result)?;
                    writeln!(self.writer)?;
                }
            }
            self.records += 1;
        }
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and returns the inner writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use showerlut_algorithms::{Prediction, TelescopeResult};
    use showerlut_core::PerQuantity;
    use tempfile::NamedTempFile;

    fn result(id: u64) -> EventResult {
        let mut estimates = PerQuantity::<QuantityEstimate>::default();
        estimates.energy = QuantityEstimate {
            value: Some(1.25),
            mean_scaled: None,
            chi2: Some(0.5),
            dof: Some(2),
            resolution: Some(0.1),
            n_used: 3,
            n_rejected: 1,
        };
        EventResult {
            event_id: id,
            estimates,
            telescopes: vec![
                TelescopeResult {
                    telescope_type: 1,
                    predictions: PerQuantity {
                        width: None,
                        length: None,
                        energy: Some(Prediction::new(1.25, 0.2)),
                    },
                },
                TelescopeResult {
                    telescope_type: 3,
                    predictions: PerQuantity {
                        width: Some(Prediction::new(0.1, 0.02)),
                        length: None,
                        energy: None,
                    },
                },
            ],
        }
    }

    #[test]
    fn test_csv_uses_sentinel() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = ResultWriter::create(file.path(), OutputFormat::Csv, true).unwrap();
        writer.write_results(&[result(5)]).unwrap();
        writer.write_results(&[result(6)]).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.records(), 2);

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("event_id,n_telescopes,width,width_mean_scaled"));
        assert_eq!(lines[0].split(',').count(), lines[1].split(',').count());
        assert!(lines[1].starts_with("5,2,-9999,-9999,-9999,-9999,-9999,0,0,"));
        assert!(lines[1].contains(",1.25,-9999,0.5,2,0.1,3,1,"));
        assert!(lines[0].ends_with("telescope_types,width_predicted,width_predicted_spread,length_predicted,length_predicted_spread,energy_predicted,energy_predicted_spread"));
        assert!(lines[1].ends_with(",1;3,-9999;0.1,-9999;0.02,-9999;-9999,-9999;-9999,1.25;-9999,0.2;-9999"));
    }

    #[test]
    fn test_json_lines_keep_nulls() {
        let mut writer = ResultWriter::new(Vec::new(), OutputFormat::JsonLines, true);
        writer.write_results(&[result(1), result(2)]).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: EventResult = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, result(2));
        assert!(lines[0].contains("\"value\":null"));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out.csv")),
            Some(OutputFormat::Csv)
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("out.JSONL")),
            Some(OutputFormat::JsonLines)
        );
        assert_eq!(OutputFormat::from_path(Path::new("out.root")), None);
    }
}
