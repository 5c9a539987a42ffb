//! Chunked JSON-lines readers for reference and observed events.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use showerlut_core::{ObservedEvent, ReferenceEvent};

use crate::{Error, Result};

/// Default number of records per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Iterator over chunks of records, one JSON object per line.
///
/// Blank lines are skipped. A malformed line ends the stream with an
/// error naming its line number.
pub struct JsonLinesReader<T, R> {
    lines: Lines<R>,
    line_number: usize,
    chunk_size: usize,
    failed: bool,
    _record: PhantomData<fn() -> T>,
}

/// Reader of simulated reference events.
pub type ReferenceEventReader<R> = JsonLinesReader<ReferenceEvent, R>;
/// Reader of observed events.
pub type ObservedEventReader<R> = JsonLinesReader<ObservedEvent, R>;

impl<T: DeserializeOwned> JsonLinesReader<T, BufReader<File>> {
    /// Opens a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), chunk_size))
    }
}

impl<T: DeserializeOwned, R: BufRead> JsonLinesReader<T, R> {
    /// Wraps a buffered reader; a chunk size of 0 is treated as 1.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            chunk_size: chunk_size.max(1),
            failed: false,
            _record: PhantomData,
        }
    }

    /// Reads every remaining record into one vector.
    ///
    /// # Errors
    /// Returns the first read or parse error.
    pub fn read_all(self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for chunk in self {
            records.extend(chunk?);
        }
        Ok(records)
    }

    fn next_record(&mut self) -> Option<Result<T>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_number += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(serde_json::from_str(trimmed).map_err(|e| {
                Error::InvalidFormat(format!("line {}: {e}", self.line_number))
            }));
        }
    }
}

impl<T: DeserializeOwned, R: BufRead> Iterator for JsonLinesReader<T, R> {
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut chunk = Vec::with_capacity(self.chunk_size.min(DEFAULT_CHUNK_SIZE));
        while chunk.len() < self.chunk_size {
            match self.next_record() {
                Some(Ok(record)) => chunk.push(record),
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => break,
            }
        }
        (!chunk.is_empty()).then_some(Ok(chunk))
    }
}
