//! Batch drivers looping over chunked event streams.

use std::time::{Duration, Instant};

use showerlut_core::{ObservedEvent, ReferenceEvent};

use crate::filler::TableFiller;
use crate::lookup::{EventResult, LookupEngine};

/// Loop controls shared by the fill and lookup drivers.
#[derive(Clone, Copy, Debug)]
pub struct BatchOptions {
    /// Events between progress log lines.
    pub progress_interval: usize,
    /// Coarse limit checked before each chunk.
    pub max_runtime: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            progress_interval: 100_000,
            max_runtime: None,
        }
    }
}

/// Outcome of a batch run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Events processed.
    pub events: usize,
    /// Chunks processed.
    pub chunks: usize,
    /// True when the runtime limit ended the loop before the input did.
    pub stopped_early: bool,
    /// Wall time of the run.
    pub elapsed: Duration,
}

struct Progress {
    start: Instant,
    options: BatchOptions,
    summary: RunSummary,
}

impl Progress {
    fn new(options: BatchOptions) -> Self {
        Self {
            start: Instant::now(),
            options,
            summary: RunSummary::default(),
        }
    }

    /// False once the runtime limit has passed.
    fn may_continue(&mut self) -> bool {
        match self.options.max_runtime {
            Some(limit) if self.start.elapsed() >= limit => {
                log::warn!(
                    "maximum runtime of {:.1}s reached after {} events; stopping",
                    limit.as_secs_f64(),
                    self.summary.events
                );
                self.summary.stopped_early = true;
                false
            }
            _ => true,
        }
    }

    fn advance(&mut self, events: usize) {
        let interval = self.options.progress_interval.max(1);
        let before = self.summary.events / interval;
        self.summary.events += events;
        self.summary.chunks += 1;
        if self.summary.events / interval > before {
            log::info!(
                "processed {} events ({:.1}s)",
                self.summary.events,
                self.start.elapsed().as_secs_f64()
            );
        }
    }

    fn finish(mut self) -> RunSummary {
        self.summary.elapsed = self.start.elapsed();
        self.summary
    }
}

/// Feeds every chunk of reference events into `filler`.
///
/// # Errors
/// Returns the first error produced by the chunk source.
pub fn fill_batches<I, E>(
    filler: &mut TableFiller<'_>,
    chunks: I,
    options: BatchOptions,
) -> Result<RunSummary, E>
where
    I: IntoIterator<Item = Result<Vec<ReferenceEvent>, E>>,
{
    let mut progress = Progress::new(options);
    for chunk in chunks {
        if !progress.may_continue() {
            break;
        }
        let chunk = chunk?;
        filler.fill_batch(&chunk);
        progress.advance(chunk.len());
    }
    Ok(progress.finish())
}

/// Evaluates every chunk of observed events and hands the results, in
/// input order, to `sink`.
///
/// # Errors
/// Returns the first error produced by the chunk source or the sink.
pub fn lookup_batches<I, E, F>(
    engine: &LookupEngine<'_>,
    chunks: I,
    options: BatchOptions,
    mut sink: F,
) -> Result<RunSummary, E>
where
    I: IntoIterator<Item = Result<Vec<ObservedEvent>, E>>,
    F: FnMut(&[EventResult]) -> Result<(), E>,
{
    let mut progress = Progress::new(options);
    for chunk in chunks {
        if !progress.may_continue() {
            break;
        }
        let chunk = chunk?;
        let results = engine.evaluate_batch(&chunk);
        sink(&results)?;
        progress.advance(chunk.len());
    }
    Ok(progress.finish())
}
