//! showerlut CLI
//!
//! Fills lookup tables from simulated events, merges table stores and
//! reconstructs observed events against them.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};

use showerlut_algorithms::{fill_batches, lookup_batches, BatchOptions, LookupEngine, TableFiller};
use showerlut_core::coords::{from_key_units, NOISE_SCALE, OFFSET_SCALE, ZENITH_SCALE};
use showerlut_core::{LookupConfig, SimulationConditions};
use showerlut_io::{
    load_merged, save_tables, ObservedEventReader, OutputFormat, ReferenceEventReader,
    ResultWriter, DEFAULT_CHUNK_SIZE,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    ShowerlutIo(#[from] showerlut_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] showerlut_core::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    Usage(String),
}

/// Lookup-table reconstruction for imaging telescope arrays.
#[derive(Parser)]
#[command(name = "showerlut")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads (default: all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill tables from simulated reference events (JSON lines)
    Fill {
        /// Reference event file(s) of one simulation condition
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Output table store
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Zenith angle of the run in degrees (default: first event)
        #[arg(long)]
        zenith: Option<f64>,

        /// Noise level of the run (default: first event)
        #[arg(long)]
        noise: Option<f64>,

        /// Pointing offset of the run in degrees (default: first event)
        #[arg(long)]
        offset: Option<f64>,

        /// Events per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Merge table stores from separate fill runs
    Merge {
        /// Table stores to merge
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Output table store
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Reconstruct observed events (JSON lines)
    Lookup {
        /// Observed event file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Table store(s); several stores are merged
        #[arg(short, long, required = true)]
        tables: Vec<PathBuf>,

        /// Output file (.csv or .jsonl)
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Omit the CSV header line
        #[arg(long)]
        no_header: bool,

        /// Stop before the next chunk once this many seconds have passed
        #[arg(long)]
        max_runtime_secs: Option<f64>,

        /// Events per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Show the axes and contents of table stores
    Info {
        /// Table store(s)
        #[arg(required = true)]
        tables: Vec<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<LookupConfig> {
    match path {
        Some(path) => {
            log::info!("reading configuration from {}", path.display());
            Ok(LookupConfig::from_file(path)?)
        }
        None => Ok(LookupConfig::default()),
    }
}

/// Run conditions from the flags, falling back to the first event.
fn run_conditions(
    input: &Path,
    zenith: Option<f64>,
    noise: Option<f64>,
    offset: Option<f64>,
) -> Result<SimulationConditions> {
    if let (Some(zenith), Some(noise), Some(offset)) = (zenith, noise, offset) {
        return Ok(SimulationConditions::new(zenith, noise, offset));
    }
    let first = ReferenceEventReader::open(input, 1)?
        .next()
        .transpose()?
        .and_then(|chunk| chunk.into_iter().next())
        .ok_or_else(|| CliError::Usage(format!("{} holds no events", input.display())))?;
    let from_event = SimulationConditions::from_event(&first);
    Ok(SimulationConditions::new(
        zenith.unwrap_or(from_event.zenith_deg),
        noise.unwrap_or(from_event.noise),
        offset.unwrap_or(from_event.offset_deg),
    ))
}

fn format_axis(values: &[i32], scale: f64) -> String {
    let rendered: Vec<String> = values
        .iter()
        .map(|&v| from_key_units(v, scale).to_string())
        .collect();
    rendered.join(", ")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    match cli.command {
        Commands::Fill {
            input,
            output,
            config,
            zenith,
            noise,
            offset,
            chunk_size,
        } => {
            let config = load_config(config.as_deref())?;
            let conditions = run_conditions(&input[0], zenith, noise, offset)?;
            log::info!(
                "filling tables at zenith {}°, noise {}, offset {}°",
                conditions.zenith_deg,
                conditions.noise,
                conditions.offset_deg
            );

            let readers = input
                .iter()
                .map(|path| ReferenceEventReader::open(path, chunk_size))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut filler = TableFiller::new(&config, conditions)?;
            let options = BatchOptions {
                progress_interval: config.progress_interval,
                max_runtime: None,
            };
            let summary = fill_batches(&mut filler, readers.into_iter().flatten(), options)?;
            let (tables, stats) = filler.finish()?;
            save_tables(&output, &tables)?;

            println!(
                "Filled {} tables from {} events in {:.2}s",
                tables.len(),
                summary.events,
                summary.elapsed.as_secs_f64()
            );
            println!("Values filled: {}", stats.filled);
            println!("Rejected by cuts: {}", stats.rejected);
            println!("Out of range: {}", stats.out_of_range);
            if stats.unknown_sector > 0 {
                println!("Events outside every azimuth sector: {}", stats.unknown_sector);
            }
        }

        Commands::Merge { input, output } => {
            let merged = load_merged(input.as_slice())?;
            save_tables(&output, &merged)?;
            println!("Merged {} stores into {} tables", input.len(), merged.len());
        }

        Commands::Lookup {
            input,
            tables,
            output,
            config,
            no_header,
            max_runtime_secs,
            chunk_size,
        } => {
            let config = load_config(config.as_deref())?;
            let hierarchy = load_merged(tables.as_slice())?;
            let engine = LookupEngine::new(&hierarchy, &config)?;

            let format = OutputFormat::from_path(&output).unwrap_or_else(|| {
                log::warn!(
                    "unknown extension of {}, writing CSV",
                    output.display()
                );
                OutputFormat::Csv
            });
            let mut writer = ResultWriter::create(&output, format, !no_header)?;

            let max_runtime = max_runtime_secs
                .map(|secs| {
                    Duration::try_from_secs_f64(secs).map_err(|_| {
                        CliError::Usage(format!(
                            "--max-runtime-secs must be a non-negative number, got {secs}"
                        ))
                    })
                })
                .transpose()?;
            let options = BatchOptions {
                progress_interval: config.progress_interval,
                max_runtime,
            };

            let start = Instant::now();
            let readers = input
                .iter()
                .map(|path| ObservedEventReader::open(path, chunk_size))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let summary = lookup_batches(
                &engine,
                readers.into_iter().flatten(),
                options,
                |results| writer.write_results(results),
            )?;
            writer.flush()?;

            println!(
                "Reconstructed {} events in {:.2}s",
                summary.events,
                start.elapsed().as_secs_f64()
            );
            if summary.stopped_early {
                println!("Stopped early: maximum runtime reached");
            }
            println!("Output: {}", output.display());
        }

        Commands::Info { tables } => {
            let hierarchy = load_merged(tables.as_slice())?;
            let axes = hierarchy.axes()?;

            println!("Tables: {}", hierarchy.len());
            for (telescope_type, axes) in &axes {
                println!("Telescope type {}:", telescope_type);
                println!("  Noise levels: {}", format_axis(&axes.noise, NOISE_SCALE));
                println!("  Zenith (deg): {}", format_axis(&axes.zenith, ZENITH_SCALE));
                println!("  Offset (deg): {}", format_axis(&axes.offset, OFFSET_SCALE));
                println!("  Azimuth sectors: {:?}", axes.sectors);
                let names: Vec<&str> = axes.quantities.iter().map(|q| q.name()).collect();
                println!("  Quantities: {}", names.join(", "));
            }

            let populated: usize = hierarchy.iter().map(|set| set.table.populated_bins()).sum();
            let entries: u64 = hierarchy.iter().map(|set| set.table.entries()).sum();
            println!("Populated bins: {}", populated);
            println!("Entries: {}", entries);
        }
    }

    Ok(())
}
