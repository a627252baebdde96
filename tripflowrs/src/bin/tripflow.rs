//! tripflow - build and query per-day ride-hailing trip datasets
//!
//! Usage:
//!   tripflow build                              # zones -> trips -> daily files
//!   tripflow export --output trips_data.json    # one global sample
//!   tripflow inspect                            # time-of-day diagnostics
//!   tripflow zones                              # dump zone centroids
//!   tripflow query buffer --date 2025-07-01 --lon -73.985 --lat 40.758 --radius 800
//!   tripflow query kmeans --date 2025-07-01 --k 6

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use tripflowrs::{DatasetStore, Endpoint, GeoPoint, Pipeline, PipelineConfig, TripQueryService};

/// Build and query per-day trip datasets
#[derive(Parser, Debug)]
#[command(name = "tripflow", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize raw trips and store one dataset per date
    Build {
        /// Raw trip files, replacing trips.inputs from the config
        #[arg(short, long)]
        input: Vec<PathBuf>,
        #[arg(long)]
        sample_cap: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Write one time-sorted sample across all dates to a single file
    Export {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        input: Vec<PathBuf>,
        #[arg(long)]
        sample_cap: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Report whether raw pickups carry a time of day
    Inspect {
        #[arg(short, long)]
        input: Vec<PathBuf>,
    },
    /// Print the zone centroid map as JSON
    Zones,
    /// Query stored datasets
    Query {
        #[command(subcommand)]
        query: Query,
    },
}

#[derive(Subcommand, Debug)]
enum Query {
    /// All trips of a date
    Trips {
        #[arg(long)]
        date: NaiveDate,
    },
    /// All trip origins of a date
    Hotspots {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Trips starting within a radius
    Buffer {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        /// Meters; defaults to query.default_radius_m
        #[arg(long)]
        radius: Option<f64>,
    },
    /// Trips starting or ending within a radius
    Od {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long)]
        radius: Option<f64>,
        /// origin or destination
        #[arg(long, default_value = "origin")]
        endpoint: Endpoint,
    },
    /// K-means hotspot centers over trip origins
    Kmeans {
        #[arg(long)]
        date: NaiveDate,
        /// Defaults to query.kmeans.k
        #[arg(long)]
        k: Option<usize>,
    },
    /// Counts and time span of a stored date
    Summary {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Dates with a stored dataset
    Dates,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn apply_overrides(
    config: &mut PipelineConfig,
    input: Vec<PathBuf>,
    sample_cap: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    if !input.is_empty() {
        config.trips.inputs = input;
    }
    if let Some(cap) = sample_cap {
        config.partition.sample_cap = cap;
    }
    if seed.is_some() {
        config.partition.seed = seed;
    }
    config.validate().context("Invalid command line overrides")?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = PipelineConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Build {
            input,
            sample_cap,
            seed,
        } => {
            apply_overrides(&mut config, input, sample_cap, seed)?;
            let store = DatasetStore::from_config(&config.storage)?
                .with_sample_cap(config.partition.sample_cap);
            let report = Pipeline::new(config).run(&store).context("Pipeline failed")?;
            info!(
                "Stored {} dates in {}",
                report.days.len(),
                store.primary().display()
            );
            print_json(&report)?;
        }
        Command::Export {
            output,
            input,
            sample_cap,
            seed,
        } => {
            apply_overrides(&mut config, input, sample_cap, seed)?;
            let count = Pipeline::new(config)
                .export_sample(&output)
                .context("Export failed")?;
            println!("{count} trips written to {}", output.display());
        }
        Command::Inspect { input } => {
            apply_overrides(&mut config, input, None, None)?;
            let report = Pipeline::new(config).inspect()?;
            print_json(&report)?;
            if report.lacks_time_of_day {
                println!("Pickup times carry no time of day; build will synthesize times.");
            }
        }
        Command::Zones => {
            let (zones, _) = Pipeline::new(config).load_zones()?;
            print_json(&zones)?;
        }
        Command::Query { query } => {
            let store = Arc::new(DatasetStore::from_config(&config.storage)?);
            let service = TripQueryService::new(store, config.query.kmeans);
            let radius = |r: Option<f64>| r.unwrap_or(config.query.default_radius_m);

            match query {
                Query::Trips { date } => print_json(&service.get_trips(date)?)?,
                Query::Hotspots { date } => print_json(&service.get_hotspot_origins(date)?)?,
                Query::Buffer {
                    date,
                    lon,
                    lat,
                    radius: r,
                } => print_json(&service.buffer(date, GeoPoint::new(lon, lat), radius(r))?)?,
                Query::Od {
                    date,
                    lon,
                    lat,
                    radius: r,
                    endpoint,
                } => print_json(&service.od(date, GeoPoint::new(lon, lat), radius(r), endpoint)?)?,
                Query::Kmeans { date, k } => {
                    let k = k.unwrap_or(config.query.kmeans.k);
                    print_json(&service.kmeans(date, k)?)?
                }
                Query::Summary { date } => print_json(&service.daily_summary(date)?)?,
                Query::Dates => print_json(&service.available_dates()?)?,
            }
        }
    }

    Ok(())
}
