//! Batch pipeline: zones -> raw rows -> normalized trips -> daily datasets.

use std::path::Path;

use chrono::NaiveDate;
use log::info;
use serde::Serialize;
use tripflow::normalize::time_of_day;
use tripflow::{
    read_trip_rows, sample_all, BuildStats, DailyPartitioner, NormalizeStats, RawTripRow, Result,
    TimeGranularity, TripRecord, TripflowError, ZoneMap,
};

use crate::config::PipelineConfig;
use crate::store::{write_json_atomic, DatasetStore};

/// Outcome of one stored date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayReport {
    pub date: NaiveDate,
    pub kept: usize,
    pub source_count: usize,
    pub synthetic_time: bool,
}

/// Outcome of a full pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub zones: BuildStats,
    pub normalize: NormalizeStats,
    pub days: Vec<DayReport>,
}

/// Runs the batch stages with one configuration.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Build the zone map from the configured polygon source.
    pub fn load_zones(&self) -> Result<(ZoneMap, BuildStats)> {
        let (zones, stats) = self.config.zones.source().load()?;
        if zones.is_empty() {
            return Err(TripflowError::data_source(
                self.config.zones.path.display().to_string(),
                "no zones could be built",
            ));
        }
        Ok((zones, stats))
    }

    /// Read every configured input file.
    pub fn read_rows(&self) -> Result<Vec<RawTripRow>> {
        let inputs = &self.config.trips.inputs;
        if inputs.is_empty() {
            return Err(TripflowError::Config {
                message: "trips.inputs names no files".to_string(),
            });
        }
        let mut rows = Vec::new();
        for path in inputs {
            rows.extend(read_trip_rows(path, &self.config.trips.columns)?);
        }
        Ok(rows)
    }

    fn normalized(&self) -> Result<(BuildStats, NormalizeStats, Vec<(NaiveDate, TripRecord)>)> {
        let (zones, zone_stats) = self.load_zones()?;
        let rows = self.read_rows()?;
        let (trips, stats) = normalize_rows(rows, &zones);
        Ok((zone_stats, stats, trips))
    }

    /// Normalize, partition and persist one dataset per date into `store`.
    pub fn run(&self, store: &DatasetStore) -> Result<BuildReport> {
        self.config.partition.validate()?;
        let (zone_stats, normalize_stats, trips) = self.normalized()?;

        let partitioner = DailyPartitioner::new(self.config.partition);
        let sets = partitioner.partition_into(trips, store)?;

        let days: Vec<DayReport> = sets
            .iter()
            .map(|set| DayReport {
                date: set.date(),
                kept: set.len(),
                source_count: set.source_count(),
                synthetic_time: set.synthetic_time(),
            })
            .collect();

        info!(
            "[Pipeline] Built {} daily datasets from {} trips",
            days.len(),
            normalize_stats.emitted
        );

        Ok(BuildReport {
            zones: zone_stats,
            normalize: normalize_stats,
            days,
        })
    }

    /// Write one time-sorted sample across all dates to `output`.
    pub fn export_sample(&self, output: &Path) -> Result<usize> {
        let (_, _, trips) = self.normalized()?;
        let sample = sample_all(trips, &self.config.partition)?;
        if sample.is_empty() {
            return Err(TripflowError::insufficient("no trips survived normalization"));
        }
        write_json_atomic(output, &sample)?;
        info!("[Pipeline] Exported {} trips to {}", sample.len(), output.display());
        Ok(sample.len())
    }

    /// Report how much time-of-day detail the raw pickups carry.
    pub fn inspect(&self) -> Result<TimeGranularity> {
        let rows = self.read_rows()?;
        let report = TimeGranularity::inspect(
            rows.iter().filter_map(|r| r.pickup.as_ref().map(time_of_day)),
            self.config.partition.zero_time_threshold,
        );
        info!(
            "[Pipeline] {} pickups, {} at midnight ({:.1}%)",
            report.total,
            report.zero_time,
            report.zero_fraction * 100.0
        );
        Ok(report)
    }
}

#[cfg(feature = "parallel")]
fn normalize_rows(
    rows: Vec<RawTripRow>,
    zones: &ZoneMap,
) -> (Vec<(NaiveDate, TripRecord)>, NormalizeStats) {
    tripflow::normalize_parallel(&rows, zones)
}

#[cfg(not(feature = "parallel"))]
fn normalize_rows(
    rows: Vec<RawTripRow>,
    zones: &ZoneMap,
) -> (Vec<(NaiveDate, TripRecord)>, NormalizeStats) {
    let mut normalized = tripflow::normalize(rows, zones);
    let trips: Vec<_> = normalized.by_ref().collect();
    normalized.log_summary();
    (trips, normalized.stats())
}
