//! # Daily Partitioning
//!
//! Groups normalized trips by calendar date and turns each group into a
//! [`DailyTripSet`]:
//!
//! 1. **Sample** - above `sample_cap`, keep a uniform sample without
//!    replacement of exactly `sample_cap` trips
//! 2. **Correct** - if more than `zero_time_threshold` of the kept trips sit at
//!    `time == 0` the source had no time of day; every time is replaced by a
//!    uniform random second and the set is flagged `synthetic_time`
//! 3. **Sort** - ascending by `time`
//!
//! Grouping is a barrier: all trips of a date are collected before that
//! date's set is produced.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TripflowError};
use crate::{TripRecord, SECONDS_PER_DAY};

/// Configuration for [`DailyPartitioner`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Maximum number of trips kept per date.
    /// Default: 5000
    pub sample_cap: usize,

    /// Seed for reproducible sampling and time correction. Each date gets its
    /// own generator derived from this seed, so results don't depend on the
    /// order dates are processed in.
    /// Default: None (seeded from the OS)
    pub seed: Option<u64>,

    /// Fraction of zero-time trips above which times are synthesized.
    /// Default: 0.9
    pub zero_time_threshold: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            sample_cap: 5000,
            seed: None,
            zero_time_threshold: 0.9,
        }
    }
}

impl PartitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_cap == 0 {
            return Err(TripflowError::Config {
                message: "sample_cap must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.zero_time_threshold) {
            return Err(TripflowError::Config {
                message: format!(
                    "zero_time_threshold must be within [0, 1], got {}",
                    self.zero_time_threshold
                ),
            });
        }
        Ok(())
    }

    fn rng_for(&self, date: NaiveDate) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ u64::from(date.num_days_from_ce() as u32)),
            None => StdRng::from_os_rng(),
        }
    }
}

/// One date's trips, sorted by `time`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTripSet {
    date: NaiveDate,
    trips: Vec<TripRecord>,
    synthetic_time: bool,
    source_count: usize,
}

impl DailyTripSet {
    /// Build a set. Trips are sorted by time here.
    pub fn new(date: NaiveDate, mut trips: Vec<TripRecord>, synthetic_time: bool) -> Self {
        trips.sort_by_key(|t| t.time);
        let source_count = trips.len();
        Self {
            date,
            trips,
            synthetic_time,
            source_count,
        }
    }

    /// Record how many valid trips existed before sampling.
    pub fn with_source_count(mut self, source_count: usize) -> Self {
        self.source_count = source_count.max(self.trips.len());
        self
    }

    /// An empty set for a date with no data.
    pub fn empty(date: NaiveDate) -> Self {
        Self::new(date, Vec::new(), false)
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn trips(&self) -> &[TripRecord] {
        &self.trips
    }

    /// Whether the times were synthesized by zero-time correction.
    pub fn synthetic_time(&self) -> bool {
        self.synthetic_time
    }

    /// Valid trips seen for this date before sampling.
    pub fn source_count(&self) -> usize {
        self.source_count
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    /// Earliest and latest trip time.
    pub fn time_span(&self) -> Option<(u32, u32)> {
        Some((self.trips.first()?.time, self.trips.last()?.time))
    }
}

/// Destination for finished daily sets. Each call replaces whatever was
/// stored for that date; nothing is ever merged.
pub trait DatasetSink {
    fn persist(&self, set: &DailyTripSet) -> Result<()>;
}

/// Groups, samples, corrects and sorts normalized trips.
#[derive(Debug, Clone, Default)]
pub struct DailyPartitioner {
    config: PartitionConfig,
}

impl DailyPartitioner {
    pub fn new(config: PartitionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Partition into one set per date.
    pub fn partition<I>(&self, trips: I) -> BTreeMap<NaiveDate, DailyTripSet>
    where
        I: IntoIterator<Item = (NaiveDate, TripRecord)>,
    {
        let groups = group_by_date(trips);
        info!("[Partition] Grouped trips into {} dates", groups.len());

        groups
            .into_iter()
            .map(|(date, trips)| (date, self.finish_date(date, trips)))
            .collect()
    }

    /// Partition and hand every set to `sink`, in date order.
    ///
    /// Stops at the first persistence failure; dates already written stay
    /// written.
    pub fn partition_into<I, S>(&self, trips: I, sink: &S) -> Result<Vec<DailyTripSet>>
    where
        I: IntoIterator<Item = (NaiveDate, TripRecord)>,
        S: DatasetSink + ?Sized,
    {
        let sets = self.partition(trips);
        let mut written = Vec::with_capacity(sets.len());
        for (_, set) in sets {
            sink.persist(&set)?;
            written.push(set);
        }
        info!("[Partition] Persisted {} daily datasets", written.len());
        Ok(written)
    }

    /// Sample, correct and sort one date's trips.
    pub fn finish_date(&self, date: NaiveDate, trips: Vec<TripRecord>) -> DailyTripSet {
        let mut rng = self.config.rng_for(date);
        let source_count = trips.len();

        let mut kept = sample_uniform(trips, self.config.sample_cap, &mut rng);
        let synthetic = correct_zero_times(&mut kept, self.config.zero_time_threshold, &mut rng);
        if synthetic {
            warn!(
                "[Partition] {}: source has no time of day, synthesized {} times",
                date,
                kept.len()
            );
        }
        debug!(
            "[Partition] {}: kept {} of {} trips",
            date,
            kept.len(),
            source_count
        );

        DailyTripSet::new(date, kept, synthetic).with_source_count(source_count)
    }
}

fn group_by_date<I>(trips: I) -> BTreeMap<NaiveDate, Vec<TripRecord>>
where
    I: IntoIterator<Item = (NaiveDate, TripRecord)>,
{
    let mut groups: BTreeMap<NaiveDate, Vec<TripRecord>> = BTreeMap::new();
    for (date, trip) in trips {
        groups.entry(date).or_default().push(trip);
    }
    groups
}

/// Uniform sample without replacement of exactly `cap` trips, or all of them
/// when there are not more than `cap`.
pub fn sample_uniform<R: Rng + ?Sized>(
    trips: Vec<TripRecord>,
    cap: usize,
    rng: &mut R,
) -> Vec<TripRecord> {
    if trips.len() <= cap {
        return trips;
    }
    let mut picked = index::sample(rng, trips.len(), cap).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| trips[i]).collect()
}

/// Replace every time with a random second when more than `threshold` of the
/// trips are at midnight. Returns whether correction happened.
pub fn correct_zero_times<R: Rng + ?Sized>(
    trips: &mut [TripRecord],
    threshold: f64,
    rng: &mut R,
) -> bool {
    if trips.is_empty() {
        return false;
    }
    let zeros = trips.iter().filter(|t| t.time == 0).count();
    if (zeros as f64) <= threshold * trips.len() as f64 {
        return false;
    }
    for trip in trips.iter_mut() {
        trip.time = rng.random_range(0..SECONDS_PER_DAY);
    }
    true
}

/// One global sample across all dates, sorted by time.
///
/// Produces the single-file export: dates are ignored, the cap applies to
/// the whole input.
pub fn sample_all<I>(trips: I, config: &PartitionConfig) -> Result<Vec<TripRecord>>
where
    I: IntoIterator<Item = (NaiveDate, TripRecord)>,
{
    config.validate()?;
    let all: Vec<TripRecord> = trips.into_iter().map(|(_, t)| t).collect();
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let total = all.len();
    let mut kept = sample_uniform(all, config.sample_cap, &mut rng);
    kept.sort_by_key(|t| t.time);
    info!("[Partition] Global sample kept {} of {} trips", kept.len(), total);
    Ok(kept)
}

/// How much time-of-day information a trip source carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimeGranularity {
    pub total: usize,
    pub zero_time: usize,
    pub zero_fraction: f64,
    /// Whether partitioning would synthesize times for this data
    pub lacks_time_of_day: bool,
}

impl TimeGranularity {
    /// Inspect pickup times (seconds since midnight).
    pub fn inspect(times: impl IntoIterator<Item = u32>, threshold: f64) -> Self {
        let (total, zero_time) = times
            .into_iter()
            .fold((0usize, 0usize), |(n, z), t| (n + 1, z + usize::from(t == 0)));
        let zero_fraction = if total == 0 {
            0.0
        } else {
            zero_time as f64 / total as f64
        };
        Self {
            total,
            zero_time,
            zero_fraction,
            lacks_time_of_day: total > 0 && zero_time as f64 > threshold * total as f64,
        }
    }
}
