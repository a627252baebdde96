//! # Trip Normalization
//!
//! Turns raw rows into `(date, TripRecord)` pairs, one row at a time.
//!
//! A row produces nothing when:
//! - origin, destination or pickup time is missing ([`DropReason::Incomplete`])
//! - either zone id has no centroid ([`DropReason::UnresolvableZone`])
//! - origin and destination are the same zone ([`DropReason::DegenerateTrip`])
//!
//! Otherwise `time = hour * 3600 + minute * 60 + second` of the pickup, and
//! the record is keyed by the pickup's calendar date.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use log::info;
use serde::{Deserialize, Serialize};

use crate::zones::ZoneMap;
use crate::{TripRecord, ZoneId};

/// One raw trip row. `None` models a null cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawTripRow {
    pub origin: Option<ZoneId>,
    pub destination: Option<ZoneId>,
    pub pickup: Option<NaiveDateTime>,
}

impl RawTripRow {
    /// A fully populated row.
    pub fn new(origin: ZoneId, destination: ZoneId, pickup: NaiveDateTime) -> Self {
        Self {
            origin: Some(origin),
            destination: Some(destination),
            pickup: Some(pickup),
        }
    }
}

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    Incomplete,
    UnresolvableZone,
    DegenerateTrip,
}

/// Per-reason counters for one normalization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub rows_read: usize,
    pub emitted: usize,
    pub incomplete: usize,
    pub unresolvable: usize,
    pub degenerate: usize,
}

impl NormalizeStats {
    fn record(&mut self, outcome: Result<(), DropReason>) {
        self.rows_read += 1;
        match outcome {
            Ok(()) => self.emitted += 1,
            Err(DropReason::Incomplete) => self.incomplete += 1,
            Err(DropReason::UnresolvableZone) => self.unresolvable += 1,
            Err(DropReason::DegenerateTrip) => self.degenerate += 1,
        }
    }

    /// Combine counters from two shards.
    pub fn merge(mut self, other: NormalizeStats) -> NormalizeStats {
        self.rows_read += other.rows_read;
        self.emitted += other.emitted;
        self.incomplete += other.incomplete;
        self.unresolvable += other.unresolvable;
        self.degenerate += other.degenerate;
        self
    }

    pub fn dropped(&self) -> usize {
        self.incomplete + self.unresolvable + self.degenerate
    }
}

/// Seconds since midnight of a timestamp, always in `[0, 86399]`.
#[inline]
pub fn time_of_day(pickup: &NaiveDateTime) -> u32 {
    pickup.hour() * 3600 + pickup.minute() * 60 + pickup.second()
}

/// Normalize a single row.
pub fn normalize_row(
    row: &RawTripRow,
    zones: &ZoneMap,
) -> Result<(NaiveDate, TripRecord), DropReason> {
    let (Some(origin), Some(destination), Some(pickup)) = (row.origin, row.destination, row.pickup)
    else {
        return Err(DropReason::Incomplete);
    };

    let (Some(from), Some(to)) = (zones.get(origin), zones.get(destination)) else {
        return Err(DropReason::UnresolvableZone);
    };

    if origin == destination {
        return Err(DropReason::DegenerateTrip);
    }

    Ok((pickup.date(), TripRecord::new(from, to, time_of_day(&pickup))))
}

/// Lazily normalize a sequence of raw rows.
///
/// Dropped rows are skipped silently and counted; see [`Normalize::stats`].
pub fn normalize<I>(rows: I, zones: &ZoneMap) -> Normalize<'_, I::IntoIter>
where
    I: IntoIterator<Item = RawTripRow>,
{
    Normalize {
        rows: rows.into_iter(),
        zones,
        stats: NormalizeStats::default(),
    }
}

/// Iterator adaptor returned by [`normalize`].
pub struct Normalize<'a, I> {
    rows: I,
    zones: &'a ZoneMap,
    stats: NormalizeStats,
}

impl<I> Normalize<'_, I> {
    /// Counters for the rows consumed so far.
    pub fn stats(&self) -> NormalizeStats {
        self.stats
    }

    /// Log the counters with the standard tag.
    pub fn log_summary(&self) {
        log_stats(&self.stats);
    }
}

impl<I: Iterator<Item = RawTripRow>> Iterator for Normalize<'_, I> {
    type Item = (NaiveDate, TripRecord);

    fn next(&mut self) -> Option<Self::Item> {
        for row in self.rows.by_ref() {
            match normalize_row(&row, self.zones) {
                Ok(item) => {
                    self.stats.record(Ok(()));
                    return Some(item);
                }
                Err(reason) => self.stats.record(Err(reason)),
            }
        }
        None
    }
}

pub(crate) fn log_stats(stats: &NormalizeStats) {
    info!(
        "[Normalize] {} rows -> {} trips ({} incomplete, {} unresolvable, {} degenerate)",
        stats.rows_read, stats.emitted, stats.incomplete, stats.unresolvable, stats.degenerate
    );
}

/// Normalize rows in parallel using rayon.
///
/// Output order is not the input order; partitioning re-sorts by time.
#[cfg(feature = "parallel")]
pub fn normalize_parallel(
    rows: &[RawTripRow],
    zones: &ZoneMap,
) -> (Vec<(NaiveDate, TripRecord)>, NormalizeStats) {
    use rayon::prelude::*;

    let (trips, stats) = rows
        .par_iter()
        .fold(
            || (Vec::new(), NormalizeStats::default()),
            |(mut trips, mut stats), row| {
                match normalize_row(row, zones) {
                    Ok(item) => {
                        stats.record(Ok(()));
                        trips.push(item);
                    }
                    Err(reason) => stats.record(Err(reason)),
                }
                (trips, stats)
            },
        )
        .reduce(
            || (Vec::new(), NormalizeStats::default()),
            |(mut a, sa), (b, sb)| {
                a.extend(b);
                (a, sa.merge(sb))
            },
        );

    log_stats(&stats);
    (trips, stats)
}
