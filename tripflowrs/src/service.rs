//! Query interface over stored daily datasets.
//!
//! Every query names a date. A date with no stored dataset answers with an
//! empty result; a dataset that exists but cannot be read is an error.

use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, info};
use serde::Serialize;
use tripflow::{
    DailyTripSet, Endpoint, GeoPoint, KMeansConfig, Result, SpatialQueryEngine, TripRecord,
};

use crate::store::DatasetStore;

/// Trips matching a spatial filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripsResponse {
    pub trips: Vec<TripRecord>,
    pub count: usize,
}

impl TripsResponse {
    fn new(trips: Vec<TripRecord>) -> Self {
        let count = trips.len();
        Self { trips, count }
    }

    fn empty() -> Self {
        Self::new(Vec::new())
    }
}

/// Hotspot centers from k-means.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CentersResponse {
    pub centers: Vec<GeoPoint>,
}

/// Overview of one stored day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub record_count: usize,
    pub source_count: usize,
    pub synthetic_time: bool,
    pub first_time: Option<u32>,
    pub last_time: Option<u32>,
}

impl DailySummary {
    fn of(set: &DailyTripSet) -> Self {
        let span = set.time_span();
        Self {
            date: set.date(),
            record_count: set.len(),
            source_count: set.source_count(),
            synthetic_time: set.synthetic_time(),
            first_time: span.map(|(first, _)| first),
            last_time: span.map(|(_, last)| last),
        }
    }
}

/// Answers trip, buffer, OD and hotspot queries for a date.
pub struct TripQueryService {
    store: Arc<DatasetStore>,
    kmeans: KMeansConfig,
}

impl TripQueryService {
    pub fn new(store: Arc<DatasetStore>, kmeans: KMeansConfig) -> Self {
        Self { store, kmeans }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    fn with_day<T>(
        &self,
        date: NaiveDate,
        missing: T,
        f: impl FnOnce(&SpatialQueryEngine) -> T,
    ) -> Result<T> {
        match self.store.engine(date)? {
            Some(engine) => Ok(f(&engine)),
            None => {
                debug!("[Query] {} has no dataset", date);
                Ok(missing)
            }
        }
    }

    /// All trips for the date, sorted by time.
    pub fn get_trips(&self, date: NaiveDate) -> Result<Vec<TripRecord>> {
        self.with_day(date, Vec::new(), |engine| engine.dataset().trips().to_vec())
    }

    /// Every trip origin for the date.
    pub fn get_hotspot_origins(&self, date: NaiveDate) -> Result<Vec<GeoPoint>> {
        self.with_day(date, Vec::new(), |engine| engine.hotspot_origins().to_vec())
    }

    /// Trips whose origin is within `radius_m` of `center`.
    pub fn buffer(
        &self,
        date: NaiveDate,
        center: GeoPoint,
        radius_m: f64,
    ) -> Result<TripsResponse> {
        self.with_day(date, TripsResponse::empty(), |engine| {
            TripsResponse::new(engine.buffer(center, radius_m))
        })
    }

    /// Trips whose origin or destination is within `radius_m` of `center`.
    pub fn od(
        &self,
        date: NaiveDate,
        center: GeoPoint,
        radius_m: f64,
        endpoint: Endpoint,
    ) -> Result<TripsResponse> {
        self.with_day(date, TripsResponse::empty(), |engine| {
            TripsResponse::new(engine.od_filter(center, radius_m, endpoint))
        })
    }

    /// `k` hotspot centers over the date's origins.
    ///
    /// Too little data (no trips, or fewer distinct origins than `k`) gives
    /// an empty list rather than an error.
    pub fn kmeans(&self, date: NaiveDate, k: usize) -> Result<CentersResponse> {
        let Some(engine) = self.store.engine(date)? else {
            return Ok(CentersResponse::default());
        };
        let config = KMeansConfig { k, ..self.kmeans };
        match engine.cluster(&config) {
            Ok(result) => Ok(CentersResponse {
                centers: result.centers,
            }),
            Err(e) if e.is_insufficient_data() => {
                info!("[Query] k-means for {} skipped: {}", date, e);
                Ok(CentersResponse::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Counts and time span of the stored day.
    pub fn daily_summary(&self, date: NaiveDate) -> Result<Option<DailySummary>> {
        self.with_day(date, None, |engine| Some(DailySummary::of(engine.dataset())))
    }

    /// Dates with a stored dataset.
    pub fn available_dates(&self) -> Result<Vec<NaiveDate>> {
        self.store.available_dates()
    }
}
