//! On-disk store of per-date trip datasets.
//!
//! Layout, per storage location:
//! ```text
//! {prefix}2025-07-01.json        [{"from":[lon,lat],"to":[lon,lat],"time":n}, ...]
//! {prefix}2025-07-01.meta.json   {"date":"2025-07-01","record_count":..,"synthetic_time":..}
//! ```
//!
//! - Writes go to the first location and replace each file through a
//!   temp file + rename. The sidecar is written first and the data file
//!   last; the sidecar carries the data file's record count and SHA-256, and
//!   a sidecar that does not match its data file is ignored.
//! - Reads walk the locations in order and take the first file found.
//! - Loaded datasets are cached in an LRU as query engines, so the spatial
//!   indexes built for one query serve the following ones.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use log::{debug, info, warn};
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tripflow::{
    DailyTripSet, DatasetSink, Result, SpatialQueryEngine, TripRecord, TripflowError,
};

use crate::config::StorageConfig;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATA_SUFFIX: &str = ".json";
const META_SUFFIX: &str = ".meta.json";

/// Sidecar metadata stored next to each daily dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub date: NaiveDate,
    pub record_count: usize,
    pub source_count: usize,
    #[serde(default)]
    pub sample_cap: Option<usize>,
    /// Times were synthesized because the source had no time of day
    #[serde(default)]
    pub synthetic_time: bool,
    /// Hex SHA-256 of the data file this sidecar was written with
    #[serde(default)]
    pub data_sha256: Option<String>,
}

impl DatasetMeta {
    /// Whether this sidecar was written together with `data`.
    fn describes(&self, record_count: usize, data: &[u8]) -> bool {
        self.record_count == record_count
            && self
                .data_sha256
                .as_deref()
                .is_none_or(|hash| hash == sha256_hex(data))
    }
}

type EngineCache = LruCache<NaiveDate, Arc<SpatialQueryEngine>>;

/// Per-date dataset files across an ordered list of storage locations.
pub struct DatasetStore {
    locations: Vec<PathBuf>,
    prefix: String,
    sample_cap: Option<usize>,
    cache: Mutex<EngineCache>,
    /// Bumped by every save; loads that raced a save skip the cache
    generation: AtomicU64,
}

/// One dataset read from disk, with its sidecar if the sidecar matches.
struct StoredDay {
    path: PathBuf,
    trips: Vec<TripRecord>,
    meta: Option<DatasetMeta>,
}

impl DatasetStore {
    pub fn new(
        locations: Vec<PathBuf>,
        prefix: impl Into<String>,
        cache_capacity: usize,
    ) -> Result<Self> {
        if locations.is_empty() {
            return Err(TripflowError::Config {
                message: "at least one storage location is required".to_string(),
            });
        }
        let capacity = NonZeroUsize::new(cache_capacity).ok_or_else(|| TripflowError::Config {
            message: "cache capacity must be at least 1".to_string(),
        })?;
        Ok(Self {
            locations,
            prefix: prefix.into(),
            sample_cap: None,
            cache: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(config.locations.clone(), config.prefix.clone(), config.cache_capacity)
    }

    /// Record the sample cap in metadata written from now on.
    pub fn with_sample_cap(mut self, sample_cap: usize) -> Self {
        self.sample_cap = Some(sample_cap);
        self
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    /// Location that receives writes.
    pub fn primary(&self) -> &Path {
        &self.locations[0]
    }

    pub fn file_name(&self, date: NaiveDate) -> String {
        format!("{}{}{}", self.prefix, date.format(DATE_FORMAT), DATA_SUFFIX)
    }

    pub fn meta_file_name(&self, date: NaiveDate) -> String {
        format!("{}{}{}", self.prefix, date.format(DATE_FORMAT), META_SUFFIX)
    }

    /// Replace the stored dataset for the set's date.
    pub fn save(&self, set: &DailyTripSet) -> Result<PathBuf> {
        let dir = self.primary();
        fs::create_dir_all(dir).map_err(|e| {
            TripflowError::persistence(format!("cannot create {}: {e}", dir.display()))
        })?;

        let date = set.date();
        let data_path = dir.join(self.file_name(date));
        let data = serde_json::to_vec(set.trips()).map_err(|e| {
            TripflowError::persistence(format!("cannot serialize {}: {e}", data_path.display()))
        })?;

        let meta = DatasetMeta {
            date,
            record_count: set.len(),
            source_count: set.source_count(),
            sample_cap: self.sample_cap,
            synthetic_time: set.synthetic_time(),
            data_sha256: Some(sha256_hex(&data)),
        };
        // Sidecar first: until the data file lands, the new sidecar does not
        // match the old data and is ignored by readers
        write_json_atomic(&dir.join(self.meta_file_name(date)), &meta)?;
        replace_atomic(&data_path, |w| w.write_all(&data))?;

        {
            let mut cache = self.lock_cache();
            self.generation.fetch_add(1, Ordering::SeqCst);
            cache.pop(&date);
        }
        info!(
            "[Store] Wrote {} trips for {} to {}",
            set.len(),
            date,
            data_path.display()
        );
        Ok(data_path)
    }

    /// First location holding a dataset for `date`.
    pub fn find(&self, date: NaiveDate) -> Option<PathBuf> {
        let name = self.file_name(date);
        self.locations
            .iter()
            .map(|dir| dir.join(&name))
            .find(|path| path.is_file())
    }

    /// Load the dataset for `date`; `Ok(None)` when no location has it.
    pub fn load(&self, date: NaiveDate) -> Result<Option<Arc<DailyTripSet>>> {
        Ok(self.engine(date)?.map(|engine| Arc::clone(engine.dataset())))
    }

    /// Query engine over the dataset for `date`, shared through the cache.
    pub fn engine(&self, date: NaiveDate) -> Result<Option<Arc<SpatialQueryEngine>>> {
        let generation = {
            let mut cache = self.lock_cache();
            if let Some(engine) = cache.get(&date) {
                return Ok(Some(Arc::clone(engine)));
            }
            self.generation.load(Ordering::SeqCst)
        };

        let Some(day) = self.read_day(date)? else {
            debug!("[Store] No dataset for {}", date);
            return Ok(None);
        };

        let count = day.trips.len();
        let set = match day.meta {
            Some(meta) => DailyTripSet::new(date, day.trips, meta.synthetic_time)
                .with_source_count(meta.source_count),
            None => DailyTripSet::new(date, day.trips, false),
        };
        let engine = Arc::new(SpatialQueryEngine::new(set));
        self.cache_if_current(date, generation, &engine);

        debug!(
            "[Store] Loaded {} trips for {} from {}",
            count,
            date,
            day.path.display()
        );
        Ok(Some(engine))
    }

    /// Sidecar metadata for `date`, if a dataset with matching metadata exists.
    pub fn load_meta(&self, date: NaiveDate) -> Result<Option<DatasetMeta>> {
        Ok(self.read_day(date)?.and_then(|day| day.meta))
    }

    fn read_day(&self, date: NaiveDate) -> Result<Option<StoredDay>> {
        let Some(path) = self.find(date) else {
            return Ok(None);
        };

        let data = fs::read(&path).map_err(|e| {
            TripflowError::persistence(format!("cannot open {}: {e}", path.display()))
        })?;
        let trips: Vec<TripRecord> = serde_json::from_slice(&data).map_err(|e| {
            TripflowError::persistence(format!("corrupt dataset {}: {e}", path.display()))
        })?;
        if let Some(bad) = trips.iter().find(|t| t.time >= tripflow::SECONDS_PER_DAY) {
            return Err(TripflowError::persistence(format!(
                "{}: time {} out of range",
                path.display(),
                bad.time
            )));
        }

        // The sidecar lives next to the data file it describes
        let meta_path = path.with_file_name(self.meta_file_name(date));
        let meta = if meta_path.is_file() {
            let meta: DatasetMeta = read_json(&meta_path)?;
            if meta.describes(trips.len(), &data) {
                Some(meta)
            } else {
                warn!(
                    "[Store] Ignoring {}: it does not match {}",
                    meta_path.display(),
                    path.display()
                );
                None
            }
        } else {
            None
        };

        Ok(Some(StoredDay { path, trips, meta }))
    }

    fn cache_if_current(
        &self,
        date: NaiveDate,
        generation: u64,
        engine: &Arc<SpatialQueryEngine>,
    ) {
        let mut cache = self.lock_cache();
        if self.generation.load(Ordering::SeqCst) == generation {
            cache.put(date, Arc::clone(engine));
        } else {
            debug!("[Store] {} was rewritten during load, not caching", date);
        }
    }

    /// Every date with a dataset in any location, ascending.
    pub fn available_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates = BTreeSet::new();
        for dir in &self.locations {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(TripflowError::persistence(format!(
                        "cannot list {}: {e}",
                        dir.display()
                    )))
                }
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                if let Some(date) = name.to_str().and_then(|n| self.parse_file_name(n)) {
                    dates.insert(date);
                }
            }
        }
        Ok(dates.into_iter().collect())
    }

    fn parse_file_name(&self, name: &str) -> Option<NaiveDate> {
        if name.ends_with(META_SUFFIX) {
            return None;
        }
        let date = name.strip_prefix(&self.prefix)?.strip_suffix(DATA_SUFFIX)?;
        NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
    }

    fn lock_cache(&self) -> MutexGuard<'_, EngineCache> {
        // A panic while holding the lock leaves the cache consistent
        self.cache.lock().unwrap_or_else(|poisoned| {
            warn!("[Store] Cache lock was poisoned, continuing");
            poisoned.into_inner()
        })
    }
}

impl DatasetSink for DatasetStore {
    fn persist(&self, set: &DailyTripSet) -> Result<()> {
        self.save(set).map(|_| ())
    }
}

/// Serialize `value` to `path` through a temp file in the same directory,
/// then rename over the target.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    replace_atomic(path, |w| serde_json::to_writer(w, value).map_err(io::Error::from))
}

fn replace_atomic(
    path: &Path,
    write: impl FnOnce(&mut dyn Write) -> io::Result<()>,
) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let fail = |what: &str, e: &dyn std::fmt::Display| {
        TripflowError::persistence(format!("{what} {}: {e}", path.display()))
    };

    let tmp = NamedTempFile::new_in(dir).map_err(|e| fail("cannot create temp file for", &e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        write(&mut writer).map_err(|e| fail("cannot write", &e))?;
        writer.flush().map_err(|e| fail("cannot write", &e))?;
    }
    tmp.as_file().sync_all().map_err(|e| fail("cannot sync", &e))?;
    tmp.persist(path).map_err(|e| fail("cannot replace", &e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .map_err(|e| TripflowError::persistence(format!("cannot open {}: {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| TripflowError::persistence(format!("corrupt file {}: {e}", path.display())))
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
