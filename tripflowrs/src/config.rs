//! Pipeline configuration loaded from TOML.
//!
//! Config file is selected via:
//! 1. `--config <path>` command line argument
//! 2. `TRIPFLOW_CONFIG` environment variable
//! 3. `tripflow.toml` in the working directory, if present
//! 4. Built-in defaults
//!
//! ```toml
//! [zones]
//! path = "data/taxi_zones.geojson"
//! crs = "EPSG:2263"
//!
//! [trips]
//! inputs = ["data/fhvhv_tripdata_2025-07.parquet"]
//!
//! [partition]
//! sample_cap = 5000
//! seed = 42
//!
//! [storage]
//! locations = ["data/daily", "/srv/tripflow/archive"]
//!
//! [query]
//! default_radius_m = 1000.0
//! kmeans = { k = 5, n_init = 10 }
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tripflow::zones::DEFAULT_ID_FIELD;
use tripflow::{KMeansConfig, PartitionConfig, Result, TripColumns, TripflowError, ZoneSource};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TRIPFLOW_CONFIG";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tripflow.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZonesConfig {
    /// GeoJSON export of the zone polygons
    #[serde(default = "default_zones_path")]
    pub path: PathBuf,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Overrides the CRS declared in the file
    #[serde(default)]
    pub crs: Option<String>,
}

fn default_zones_path() -> PathBuf {
    PathBuf::from("taxi_zones.geojson")
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self {
            path: default_zones_path(),
            id_field: default_id_field(),
            crs: None,
        }
    }
}

impl ZonesConfig {
    pub fn source(&self) -> ZoneSource {
        let source = ZoneSource::new(&self.path).with_id_field(&self.id_field);
        match &self.crs {
            Some(crs) => source.with_crs(crs),
            None => source,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TripsConfig {
    /// Raw trip files (`.csv` or `.parquet`), read in order
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub columns: TripColumns,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    /// Ordered storage locations. Writes go to the first; reads return the
    /// first location holding a file for the date.
    #[serde(default = "default_locations")]
    pub locations: Vec<PathBuf>,
    /// File name prefix, `{prefix}{YYYY-MM-DD}.json`
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Number of daily datasets kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_locations() -> Vec<PathBuf> {
    vec![PathBuf::from("daily")]
}

fn default_prefix() -> String {
    "trips_".to_string()
}

fn default_cache_capacity() -> usize {
    8
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            locations: default_locations(),
            prefix: default_prefix(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryConfig {
    /// Radius used when a query doesn't give one
    #[serde(default = "default_radius")]
    pub default_radius_m: f64,
    #[serde(default)]
    pub kmeans: KMeansConfig,
}

fn default_radius() -> f64 {
    1000.0
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_radius_m: default_radius(),
            kmeans: KMeansConfig::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub zones: ZonesConfig,
    #[serde(default)]
    pub trips: TripsConfig,
    #[serde(default)]
    pub partition: PartitionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

impl PipelineConfig {
    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: PipelineConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Where to look for the config when no path is given explicitly.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        local.exists().then_some(local)
    }

    /// Load from the resolved path, or fall back to defaults when there is
    /// no config file at all.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match Self::resolve_path(explicit) {
            Some(path) => {
                log::info!("[Config] Loading {}", path.display());
                Self::from_file(path)
            }
            None => {
                log::info!("[Config] No config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| -> Result<()> { Err(TripflowError::Config { message }) };

        if self.storage.locations.is_empty() {
            return invalid("storage.locations must name at least one directory".to_string());
        }
        if self.storage.cache_capacity == 0 {
            return invalid("storage.cache_capacity must be at least 1".to_string());
        }
        if self.zones.id_field.trim().is_empty() {
            return invalid("zones.id_field must not be empty".to_string());
        }
        self.partition.validate()?;
        if self.query.kmeans.n_init == 0 || self.query.kmeans.max_iter == 0 {
            return invalid("query.kmeans n_init and max_iter must be at least 1".to_string());
        }
        if !(self.query.default_radius_m.is_finite() && self.query.default_radius_m >= 0.0) {
            return invalid(format!(
                "query.default_radius_m must be a non-negative number, got {}",
                self.query.default_radius_m
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.partition.sample_cap, 5000);
        assert_eq!(config.storage.prefix, "trips_");
        assert_eq!(config.query.kmeans.n_init, 10);
        assert_eq!(config.trips.columns.origin, "PULocationID");
    }

    #[test]
    fn test_partial_sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [zones]
            path = "zones.geojson"
            crs = "EPSG:2263"

            [partition]
            seed = 42

            [trips.columns]
            pickup = "tpep_pickup_datetime"

            [query]
            kmeans = { k = 8 }
            "#,
        )
        .unwrap();

        assert_eq!(config.zones.crs.as_deref(), Some("EPSG:2263"));
        assert_eq!(config.zones.id_field, "LocationID");
        assert_eq!(config.partition.seed, Some(42));
        assert_eq!(config.partition.sample_cap, 5000);
        assert_eq!(config.trips.columns.pickup, "tpep_pickup_datetime");
        assert_eq!(config.trips.columns.origin, "PULocationID");
        assert_eq!(config.query.kmeans.k, 8);
        assert_eq!(config.query.kmeans.max_iter, 300);
    }

    #[test]
    fn test_validation_failures() {
        assert!(PipelineConfig::from_toml_str("[storage]\nlocations = []").is_err());
        assert!(PipelineConfig::from_toml_str("[storage]\ncache_capacity = 0").is_err());
        assert!(PipelineConfig::from_toml_str("[partition]\nzero_time_threshold = 2.0").is_err());
        assert!(PipelineConfig::from_toml_str("[partition]\nsample_cap = 0").is_err());
        assert!(PipelineConfig::from_toml_str("[query]\ndefault_radius_m = -1.0").is_err());
        assert!(PipelineConfig::from_toml_str("[zones\n").is_err());
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = Path::new("/etc/tripflow/custom.toml");
        assert_eq!(
            PipelineConfig::resolve_path(Some(explicit)),
            Some(explicit.to_path_buf())
        );
    }

    #[test]
    fn test_zone_source_from_config() {
        let zones = ZonesConfig {
            crs: Some("EPSG:2263".to_string()),
            ..Default::default()
        };
        let source = zones.source();
        assert_eq!(source.crs.as_deref(), Some("EPSG:2263"));
        assert_eq!(source.id_field, "LocationID");
    }
}
