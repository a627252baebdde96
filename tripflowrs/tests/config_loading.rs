//! Config file loading tests.

use std::fs;

use tempfile::TempDir;
use tripflowrs::{DatasetStore, PipelineConfig};

#[test]
fn test_full_config_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("tripflow.toml");
    fs::write(
        &path,
        r#"
[zones]
path = "data/taxi_zones.geojson"
id_field = "LocationID"
crs = "EPSG:2263"

[trips]
inputs = ["data/fhvhv_tripdata_2025-07.parquet", "data/extra.csv"]

[trips.columns]
origin = "PULocationID"
destination = "DOLocationID"
pickup = "pickup_datetime"

[partition]
sample_cap = 2500
seed = 7
zero_time_threshold = 0.95

[storage]
locations = ["daily", "archive"]
prefix = "fhv_"
cache_capacity = 3

[query]
default_radius_m = 750.0
kmeans = { k = 6, n_init = 4, max_iter = 100, seed = 1 }
"#,
    )
    .unwrap();

    let config = PipelineConfig::from_file(&path).unwrap();
    assert_eq!(config.trips.inputs.len(), 2);
    assert_eq!(config.partition.sample_cap, 2500);
    assert_eq!(config.partition.seed, Some(7));
    assert_eq!(config.storage.prefix, "fhv_");
    assert_eq!(config.query.kmeans.k, 6);
    assert_eq!(config.query.kmeans.seed, Some(1));
    assert!((config.query.default_radius_m - 750.0).abs() < f64::EPSILON);

    let store = DatasetStore::from_config(&config.storage).unwrap();
    assert_eq!(store.locations().len(), 2);
    assert_eq!(
        store.file_name(chrono::NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()),
        "fhv_2025-07-01.json"
    );
}

#[test]
fn test_explicit_path_is_loaded() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("custom.toml");
    fs::write(&path, "[partition]\nsample_cap = 10\n").unwrap();

    let config = PipelineConfig::load(Some(path.as_path())).unwrap();
    assert_eq!(config.partition.sample_cap, 10);
}

#[test]
fn test_missing_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let err = PipelineConfig::from_file(tmp.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_invalid_values_name_the_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.toml");
    fs::write(&path, "[storage]\nlocations = []\n").unwrap();

    let err = PipelineConfig::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("bad.toml"));
    assert!(format!("{err:#}").contains("storage.locations"));
}

#[test]
fn test_unknown_types_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("typo.toml");
    fs::write(&path, "[partition]\nsample_cap = \"lots\"\n").unwrap();
    assert!(PipelineConfig::from_file(&path).is_err());
}
