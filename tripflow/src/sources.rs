//! Raw trip sources.
//!
//! - CSV, via the `csv` crate (always available)
//! - Parquet, via `polars` (feature `parquet`); the TLC publishes monthly
//!   `fhvhv_tripdata_YYYY-MM.parquet` files
//!
//! Both produce [`RawTripRow`]s with nulls preserved as `None`; deciding what
//! to do with incomplete rows is the normalizer's job.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TripflowError};
use crate::normalize::RawTripRow;
use crate::ZoneId;

/// Column names of the three fields a trip row needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TripColumns {
    pub origin: String,
    pub destination: String,
    pub pickup: String,
    /// Tried in order when `pickup` is absent (yellow/green taxi exports)
    pub pickup_aliases: Vec<String>,
}

impl Default for TripColumns {
    fn default() -> Self {
        Self {
            origin: "PULocationID".to_string(),
            destination: "DOLocationID".to_string(),
            pickup: "pickup_datetime".to_string(),
            pickup_aliases: vec![
                "tpep_pickup_datetime".to_string(),
                "lpep_pickup_datetime".to_string(),
            ],
        }
    }
}

impl TripColumns {
    fn pickup_candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.pickup.as_str()).chain(self.pickup_aliases.iter().map(String::as_str))
    }
}

/// Read every row of a trip file, picking the format from the extension.
pub fn read_trip_rows(path: &Path, columns: &TripColumns) -> Result<Vec<RawTripRow>> {
    let name = path.display().to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let rows = match extension.as_deref() {
        Some("csv") => {
            let file =
                File::open(path).map_err(|e| TripflowError::data_source(&name, e.to_string()))?;
            CsvTripReader::new(file, &name, columns)?.collect::<Result<Vec<_>>>()?
        }
        #[cfg(feature = "parquet")]
        Some("parquet") => parquet::read_parquet(path, columns)?,
        #[cfg(not(feature = "parquet"))]
        Some("parquet") => {
            return Err(TripflowError::data_source(
                &name,
                "Parquet input needs the `parquet` feature",
            ))
        }
        _ => {
            return Err(TripflowError::data_source(
                &name,
                "unknown trip file type (expected .csv or .parquet)",
            ))
        }
    };

    info!("[Sources] Read {} raw rows from {}", rows.len(), name);
    Ok(rows)
}

// ============================================================================
// CSV
// ============================================================================

/// Streaming CSV reader yielding one [`RawTripRow`] per record.
pub struct CsvTripReader<R: Read> {
    source_name: String,
    reader: csv::Reader<R>,
    record: csv::StringRecord,
    origin_idx: usize,
    destination_idx: usize,
    pickup_idx: usize,
    done: bool,
}

impl<R: Read> CsvTripReader<R> {
    /// Wrap a reader and resolve column positions from the header row.
    pub fn new(input: R, source_name: &str, columns: &TripColumns) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let headers = reader
            .headers()
            .map_err(|e| TripflowError::data_source(source_name, e.to_string()))?
            .clone();

        let find = |name: &str| headers.iter().position(|h| h == name);
        let missing = |name: &str| {
            TripflowError::data_source(source_name, format!("missing column '{name}'"))
        };

        let origin_idx = find(columns.origin.as_str()).ok_or_else(|| missing(&columns.origin))?;
        let destination_idx = find(columns.destination.as_str())
            .ok_or_else(|| missing(&columns.destination))?;
        let pickup_idx = columns
            .pickup_candidates()
            .find_map(find)
            .ok_or_else(|| missing(&columns.pickup))?;

        debug!(
            "[Sources] {} columns: origin={} destination={} pickup={}",
            source_name, origin_idx, destination_idx, pickup_idx
        );

        Ok(Self {
            source_name: source_name.to_string(),
            reader,
            record: csv::StringRecord::new(),
            origin_idx,
            destination_idx,
            pickup_idx,
            done: false,
        })
    }

    fn error_at(&self, message: String) -> TripflowError {
        let line = self.record.position().map(|p| p.line()).unwrap_or(0);
        TripflowError::data_source(&self.source_name, format!("line {line}: {message}"))
    }

    fn current_row(&self) -> Result<RawTripRow> {
        let cell = |idx: usize| self.record.get(idx).unwrap_or("");

        let origin = parse_zone_cell(cell(self.origin_idx))
            .map_err(|raw| self.error_at(format!("zone id '{raw}' is not numeric")))?;
        let destination = parse_zone_cell(cell(self.destination_idx))
            .map_err(|raw| self.error_at(format!("zone id '{raw}' is not numeric")))?;

        Ok(RawTripRow {
            origin,
            destination,
            pickup: parse_timestamp(cell(self.pickup_idx)),
        })
    }
}

impl<R: Read> Iterator for CsvTripReader<R> {
    type Item = Result<RawTripRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                let row = self.current_row();
                if row.is_err() {
                    self.done = true;
                }
                Some(row)
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                Some(Err(TripflowError::data_source(
                    &self.source_name,
                    format!("line {line}: {e}"),
                )))
            }
        }
    }
}

/// Parse a zone id cell. Empty is a null; `132` and `132.0` are both 132.
/// Non-positive ids can never resolve and are treated as null.
///
/// `Err` carries the offending text.
pub fn parse_zone_cell(raw: &str) -> std::result::Result<Option<ZoneId>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("null")
    {
        return Ok(None);
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(ZoneId::from_raw(v));
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(ZoneId::from_raw(v as i64)),
        _ => Err(trimmed.to_string()),
    }
}

const TIMESTAMP_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Parse a pickup timestamp; anything unparseable is a null.
///
/// A bare date is midnight of that day, so date-only sources reach the
/// partitioner with `time == 0` and get synthetic times there.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.naive_local())
        })
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

// ============================================================================
// Parquet
// ============================================================================

#[cfg(feature = "parquet")]
mod parquet {
    use std::fs::File;
    use std::path::Path;

    use chrono::DateTime;
    use polars::prelude::*;

    use super::TripColumns;
    use crate::error::{Result, TripflowError};
    use crate::normalize::RawTripRow;
    use crate::ZoneId;

    pub(super) fn read_parquet(path: &Path, columns: &TripColumns) -> Result<Vec<RawTripRow>> {
        let name = path.display().to_string();
        let fail = |e: PolarsError| TripflowError::data_source(&name, e.to_string());
        let open = || {
            File::open(path).map_err(|e| TripflowError::data_source(&name, e.to_string()))
        };

        let schema = {
            let file = open()?;
            let mut reader = ParquetReader::new(file);
            reader.schema().map_err(fail)?
        };
        let pickup = columns
            .pickup_candidates()
            .find(|c| schema.contains(c))
            .ok_or_else(|| {
                TripflowError::data_source(&name, format!("missing column '{}'", columns.pickup))
            })?
            .to_string();

        let df = ParquetReader::new(open()?)
            .with_columns(Some(vec![
                columns.origin.clone(),
                columns.destination.clone(),
                pickup.clone(),
            ]))
            .finish()
            .map_err(fail)?;

        let origin = df
            .column(&columns.origin)
            .and_then(|s| s.cast(&DataType::Int64))
            .map_err(fail)?;
        let destination = df
            .column(&columns.destination)
            .and_then(|s| s.cast(&DataType::Int64))
            .map_err(fail)?;
        let pickup = df
            .column(&pickup)
            .and_then(|s| s.cast(&DataType::Datetime(TimeUnit::Microseconds, None)))
            .and_then(|s| s.cast(&DataType::Int64))
            .map_err(fail)?;

        let origin = origin.i64().map_err(fail)?;
        let destination = destination.i64().map_err(fail)?;
        let pickup = pickup.i64().map_err(fail)?;

        Ok(origin
            .into_iter()
            .zip(destination)
            .zip(pickup)
            .map(|((o, d), t)| RawTripRow {
                origin: o.and_then(ZoneId::from_raw),
                destination: d.and_then(ZoneId::from_raw),
                pickup: t
                    .and_then(DateTime::from_timestamp_micros)
                    .map(|dt| dt.naive_utc()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
hvfhs_license_num,pickup_datetime,PULocationID,DOLocationID
HV0003,2025-07-01 08:15:30,1,2
HV0003,2025-07-01 09:00:00,132.0,161
HV0005,,1,2
HV0005,2025-07-02T00:00:05,,2
";

    #[test]
    fn test_csv_rows_with_nulls() {
        let rows: Vec<RawTripRow> =
            CsvTripReader::new(SAMPLE.as_bytes(), "sample.csv", &TripColumns::default())
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].origin, Some(ZoneId(1)));
        assert_eq!(rows[0].pickup.unwrap().to_string(), "2025-07-01 08:15:30");
        assert_eq!(rows[1].origin, Some(ZoneId(132)));
        assert_eq!(rows[2].pickup, None);
        assert_eq!(rows[3].origin, None);
        assert!(rows[3].pickup.is_some());
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let csv = "PULocationID,pickup_datetime\n1,2025-07-01 00:00:00\n";
        let err = CsvTripReader::new(csv.as_bytes(), "bad.csv", &TripColumns::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("DOLocationID"));
    }

    #[test]
    fn test_pickup_alias() {
        let csv = "tpep_pickup_datetime,PULocationID,DOLocationID\n2025-07-01 00:00:07,4,5\n";
        let rows: Vec<RawTripRow> =
            CsvTripReader::new(csv.as_bytes(), "yellow.csv", &TripColumns::default())
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(rows[0].pickup.unwrap().format("%S").to_string(), "07");
    }

    #[test]
    fn test_non_numeric_zone_reports_line() {
        let csv = "pickup_datetime,PULocationID,DOLocationID\n\
                   2025-07-01 00:00:00,1,2\n\
                   2025-07-01 00:00:00,JFK,2\n";
        let result: Result<Vec<RawTripRow>> =
            CsvTripReader::new(csv.as_bytes(), "bad.csv", &TripColumns::default())
                .unwrap()
                .collect();
        let message = result.unwrap_err().to_string();
        assert!(message.contains("line 3"), "{message}");
        assert!(message.contains("JFK"));
    }

    #[test]
    fn test_ragged_record_is_fatal() {
        let csv = "pickup_datetime,PULocationID,DOLocationID\n2025-07-01 00:00:00,1\n";
        let result: Result<Vec<RawTripRow>> =
            CsvTripReader::new(csv.as_bytes(), "ragged.csv", &TripColumns::default())
                .unwrap()
                .collect();
        assert!(matches!(result, Err(TripflowError::DataSource { .. })));
    }

    #[test]
    fn test_parse_zone_cell() {
        assert_eq!(parse_zone_cell("  "), Ok(None));
        assert_eq!(parse_zone_cell("264"), Ok(Some(ZoneId(264))));
        assert_eq!(parse_zone_cell("7.0"), Ok(Some(ZoneId(7))));
        assert_eq!(parse_zone_cell("0"), Ok(None));
        assert!(parse_zone_cell("7.5").is_err());
        assert!(parse_zone_cell("abc").is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = "2025-07-01 08:15:30";
        for raw in [
            "2025-07-01 08:15:30",
            "2025-07-01 08:15:30.250",
            "2025-07-01T08:15:30",
            "2025-07-01T08:15:30Z",
            "2025-07-01T08:15:30-04:00",
        ] {
            let parsed = parse_timestamp(raw).unwrap();
            assert_eq!(parsed.format("%Y-%m-%d %H:%M:%S").to_string(), expected, "{raw}");
        }
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2025-13-01").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_date_only_pickup_is_midnight() {
        let csv = "pickup_datetime,PULocationID,DOLocationID\n2025-07-01,1,2\n2025/07/02,2,3\n";
        let rows: Vec<RawTripRow> =
            CsvTripReader::new(csv.as_bytes(), "dates.csv", &TripColumns::default())
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();

        let pickups: Vec<String> = rows
            .iter()
            .map(|r| r.pickup.unwrap().format("%Y-%m-%d %H:%M:%S").to_string())
            .collect();
        assert_eq!(pickups, vec!["2025-07-01 00:00:00", "2025-07-02 00:00:00"]);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = read_trip_rows(Path::new("trips.xlsx"), &TripColumns::default()).unwrap_err();
        assert!(matches!(err, TripflowError::DataSource { .. }));
    }
}
