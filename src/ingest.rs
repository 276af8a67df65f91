//! Observation import from CSV exports of the source tables.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::{PipelineError, Result};
use crate::observations::{Observation, ObservationTable};
use crate::time_series::TIMESTAMP_FORMAT;

#[derive(Debug, Deserialize)]
struct CsvObservation {
    station_id: String,
    date_observed: String,
    value: Option<f64>,
}

/// Accepts `2020-01-01 13:00:00`, `2020-01-01T13:00:00` and RFC 3339 with an offset (stored as UTC).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// Read `station_id,date_observed,value` rows. Rows with an empty value are skipped.
pub fn read_observations_csv(path: &Path) -> Result<ObservationTable> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in reader.deserialize::<CsvObservation>() {
        let record = result?;
        let Some(value) = record.value else {
            skipped += 1;
            continue;
        };
        let date_observed = parse_timestamp(&record.date_observed).ok_or_else(|| {
            PipelineError::InvalidRecord {
                path: path.to_path_buf(),
                line: rows.len() as u64 + skipped as u64 + 2,
                message: format!("unrecognized timestamp '{}'", record.date_observed),
            }
        })?;
        rows.push(Observation::new(record.station_id, date_observed, value));
    }

    if skipped > 0 {
        warn!("Skipped {} rows without a value in {:?}", skipped, path);
    }
    info!("Read {} observations from {:?}", rows.len(), path);
    Ok(ObservationTable::load(rows))
}
