//! Raw sensor readings and the cleaning steps applied before any reshaping.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

/// Stable identifier of a fixed-location sensor.
///
/// Upstream tables use both integer ids and free-text site names, so ids are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for StationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Config files list removals as numbers or names
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(id) => StationId(id.to_string()),
            RawId::Text(id) => StationId(id),
        })
    }
}

/// One sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub station_id: StationId,
    pub date_observed: NaiveDateTime,
    pub value: f64,
}

impl Observation {
    pub fn new(station_id: impl Into<StationId>, date_observed: NaiveDateTime, value: f64) -> Self {
        Self {
            station_id: station_id.into(),
            date_observed,
            value,
        }
    }

    fn exact_key(&self) -> (&StationId, NaiveDateTime, u64) {
        (&self.station_id, self.date_observed, self.value.to_bits())
    }
}

/// What a cleaning step took away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleaningReport {
    pub rows_removed: usize,
    /// Stations that had rows before the step and none after it.
    pub emptied_stations: Vec<StationId>,
}

/// In-memory table of raw observations, kept in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationTable {
    rows: Vec<Observation>,
}

impl ObservationTable {
    pub fn load(rows: impl IntoIterator<Item = Observation>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Remove rows identical in station, timestamp and value, keeping the first occurrence.
    pub fn deduplicate(&mut self) -> CleaningReport {
        let keep: Vec<bool> = {
            let mut seen = HashSet::with_capacity(self.rows.len());
            self.rows
                .iter()
                .map(|row| seen.insert(row.exact_key()))
                .collect()
        };
        let report = self.retain_mask(&keep);
        debug!("Deduplication removed {} rows", report.rows_removed);
        report
    }

    /// Remove rows whose value is not strictly positive (sensor error codes, NaN).
    pub fn filter_positive(&mut self) -> CleaningReport {
        let keep: Vec<bool> = self.rows.iter().map(|row| row.value > 0.0).collect();
        let report = self.retain_mask(&keep);
        debug!("Positive filter removed {} rows", report.rows_removed);
        report
    }

    pub fn remove_stations(&mut self, ids: &[StationId]) -> CleaningReport {
        let removed: HashSet<&StationId> = ids.iter().collect();
        let keep: Vec<bool> = self
            .rows
            .iter()
            .map(|row| !removed.contains(&row.station_id))
            .collect();
        let mut report = self.retain_mask(&keep);
        // Explicit removals are not surprises
        report.emptied_stations.retain(|id| !removed.contains(id));
        report
    }

    /// Station ids in the order they are first encountered.
    pub fn distinct_stations(&self) -> Vec<StationId> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(&row.station_id))
            .map(|row| row.station_id.clone())
            .collect()
    }

    pub fn time_span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let min = self.rows.iter().map(|row| row.date_observed).min()?;
        let max = self.rows.iter().map(|row| row.date_observed).max()?;
        Some((min, max))
    }

    fn retain_mask(&mut self, keep: &[bool]) -> CleaningReport {
        let before = self.distinct_stations();
        let original_len = self.rows.len();

        let mut flags = keep.iter();
        self.rows.retain(|_| flags.next().copied().unwrap_or(false));

        let after: HashSet<StationId> = self.distinct_stations().into_iter().collect();
        let emptied_stations: Vec<StationId> = before
            .into_iter()
            .filter(|id| !after.contains(id))
            .collect();
        for id in &emptied_stations {
            warn!("Station {} has no rows left after cleaning", id);
        }

        CleaningReport {
            rows_removed: original_len - self.rows.len(),
            emptied_stations,
        }
    }
}
