//! Vetting and averaging of repeated (station, timestamp) readings.
//!
//! Some low-cost sensors report two channels per reading, which land in the table as two rows with
//! the same station and timestamp. A station whose channels disagree is unreliable: for every
//! duplicated slot the smaller and larger value are paired, and the Pearson correlation of those
//! pairs scores the station. Stations scoring below the threshold are dropped, and the remaining
//! duplicates are replaced by their mean.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::errors::FitError;
use crate::observations::{Observation, ObservationTable, StationId};

/// Pearson needs at least two pairs.
pub const MIN_CORRELATION_GROUPS: usize = 2;

/// Agreement between the min and max channel of one station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrelationScore {
    Score(f64),
    /// The station never reports duplicates.
    NoDuplicates,
    /// Fewer duplicated slots than [`MIN_CORRELATION_GROUPS`].
    InsufficientGroups(usize),
    Degenerate(FitError),
}

impl CorrelationScore {
    pub fn value(&self) -> Option<f64> {
        match self {
            CorrelationScore::Score(r) => Some(*r),
            _ => None,
        }
    }
}

/// Pearson correlation coefficient of paired samples.
pub fn pearson(pairs: &[(f64, f64)]) -> Result<f64, FitError> {
    if pairs.is_empty() {
        return Err(FitError::NoValues);
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    if sxx == 0.0 || syy == 0.0 {
        return Err(FitError::ZeroVariance);
    }
    let r = sxy / (sxx * syy).sqrt();
    if r.is_finite() {
        Ok(r.clamp(-1.0, 1.0))
    } else {
        Err(FitError::NonFinite)
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotStats {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl SlotStats {
    fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    fn push(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }
}

/// Per-slot statistics in first-encounter order.
fn slot_stats(table: &ObservationTable) -> Vec<((StationId, NaiveDateTime), SlotStats)> {
    let mut position: HashMap<(&StationId, NaiveDateTime), usize> = HashMap::new();
    let mut slots: Vec<((StationId, NaiveDateTime), SlotStats)> = Vec::new();

    for row in table.rows() {
        let key = (&row.station_id, row.date_observed);
        match position.get(&key) {
            Some(&i) => slots[i].1.push(row.value),
            None => {
                position.insert(key, slots.len());
                slots.push((
                    (row.station_id.clone(), row.date_observed),
                    SlotStats::new(row.value),
                ));
            }
        }
    }
    slots
}

/// Score every station in `stations` by min/max duplicate agreement.
pub fn correlation_by_station(
    table: &ObservationTable,
    stations: &[StationId],
) -> BTreeMap<StationId, CorrelationScore> {
    let slots = slot_stats(table);
    let mut pairs: HashMap<&StationId, Vec<(NaiveDateTime, f64, f64)>> = HashMap::new();
    for ((station, ts), stats) in &slots {
        if stats.count > 1 {
            pairs
                .entry(station)
                .or_default()
                .push((*ts, stats.min, stats.max));
        }
    }

    stations
        .iter()
        .map(|station| {
            let score = match pairs.get_mut(station) {
                None => CorrelationScore::NoDuplicates,
                Some(groups) if groups.len() < MIN_CORRELATION_GROUPS => {
                    CorrelationScore::InsufficientGroups(groups.len())
                }
                Some(groups) => {
                    groups.sort_by_key(|(ts, _, _)| *ts);
                    let min_max: Vec<(f64, f64)> =
                        groups.iter().map(|(_, lo, hi)| (*lo, *hi)).collect();
                    match pearson(&min_max) {
                        Ok(r) => CorrelationScore::Score(r),
                        Err(reason) => CorrelationScore::Degenerate(reason),
                    }
                }
            };
            (station.clone(), score)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub kept_stations: Vec<StationId>,
    /// Stations whose defined score fell below the threshold.
    pub flagged: Vec<(StationId, f64)>,
    /// Stations whose score could not be computed.
    pub undetermined: Vec<(StationId, CorrelationScore)>,
    /// Kept stations only, one row per (station, timestamp).
    pub table: ObservationTable,
}

#[derive(Debug, Clone)]
pub struct DuplicateReconciler {
    threshold: f64,
    drop_undetermined: bool,
}

impl DuplicateReconciler {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            drop_undetermined: false,
        }
    }

    pub fn drop_undetermined(mut self, drop: bool) -> Self {
        self.drop_undetermined = drop;
        self
    }

    pub fn reconcile(&self, table: &ObservationTable) -> ReconcileOutcome {
        let stations = table.distinct_stations();
        let scores = correlation_by_station(table, &stations);

        let mut flagged = Vec::new();
        let mut undetermined = Vec::new();
        let mut removed = HashSet::new();

        for station in &stations {
            match scores.get(station) {
                Some(CorrelationScore::Score(r)) if *r < self.threshold => {
                    warn!(
                        "Station {} duplicates disagree (r = {:.3} < {:.2}), removing",
                        station, r, self.threshold
                    );
                    flagged.push((station.clone(), *r));
                    removed.insert(station.clone());
                }
                Some(score @ (CorrelationScore::InsufficientGroups(_)
                | CorrelationScore::Degenerate(_))) => {
                    warn!(
                        "Station {} duplicate agreement is undefined ({:?}){}",
                        station,
                        score,
                        if self.drop_undetermined { ", removing" } else { "" }
                    );
                    undetermined.push((station.clone(), *score));
                    if self.drop_undetermined {
                        removed.insert(station.clone());
                    }
                }
                _ => {}
            }
        }

        let averaged = slot_stats(table)
            .into_iter()
            .filter(|((station, _), _)| !removed.contains(station))
            .map(|((station, ts), stats)| {
                Observation::new(station, ts, stats.sum / stats.count as f64)
            });
        let table = ObservationTable::load(averaged);
        let kept_stations: Vec<StationId> = stations
            .into_iter()
            .filter(|s| !removed.contains(s))
            .collect();

        info!(
            "Reconciled duplicates: kept {} stations, flagged {}, undetermined {}, {} rows remain",
            kept_stations.len(),
            flagged.len(),
            undetermined.len(),
            table.len()
        );

        ReconcileOutcome {
            kept_stations,
            flagged,
            undetermined,
            table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pearson_perfect_and_inverse() {
        let up = [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)];
        let down = [(1.0, 6.0), (2.0, 4.0), (3.0, 2.0)];
        assert_relative_eq!(pearson(&up).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(pearson(&down).unwrap(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pearson_zero_variance_is_an_error() {
        let flat = [(5.0, 1.0), (5.0, 2.0), (5.0, 3.0)];
        assert_eq!(pearson(&flat), Err(FitError::ZeroVariance));
        assert_eq!(pearson(&[]), Err(FitError::NoValues));
    }
}
