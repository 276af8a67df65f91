//! Station × timestamp matrix construction on a regular hourly grid.

use std::collections::HashMap;
use std::fs::File;
use std::ops::Range;
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use ndarray::{s, Array2, ArrayView1, Axis};
use polars::prelude::*;
use tracing::{info, warn};

use crate::errors::{PipelineError, Result};
use crate::observations::{ObservationTable, StationId};

/// Timestamp layout used for CSV input and output.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const STRIDE_MS: i64 = 3_600_000;

/// Contiguous hourly sequence of instants starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampGrid {
    start: NaiveDateTime,
    len: usize,
}

impl TimestampGrid {
    /// Hourly grid from `min` up to and including the last slot not after `max`.
    pub fn hourly(min: NaiveDateTime, max: NaiveDateTime) -> Self {
        let span_ms = (max - min).num_milliseconds().max(0);
        Self {
            start: min,
            len: (span_ms / STRIDE_MS) as usize + 1,
        }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> Duration {
        Duration::hours(1)
    }

    pub fn at(&self, index: usize) -> Option<NaiveDateTime> {
        (index < self.len).then(|| self.start + Duration::hours(index as i64))
    }

    /// Row of `ts`, or `None` when it lies outside the grid or between two slots.
    pub fn index_of(&self, ts: NaiveDateTime) -> Option<usize> {
        let offset_ms = (ts - self.start).num_milliseconds();
        if offset_ms < 0 || offset_ms % STRIDE_MS != 0 {
            return None;
        }
        let index = (offset_ms / STRIDE_MS) as usize;
        (index < self.len).then_some(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        (0..self.len).map(move |i| self.start + Duration::hours(i as i64))
    }

    pub fn slice(&self, rows: Range<usize>) -> Self {
        let end = rows.end.min(self.len);
        let begin = rows.start.min(end);
        Self {
            start: self.start + Duration::hours(begin as i64),
            len: end - begin,
        }
    }
}

/// Dense readings: rows follow the grid, columns follow `stations`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesMatrix {
    grid: TimestampGrid,
    stations: Vec<StationId>,
    values: Array2<Option<f64>>,
}

impl TimeSeriesMatrix {
    pub(crate) fn from_parts(
        grid: TimestampGrid,
        stations: Vec<StationId>,
        values: Array2<Option<f64>>,
    ) -> Self {
        debug_assert_eq!(values.dim(), (grid.len(), stations.len()));
        Self {
            grid,
            stations,
            values,
        }
    }

    pub fn grid(&self) -> &TimestampGrid {
        &self.grid
    }

    pub fn stations(&self) -> &[StationId] {
        &self.stations
    }

    pub fn values(&self) -> &Array2<Option<f64>> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_stations(&self) -> usize {
        self.values.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get((row, col)).copied().flatten()
    }

    pub fn column_index(&self, station: &StationId) -> Option<usize> {
        self.stations.iter().position(|s| s == station)
    }

    pub fn column(&self, station: &StationId) -> Option<ArrayView1<'_, Option<f64>>> {
        self.column_index(station)
            .map(|col| self.values.index_axis(Axis(1), col))
    }

    /// All present cells, row-major.
    pub fn present_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().filter_map(|v| *v)
    }

    /// Fraction of present cells within `rows`.
    pub fn observed_fraction(&self, rows: Range<usize>) -> f64 {
        let block = self.values.slice(s![rows, ..]);
        if block.is_empty() {
            return 0.0;
        }
        block.iter().filter(|v| v.is_some()).count() as f64 / block.len() as f64
    }

    /// Same grid, columns restricted to `ids` in the given order.
    pub fn select_stations(&self, ids: &[StationId]) -> Result<Self> {
        let mut indices = Vec::with_capacity(ids.len());
        for id in ids {
            let col = self.column_index(id).ok_or_else(|| {
                PipelineError::EmptyResult(format!("station {} is not in the time series", id))
            })?;
            indices.push(col);
        }
        Ok(Self {
            grid: self.grid.clone(),
            stations: ids.to_vec(),
            values: self.values.select(Axis(1), &indices),
        })
    }

    /// Apply `f` to every present cell; missing cells stay missing.
    pub fn map_present(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            grid: self.grid.clone(),
            stations: self.stations.clone(),
            values: self.values.mapv(|v| v.map(&f)),
        }
    }

    pub(crate) fn with_values(&self, values: Array2<Option<f64>>) -> Self {
        Self::from_parts(self.grid.clone(), self.stations.clone(), values)
    }

    /// Timestamp column first, then one nullable column per station.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(self.n_stations() + 1);
        let stamps: Vec<String> = self
            .grid
            .iter()
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .collect();
        columns.push(Series::new("date_observed", stamps));

        for (col, station) in self.stations.iter().enumerate() {
            let values: Vec<Option<f64>> = self.values.column(col).to_vec();
            columns.push(Series::new(station.as_str(), values));
        }

        Ok(DataFrame::new(columns)?)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        info!("Wrote time series {:?} to {:?}", df.shape(), path);
        Ok(())
    }
}

/// Counters collected while placing rows on the grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub rows_placed: usize,
    /// Rows whose timestamp is not an hourly offset from the first timestamp.
    pub off_grid_rows: usize,
    /// Rows for stations outside the requested column set.
    pub unselected_rows: usize,
    pub empty_stations: Vec<StationId>,
}

/// Builds a [`TimeSeriesMatrix`] from cleaned observations.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesBuilder {
    stations: Option<Vec<StationId>>,
}

impl TimeSeriesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit column order instead of first-encounter order.
    pub fn with_stations(mut self, stations: Vec<StationId>) -> Self {
        self.stations = Some(stations);
        self
    }

    pub fn build(&self, table: &ObservationTable) -> Result<(TimeSeriesMatrix, BuildReport)> {
        let (min, max) = table.time_span().ok_or_else(|| {
            PipelineError::EmptyResult("no observations to build a time series from".to_string())
        })?;
        let stations = match &self.stations {
            Some(stations) => stations.clone(),
            None => table.distinct_stations(),
        };
        if stations.is_empty() {
            return Err(PipelineError::EmptyResult(
                "no stations selected for the time series".to_string(),
            ));
        }

        let grid = TimestampGrid::hourly(min, max);
        let column_of: HashMap<&StationId, usize> =
            stations.iter().enumerate().map(|(i, s)| (s, i)).collect();
        let mut values = Array2::<Option<f64>>::from_elem((grid.len(), stations.len()), None);
        let mut report = BuildReport::default();

        for row in table.rows() {
            let Some(&col) = column_of.get(&row.station_id) else {
                report.unselected_rows += 1;
                continue;
            };
            let Some(idx) = grid.index_of(row.date_observed) else {
                report.off_grid_rows += 1;
                continue;
            };
            let cell = &mut values[[idx, col]];
            if cell.is_some() {
                return Err(PipelineError::UnreconciledDuplicate {
                    station: row.station_id.clone(),
                    timestamp: row.date_observed,
                });
            }
            *cell = Some(row.value);
            report.rows_placed += 1;
        }

        report.empty_stations = stations
            .iter()
            .enumerate()
            .filter(|(col, _)| values.column(*col).iter().all(Option::is_none))
            .map(|(_, s)| s.clone())
            .collect();

        if report.off_grid_rows > 0 {
            warn!(
                "{} observations are not on the hourly grid starting at {} and were left out",
                report.off_grid_rows, min
            );
        }
        for station in &report.empty_stations {
            warn!("Station {} has no readings inside the grid", station);
        }
        info!(
            "Built time series: {} hourly rows x {} stations ({} cells filled)",
            grid.len(),
            stations.len(),
            report.rows_placed
        );

        Ok((TimeSeriesMatrix::from_parts(grid, stations, values), report))
    }
}

/// Build with first-encounter station order.
pub fn build_time_series(table: &ObservationTable) -> Result<TimeSeriesMatrix> {
    TimeSeriesBuilder::new().build(table).map(|(matrix, _)| matrix)
}
