//! Static per-location features (land use, roads, elevation ...) aligned to the station columns.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;

use ndarray::{Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{PipelineError, Result};
use crate::observations::StationId;
use crate::scaler::Scaler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GeoFeatureRow {
    pub location: String,
    pub geo_feature: String,
    pub feature_type: String,
    pub buffer_size: String,
    pub value: Option<f64>,
}

impl GeoFeatureRow {
    /// `<geo_feature>_<feature_type>_<buffer_size>`
    pub fn feature_name(&self) -> String {
        format!("{}_{}_{}", self.geo_feature, self.feature_type, self.buffer_size)
    }
}

/// Locations × features; a location without a reading for a feature gets 0.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFeatureMatrix {
    locations: Vec<StationId>,
    features: Vec<String>,
    values: Array2<f64>,
}

impl GeoFeatureMatrix {
    pub fn from_rows(rows: &[GeoFeatureRow], locations: &[StationId]) -> Self {
        let features: Vec<String> = rows
            .iter()
            .map(GeoFeatureRow::feature_name)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let feature_col: HashMap<&str, usize> = features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.as_str(), i))
            .collect();
        let location_row: HashMap<&str, usize> = locations
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();

        let mut filled = Array2::from_elem((locations.len(), features.len()), false);
        let mut values = Array2::zeros((locations.len(), features.len()));
        let mut unknown = 0usize;
        let mut repeated = 0usize;
        for row in rows {
            let Some(&r) = location_row.get(row.location.as_str()) else {
                unknown += 1;
                continue;
            };
            let name = row.feature_name();
            let Some(&c) = feature_col.get(name.as_str()) else {
                continue;
            };
            if let Some(value) = row.value.filter(|v| v.is_finite()) {
                if filled[[r, c]] {
                    repeated += 1;
                }
                values[[r, c]] = value;
                filled[[r, c]] = true;
            }
        }

        let missing = filled.iter().filter(|f| !**f).count();
        if missing > 0 {
            warn!(
                "{} of {} location/feature cells have no value and were set to 0",
                missing,
                filled.len()
            );
        }
        if repeated > 0 {
            warn!(
                "{} geo rows repeat a location/feature cell; the last value was kept",
                repeated
            );
        }
        if unknown > 0 {
            info!("Ignored {} geo rows for locations outside the time series", unknown);
        }

        Self {
            locations: locations.to_vec(),
            features,
            values,
        }
    }

    pub fn locations(&self) -> &[StationId] {
        &self.locations
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Standardize every feature across locations. Features that cannot be fit
    /// (constant across all locations) are dropped and returned by name.
    pub fn scaled(&self) -> (Self, Vec<String>) {
        let mut kept = Vec::new();
        let mut columns = Vec::new();
        let mut dropped = Vec::new();
        for (name, column) in self.features.iter().zip(self.values.axis_iter(Axis(1))) {
            match Scaler::fit(column.iter().copied()) {
                Ok(scaler) => {
                    kept.push(name.clone());
                    columns.push(column.mapv(|v| scaler.transform(v)));
                }
                Err(reason) => {
                    warn!("Dropping geo feature {}: {}", name, reason);
                    dropped.push(name.clone());
                }
            }
        }

        let mut values = Array2::zeros((self.locations.len(), kept.len()));
        for (c, column) in columns.into_iter().enumerate() {
            values.column_mut(c).assign(&column);
        }
        (
            Self {
                locations: self.locations.clone(),
                features: kept,
                values,
            },
            dropped,
        )
    }

    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(self.features.len() + 1);
        let locations: Vec<&str> = self.locations.iter().map(StationId::as_str).collect();
        columns.push(Series::new("location", locations));
        for (name, column) in self.features.iter().zip(self.values.axis_iter(Axis(1))) {
            columns.push(Series::new(name.as_str(), column.to_vec()));
        }
        Ok(DataFrame::new(columns)?)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        info!("Wrote geo features {:?} to {:?}", df.shape(), path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn row(location: &str, feature: &str, buffer: &str, value: f64) -> GeoFeatureRow {
        GeoFeatureRow {
            location: location.to_string(),
            geo_feature: feature.to_string(),
            feature_type: "length".to_string(),
            buffer_size: buffer.to_string(),
            value: Some(value),
        }
    }

    #[test]
    fn test_missing_cells_default_to_zero() {
        let rows = vec![
            row("1", "roads", "500", 3.0),
            row("2", "roads", "1000", 4.0),
            row("9", "roads", "500", 8.0),
        ];
        let locations = vec![StationId::new("1"), StationId::new("2")];
        let matrix = GeoFeatureMatrix::from_rows(&rows, &locations);
        assert_eq!(matrix.features(), ["roads_length_1000", "roads_length_500"]);
        assert_eq!(matrix.values()[[0, 1]], 3.0);
        assert_eq!(matrix.values()[[0, 0]], 0.0);
        assert_eq!(matrix.values()[[1, 0]], 4.0);
    }

    #[test]
    fn test_repeated_cell_keeps_last_value() {
        let rows = vec![
            row("1", "roads", "500", 3.0),
            row("2", "roads", "500", 4.0),
            row("1", "roads", "500", 5.0),
        ];
        let locations = vec![StationId::new("1"), StationId::new("2")];
        let matrix = GeoFeatureMatrix::from_rows(&rows, &locations);
        assert_eq!(matrix.features(), ["roads_length_500"]);
        assert_eq!(matrix.values()[[0, 0]], 5.0);
        assert_eq!(matrix.values()[[1, 0]], 4.0);
    }

    #[test]
    fn test_scaled_drops_constant_features() {
        let rows = vec![
            row("1", "roads", "500", 1.0),
            row("2", "roads", "500", 3.0),
            row("1", "water", "500", 2.0),
            row("2", "water", "500", 2.0),
        ];
        let locations = vec![StationId::new("1"), StationId::new("2")];
        let (scaled, dropped) = GeoFeatureMatrix::from_rows(&rows, &locations).scaled();
        assert_eq!(dropped, vec!["water_length_500".to_string()]);
        assert_eq!(scaled.features(), ["roads_length_500"]);
        assert_relative_eq!(scaled.values()[[0, 0]], -1.0);
        assert_relative_eq!(scaled.values()[[1, 0]], 1.0);
    }
}
