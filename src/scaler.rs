//! Z-score standardization.
//!
//! ```text
//! transform(x)         = (x - mean) / std
//! inverse_transform(z) = z * std + mean
//! ```
//!
//! `std` is the population standard deviation. A fit over constant data is rejected instead of
//! producing a scaler that divides by zero.

use serde::{Deserialize, Serialize};

use crate::errors::{FitError, PipelineError};
use crate::time_series::TimeSeriesMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    mean: f64,
    std: f64,
}

impl Scaler {
    /// Fit over finite values; NaN and infinities are ignored like missing cells.
    pub fn fit<I>(values: I) -> Result<Self, FitError>
    where
        I: IntoIterator<Item = f64>,
    {
        let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return Err(FitError::NoValues);
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();

        if !mean.is_finite() || !std.is_finite() {
            return Err(FitError::NonFinite);
        }
        if std == 0.0 {
            return Err(FitError::ZeroVariance);
        }
        Ok(Self { mean, std })
    }

    /// Fit over the present entries of an optional series.
    pub fn fit_present<I>(values: I) -> Result<Self, FitError>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        Self::fit(values.into_iter().flatten())
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std(&self) -> f64 {
        self.std
    }

    pub fn transform(&self, x: f64) -> f64 {
        (x - self.mean) / self.std
    }

    pub fn inverse_transform(&self, x: f64) -> f64 {
        x * self.std + self.mean
    }
}

/// One scaler per column, each fit independently with [`Scaler::fit`].
pub fn fit_each<I, C>(columns: I) -> Vec<Result<Scaler, FitError>>
where
    I: IntoIterator<Item = C>,
    C: IntoIterator<Item = f64>,
{
    columns.into_iter().map(Scaler::fit).collect()
}

/// Single scaler over every present cell of the matrix.
pub fn fit_global(matrix: &TimeSeriesMatrix) -> Result<Scaler, PipelineError> {
    Scaler::fit(matrix.present_values()).map_err(|reason| PipelineError::DegenerateFit {
        what: "global time series scaler".to_string(),
        reason,
    })
}

/// Independent scaler per station column.
pub fn fit_per_station(matrix: &TimeSeriesMatrix) -> Vec<Result<Scaler, FitError>> {
    fit_each(
        matrix
            .values()
            .columns()
            .into_iter()
            .map(|column| column.iter().flatten().copied().collect::<Vec<f64>>()),
    )
}
