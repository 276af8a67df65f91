use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ConfigError, PipelineError, Result};
use crate::time_series::TimeSeriesMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMethod {
    #[default]
    Mean,
    Median,
}

/// Centered rolling aggregate applied to every station column.
///
/// A window of `w` rows covers `w / 2` rows before the current row and `(w - 1) / 2` after it.
/// Missing cells are skipped; a row becomes missing only when its whole window is missing.
#[derive(Debug, Clone, Copy)]
pub struct Smoother {
    window_size: usize,
    method: SmoothingMethod,
}

impl Smoother {
    pub fn new(window_size: usize, method: SmoothingMethod) -> Result<Self> {
        if window_size == 0 {
            return Err(PipelineError::Config(ConfigError::Invalid {
                field: "smoothing.window_size".to_string(),
                message: "must be at least 1".to_string(),
            }));
        }
        Ok(Self {
            window_size,
            method,
        })
    }

    pub fn smooth(&self, matrix: &TimeSeriesMatrix) -> TimeSeriesMatrix {
        let columns: Vec<Vec<Option<f64>>> = (0..matrix.n_stations())
            .into_par_iter()
            .map(|col| {
                let series = matrix.values().index_axis(Axis(1), col).to_vec();
                rolling_centered(&series, self.window_size, self.method)
            })
            .collect();

        let mut values = Array2::from_elem((matrix.n_rows(), matrix.n_stations()), None);
        for (col, smoothed) in columns.into_iter().enumerate() {
            values.column_mut(col).assign(&Array1::from(smoothed));
        }

        debug!(
            "Smoothed {} columns with a centered {:?} over {} rows",
            matrix.n_stations(),
            self.method,
            self.window_size
        );
        matrix.with_values(values)
    }
}

pub fn smooth(
    matrix: &TimeSeriesMatrix,
    window_size: usize,
    method: SmoothingMethod,
) -> Result<TimeSeriesMatrix> {
    Ok(Smoother::new(window_size, method)?.smooth(matrix))
}

/// Centered rolling aggregate with a minimum of one present value per window.
pub fn rolling_centered(
    values: &[Option<f64>],
    window_size: usize,
    method: SmoothingMethod,
) -> Vec<Option<f64>> {
    let before = window_size / 2;
    let after = window_size.saturating_sub(1) / 2;
    let mut buffer = Vec::with_capacity(window_size);

    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(values.len());
            buffer.clear();
            buffer.extend(values[lo..hi].iter().flatten());
            if buffer.is_empty() {
                return None;
            }
            Some(match method {
                SmoothingMethod::Mean => buffer.iter().sum::<f64>() / buffer.len() as f64,
                SmoothingMethod::Median => median(&mut buffer),
            })
        })
        .collect()
}

/// Median of a non-empty slice; even lengths take the midpoint of the two middle values.
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
