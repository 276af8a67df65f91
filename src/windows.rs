//! Fixed-size (input, output) window extraction.

use std::ops::Range;

use ndarray::{s, Array2};

use crate::errors::{ConfigError, PipelineError, Result};
use crate::time_series::TimeSeriesMatrix;

/// One supervised example: `x` covers `start..start + input_size`, `y` the rows right after it.
///
/// Missing cells are imputed with 0 in both arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub start: usize,
    pub x: Array2<f64>,
    pub y: Array2<f64>,
}

impl Window {
    pub fn x_rows(&self) -> Range<usize> {
        self.start..self.start + self.x.nrows()
    }

    pub fn y_rows(&self) -> Range<usize> {
        let y_start = self.start + self.x.nrows();
        y_start..y_start + self.y.nrows()
    }

    /// Every row the window touches.
    pub fn rows(&self) -> Range<usize> {
        self.start..self.y_rows().end
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowGenerator {
    input_size: usize,
    output_size: usize,
    min_observed_fraction: Option<f64>,
}

impl WindowGenerator {
    pub fn new(input_size: usize, output_size: usize) -> Result<Self> {
        for (field, size) in [
            ("windows.input_size", input_size),
            ("windows.output_size", output_size),
        ] {
            if size == 0 {
                return Err(PipelineError::Config(ConfigError::Invalid {
                    field: field.to_string(),
                    message: "must be at least 1".to_string(),
                }));
            }
        }
        Ok(Self {
            input_size,
            output_size,
            min_observed_fraction: None,
        })
    }

    /// Skip windows whose cells are observed less than `fraction` of the time before imputation.
    pub fn with_min_observed_fraction(mut self, fraction: Option<f64>) -> Self {
        self.min_observed_fraction = fraction;
        self
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Rows covered by one window.
    pub fn span(&self) -> usize {
        self.input_size + self.output_size
    }

    /// Number of start positions in a block of `rows` rows, before any quality filter.
    pub fn count(&self, rows: usize) -> usize {
        (rows + 1).saturating_sub(self.span())
    }

    pub fn generate<'a>(&self, matrix: &'a TimeSeriesMatrix) -> Windows<'a> {
        self.generate_in(matrix, 0..matrix.n_rows())
    }

    /// Windows lying entirely inside `rows`.
    pub fn generate_in<'a>(&self, matrix: &'a TimeSeriesMatrix, rows: Range<usize>) -> Windows<'a> {
        let end = rows.end.min(matrix.n_rows());
        Windows {
            matrix,
            generator: *self,
            next_start: rows.start.min(end),
            end,
        }
    }
}

/// Lazy window sequence in increasing start order. Clone it to iterate again.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    matrix: &'a TimeSeriesMatrix,
    generator: WindowGenerator,
    next_start: usize,
    end: usize,
}

impl Windows<'_> {
    fn imputed(&self, rows: Range<usize>) -> Array2<f64> {
        self.matrix
            .values()
            .slice(s![rows, ..])
            .mapv(|v| v.unwrap_or(0.0))
    }
}

impl Iterator for Windows<'_> {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let span = self.generator.span();
        while self.next_start + span <= self.end {
            let start = self.next_start;
            self.next_start += 1;

            if let Some(min_fraction) = self.generator.min_observed_fraction {
                if self.matrix.observed_fraction(start..start + span) < min_fraction {
                    continue;
                }
            }

            let split = start + self.generator.input_size;
            return Some(Window {
                start,
                x: self.imputed(start..split),
                y: self.imputed(split..start + span),
            });
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end + 1).saturating_sub(self.next_start + self.generator.span());
        match self.generator.min_observed_fraction {
            Some(_) => (0, Some(remaining)),
            None => (remaining, Some(remaining)),
        }
    }
}

/// Every window over the full matrix.
pub fn generate(
    matrix: &TimeSeriesMatrix,
    input_size: usize,
    output_size: usize,
) -> Result<Windows<'_>> {
    Ok(WindowGenerator::new(input_size, output_size)?.generate(matrix))
}
