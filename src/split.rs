//! Train/validation/test partitioning of windowed examples.
//!
//! Two policies are supported:
//!
//! - **Proportional**: windows over the whole matrix, cut into contiguous train, validation and
//!   test blocks. Neighbouring windows across a cut share rows.
//! - **Chunked**: the matrix rows are cut into fixed-size chunks (four weeks by default), each chunk
//!   into train, validation and test row ranges, and windows are generated inside each range only.
//!   No window crosses a range boundary.

use std::ops::Range;

use ndarray::{s, Array4};
use tracing::{debug, info, warn};

use crate::errors::{ConfigError, PipelineError, Result};
use crate::time_series::TimeSeriesMatrix;
use crate::windows::{Window, WindowGenerator};

pub const HOURS_PER_WEEK: usize = 7 * 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitRole {
    Train,
    Val,
    Test,
}

impl SplitRole {
    pub const ALL: [SplitRole; 3] = [SplitRole::Train, SplitRole::Val, SplitRole::Test];

    pub fn name(&self) -> &'static str {
        match self {
            SplitRole::Train => "train",
            SplitRole::Val => "val",
            SplitRole::Test => "test",
        }
    }
}

/// Row lengths of one chunk and its three sub-ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub train_len: usize,
    pub val_len: usize,
    pub test_len: usize,
}

impl ChunkLayout {
    pub fn new(train_len: usize, val_len: usize, test_len: usize) -> Self {
        Self {
            train_len,
            val_len,
            test_len,
        }
    }

    /// Hourly layout: `train_weeks` of which `train_keep_fraction` is training, `test_weeks` of
    /// test, and whatever is left of the chunk for validation.
    pub fn from_weeks(
        chunk_weeks: usize,
        train_weeks: usize,
        train_keep_fraction: f64,
        test_weeks: usize,
    ) -> Result<Self, ConfigError> {
        if !(train_keep_fraction > 0.0 && train_keep_fraction <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "split.train_keep_fraction".to_string(),
                message: format!("{} is outside (0, 1]", train_keep_fraction),
            });
        }
        let weeks_to_rows = |field: &str, weeks: usize| {
            weeks
                .checked_mul(HOURS_PER_WEEK)
                .ok_or_else(|| ConfigError::Invalid {
                    field: format!("split.{}", field),
                    message: format!("{} weeks overflows the row count", weeks),
                })
        };
        let chunk_len = weeks_to_rows("chunk_weeks", chunk_weeks)?;
        if chunk_len == 0 {
            return Err(ConfigError::Invalid {
                field: "split.chunk_weeks".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let train_len =
            (weeks_to_rows("train_weeks", train_weeks)? as f64 * train_keep_fraction).round() as usize;
        let test_len = weeks_to_rows("test_weeks", test_weeks)?;
        let val_len = train_len
            .checked_add(test_len)
            .and_then(|used| chunk_len.checked_sub(used))
            .ok_or_else(|| ConfigError::Invalid {
                field: "split".to_string(),
                message: format!(
                    "train ({} rows) and test ({} rows) do not fit in a {}-row chunk",
                    train_len, test_len, chunk_len
                ),
            })?;
        Ok(Self::new(train_len, val_len, test_len))
    }

    pub fn chunk_len(&self) -> usize {
        self.train_len + self.val_len + self.test_len
    }

    /// Cut a full chunk into its train, validation and test row ranges.
    pub fn split_chunk(&self, chunk: usize, rows: Range<usize>) -> Result<[Range<usize>; 3]> {
        if rows.len() != self.chunk_len() {
            return Err(PipelineError::ShapeMismatch {
                chunk,
                actual: rows.len(),
                expected: self.chunk_len(),
            });
        }
        let val_start = rows.start + self.train_len;
        let test_start = val_start + self.val_len;
        Ok([
            rows.start..val_start,
            val_start..test_start,
            test_start..rows.end,
        ])
    }
}

/// Consecutive full chunks of `chunk_len` rows, plus the shorter tail if any.
pub fn split_by_chunk(n_rows: usize, chunk_len: usize) -> (Vec<Range<usize>>, Option<Range<usize>>) {
    if chunk_len == 0 {
        return (Vec::new(), (n_rows > 0).then_some(0..n_rows));
    }
    let full = n_rows / chunk_len;
    let chunks = (0..full)
        .map(|i| i * chunk_len..(i + 1) * chunk_len)
        .collect();
    let tail_start = full * chunk_len;
    let tail = (tail_start < n_rows).then_some(tail_start..n_rows);
    (chunks, tail)
}

/// Train, validation and test sizes for `total` windows; validation takes the rounding slack.
///
/// Halves round to even, so 15 windows at 0.7 give 10 training windows, not 11.
pub fn proportional_counts(
    total: usize,
    train_fraction: f64,
    test_fraction: f64,
) -> (usize, usize, usize) {
    let train = ((total as f64 * train_fraction).round_ties_even() as usize).min(total);
    let test = ((total as f64 * test_fraction).round_ties_even() as usize).min(total - train);
    (train, total - train - test, test)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitPolicy {
    Proportional {
        train_fraction: f64,
        test_fraction: f64,
    },
    Chunked(ChunkLayout),
}

impl SplitPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            SplitPolicy::Proportional { .. } => "proportional",
            SplitPolicy::Chunked(_) => "chunked",
        }
    }

    pub fn apply(
        &self,
        matrix: &TimeSeriesMatrix,
        generator: &WindowGenerator,
    ) -> Result<SplitDataset> {
        let mut windows: [Vec<Window>; 3] = Default::default();

        match self {
            SplitPolicy::Proportional {
                train_fraction,
                test_fraction,
            } => {
                let all: Vec<Window> = generator.generate(matrix).collect();
                let (n_train, n_val, _) =
                    proportional_counts(all.len(), *train_fraction, *test_fraction);
                let mut rest = all;
                let mut tail = rest.split_off(n_train);
                let test = tail.split_off(n_val);
                windows = [rest, tail, test];
            }
            SplitPolicy::Chunked(layout) => {
                let (chunks, remainder) = split_by_chunk(matrix.n_rows(), layout.chunk_len());
                for (chunk, rows) in chunks.into_iter().enumerate() {
                    let ranges = layout.split_chunk(chunk, rows)?;
                    for (role, range) in ranges.into_iter().enumerate() {
                        windows[role].extend(generator.generate_in(matrix, range));
                    }
                }
                if let Some(rows) = remainder {
                    // The tail is shared between train and validation only
                    let half = rows.start + rows.len() / 2;
                    debug!(
                        "Remainder of {} rows split at row {} between train and validation",
                        rows.len(),
                        half
                    );
                    windows[0].extend(generator.generate_in(matrix, rows.start..half));
                    windows[1].extend(generator.generate_in(matrix, half..rows.end));
                }
            }
        }

        let total: usize = windows.iter().map(Vec::len).sum();
        if total == 0 {
            return Err(PipelineError::EmptyResult(format!(
                "no windows of {} rows fit in {} rows under the {} split",
                generator.span(),
                matrix.n_rows(),
                self.name()
            )));
        }

        let [train, val, test] = windows;
        let dataset = SplitDataset {
            train: WindowSet::stack(&train, generator, matrix.n_stations()),
            val: WindowSet::stack(&val, generator, matrix.n_stations()),
            test: WindowSet::stack(&test, generator, matrix.n_stations()),
        };
        for role in SplitRole::ALL {
            let set = dataset.get(role);
            if set.is_empty() {
                warn!("{} split has no windows", role.name());
            }
            info!("{} x: {:?} y: {:?}", role.name(), set.x.shape(), set.y.shape());
        }
        Ok(dataset)
    }
}

/// Stacked windows of one split: `x` is windows × input × stations × 1, `y` likewise.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSet {
    pub x: Array4<f64>,
    pub y: Array4<f64>,
    /// Start row of every window, in emission order.
    pub starts: Vec<usize>,
}

impl WindowSet {
    fn stack(windows: &[Window], generator: &WindowGenerator, n_stations: usize) -> Self {
        let n = windows.len();
        let mut x = Array4::zeros((n, generator.input_size(), n_stations, 1));
        let mut y = Array4::zeros((n, generator.output_size(), n_stations, 1));
        for (i, window) in windows.iter().enumerate() {
            x.slice_mut(s![i, .., .., 0]).assign(&window.x);
            y.slice_mut(s![i, .., .., 0]).assign(&window.y);
        }
        Self {
            x,
            y,
            starts: windows.iter().map(|w| w.start).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitDataset {
    pub train: WindowSet,
    pub val: WindowSet,
    pub test: WindowSet,
}

impl SplitDataset {
    pub fn get(&self, role: SplitRole) -> &WindowSet {
        match role {
            SplitRole::Train => &self.train,
            SplitRole::Val => &self.val,
            SplitRole::Test => &self.test,
        }
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }
}

/// Window the matrix and partition the windows under `policy`.
pub fn generate_windows_and_splits(
    matrix: &TimeSeriesMatrix,
    input_size: usize,
    output_size: usize,
    policy: &SplitPolicy,
) -> Result<SplitDataset> {
    let generator = WindowGenerator::new(input_size, output_size)?;
    policy.apply(matrix, &generator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_matches_three_week_one_week_rule() {
        let layout = ChunkLayout::from_weeks(4, 3, 0.875, 1).unwrap();
        assert_eq!(layout.chunk_len(), 672);
        assert_eq!(layout.train_len, 441);
        assert_eq!(layout.test_len, 168);
        assert_eq!(layout.val_len, 63);
    }

    #[test]
    fn test_layout_rejects_overfull_chunk() {
        assert!(ChunkLayout::from_weeks(2, 2, 1.0, 1).is_err());
    }

    #[test]
    fn test_layout_rejects_overflowing_weeks() {
        let err = ChunkLayout::from_weeks(usize::MAX, 3, 0.875, 1).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "split.chunk_weeks"));

        let err = ChunkLayout::from_weeks(4, 3, 0.875, usize::MAX / 100).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "split.test_weeks"));

        let huge = usize::MAX / HOURS_PER_WEEK;
        assert!(ChunkLayout::from_weeks(huge, huge, 1.0, huge).is_err());
    }

    #[test]
    fn test_proportional_counts_round_halves_to_even() {
        // 15 * 0.7 = 10.5, 5 * 0.5 = 2.5, 10 * 0.25 = 2.5
        assert_eq!(proportional_counts(15, 0.7, 0.2), (10, 2, 3));
        assert_eq!(proportional_counts(5, 0.5, 0.2), (2, 2, 1));
        assert_eq!(proportional_counts(10, 0.25, 0.25), (2, 6, 2));
        assert_eq!(proportional_counts(7, 0.5, 0.5), (4, 0, 3));
    }

    #[test]
    fn test_split_by_chunk_keeps_exact_multiple_as_full_chunks() {
        let (chunks, tail) = split_by_chunk(20, 10);
        assert_eq!(chunks, vec![0..10, 10..20]);
        assert_eq!(tail, None);

        let (chunks, tail) = split_by_chunk(7, 10);
        assert!(chunks.is_empty());
        assert_eq!(tail, Some(0..7));
    }
}
