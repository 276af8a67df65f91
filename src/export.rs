//! Dataset artifacts consumed by the forecasting models.
//!
//! ```text
//! <dataset_dir>/
//!   train.npz  val.npz  test.npz   x, y, x_offsets, y_offsets
//!   scaler.json                    mean, std, applied
//!   metadata.json                  sensor ids, grid, split sizes, test prediction dates
//!   geo_features.csv               optional, scaled per-location features
//!   run_config.yaml                unless run_config_file points elsewhere
//! ```
//!
//! Everything is written into `<dataset_dir>.partial` first and renamed into place once complete,
//! so a failed run never leaves a half-written dataset behind. The optional series CSV is staged the
//! same way. An existing `dataset_dir` is only replaced when it is empty or holds a `metadata.json`
//! from an earlier run.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array4};
use ndarray_npy::NpzWriter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DataSource;
use crate::errors::{PipelineError, Result};
use crate::geo::GeoFeatureMatrix;
use crate::observations::StationId;
use crate::scaler::Scaler;
use crate::smoothing::SmoothingMethod;
use crate::split::{SplitDataset, SplitRole, WindowSet};
use crate::time_series::{TimeSeriesMatrix, TIMESTAMP_FORMAT};

pub const SCALER_FILE: &str = "scaler.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const GEO_FEATURES_FILE: &str = "geo_features.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerRecord {
    pub mean: f64,
    pub std: f64,
    /// Whether the stored windows are already standardized.
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub sensor_ids: Vec<StationId>,
    pub grid_start: String,
    pub grid_len: usize,
    pub split_counts: BTreeMap<String, usize>,
    /// First target timestamp of every test window.
    pub pred_dates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingRecord {
    pub window_size: usize,
    pub method: SmoothingMethod,
}

/// How the dataset was produced, echoed into the run config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessing {
    pub data_source: DataSource,
    pub removed_stations: Vec<StationId>,
    pub reconciled_duplicates: bool,
    pub smoothing: Option<SmoothingRecord>,
    pub split_rule: String,
    pub scaled_windows: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub data: DataSection,
    pub model: ModelSection,
    pub preprocessing: Preprocessing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    pub dataset_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub geo_features: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    pub seq_len: usize,
    pub horizon: usize,
    pub num_nodes: usize,
    pub input_dim: usize,
    pub output_dim: usize,
}

/// Everything a [`DatasetWriter`] persists.
pub struct DatasetBundle<'a> {
    pub matrix: &'a TimeSeriesMatrix,
    pub dataset: &'a SplitDataset,
    pub input_size: usize,
    pub output_size: usize,
    pub scaler: Scaler,
    pub preprocessing: Preprocessing,
    pub geo: Option<&'a GeoFeatureMatrix>,
}

impl DatasetBundle<'_> {
    pub fn metadata(&self) -> DatasetMetadata {
        let grid = self.matrix.grid();
        let pred_dates = self
            .dataset
            .test
            .starts
            .iter()
            .filter_map(|start| grid.at(start + self.input_size))
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .collect();
        DatasetMetadata {
            sensor_ids: self.matrix.stations().to_vec(),
            grid_start: grid.start().format(TIMESTAMP_FORMAT).to_string(),
            grid_len: grid.len(),
            split_counts: SplitRole::ALL
                .iter()
                .map(|role| (role.name().to_string(), self.dataset.get(*role).len()))
                .collect(),
            pred_dates,
        }
    }

    pub fn run_config(&self, dataset_dir: &Path) -> RunConfig {
        RunConfig {
            data: DataSection {
                dataset_dir: dataset_dir.to_path_buf(),
                geo_features: self.geo.map(|_| dataset_dir.join(GEO_FEATURES_FILE)),
            },
            model: ModelSection {
                seq_len: self.input_size,
                horizon: self.output_size,
                num_nodes: self.matrix.n_stations(),
                input_dim: 1,
                output_dim: 1,
            },
            preprocessing: self.preprocessing.clone(),
        }
    }
}

/// `[-input_size + 1, ..., 0]` as a column.
pub fn x_offsets(input_size: usize) -> Array2<i64> {
    let start = 1 - input_size as i64;
    Array2::from_shape_fn((input_size, 1), |(i, _)| start + i as i64)
}

/// `[1, ..., output_size]` as a column.
pub fn y_offsets(output_size: usize) -> Array2<i64> {
    Array2::from_shape_fn((output_size, 1), |(i, _)| i as i64 + 1)
}

pub struct DatasetWriter {
    dataset_dir: PathBuf,
    run_config_path: PathBuf,
    series_csv: Option<PathBuf>,
}

impl DatasetWriter {
    pub fn new(dataset_dir: impl Into<PathBuf>, run_config_path: impl Into<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            run_config_path: run_config_path.into(),
            series_csv: None,
        }
    }

    /// Also write the station × time matrix as CSV, committed together with the dataset.
    pub fn with_series_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.series_csv = Some(path.into());
        self
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    fn staging_dir(&self) -> PathBuf {
        partial_path(&self.dataset_dir)
    }

    /// Where `path` is written before commit: inside the staging directory when it belongs to the
    /// dataset, next to itself otherwise.
    fn staged(&self, path: &Path) -> (PathBuf, bool) {
        match path.strip_prefix(&self.dataset_dir) {
            Ok(relative) => (self.staging_dir().join(relative), true),
            Err(_) => (partial_path(path), false),
        }
    }

    /// Fails unless `dataset_dir` is absent, empty, or a dataset written by an earlier run.
    fn check_replaceable(&self) -> Result<()> {
        let dir = &self.dataset_dir;
        if !dir.exists() {
            return Ok(());
        }
        if !dir.is_dir() {
            return Err(PipelineError::OutputConflict { path: dir.clone() });
        }
        if dir.join(METADATA_FILE).is_file() {
            return Ok(());
        }
        let mut entries = fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
        if entries.next().is_some() {
            return Err(PipelineError::OutputConflict { path: dir.clone() });
        }
        Ok(())
    }

    pub fn write(&self, bundle: &DatasetBundle<'_>) -> Result<DatasetMetadata> {
        for role in SplitRole::ALL {
            if bundle.dataset.get(role).is_empty() {
                return Err(PipelineError::EmptyResult(format!(
                    "{} split has no windows; nothing was written",
                    role.name()
                )));
            }
        }

        self.check_replaceable()?;

        let staging = self.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| PipelineError::io(&staging, e))?;
        }
        fs::create_dir_all(&staging).map_err(|e| PipelineError::io(&staging, e))?;

        let x_off = x_offsets(bundle.input_size);
        let y_off = y_offsets(bundle.output_size);
        for role in SplitRole::ALL {
            let path = staging.join(format!("{}.npz", role.name()));
            write_split(&path, bundle.dataset.get(role), &x_off, &y_off)?;
        }

        let scaler = ScalerRecord {
            mean: bundle.scaler.mean(),
            std: bundle.scaler.std(),
            applied: bundle.preprocessing.scaled_windows,
        };
        write_json(&staging.join(SCALER_FILE), &scaler)?;

        let metadata = bundle.metadata();
        write_json(&staging.join(METADATA_FILE), &metadata)?;

        if let Some(geo) = bundle.geo {
            geo.write_csv(&staging.join(GEO_FEATURES_FILE))?;
        }

        let run_config = bundle.run_config(&self.dataset_dir);
        let (run_config_staged, run_config_inside) = self.staged(&self.run_config_path);
        if run_config_inside {
            write_yaml(&run_config_staged, &run_config)?;
        }

        let series_csv = match &self.series_csv {
            Some(path) => {
                let (staged, inside) = self.staged(path);
                create_parent(&staged)?;
                bundle.matrix.write_csv(&staged)?;
                (!inside).then(|| (staged, path.clone()))
            }
            None => None,
        };

        if self.dataset_dir.exists() {
            debug!("Replacing existing dataset at {:?}", self.dataset_dir);
            fs::remove_dir_all(&self.dataset_dir)
                .map_err(|e| PipelineError::io(&self.dataset_dir, e))?;
        }
        fs::rename(&staging, &self.dataset_dir).map_err(|e| PipelineError::io(&staging, e))?;

        if let Some((staged, path)) = series_csv {
            fs::rename(&staged, &path).map_err(|e| PipelineError::io(&staged, e))?;
        }
        if !run_config_inside {
            write_yaml(&self.run_config_path, &run_config)?;
        }

        info!(
            "Wrote dataset to {:?} (train {}, val {}, test {} windows)",
            self.dataset_dir,
            bundle.dataset.train.len(),
            bundle.dataset.val.len(),
            bundle.dataset.test.len()
        );
        Ok(metadata)
    }
}

fn write_split(path: &Path, set: &WindowSet, x_off: &Array2<i64>, y_off: &Array2<i64>) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut npz = NpzWriter::new_compressed(file);
    let arrays: [(&str, &Array4<f64>); 2] = [("x", &set.x), ("y", &set.y)];
    for (name, array) in arrays {
        npz.add_array(name, array)
            .map_err(|e| PipelineError::Npz(format!("{:?} {}: {}", path, name, e)))?;
    }
    for (name, array) in [("x_offsets", x_off), ("y_offsets", y_off)] {
        npz.add_array(name, array)
            .map_err(|e| PipelineError::Npz(format!("{:?} {}: {}", path, name, e)))?;
    }
    npz.finish()
        .map_err(|e| PipelineError::Npz(format!("{:?}: {}", path, e)))?;
    debug!("Wrote {:?} x: {:?} y: {:?}", path, set.x.shape(), set.y.shape());
    Ok(())
}

/// `<path>.partial`, a sibling of `path`.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| PipelineError::Serialize(format!("{:?}: {}", path, e)))?;
    writer.flush().map_err(|e| PipelineError::io(path, e))
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    create_parent(path)?;
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_yaml::to_writer(&mut writer, value)
        .map_err(|e| PipelineError::Serialize(format!("{:?}: {}", path, e)))?;
    writer.flush().map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets() {
        assert_eq!(x_offsets(3).column(0).to_vec(), vec![-2, -1, 0]);
        assert_eq!(y_offsets(2).column(0).to_vec(), vec![1, 2]);
        assert_eq!(x_offsets(3).shape(), &[3, 1]);
    }

    #[test]
    fn test_staging_dir_is_a_sibling() {
        let writer = DatasetWriter::new("out/pm25", "out/pm25/run_config.yaml");
        assert_eq!(writer.staging_dir(), PathBuf::from("out/pm25.partial"));
    }

    #[test]
    fn test_staged_paths() {
        let writer = DatasetWriter::new("out/pm25", "runs/pm25.yaml");
        assert_eq!(
            writer.staged(Path::new("out/pm25/run_config.yaml")),
            (PathBuf::from("out/pm25.partial/run_config.yaml"), true)
        );
        assert_eq!(
            writer.staged(Path::new("series/pm25.csv")),
            (PathBuf::from("series/pm25.csv.partial"), false)
        );
    }

    #[test]
    fn test_json_is_flushed_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SCALER_FILE);
        let record = ScalerRecord {
            mean: 2.5,
            std: 0.5,
            applied: true,
        };
        write_json(&path, &record).unwrap();
        let back: ScalerRecord = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.mean, 2.5);
        assert!(back.applied);
    }
}
