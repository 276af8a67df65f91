use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::observations::StationId;
use crate::smoothing::SmoothingMethod;
use crate::split::{ChunkLayout, SplitPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Regulatory monitors: one reading per station and hour.
    Epa,
    /// Low-cost sensors: duplicated channels and noisier readings.
    PurpleAir,
}

impl DataSource {
    pub fn name(&self) -> &'static str {
        match self {
            DataSource::Epa => "epa",
            DataSource::PurpleAir => "purple_air",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub data_source: DataSource,
    #[serde(default)]
    pub database_url: Option<String>,
    pub observations: ObservationQuery,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub windows: WindowConfig,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub geo_features: Option<GeoFeatureConfig>,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservationQuery {
    pub table_name: String,
    #[serde(default)]
    pub columns: ObservationColumns,
    /// Raw SQL appended after the table name, e.g. `WHERE date_observed >= '2019-01-01'`.
    #[serde(default)]
    pub request_condition: String,
}

/// Source column for each field of an observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservationColumns {
    pub station: String,
    pub timestamp: String,
    pub value: String,
}

impl Default for ObservationColumns {
    fn default() -> Self {
        Self {
            station: "station_id".to_string(),
            timestamp: "date_observed".to_string(),
            value: "value".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleaningConfig {
    /// Stations known to be co-located or repeated.
    pub remove_stations: Vec<StationId>,
    /// Defaults to on for PurpleAir, off for EPA.
    pub reconcile_duplicates: Option<bool>,
    pub duplicate_correlation_threshold: f64,
    pub drop_undetermined_stations: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            remove_stations: Vec::new(),
            reconcile_duplicates: None,
            duplicate_correlation_threshold: 0.8,
            drop_undetermined_stations: false,
        }
    }
}

impl CleaningConfig {
    pub fn reconcile_for(&self, source: DataSource) -> bool {
        self.reconcile_duplicates
            .unwrap_or(source == DataSource::PurpleAir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmoothingConfig {
    /// Defaults to on for PurpleAir, off for EPA.
    pub enabled: Option<bool>,
    pub window_size: usize,
    pub method: SmoothingMethod,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            window_size: 24,
            method: SmoothingMethod::Mean,
        }
    }
}

impl SmoothingConfig {
    pub fn enabled_for(&self, source: DataSource) -> bool {
        self.enabled.unwrap_or(source == DataSource::PurpleAir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub input_size: usize,
    pub output_size: usize,
    pub min_observed_fraction: Option<f64>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            input_size: 6,
            output_size: 6,
            min_observed_fraction: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SplitConfig {
    Proportional(ProportionalSplit),
    Chunked(ChunkedSplit),
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig::Proportional(ProportionalSplit::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProportionalSplit {
    pub train_fraction: f64,
    pub test_fraction: f64,
}

impl Default for ProportionalSplit {
    fn default() -> Self {
        Self {
            train_fraction: 0.7,
            test_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkedSplit {
    pub chunk_weeks: usize,
    pub train_weeks: usize,
    /// Share of the training weeks kept for training; the rest goes to validation.
    pub train_keep_fraction: f64,
    pub test_weeks: usize,
}

impl Default for ChunkedSplit {
    fn default() -> Self {
        Self {
            chunk_weeks: 4,
            train_weeks: 3,
            train_keep_fraction: 0.875,
            test_weeks: 1,
        }
    }
}

impl SplitConfig {
    pub fn policy(&self) -> Result<SplitPolicy, ConfigError> {
        match self {
            SplitConfig::Proportional(p) => {
                if !(p.train_fraction > 0.0 && p.train_fraction <= 1.0) {
                    return Err(invalid(
                        "split.train_fraction",
                        format!("{} is outside (0, 1]", p.train_fraction),
                    ));
                }
                if !(0.0..1.0).contains(&p.test_fraction) {
                    return Err(invalid(
                        "split.test_fraction",
                        format!("{} is outside [0, 1)", p.test_fraction),
                    ));
                }
                if p.train_fraction + p.test_fraction > 1.0 {
                    return Err(invalid(
                        "split",
                        "train_fraction + test_fraction exceeds 1".to_string(),
                    ));
                }
                Ok(SplitPolicy::Proportional {
                    train_fraction: p.train_fraction,
                    test_fraction: p.test_fraction,
                })
            }
            SplitConfig::Chunked(c) => Ok(SplitPolicy::Chunked(ChunkLayout::from_weeks(
                c.chunk_weeks,
                c.train_weeks,
                c.train_keep_fraction,
                c.test_weeks,
            )?)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScalingConfig {
    /// Standardize the windows with the fitted scaler before writing them.
    pub apply_to_windows: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoFeatureConfig {
    /// Feature tables are named `<table_prefix>_<feature>`.
    pub table_prefix: String,
    pub feature_set: Vec<String>,
    #[serde(default)]
    pub columns: GeoColumns,
    #[serde(default)]
    pub additional_features: BTreeMap<String, AdditionalGeoFeature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeoColumns {
    pub gid: String,
    pub geo_feature: String,
    pub feature_type: String,
    pub buffer_size: String,
    pub value: String,
}

impl Default for GeoColumns {
    fn default() -> Self {
        Self {
            gid: "gid".to_string(),
            geo_feature: "geo_feature".to_string(),
            feature_type: "feature_type".to_string(),
            buffer_size: "buffer_size".to_string(),
            value: "value".to_string(),
        }
    }
}

/// Single-valued location attribute stored outside the buffered feature tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdditionalGeoFeature {
    pub table_name: String,
    pub gid_column: String,
    pub value_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub dataset_dir: PathBuf,
    #[serde(default)]
    pub run_config_file: Option<PathBuf>,
    #[serde(default)]
    pub time_series_csv: Option<PathBuf>,
}

impl OutputConfig {
    pub fn run_config_path(&self) -> PathBuf {
        self.run_config_file
            .clone()
            .unwrap_or_else(|| self.dataset_dir.join("run_config.yaml"))
    }
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message,
    }
}

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty".to_string()));
    }
    Ok(())
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("observations.table_name", &self.observations.table_name)?;
        require("observations.columns.station", &self.observations.columns.station)?;
        require("observations.columns.timestamp", &self.observations.columns.timestamp)?;
        require("observations.columns.value", &self.observations.columns.value)?;

        let threshold = self.cleaning.duplicate_correlation_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "cleaning.duplicate_correlation_threshold",
                format!("{} is outside [-1, 1]", threshold),
            ));
        }

        if self.smoothing.window_size == 0 {
            return Err(invalid("smoothing.window_size", "must be at least 1".to_string()));
        }
        if self.windows.input_size == 0 {
            return Err(invalid("windows.input_size", "must be at least 1".to_string()));
        }
        if self.windows.output_size == 0 {
            return Err(invalid("windows.output_size", "must be at least 1".to_string()));
        }
        if let Some(fraction) = self.windows.min_observed_fraction {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(invalid(
                    "windows.min_observed_fraction",
                    format!("{} is outside [0, 1]", fraction),
                ));
            }
        }

        self.split.policy()?;

        if let Some(geo) = &self.geo_features {
            require("geo_features.table_prefix", &geo.table_prefix)?;
            for (name, extra) in &geo.additional_features {
                require(&format!("geo_features.additional_features.{}.table_name", name), &extra.table_name)?;
            }
        }

        if self.output.dataset_dir.as_os_str().is_empty() {
            return Err(invalid("output.dataset_dir", "must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Load and validate a JSON or YAML configuration file.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let config: PipelineConfig = match ext.as_str() {
        "json" => serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        _ => {
            return Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    };

    config.validate()?;
    Ok(config)
}
