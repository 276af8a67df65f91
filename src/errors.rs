use std::io;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::observations::StationId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse configuration in {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Unsupported configuration format for {path} (expected .json, .yaml or .yml)")]
    UnsupportedFormat { path: PathBuf },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid { field: String, message: String },
}

/// Why a mean/std or correlation fit produced no usable number.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitError {
    #[error("no values to fit")]
    NoValues,
    #[error("zero variance")]
    ZeroVariance,
    #[error("non-finite statistic")]
    NonFinite,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Source unavailable ({context}): {source}")]
    SourceUnavailable {
        context: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("Degenerate fit for {what}: {reason}")]
    DegenerateFit { what: String, reason: FitError },
    #[error("Chunk {chunk} has {actual} rows, expected {expected} (train+val+test)")]
    ShapeMismatch {
        chunk: usize,
        actual: usize,
        expected: usize,
    },
    #[error("Empty result: {0}")]
    EmptyResult(String),
    #[error("Station {station} has more than one reading at {timestamp}; reconcile duplicates first")]
    UnreconciledDuplicate {
        station: StationId,
        timestamp: NaiveDateTime,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Refusing to replace {path}: it is not empty and holds no metadata.json from an earlier run")]
    OutputConflict { path: PathBuf },
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid record in {path} at line {line}: {message}")]
    InvalidRecord {
        path: PathBuf,
        line: u64,
        message: String,
    },
    #[error("Data frame error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),
    #[error("Failed to write array archive: {0}")]
    Npz(String),
    #[error("Serialization failed: {0}")]
    Serialize(String),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
