pub mod config;
pub mod db;
pub mod duplicates;
pub mod errors;
pub mod export;
pub mod geo;
pub mod ingest;
pub mod observations;
pub mod pipeline;
pub mod scaler;
pub mod smoothing;
pub mod split;
pub mod time_series;
pub mod windows;

pub use config::{load_config, PipelineConfig};
pub use errors::{ConfigError, FitError, PipelineError};
pub use observations::{Observation, ObservationTable, StationId};
pub use pipeline::PreparationPipeline;
pub use time_series::{build_time_series, TimeSeriesBuilder, TimeSeriesMatrix};

#[cfg(test)]
mod tests;
