use std::time::Instant;

use tracing::info;

use crate::config::PipelineConfig;
use crate::duplicates::{CorrelationScore, DuplicateReconciler};
use crate::errors::Result;
use crate::export::{DatasetBundle, DatasetMetadata, DatasetWriter, Preprocessing, SmoothingRecord};
use crate::geo::{GeoFeatureMatrix, GeoFeatureRow};
use crate::observations::{CleaningReport, ObservationTable, StationId};
use crate::scaler::{self, Scaler};
use crate::smoothing::Smoother;
use crate::split::SplitDataset;
use crate::time_series::{BuildReport, TimeSeriesBuilder, TimeSeriesMatrix};
use crate::windows::WindowGenerator;

#[derive(Debug, Clone, Default)]
pub struct CleaningSummary {
    pub deduplicated: CleaningReport,
    pub non_positive: CleaningReport,
    pub removed: CleaningReport,
    /// Stations dropped because their duplicate readings disagree.
    pub flagged: Vec<(StationId, f64)>,
    pub undetermined: Vec<(StationId, CorrelationScore)>,
    pub reconciled: bool,
}

/// Time series after construction and optional smoothing, with its fitted scaler.
#[derive(Debug, Clone)]
pub struct PreparedSeries {
    pub matrix: TimeSeriesMatrix,
    pub report: BuildReport,
    pub scaler: Scaler,
    pub smoothed: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub cleaning: CleaningSummary,
    pub series: PreparedSeries,
    pub dataset: SplitDataset,
    pub geo: Option<GeoFeatureMatrix>,
    pub metadata: DatasetMetadata,
}

pub struct PreparationPipeline {
    config: PipelineConfig,
}

impl PreparationPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Exact duplicates, non-positive readings and configured stations out; then, when enabled,
    /// duplicate readings per (station, hour) are checked for agreement and averaged.
    pub fn clean(&self, mut table: ObservationTable) -> (ObservationTable, CleaningSummary) {
        let cleaning = &self.config.cleaning;
        let initial = table.len();
        let mut summary = CleaningSummary {
            deduplicated: table.deduplicate(),
            non_positive: table.filter_positive(),
            removed: table.remove_stations(&cleaning.remove_stations),
            ..Default::default()
        };

        if cleaning.reconcile_for(self.config.data_source) {
            let outcome = DuplicateReconciler::new(cleaning.duplicate_correlation_threshold)
                .drop_undetermined(cleaning.drop_undetermined_stations)
                .reconcile(&table);
            summary.flagged = outcome.flagged;
            summary.undetermined = outcome.undetermined;
            summary.reconciled = true;
            table = outcome.table;
        }

        info!(
            "Cleaning kept {} of {} observations across {} stations",
            table.len(),
            initial,
            table.distinct_stations().len()
        );
        (table, summary)
    }

    pub fn build(&self, table: &ObservationTable) -> Result<PreparedSeries> {
        let (mut matrix, report) = TimeSeriesBuilder::new().build(table)?;

        let smoothing = &self.config.smoothing;
        let smoothed = smoothing.enabled_for(self.config.data_source);
        if smoothed {
            matrix = Smoother::new(smoothing.window_size, smoothing.method)?.smooth(&matrix);
        }

        let scaler = scaler::fit_global(&matrix)?;
        info!(
            "Fitted scaler: mean {:.4}, std {:.4}",
            scaler.mean(),
            scaler.std()
        );

        Ok(PreparedSeries {
            matrix,
            report,
            scaler,
            smoothed,
        })
    }

    pub fn window_generator(&self) -> Result<WindowGenerator> {
        let windows = &self.config.windows;
        Ok(WindowGenerator::new(windows.input_size, windows.output_size)?
            .with_min_observed_fraction(windows.min_observed_fraction))
    }

    pub fn generate_windows_and_splits(&self, matrix: &TimeSeriesMatrix) -> Result<SplitDataset> {
        let policy = self.config.split.policy()?;
        policy.apply(matrix, &self.window_generator()?)
    }

    fn preprocessing(&self, summary: &CleaningSummary, smoothed: bool) -> Preprocessing {
        Preprocessing {
            data_source: self.config.data_source,
            removed_stations: self.config.cleaning.remove_stations.clone(),
            reconciled_duplicates: summary.reconciled,
            smoothing: smoothed.then(|| SmoothingRecord {
                window_size: self.config.smoothing.window_size,
                method: self.config.smoothing.method,
            }),
            split_rule: match self.config.split.policy() {
                Ok(policy) => policy.name().to_string(),
                Err(_) => "invalid".to_string(),
            },
            scaled_windows: self.config.scaling.apply_to_windows,
        }
    }

    /// Clean, build, window, split and write the dataset.
    pub fn run(
        &self,
        table: ObservationTable,
        geo_rows: Option<&[GeoFeatureRow]>,
    ) -> Result<PipelineOutcome> {
        let started = Instant::now();
        info!(
            "Preparing {} dataset from {} observations",
            self.config.data_source.name(),
            table.len()
        );

        let (table, cleaning) = self.clean(table);
        let series = self.build(&table)?;

        let dataset = if self.config.scaling.apply_to_windows {
            let scaler = series.scaler;
            let scaled = series.matrix.map_present(|v| scaler.transform(v));
            self.generate_windows_and_splits(&scaled)?
        } else {
            self.generate_windows_and_splits(&series.matrix)?
        };

        let geo = geo_rows.map(|rows| {
            let (scaled, dropped) = GeoFeatureMatrix::from_rows(rows, series.matrix.stations()).scaled();
            info!(
                "Geo features: {} kept, {} dropped",
                scaled.features().len(),
                dropped.len()
            );
            scaled
        });

        let output = &self.config.output;
        let mut writer = DatasetWriter::new(&output.dataset_dir, output.run_config_path());
        if let Some(path) = &output.time_series_csv {
            writer = writer.with_series_csv(path);
        }
        let metadata = writer.write(&DatasetBundle {
            matrix: &series.matrix,
            dataset: &dataset,
            input_size: self.config.windows.input_size,
            output_size: self.config.windows.output_size,
            scaler: series.scaler,
            preprocessing: self.preprocessing(&cleaning, series.smoothed),
            geo: geo.as_ref(),
        })?;

        info!(
            "Pipeline finished in {:.2}s: {} windows over {} stations",
            started.elapsed().as_secs_f32(),
            dataset.total(),
            series.matrix.n_stations()
        );

        Ok(PipelineOutcome {
            cleaning,
            series,
            dataset,
            geo,
            metadata,
        })
    }
}
