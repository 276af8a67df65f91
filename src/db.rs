//! Relational source access.
//!
//! Queries are assembled from configured table and column names, so every projected column is
//! cast and aliased to the name the row structs expect.

use chrono::NaiveDateTime;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::FromRow;
use tracing::{debug, info};

use crate::config::{GeoFeatureConfig, ObservationColumns, ObservationQuery};
use crate::errors::{PipelineError, Result};
use crate::geo::GeoFeatureRow;
use crate::observations::{Observation, ObservationTable};

pub struct SqlSource {
    pool: PgPool,
}

impl SqlSource {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .map_err(|source| PipelineError::SourceUnavailable {
                context: "connecting to database".to_string(),
                source,
            })?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `SELECT <columns> FROM <table> <condition>` decoded into `T`.
    pub async fn read<T>(&self, table: &str, columns: &[String], condition: &str) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let query = select_statement(table, columns, condition);
        debug!("Executing: {}", query);
        sqlx::query_as::<_, T>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| PipelineError::SourceUnavailable {
                context: format!("reading {}", table),
                source,
            })
    }

    pub async fn read_observations(&self, query: &ObservationQuery) -> Result<ObservationTable> {
        let rows: Vec<ObservationRow> = self
            .read(
                &query.table_name,
                &observation_columns(&query.columns),
                &query.request_condition,
            )
            .await?;
        let fetched = rows.len();
        let table = ObservationTable::load(rows.into_iter().filter_map(ObservationRow::into_observation));
        info!(
            "Fetched {} rows from {} ({} with a value)",
            fetched,
            query.table_name,
            table.len()
        );
        Ok(table)
    }

    /// Buffered features from `<prefix>_<feature>` plus the single-valued extras.
    pub async fn read_geo_features(&self, config: &GeoFeatureConfig) -> Result<Vec<GeoFeatureRow>> {
        let mut rows = Vec::new();
        let projection = geo_columns(config);
        for feature in &config.feature_set {
            let table = format!("{}_{}", config.table_prefix, feature);
            let batch: Vec<GeoFeatureRow> = self.read(&table, &projection, "").await?;
            debug!("{} geo rows from {}", batch.len(), table);
            rows.extend(batch);
        }
        for (name, extra) in &config.additional_features {
            let projection = vec![
                format!("{}::text AS location", extra.gid_column),
                "'location' AS geo_feature".to_string(),
                format!("{} AS feature_type", sql_literal(name)),
                "'0' AS buffer_size".to_string(),
                format!("{}::float8 AS value", extra.value_column),
            ];
            rows.extend(self.read::<GeoFeatureRow>(&extra.table_name, &projection, "").await?);
        }
        info!("Fetched {} geo feature rows", rows.len());
        Ok(rows)
    }
}

#[derive(Debug, FromRow)]
struct ObservationRow {
    station_id: String,
    date_observed: NaiveDateTime,
    value: Option<f64>,
}

impl ObservationRow {
    fn into_observation(self) -> Option<Observation> {
        self.value
            .map(|value| Observation::new(self.station_id, self.date_observed, value))
    }
}

pub fn select_statement(table: &str, columns: &[String], condition: &str) -> String {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    };
    let condition = condition.trim();
    if condition.is_empty() {
        format!("SELECT {} FROM {}", projection, table)
    } else {
        format!("SELECT {} FROM {} {}", projection, table, condition)
    }
}

pub fn observation_columns(columns: &ObservationColumns) -> Vec<String> {
    vec![
        format!("{}::text AS station_id", columns.station),
        format!("{}::timestamp AS date_observed", columns.timestamp),
        format!("{}::float8 AS value", columns.value),
    ]
}

pub fn geo_columns(config: &GeoFeatureConfig) -> Vec<String> {
    let c = &config.columns;
    vec![
        format!("{}::text AS location", c.gid),
        format!("{}::text AS geo_feature", c.geo_feature),
        format!("{}::text AS feature_type", c.feature_type),
        format!("{}::text AS buffer_size", c.buffer_size),
        format!("{}::float8 AS value", c.value),
    ]
}

fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
