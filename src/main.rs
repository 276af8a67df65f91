use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use air_quality_prep::config::load_config;
use air_quality_prep::db::SqlSource;
use air_quality_prep::ingest::read_observations_csv;
use air_quality_prep::pipeline::PreparationPipeline;

#[derive(Parser, Debug)]
#[command(name = "air_quality_prep")]
#[command(about = "Build windowed train/val/test datasets from hourly air quality readings", long_about = None)]
struct Args {
    /// Pipeline configuration (.json, .yaml or .yml)
    #[arg(long)]
    config: PathBuf,

    /// Database connection string; overrides the config file
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Read observations from a CSV export instead of the database
    #[arg(long)]
    input_csv: Option<PathBuf>,

    /// Override output.dataset_dir
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("air_quality_prep=info".parse()?),
        )
        .init();

    dotenv::dotenv().ok();

    let args = Args::parse();
    let mut config = load_config(&args.config)
        .with_context(|| format!("loading {:?}", args.config))?;
    if let Some(dir) = args.output_dir {
        config.output.dataset_dir = dir;
    }
    if let Some(url) = args.database_url {
        config.database_url = Some(url);
    }

    let (table, geo_rows) = match &args.input_csv {
        Some(path) => {
            if config.geo_features.is_some() {
                info!("Geo features need the database and are skipped for CSV input");
            }
            (read_observations_csv(path)?, None)
        }
        None => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("no database URL: pass --database-url, set DATABASE_URL or use --input-csv");
            };
            let source = SqlSource::connect(url).await?;
            let table = source.read_observations(&config.observations).await?;
            let geo_rows = match &config.geo_features {
                Some(geo) => Some(source.read_geo_features(geo).await?),
                None => None,
            };
            (table, geo_rows)
        }
    };

    let pipeline = PreparationPipeline::new(config)?;
    let outcome = pipeline.run(table, geo_rows.as_deref())?;

    info!(
        "Dataset ready at {:?}: train {}, val {}, test {}",
        pipeline.config().output.dataset_dir,
        outcome.dataset.train.len(),
        outcome.dataset.val.len(),
        outcome.dataset.test.len()
    );
    Ok(())
}
