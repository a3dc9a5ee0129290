//! Freeze the feature schema from a training dataset.
//!
//! Reads the diabetes CSV, applies the skew-aware log transform, derives the
//! feature order once and writes it to `<out>/schema.json`. Optionally writes
//! the prepared training matrix for the external model trainer.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin build_schema -- data/diabetes.csv --out models --matrix data/train.csv
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use glycorisk::adapters::artifact::SCHEMA_FILE;
use glycorisk::adapters::sanitize::SanitizingMakeWriter;
use glycorisk::application::{prepare, Dataset, TrainingConfig};
use glycorisk::domain::SKEW_THRESHOLD;

#[derive(Parser, Debug)]
#[clap(name = "build_schema", about = "Freeze the feature schema from a training CSV")]
struct Args {
    /// Training dataset (CSV with a header row)
    dataset: PathBuf,

    /// Output directory for schema.json
    #[clap(long, default_value = "models")]
    out: PathBuf,

    /// Also write the transformed training matrix to this CSV
    #[clap(long)]
    matrix: Option<PathBuf>,

    /// Minimum |skewness| for a column to be log-transformed
    #[clap(long, default_value_t = SKEW_THRESHOLD)]
    threshold: f64,

    /// Target column name
    #[clap(long, default_value = "CLASS")]
    target: String,
}

fn main() -> Result<()> {
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    let args = Args::parse();
    let config = TrainingConfig {
        target_column: args.target.clone(),
        skew_threshold: args.threshold,
        ..TrainingConfig::default()
    };

    let dataset = Dataset::from_csv(&args.dataset)
        .with_context(|| format!("Cannot load dataset {}", args.dataset.display()))?;
    let prepared = prepare(&dataset, &config)?;

    for (column, skew) in &prepared.skewness {
        match skew {
            Some(s) => tracing::info!("skew({}) = {:.3}", column, s),
            None => tracing::info!("skew({}) undefined", column),
        }
    }

    std::fs::create_dir_all(&args.out).with_context(|| format!("Cannot create {}", args.out.display()))?;
    let schema_path = args.out.join(SCHEMA_FILE);
    prepared.schema.save(&schema_path)?;
    tracing::info!(
        "Wrote {} ({} features, {} rows, {} duplicates removed)",
        schema_path.display(),
        prepared.schema.n_features(),
        prepared.features.len(),
        prepared.duplicates_removed
    );
    println!("{}", prepared.schema.feature_order.join(","));

    if let Some(matrix) = &args.matrix {
        prepared.write_matrix_csv(matrix, &config.target_column)?;
        tracing::info!("Wrote training matrix {}", matrix.display());
    }

    Ok(())
}
