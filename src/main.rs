//! catalog-import - command-line front end for the catalog import pipeline
//!
//! Usage:
//!   catalog-import validate export.json
//!   catalog-import import export.json --strategy replace --no-categories
//!   catalog-import export > backup.json
//!   catalog-import stats

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use catalog_storage::{
    BackendKind, Config, ImportOptions, ImportProgress, ImportResult, ImportService,
    MergeStrategy, Principle,
};

#[derive(Parser, Debug)]
#[command(name = "catalog-import")]
#[command(about = "Import, export and maintain the guideline catalog")]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "CATALOG_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Backend holding the dataset (file, sled, memory)
    #[arg(long, env = "CATALOG_BACKEND")]
    backend: Option<BackendKind>,

    /// Serialized size in bytes above which saves are chunked
    #[arg(long)]
    chunk_threshold: Option<usize>,

    /// Guidelines per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Repair and validate a file without importing it
    Validate {
        /// JSON export to check
        file: PathBuf,
    },

    /// Import a JSON export into the catalog
    Import {
        /// JSON export to import
        file: PathBuf,
        /// How incoming entities combine with stored ones (merge, replace, preserve)
        #[arg(short, long, default_value = "merge")]
        strategy: MergeStrategy,
        /// Leave guidelines out of the import
        #[arg(long)]
        no_guidelines: bool,
        /// Leave principles out of the import
        #[arg(long)]
        no_principles: bool,
        /// Leave categories out of the import
        #[arg(long)]
        no_categories: bool,
    },

    /// Merge principles from a JSON file (an array, or an object with `principles`)
    ImportPrinciples {
        file: PathBuf,
    },

    /// Write the stored dataset as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show stored dataset stats
    Stats,

    /// Delete a guideline by id
    DeleteGuideline { id: String },

    /// Delete a category by id or name
    DeleteCategory { id: String },

    /// Delete a principle by id
    DeletePrinciple { id: String },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report(result: ImportResult) -> anyhow::Result<()> {
    print_json(&result)?;
    if !result.success {
        bail!(result.error.unwrap_or_else(|| "operation failed".to_string()));
    }
    Ok(())
}

async fn read_file(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn log_progress(progress: &ImportProgress) {
    info!(
        stage = %progress.stage,
        progress = progress.progress,
        message = progress.message.as_deref().unwrap_or(""),
        "Progress"
    );
}

fn parse_principles(text: &str) -> anyhow::Result<Vec<Principle>> {
    let value: Value = serde_json::from_str(text).context("Principles file is not valid JSON")?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut root) => match root.remove("principles") {
            Some(Value::Array(items)) => items,
            _ => bail!("Expected a `principles` array"),
        },
        _ => bail!("Expected an array of principles"),
    };
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).context("Invalid principle entry"))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("catalog_storage=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("Failed to load config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(threshold) = args.chunk_threshold {
        config.chunk_threshold_bytes = threshold;
    }
    if let Some(size) = args.chunk_size {
        config.chunk_size = size;
    }

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let service = ImportService::open(&config).await?;

    match args.command {
        Command::Validate { file } => {
            let text = read_file(&file).await?;
            let result = service.validate_json_data(&text, Some(&log_progress));
            print_json(&serde_json::json!({
                "valid": result.valid,
                "error": result.error,
                "corrections": result.corrections,
                "skipped": result.skipped,
                "stats": result.data.as_ref().map(|d| d.counts()),
            }))?;
            if !result.valid {
                bail!("{} is not importable", file.display());
            }
        }
        Command::Import {
            file,
            strategy,
            no_guidelines,
            no_principles,
            no_categories,
        } => {
            let text = read_file(&file).await?;
            let options = ImportOptions {
                guidelines: !no_guidelines,
                principles: !no_principles,
                categories: !no_categories,
                strategy,
            };
            info!(file = %file.display(), strategy = %strategy, "Importing");
            report(service.import_json(&text, options, Some(&log_progress)).await)?;
        }
        Command::ImportPrinciples { file } => {
            let principles = parse_principles(&read_file(&file).await?)?;
            report(service.import_principles(principles).await)?;
        }
        Command::Export { output } => {
            let dataset = service.export_data().await?;
            let json = serde_json::to_string_pretty(&dataset)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    info!(path = %path.display(), "Exported dataset");
                }
                None => println!("{}", json),
            }
        }
        Command::Stats => print_json(&service.stats().await?)?,
        Command::DeleteGuideline { id } => report(service.delete_guideline(&id).await)?,
        Command::DeleteCategory { id } => report(service.delete_category(&id).await)?,
        Command::DeletePrinciple { id } => report(service.delete_principle(&id).await)?,
    }

    Ok(())
}
