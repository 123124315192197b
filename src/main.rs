//! imagescout CLI
//!
//! # Commands
//!
//! - `search`: find the stored images most similar to a query image
//! - `anomaly`: score an image against a category's autoencoder
//! - `embed`: print the shape and norm of one image embedding
//! - `config`: print the effective configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use imagescout::{
    comparison_image, score_image_file, search_image, AppError, Config, EmbeddingModel,
    ErrorResponse, ImageEmbedder, ModelKind, DEFAULT_THRESHOLD,
};

/// Image similarity search and autoencoder anomaly scoring
#[derive(Parser)]
#[command(name = "imagescout")]
#[command(version)]
#[command(about = "Image similarity search and autoencoder anomaly scoring")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the embedding database for images similar to a query
    Search {
        /// Path to the query image
        #[arg(long)]
        query: PathBuf,
        /// Rebuild the embedding database before searching
        #[arg(long)]
        rebuild: bool,
        /// Number of results to show (capped by the configured maximum)
        #[arg(long = "top-k")]
        top_k: Option<usize>,
    },
    /// Score an image with the autoencoder trained for a category
    Anomaly {
        /// Path to the image to score
        #[arg(long)]
        image: PathBuf,
        /// Product category (selects `autoencoder_<category>.ot`)
        #[arg(long)]
        category: String,
        /// Scores strictly above this are reported as anomalies
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
        /// Directory holding autoencoder weights
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Write an original | reconstruction comparison image here
        #[arg(long)]
        save_comparison: Option<PathBuf>,
    },
    /// Print the shape and L2 norm of one image embedding
    Embed {
        /// Path to the image
        path: PathBuf,
        /// Backbone to use instead of the configured one
        #[arg(long)]
        model: Option<ModelKind>,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    if let Err(e) = imagescout::init_with_filter(filter) {
        eprintln!("{}", e);
    }

    let json = cli.json;
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            if json {
                match serde_json::to_string_pretty(&error_report(&e)) {
                    Ok(report) => println!("{}", report),
                    Err(err) => eprintln!("{}", err),
                }
            }
            ExitCode::FAILURE
        }
    }
}

/// JSON report for a failed command; library errors keep their kind
fn error_report(err: &anyhow::Error) -> ErrorResponse {
    match err.downcast_ref::<AppError>() {
        Some(app) => app.to_json(),
        None => ErrorResponse::internal(format!("{:#}", err)),
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("invalid configuration")?;
    if cli.verbose > 0 {
        config.verbose = true;
    }

    match cli.command {
        Commands::Search {
            query,
            rebuild,
            top_k,
        } => run_search(&config, &query, rebuild, top_k, cli.json),
        Commands::Anomaly {
            image,
            category,
            threshold,
            model_dir,
            save_comparison,
        } => {
            if let Some(dir) = model_dir {
                config.model_dir = dir;
            }
            run_anomaly(&config, &image, &category, threshold, save_comparison.as_deref(), cli.json)
        }
        Commands::Embed { path, model } => {
            if let Some(model) = model {
                config.model = model;
            }
            run_embed(&config, &path)
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_search(config: &Config, query: &Path, rebuild: bool, top_k: Option<usize>, json: bool) -> anyhow::Result<()> {
    config.ensure_directories()?;
    if config.verbose {
        config.log_summary();
    }

    // Reject bad queries before paying for model loading
    imagescout::validate_image_path(config, query)?;

    let model = EmbeddingModel::from_config(config).context("failed to load model")?;

    let hits = match search_image(config, &model, query, top_k, rebuild) {
        Ok(hits) => hits,
        Err(e @ AppError::EmptyDatabase(_)) => {
            return Err(e).context("no embeddings available, rerun with --rebuild after adding images");
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    println!("\nTop similar images:");
    if hits.is_empty() {
        println!("  (no results)");
    }
    for hit in &hits {
        println!("- {} ({:.4})", hit.name, hit.score);
    }
    Ok(())
}

fn run_anomaly(
    config: &Config,
    image: &Path,
    category: &str,
    threshold: f64,
    save_comparison: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let (summary, report, original) = score_image_file(config, category, image, threshold)
        .with_context(|| format!("failed to score {}", image.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("[{}] Image: {}", summary.category, summary.image);
        println!("Anomaly Score: {:.6}", summary.score);
        println!("Status: {}", summary.status);
    }

    if let Some(out) = save_comparison {
        let reconstruction = report.reconstruction_image()?;
        comparison_image(&original, &reconstruction, summary.status, config.thumbnail_size)
            .save(out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        log::info!("Comparison image written to {}", out.display());
    }
    Ok(())
}

fn run_embed(config: &Config, path: &Path) -> anyhow::Result<()> {
    imagescout::validate_image_path(config, path)?;
    let model = EmbeddingModel::from_config(config).context("failed to load model")?;
    let embedding = model.embed_path(path)?;
    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();

    println!("Embedding for '{}' using {}:", path.display(), model.model_name().to_uppercase());
    println!("  Shape: [{}]", embedding.len());
    println!("  Norm: {:.6}", norm);
    Ok(())
}
