#![doc(html_root_url = "https://docs.rs/imagescout/0.1.0")]
#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

//! # imagescout
//!
//! Two small image tools built on pretrained and trained convolutional models.
//!
//! ## Features
//!
//! - **Similarity search**: embed images with CLIP ViT-B/32 or a headless
//!   ResNet-50, keep the vectors in a flat file-backed database and rank them
//!   against a query by cosine similarity in one linear pass
//! - **Anomaly scoring**: reconstruct an image with a per-category
//!   convolutional autoencoder and report the mean squared error
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imagescout::{search_image, Config, EmbeddingModel, Result};
//! use std::path::Path;
//!
//! fn main() -> Result<()> {
//!     let config = Config::from_env()?;
//!     let model = EmbeddingModel::from_config(&config)?;
//!     for hit in search_image(&config, &model, Path::new("query.jpg"), None, false)? {
//!         println!("- {} ({:.4})", hit.name, hit.score);
//!     }
//!     Ok(())
//! }
//! ```

/// Configuration loaded from defaults and the environment.
pub mod config;
pub mod core;
/// Defines the application's error types and result aliases.
pub mod error;
pub mod models;
mod utils;

/// Build-time metadata generated by `build.rs`.
#[allow(missing_docs, unreachable_pub, dead_code)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

use std::path::Path;

// Public API exports
pub use crate::{
    config::{Config, DevicePreference, ModelKind},
    core::embeddings::ImageEmbedder,
    core::similarity::{cosine_similarity, search_similar, SearchHit},
    error::{AppError, ErrorResponse, Result, ResultExt},
    models::{
        anomaly::{AnomalySummary, Verdict, DEFAULT_THRESHOLD},
        store::{EmbeddingStore, STORE_FORMAT_VERSION},
    },
};

#[cfg(feature = "embeddings")]
pub use crate::core::embeddings::EmbeddingModel;

#[cfg(feature = "anomaly")]
pub use crate::core::autoencoder::{comparison_image, AnomalyDetector, AnomalyReport, AutoEncoder};

/// Initialize logging with the default `info` filter
///
/// `RUST_LOG` overrides the filter. It should be called early in the
/// application startup process.
///
/// # Errors
///
/// Returns an error if a global logger is already installed.
///
/// # Example
///
/// ```no_run
/// use imagescout::init;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     init()?;
///     // Application code here
///     Ok(())
/// }
/// ```
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize logging with `default_filter` unless `RUST_LOG` is set
pub fn init_with_filter(default_filter: &str) -> Result<()> {
    let env = env_logger::Env::default()
        .default_filter_or(default_filter)
        .default_write_style_or("auto");

    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .try_init()
        .map_err(|e| AppError::Internal(format!("logger already initialized: {}", e)))?;

    log::debug!(
        "Initialized {} {} ({}, {})",
        built_info::PKG_NAME,
        built_info::PKG_VERSION,
        built_info::TARGET,
        built_info::PROFILE
    );
    Ok(())
}

/// Check that `path` exists and carries a supported image extension
pub fn validate_image_path(config: &Config, path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(AppError::NotFound(format!("query image {}", path.display())));
    }
    if !config.is_supported_image(path) {
        return Err(AppError::UnsupportedFormat(format!(
            "{} (supported: {})",
            path.display(),
            config.supported_formats.join(", ")
        )));
    }
    Ok(())
}

/// Find the stored images most similar to `query`
///
/// Loads the embedding database (building it first when `rebuild` is set or
/// it does not exist), embeds the query and ranks every stored vector.
/// `top_k` defaults to `config.default_top_k` and is capped at
/// `config.max_top_k`.
///
/// # Errors
///
/// Returns an error if the query is missing or not a supported image, the
/// database cannot be built or loaded, or the query cannot be embedded.
pub fn search_image<E: ImageEmbedder + ?Sized>(
    config: &Config,
    embedder: &E,
    query: &Path,
    top_k: Option<usize>,
    rebuild: bool,
) -> Result<Vec<SearchHit>> {
    validate_image_path(config, query)?;
    let top_k = config.effective_top_k(top_k);

    let store = EmbeddingStore::load_or_build(embedder, config, rebuild)?;

    log::info!("Searching similar images for: {}", query.display());
    let query_vec = embedder.embed_path(query)?;
    search_similar(&query_vec, &store, top_k)
}

/// Score the image at `image_path` with the autoencoder for `category`
///
/// # Errors
///
/// Returns an error if the model weights are missing or the image cannot be
/// decoded.
#[cfg(feature = "anomaly")]
pub fn score_image_file(
    config: &Config,
    category: &str,
    image_path: &Path,
    threshold: f64,
) -> Result<(AnomalySummary, AnomalyReport, image::DynamicImage)> {
    let detector = AnomalyDetector::load(&config.model_dir, category, config.device.device())?;
    let img = image::open(image_path)?;
    let report = detector.score_image(&img)?;
    let summary = AnomalySummary::new(category, image_path.display().to_string(), report.score, threshold);
    Ok((summary, report, img))
}
