//! Flat, file-backed embedding database.
//!
//! The store is a mapping from image file name to one embedding vector.
//! All vectors in a store share one length. It is written with `bincode`
//! and read back in full; there is no index.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::embeddings::ImageEmbedder;
use crate::error::{AppError, Result, ResultExt};
use crate::utils;

/// Version tag written in front of every store file
pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    model: String,
    entries: Vec<(String, Vec<f32>)>,
}

/// In-memory embedding database
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStore {
    model: String,
    entries: BTreeMap<String, Vec<f32>>,
    skipped_on_load: usize,
}

impl EmbeddingStore {
    /// Create an empty store for embeddings produced by `model`
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Name of the model that produced the stored vectors
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared vector length, `None` while empty
    pub fn dimension(&self) -> Option<usize> {
        self.entries.values().next().map(Vec::len)
    }

    /// Number of corrupt entries dropped by the last [`EmbeddingStore::load`]
    pub fn skipped_on_load(&self) -> usize {
        self.skipped_on_load
    }

    /// Look up one embedding
    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Iterate entries in file name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Insert or replace an embedding.
    ///
    /// Fails if the vector is empty or its length differs from the vectors
    /// already stored.
    pub fn insert(&mut self, name: impl Into<String>, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return Err(AppError::InvalidInput("embedding vector is empty".into()));
        }
        if let Some(expected) = self.dimension() {
            if vector.len() != expected {
                return Err(AppError::DimensionMismatch {
                    expected,
                    found: vector.len(),
                });
            }
        }
        self.entries.insert(name.into(), vector);
        Ok(())
    }

    /// Write the store to `path`, replacing any existing file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            utils::ensure_dir_exists(parent)?;
        }

        let file = StoreFile {
            version: STORE_FORMAT_VERSION,
            model: self.model.clone(),
            entries: self.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };

        let tmp_path = temp_path_for(path);
        let written = write_store_file(&tmp_path, &file).and_then(|()| {
            std::fs::rename(&tmp_path, path).with_context(|| format!("replacing {}", path.display()))
        });
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        log::info!("Saved embedding database: {} embeddings -> {}", self.len(), path.display());
        Ok(())
    }

    /// Read a store from `path`.
    ///
    /// Entries that are empty, contain non-finite values, or whose length
    /// disagrees with the most common length are dropped with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AppError::NotFound(format!("embedding database {}", path.display())));
        }

        // Decoding from a slice bounds every length prefix by the bytes on disk
        let bytes = std::fs::read(path)?;
        let file: StoreFile = bincode::deserialize(&bytes)?;
        if file.version != STORE_FORMAT_VERSION {
            return Err(AppError::Validation(format!(
                "unsupported embedding database version {} (expected {})",
                file.version, STORE_FORMAT_VERSION
            )));
        }

        let dimension = dominant_dimension(&file.entries);
        let mut store = Self::new(file.model);
        for (name, vector) in file.entries {
            let valid = Some(vector.len()) == dimension && vector.iter().all(|v| v.is_finite());
            if !valid {
                log::warn!("Skipping corrupt database entry '{}' (length {})", name, vector.len());
                store.skipped_on_load += 1;
                continue;
            }
            store.entries.insert(name, vector);
        }

        log::info!("Loaded embedding database: {} embeddings", store.len());
        Ok(store)
    }

    /// Embed every supported image in `image_dir`.
    ///
    /// Images that fail to load or embed are skipped. A missing or empty
    /// directory produces an empty store.
    pub fn build<E: ImageEmbedder + ?Sized>(embedder: &E, image_dir: &Path, config: &Config) -> Result<Self> {
        let mut store = Self::new(embedder.model_name());

        if !image_dir.is_dir() {
            log::warn!("Image directory '{}' does not exist", image_dir.display());
            return Ok(store);
        }

        let images = utils::list_images(image_dir, &config.supported_formats)?;
        if images.is_empty() {
            log::warn!("No images found in '{}'", image_dir.display());
            return Ok(store);
        }

        if config.verbose {
            log::info!("Embedding {} images...", images.len());
        }

        let total = images.len();
        for (i, path) in images.iter().enumerate() {
            let name = utils::file_name_of(path);
            if let Err(e) = embedder.embed_path(path).and_then(|v| store.insert(name.clone(), v)) {
                if config.log_errors {
                    log::warn!("Failed to process {}: {}", name, e);
                }
            }
            if config.verbose && config.progress_interval > 0 && (i + 1) % config.progress_interval == 0 {
                log::info!("   Progress: {}/{}", i + 1, total);
            }
        }

        Ok(store)
    }

    /// Load the store from `config.db_path`, or build and save it when
    /// `rebuild` is set, the file is missing, cannot be decoded, or was
    /// produced by another model. A store that ends up empty is an error.
    pub fn load_or_build<E: ImageEmbedder + ?Sized>(embedder: &E, config: &Config, rebuild: bool) -> Result<Self> {
        let db_path = &config.db_path;

        if !rebuild && db_path.exists() {
            if config.verbose {
                log::info!("Loading existing database from {}", db_path.display());
            }
            match Self::load(db_path) {
                Err(e) => log::warn!("Failed to load database {}: {}, rebuilding", db_path.display(), e),
                Ok(store) if store.model() != embedder.model_name() => log::warn!(
                    "Database was built with '{}' but the current model is '{}', rebuilding",
                    store.model(),
                    embedder.model_name()
                ),
                Ok(store) => {
                    if store.is_empty() {
                        return Err(AppError::EmptyDatabase(format!(
                            "no embeddings loaded from {}",
                            db_path.display()
                        )));
                    }
                    if store.skipped_on_load() > 0 {
                        log::info!("Re-saving database without {} corrupt entries", store.skipped_on_load());
                        store.save(db_path)?;
                    }
                    return Ok(store);
                }
            }
        }

        if config.verbose {
            log::info!("Building embedding database from {}", config.image_dir.display());
        }
        let store = Self::build(embedder, &config.image_dir, config)?;
        if store.is_empty() {
            return Err(AppError::EmptyDatabase(format!(
                "no images could be embedded from {}",
                config.image_dir.display()
            )));
        }
        store.save(db_path)?;
        Ok(store)
    }
}

fn write_store_file(path: &Path, file: &StoreFile) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, file)?;
    writer.flush()?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Most frequent non-zero vector length; ties go to the smaller length
fn dominant_dimension(entries: &[(String, Vec<f32>)]) -> Option<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for (_, v) in entries.iter().filter(|(_, v)| !v.is_empty()) {
        *counts.entry(v.len()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(len_a, n_a), (len_b, n_b)| n_a.cmp(n_b).then(len_b.cmp(len_a)))
        .map(|(len, _)| len)
}
