use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Prefix of every environment variable read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "IMAGESCOUT_";

/// Which pretrained backbone produces embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// CLIP ViT-B/32 image encoder
    Clip,
    /// ResNet-50 with the classification head removed
    Resnet,
}

impl ModelKind {
    /// Lowercase identifier, as stored in the embedding database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clip => "clip",
            Self::Resnet => "resnet",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clip" => Ok(Self::Clip),
            "resnet" => Ok(Self::Resnet),
            other => Err(AppError::Config(format!("Unsupported model: {}", other))),
        }
    }
}

/// Where inference runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA when available, CPU otherwise
    #[default]
    Auto,
    /// Always CPU
    Cpu,
    /// First CUDA device
    Cuda,
}

impl DevicePreference {
    /// Resolve to a libtorch device
    #[cfg(feature = "tch")]
    pub fn device(&self) -> tch::Device {
        match self {
            Self::Auto => tch::Device::cuda_if_available(),
            Self::Cpu => tch::Device::Cpu,
            Self::Cuda => tch::Device::Cuda(0),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(AppError::Config(format!("Unsupported device: {}", other))),
        }
    }
}

/// Configuration for the application
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Embedding backbone
    pub model: ModelKind,
    /// Inference device
    pub device: DevicePreference,
    /// Root data directory
    pub data_dir: PathBuf,
    /// Directory scanned when the embedding database is built
    pub image_dir: PathBuf,
    /// Embedding database file
    pub db_path: PathBuf,
    /// Directory holding model weights (backbones and autoencoders)
    pub model_dir: PathBuf,
    /// TorchScript export of the CLIP image encoder
    pub clip_model_path: PathBuf,
    /// VarStore weights for the headless ResNet-50
    pub resnet_weights_path: PathBuf,
    /// Number of results returned when none is requested
    pub default_top_k: usize,
    /// Upper bound applied to any requested number of results
    pub max_top_k: usize,
    /// Accepted image file extensions, lowercase, without the dot
    pub supported_formats: Vec<String>,
    /// Size of each panel in a saved comparison image (width, height)
    pub thumbnail_size: (u32, u32),
    /// Log build progress every N images
    pub progress_interval: usize,
    /// Extra progress and configuration output
    pub verbose: bool,
    /// Report per-item failures that are skipped
    pub log_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        let model_dir = PathBuf::from("models");
        Self {
            model: ModelKind::Clip,
            device: DevicePreference::Auto,
            image_dir: data_dir.join("images"),
            db_path: data_dir.join("embeddings_db.bin"),
            data_dir,
            clip_model_path: model_dir.join("clip_vit_b32_visual.pt"),
            resnet_weights_path: model_dir.join("resnet50.ot"),
            model_dir,
            default_top_k: 5,
            max_top_k: 10,
            supported_formats: ["jpg", "jpeg", "png", "jfif", "bmp", "tiff", "webp"]
                .into_iter()
                .map(String::from)
                .collect(),
            thumbnail_size: (224, 224),
            progress_interval: 10,
            verbose: true,
            log_errors: true,
        }
    }
}

impl Config {
    /// Build a configuration from defaults overridden by `IMAGESCOUT_*`
    /// environment variables (a `.env` file is honoured).
    ///
    /// Setting `IMAGESCOUT_DATA_DIR` also moves the image directory and the
    /// database file unless those are set explicitly.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Some(model) = env_var("MODEL") {
            config.model = model.parse()?;
        }
        if let Some(device) = env_var("DEVICE") {
            config.device = device.parse()?;
        }
        if let Some(dir) = env_var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.image_dir = config.data_dir.join("images");
            config.db_path = config.data_dir.join("embeddings_db.bin");
        }
        if let Some(dir) = env_var("IMAGE_DIR") {
            config.image_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(dir) = env_var("MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
            config.clip_model_path = config.model_dir.join("clip_vit_b32_visual.pt");
            config.resnet_weights_path = config.model_dir.join("resnet50.ot");
        }
        if let Some(path) = env_var("CLIP_MODEL") {
            config.clip_model_path = PathBuf::from(path);
        }
        if let Some(path) = env_var("RESNET_WEIGHTS") {
            config.resnet_weights_path = PathBuf::from(path);
        }
        if let Some(k) = env_var("TOP_K") {
            config.default_top_k = parse_number("TOP_K", &k)?;
        }
        if let Some(k) = env_var("MAX_TOP_K") {
            config.max_top_k = parse_number("MAX_TOP_K", &k)?;
        }
        if let Some(n) = env_var("PROGRESS_INTERVAL") {
            config.progress_interval = parse_number("PROGRESS_INTERVAL", &n)?;
        }
        if let Some(v) = env_var("VERBOSE") {
            config.verbose = parse_flag(&v);
        }
        if let Some(v) = env_var("LOG_ERRORS") {
            config.log_errors = parse_flag(&v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.max_top_k == 0 {
            return Err(AppError::Config("max_top_k must be at least 1".into()));
        }
        if self.supported_formats.is_empty() {
            return Err(AppError::Config("no supported image formats configured".into()));
        }
        Ok(())
    }

    /// Clamp a requested result count to `max_top_k`
    pub fn effective_top_k(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_top_k).min(self.max_top_k)
    }

    /// Whether `path` carries one of the supported image extensions
    pub fn is_supported_image(&self, path: &Path) -> bool {
        crate::utils::has_allowed_extension(path, &self.supported_formats)
    }

    /// Create the data and image directories if they are missing
    pub fn ensure_directories(&self) -> Result<()> {
        crate::utils::ensure_dir_exists(&self.data_dir)?;
        crate::utils::ensure_dir_exists(&self.image_dir)?;
        Ok(())
    }

    /// Log the effective configuration at info level
    pub fn log_summary(&self) {
        log::info!("Configuration ({} {})", crate::built_info::PKG_NAME, crate::built_info::PKG_VERSION);
        log::info!("   Model: {}", self.model.as_str().to_uppercase());
        log::info!("   Device: {:?}", self.device);
        log::info!("   Image Dir: {}", self.image_dir.display());
        log::info!("   Database: {}", self.db_path.display());
        log::info!("   Supported Formats: {}", self.supported_formats.join(", "));
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn parse_number(name: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        AppError::Config(format!("{}{} must be a non-negative integer, got '{}'", ENV_PREFIX, name, value))
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with(ENV_PREFIX) {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("CLIP".parse::<ModelKind>().unwrap(), ModelKind::Clip);
        assert_eq!(" resnet ".parse::<ModelKind>().unwrap(), ModelKind::Resnet);
        assert!("vgg".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_effective_top_k_is_capped() {
        let config = Config::default();
        assert_eq!(config.effective_top_k(None), 5);
        assert_eq!(config.effective_top_k(Some(3)), 3);
        assert_eq!(config.effective_top_k(Some(50)), 10);
    }

    #[test]
    fn test_supported_image_is_case_insensitive() {
        let config = Config::default();
        assert!(config.is_supported_image(Path::new("cat.JPG")));
        assert!(config.is_supported_image(Path::new("dir/dog.jfif")));
        assert!(!config.is_supported_image(Path::new("notes.txt")));
        assert!(!config.is_supported_image(Path::new("jpg")));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("IMAGESCOUT_MODEL", "resnet");
        std::env::set_var("IMAGESCOUT_DATA_DIR", "/tmp/scout");
        std::env::set_var("IMAGESCOUT_TOP_K", "7");

        let config = Config::from_env().unwrap();
        assert_eq!(config.model, ModelKind::Resnet);
        assert_eq!(config.image_dir, PathBuf::from("/tmp/scout/images"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/scout/embeddings_db.bin"));
        assert_eq!(config.default_top_k, 7);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_numbers() {
        clear_env();
        std::env::set_var("IMAGESCOUT_MAX_TOP_K", "many");
        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));
        clear_env();
    }

    #[test]
    fn test_ensure_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: tmp.path().join("data"),
            image_dir: tmp.path().join("data/images"),
            ..Config::default()
        };
        config.ensure_directories().unwrap();
        assert!(config.image_dir.is_dir());
    }
}
