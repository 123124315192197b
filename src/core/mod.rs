//! Core functionality: preprocessing, models and similarity search

/// Convolutional autoencoder anomaly scoring.
#[cfg(feature = "anomaly")]
pub mod autoencoder;
/// Image embeddings from pretrained backbones.
pub mod embeddings;
/// Image to model-input conversions.
pub mod preprocess;
/// Cosine similarity and linear top-k search.
pub mod similarity;
