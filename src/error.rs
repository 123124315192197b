use serde::Serialize;

/// Main error type for the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding / encoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Embedding store (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// libtorch errors (model loading, inference)
    #[cfg(feature = "tch")]
    #[error("PyTorch error: {0}")]
    Torch(#[from] tch::TchError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation errors (malformed or incompatible data)
    #[error("Validation error: {0}")]
    Validation(String),

    /// File extension is not one of the configured image formats
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Two embeddings that must share a length do not
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Dimension of the store.
        expected: usize,
        /// Dimension of the offending vector.
        found: usize,
    },

    /// The embedding store holds no vectors
    #[error("Embedding database is empty: {0}")]
    EmptyDatabase(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Machine-readable error report, printed by the CLI in `--json` mode
#[derive(Serialize)]
#[derive(Debug)]
pub struct ErrorResponse {
    /// Stable error kind
    pub kind: &'static str,
    /// Error message
    pub message: String,
    /// Optional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Report for a failure that did not come from the library
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: "internal",
            message: message.into(),
            details: None,
        }
    }
}

impl AppError {
    /// Short, stable name of the error variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Image(_) => "image",
            Self::Serialization(_) => "serialization",
            #[cfg(feature = "tch")]
            Self::Torch(_) => "torch",
            Self::Config(_) => "config",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::EmptyDatabase(_) => "empty_database",
            Self::Internal(_) => "internal",
        }
    }

    /// Convert the error to a JSON-serializable report
    pub fn to_json(&self) -> ErrorResponse {
        match self {
            Self::EmptyDatabase(message) => ErrorResponse {
                kind: self.kind(),
                message: message.clone(),
                details: Some("rebuild the database with --rebuild".to_string()),
            },
            _ => ErrorResponse {
                kind: self.kind(),
                message: self.to_string(),
                details: None,
            },
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Extension trait for working with Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    /// Add context to an error if the result is an error
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| AppError::Internal(format!("{}: {}", context, e)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| {
            let context = f();
            AppError::Internal(format!("{}: {}", context, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        let err = AppError::DimensionMismatch { expected: 512, found: 2048 };
        assert_eq!(err.kind(), "dimension_mismatch");
        assert_eq!(err.to_string(), "Dimension mismatch: expected 512, found 2048");
    }

    #[test]
    fn test_empty_database_report_suggests_rebuild() {
        let report = AppError::EmptyDatabase("no embeddings loaded".into()).to_json();
        assert_eq!(report.kind, "empty_database");
        assert!(report.details.unwrap().contains("--rebuild"));
    }

    #[test]
    fn test_every_error_has_a_json_report() {
        let report = AppError::Validation("unsupported embedding database version 2".into()).to_json();
        assert_eq!(report.kind, "validation");
        assert!(report.message.contains("version 2"));
        assert!(report.details.is_none());

        let report = ErrorResponse::internal("invalid configuration");
        assert_eq!(report.kind, "internal");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["message"], "invalid configuration");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_result_ext_adds_context() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = res.context("reading store").unwrap_err();
        assert_eq!(err.to_string(), "Internal error: reading store: boom");
    }
}
