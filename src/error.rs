//! Quantizer error types

use thiserror::Error;

/// Errors raised while building or running the QAT conversion pipeline
#[derive(Debug, Error)]
pub enum QuantizerError {
    #[error("Unsupported {tensor} quantization mode: {mode} (supported: {supported})")]
    UnsupportedMode {
        tensor: &'static str,
        mode: String,
        supported: String,
    },

    #[error("Invalid quantization config: {0}")]
    InvalidConfig(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Unknown tracer: {0}")]
    UnknownTracer(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for quantizer operations
pub type Result<T> = std::result::Result<T, QuantizerError>;
