//! Error types for ctxmesh
//!
//! Engine-level failures only. Individual module outages never surface here;
//! see [`crate::client::ModuleError`] for the per-module failure signal.

use thiserror::Error;

/// Result type alias for ctxmesh operations
pub type Result<T> = std::result::Result<T, MeshError>;

/// Error type for ctxmesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected aggregation request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown module identifier or empty module list
    #[error("Registry error: {0}")]
    Registry(#[from] ctxmesh_registry::Error),

    /// Cache store errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl MeshError {
    /// Whether the caller sent a request the engine refuses to run
    pub fn is_rejected_request(&self) -> bool {
        matches!(self, MeshError::InvalidRequest(_) | MeshError::Registry(_))
    }
}
