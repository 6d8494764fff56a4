//! Error types for telemd.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemError {
    #[error("Malformed catalog: {0}")]
    Catalog(String),

    #[error("Duplicate point key after joining: {0}")]
    DuplicateKey(String),

    #[error("Unknown point: {0}")]
    UnknownPoint(String),

    #[error("Shape mismatch for {key}: {detail}")]
    ShapeMismatch { key: String, detail: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TelemError {
    /// Configuration errors stop the daemon at startup. Everything else is
    /// contained within the cycle that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TelemError::Catalog(_)
                | TelemError::DuplicateKey(_)
                | TelemError::Config(_)
                | TelemError::Toml(_)
        )
    }
}
