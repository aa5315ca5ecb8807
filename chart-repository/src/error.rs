//! Error types for the chart repository library.

use std::path::{Path, PathBuf};

/// Result type for chart repository operations.
pub type Result<T> = std::result::Result<T, ChartRepositoryError>;

/// Errors that can occur when packaging charts or building indexes.
#[derive(Debug, thiserror::Error)]
pub enum ChartRepositoryError {
    /// The version string is not a valid semantic version.
    #[error("Invalid version '{version}': {message}")]
    InvalidVersion { version: String, message: String },

    /// A chart directory or archive could not be loaded.
    #[error("Failed to load chart at {}: {}", .path.display(), .message)]
    Load { path: PathBuf, message: String },

    /// A chart archive could not be written.
    #[error("Failed to save chart to {}: {}", .path.display(), .message)]
    Save { path: PathBuf, message: String },

    /// The index document could not be built.
    #[error("Failed to build index: {0}")]
    Index(String),

    /// I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ChartRepositoryError {
    /// Create a new invalid version error.
    pub fn invalid_version<S: Into<String>, M: ToString>(version: S, message: M) -> Self {
        Self::InvalidVersion {
            version: version.into(),
            message: message.to_string(),
        }
    }

    /// Create a new load error for the given path.
    pub fn load<P: AsRef<Path>, M: ToString>(path: P, message: M) -> Self {
        Self::Load {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Create a new save error for the given path.
    pub fn save<P: AsRef<Path>, M: ToString>(path: P, message: M) -> Self {
        Self::Save {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Create a new index error.
    pub fn index<M: ToString>(message: M) -> Self {
        Self::Index(message.to_string())
    }
}
