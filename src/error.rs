//! Error types for the chart repository server.

use chart_repository::ChartRepositoryError;
use thiserror::Error;

/// Errors that can occur while starting or running the repository server.
#[derive(Error, Debug)]
pub enum RepoError {
    /// Configuration is invalid (port out of range, bad version string, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The externally visible hostname could not be discovered.
    #[error("Hostname discovery failed: {0}")]
    HostnameDiscovery(String),

    /// A chart failed to package; aborts the whole packaging pass.
    #[error("failed to package directory {bundle}: {source}")]
    Packaging {
        /// Directory name of the chart that failed.
        bundle: String,
        /// Underlying load or save failure.
        #[source]
        source: ChartRepositoryError,
    },

    /// The index document could not be built.
    #[error("Index build failed: {0}")]
    IndexBuild(#[source] ChartRepositoryError),

    /// Binding or running the HTTP listener failed.
    #[error("Server error: {0}")]
    Server(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a hostname discovery error.
    pub fn hostname(msg: impl std::fmt::Display) -> Self {
        Self::HostnameDiscovery(msg.to_string())
    }

    /// Create a server error.
    pub fn server(msg: impl std::fmt::Display) -> Self {
        Self::Server(msg.to_string())
    }
}

/// Result type for repository server operations.
pub type RepoResult<T> = Result<T, RepoError>;
