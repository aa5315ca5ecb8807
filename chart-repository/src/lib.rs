//! # Chart Repository Library
//!
//! A Rust library for turning Helm chart directories into versioned `.tgz`
//! archives and for generating the `index.yaml` document that Helm clients
//! use to discover those archives.
//!
//! ## Features
//!
//! - Load chart directories and their `Chart.yaml` metadata
//! - Stamp a single semantic version onto every packaged chart
//! - Write gzip-compressed tar archives with atomic rename semantics
//! - SHA-256 digests for every archive
//! - Build and serialize repository index documents
//!
//! ## Example
//!
//! ```rust,no_run
//! use chart_repository::{package_chart, validate_version, IndexFile};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! validate_version("2.5.0")?;
//! package_chart("charts/nginx", "/repo/charts", "2.5.0")?;
//!
//! let index = IndexFile::index_directory("/repo/charts", "https://example.com/charts")?;
//! let yaml = index.to_yaml()?;
//! # let _ = yaml;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod chart;
pub mod error;
pub mod hash;
pub mod index;
pub mod package;
pub mod version;

pub use chart::{Chart, ChartMetadata, Dependency, Maintainer};
pub use error::{ChartRepositoryError, Result};
pub use index::{ChartVersion, IndexFile};
pub use package::package_chart;
pub use version::validate_version;

/// File extension of packaged chart archives.
pub const ARCHIVE_EXTENSION: &str = "tgz";

/// Name of the metadata file at the root of every chart.
pub const CHART_FILE_NAME: &str = "Chart.yaml";

/// API version written at the top of every index document.
pub const INDEX_API_VERSION: &str = "v1";
