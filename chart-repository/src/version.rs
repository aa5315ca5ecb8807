//! Semantic version validation for packaged charts.

use crate::{ChartRepositoryError, Result};
use std::cmp::Ordering;

/// Validate that `version` is a well-formed semantic version.
///
/// Accepts `MAJOR.MINOR.PATCH` with optional pre-release and build metadata.
/// Partial versions such as `1.2` are rejected.
pub fn validate_version(version: &str) -> Result<semver::Version> {
    semver::Version::parse(version)
        .map_err(|e| ChartRepositoryError::invalid_version(version, e))
}

/// Order two version strings newest first.
///
/// Strings that do not parse sort after every valid version and fall back to
/// lexical comparison among themselves.
pub(crate) fn newest_first(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => b.cmp(&a),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
