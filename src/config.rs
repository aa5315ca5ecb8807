//! Configuration for the repository server.
//!
//! Values come from command-line flags or the environment and are validated
//! once, before anything touches the filesystem.

use std::path::PathBuf;

use crate::error::{RepoError, RepoResult};

/// Default directory to read charts from.
pub const DEFAULT_CHART_DIR: &str = "./charts/";
/// Default directory to write packaged charts to.
pub const DEFAULT_REPO_DIR: &str = "/repo/charts";
/// Default version stamped onto every chart.
pub const DEFAULT_VERSION: &str = "2.5.0";
/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;
/// Lowest port the server may listen on.
pub const MIN_PORT: i64 = 1024;
/// Highest port the server may listen on.
pub const MAX_PORT: i64 = 65535;

/// Command-line and environment arguments for the repository.
#[derive(clap::Args, Debug, Clone)]
pub struct RepoArgs {
    /// Directory of reading charts from.
    #[arg(long, env = "HUB_REPO_CHART_DIR", default_value = DEFAULT_CHART_DIR)]
    pub chart_dir: PathBuf,

    /// Directory of writing packaged charts to.
    #[arg(long, env = "HUB_REPO_REPO_DIR", default_value = DEFAULT_REPO_DIR)]
    pub repo_dir: PathBuf,

    /// Version of packaged charts.
    #[arg(long, env = "HUB_REPO_VERSION", default_value = DEFAULT_VERSION)]
    pub version: String,

    /// The port for the chart repository.
    #[arg(long, env = "HUB_REPO_PORT", default_value_t = DEFAULT_PORT as i64, allow_negative_numbers = true)]
    pub port: i64,

    /// Externally visible host; skips ingress domain discovery when set.
    #[arg(long, env = "HUB_REPO_HOST")]
    pub host: Option<String>,
}

impl Default for RepoArgs {
    fn default() -> Self {
        Self {
            chart_dir: PathBuf::from(DEFAULT_CHART_DIR),
            repo_dir: PathBuf::from(DEFAULT_REPO_DIR),
            version: DEFAULT_VERSION.to_string(),
            port: DEFAULT_PORT as i64,
            host: None,
        }
    }
}

impl RepoArgs {
    /// Validate the arguments and turn them into a [`RepoConfig`].
    pub fn into_config(self) -> RepoResult<RepoConfig> {
        let config = RepoConfig {
            chart_dir: self.chart_dir,
            repo_dir: self.repo_dir,
            version: self.version,
            port: validate_port(self.port)?,
            host: self.host.filter(|h| !h.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Validated, immutable repository configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    /// Directory to read charts from.
    pub chart_dir: PathBuf,
    /// Directory to write packaged charts to.
    pub repo_dir: PathBuf,
    /// Version stamped onto every packaged chart.
    pub version: String,
    /// Port to serve on.
    pub port: u16,
    /// Configured host, if discovery should be skipped.
    pub host: Option<String>,
}

impl RepoConfig {
    /// Create a configuration with default directories and version.
    pub fn new(chart_dir: impl Into<PathBuf>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            chart_dir: chart_dir.into(),
            repo_dir: repo_dir.into(),
            version: DEFAULT_VERSION.to_string(),
            port: DEFAULT_PORT,
            host: None,
        }
    }

    /// Validate the configuration.
    ///
    /// Checks the port range and that the version is a semantic version.
    pub fn validate(&self) -> RepoResult<()> {
        validate_port(self.port as i64)?;

        if self.chart_dir.as_os_str().is_empty() {
            return Err(RepoError::invalid_configuration(
                "chart directory cannot be empty",
            ));
        }

        if self.repo_dir.as_os_str().is_empty() {
            return Err(RepoError::invalid_configuration(
                "repository directory cannot be empty",
            ));
        }

        chart_repository::validate_version(&self.version)
            .map_err(|e| RepoError::invalid_configuration(e.to_string()))?;

        Ok(())
    }
}

fn validate_port(port: i64) -> RepoResult<u16> {
    if !(MIN_PORT..=MAX_PORT).contains(&port) {
        return Err(RepoError::invalid_configuration(format!(
            "port {} for the chart repository should be in the range: {} - {}",
            port, MIN_PORT, MAX_PORT
        )));
    }
    Ok(port as u16)
}
