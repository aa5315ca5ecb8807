//! The startup packaging and indexing pass.

use std::fs;

use bytes::Bytes;
use chart_repository::{package_chart, ChartRepositoryError, IndexFile};
use tracing::{debug, info};

use crate::config::RepoConfig;
use crate::error::{RepoError, RepoResult};
use crate::web::CHARTS_PREFIX;

/// Package every chart directory directly under the configured chart dir.
///
/// Non-directory entries are skipped. The first chart that fails to package
/// aborts the whole pass; there is no partial success.
pub fn package_charts(config: &RepoConfig) -> RepoResult<()> {
    let chart_dir = &config.chart_dir;
    let bundle_error = |source: ChartRepositoryError| RepoError::Packaging {
        bundle: chart_dir.display().to_string(),
        source,
    };

    let mut entries = fs::read_dir(chart_dir)
        .and_then(|entries| entries.collect::<Result<Vec<_>, _>>())
        .map_err(|e| bundle_error(ChartRepositoryError::load(chart_dir, e)))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut packaged = 0;
    for entry in entries {
        let is_dir = entry
            .file_type()
            .map_err(|e| bundle_error(ChartRepositoryError::load(entry.path(), e)))?
            .is_dir();
        if !is_dir {
            debug!("Skipping non-directory {:?}", entry.path());
            continue;
        }

        package_chart(entry.path(), &config.repo_dir, &config.version).map_err(|source| {
            RepoError::Packaging {
                bundle: entry.file_name().to_string_lossy().into_owned(),
                source,
            }
        })?;
        packaged += 1;
    }

    info!(
        "Packaged {} charts from {} into {}",
        packaged,
        chart_dir.display(),
        config.repo_dir.display()
    );
    Ok(())
}

/// Base URL that archive download links are rooted at.
pub fn base_url(hostname: &str) -> String {
    format!("https://{}{}", hostname, CHARTS_PREFIX)
}

/// Scan the repository directory and serialize its index document.
pub fn build_index(config: &RepoConfig, hostname: &str) -> RepoResult<Bytes> {
    let base_url = base_url(hostname);
    let index =
        IndexFile::index_directory(&config.repo_dir, &base_url).map_err(RepoError::IndexBuild)?;
    let bytes = index.to_yaml().map_err(RepoError::IndexBuild)?;

    info!(
        "Built index with {} chart versions rooted at {}",
        index.len(),
        base_url
    );
    Ok(Bytes::from(bytes))
}
