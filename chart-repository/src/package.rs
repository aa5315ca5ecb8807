//! Packaging charts into versioned archives.

use crate::archive::write_chart_archive;
use crate::chart::Chart;
use crate::version::validate_version;
use crate::{ChartRepositoryError, Result};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Package the chart in `src` into `dst`, stamped with `version`.
///
/// The declared version in the chart's `Chart.yaml` is replaced by `version`.
/// Returns the path of the written archive.
pub fn package_chart<P: AsRef<Path>, Q: AsRef<Path>>(
    src: P,
    dst: Q,
    version: &str,
) -> Result<PathBuf> {
    validate_version(version)?;

    let mut chart = Chart::load_dir(src)?;
    chart.set_version(version);

    let path = save(&chart, dst)?;
    info!("Packaged chart as {}", path.display());
    Ok(path)
}

/// Write `chart` into `dst` as `<name>-<version>.tgz`.
///
/// The archive is written to a temporary file in `dst` and renamed into
/// place, so a failed write never leaves a partial archive behind under the
/// final name.
pub fn save<P: AsRef<Path>>(chart: &Chart, dst: P) -> Result<PathBuf> {
    let dst = dst.as_ref();
    let target = dst.join(chart.metadata.archive_file_name());

    fs::create_dir_all(dst).map_err(|e| ChartRepositoryError::save(dst, e))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(dst)
        .map_err(|e| ChartRepositoryError::save(&target, e))?;

    {
        let writer = write_chart_archive(chart, BufWriter::new(temp.as_file_mut()))
            .map_err(|e| ChartRepositoryError::save(&target, e))?;
        writer
            .into_inner()
            .map_err(|e| ChartRepositoryError::save(&target, e.into_error()))?
            .flush()
            .map_err(|e| ChartRepositoryError::save(&target, e))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| ChartRepositoryError::save(&target, e))?;

    temp.persist(&target)
        .map_err(|e| ChartRepositoryError::save(&target, e.error))?;

    Ok(target)
}
