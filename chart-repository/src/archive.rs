//! Gzip-compressed tar encoding of charts.

use crate::chart::{Chart, ChartMetadata};
use crate::{ChartRepositoryError, Result, CHART_FILE_NAME};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tar::{EntryType, Header};

const FILE_MODE: u32 = 0o644;

fn file_header(size: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(FILE_MODE);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(mtime);
    header.set_size(size);
    header
}

/// Encode a chart as a `.tgz` stream into `writer`.
///
/// Entries are rooted at `<name>/` and `Chart.yaml` is always written first,
/// rendered from the in-memory metadata rather than copied from disk.
pub fn write_chart_archive<W: Write>(chart: &Chart, writer: W) -> Result<W> {
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;
    let prefix = Path::new(chart.name());
    let mut builder = tar::Builder::new(GzEncoder::new(writer, flate2::Compression::default()));

    let chart_yaml = chart.metadata.to_yaml()?;
    let mut header = file_header(chart_yaml.len() as u64, mtime);
    builder.append_data(
        &mut header,
        prefix.join(CHART_FILE_NAME),
        chart_yaml.as_bytes(),
    )?;

    for file in &chart.files {
        let source = File::open(chart.root.join(file))?;
        let size = source.metadata()?.len();
        let mut header = file_header(size, mtime);
        builder.append_data(&mut header, prefix.join(file), BufReader::new(source))?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Read the `Chart.yaml` metadata out of a `.tgz` stream.
pub fn read_chart_metadata<R: Read>(reader: R) -> Result<ChartMetadata> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let mut components = path.components();
        let (Some(_), Some(file), None) = (components.next(), components.next(), components.next())
        else {
            continue;
        };
        if file.as_os_str() != CHART_FILE_NAME {
            continue;
        }

        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        return Ok(ChartMetadata::from_yaml(&content)?);
    }

    Err(ChartRepositoryError::index(format!(
        "archive does not contain a {}",
        CHART_FILE_NAME
    )))
}

/// Read the `Chart.yaml` metadata out of a `.tgz` file on disk.
pub fn read_chart_metadata_from_path<P: AsRef<Path>>(path: P) -> Result<ChartMetadata> {
    let path = path.as_ref();
    let file = File::open(path)?;
    read_chart_metadata(BufReader::new(file)).map_err(|e| {
        ChartRepositoryError::load(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample_chart(dir: &Path) -> Chart {
        fs::create_dir_all(dir.join("templates")).unwrap();
        fs::write(
            dir.join(CHART_FILE_NAME),
            "apiVersion: v2\nname: demo\nversion: 0.0.1\n",
        )
        .unwrap();
        fs::write(dir.join("values.yaml"), "image: demo\n").unwrap();
        fs::write(dir.join("templates/service.yaml"), "kind: Service\n").unwrap();
        Chart::load_dir(dir).unwrap()
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_archive_layout() {
        let temp_dir = TempDir::new().unwrap();
        let chart = sample_chart(temp_dir.path());

        let bytes = write_chart_archive(&chart, Vec::new()).unwrap();
        assert_eq!(
            entry_names(&bytes),
            vec![
                "demo/Chart.yaml",
                "demo/templates/service.yaml",
                "demo/values.yaml",
            ]
        );
    }

    #[test]
    fn test_archive_carries_rewritten_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let mut chart = sample_chart(temp_dir.path());
        chart.set_version("3.1.4");

        let bytes = write_chart_archive(&chart, Vec::new()).unwrap();
        let metadata = read_chart_metadata(&bytes[..]).unwrap();
        assert_eq!(metadata.name, "demo");
        assert_eq!(metadata.version, "3.1.4");

        // The source directory is never touched.
        let on_disk = fs::read_to_string(temp_dir.path().join(CHART_FILE_NAME)).unwrap();
        assert!(on_disk.contains("version: 0.0.1"));
    }

    #[test]
    fn test_read_metadata_from_non_chart_archive() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), flate2::Compression::default()));
        let data = b"just a file";
        let mut header = file_header(data.len() as u64, 0);
        builder.append_data(&mut header, "README", &data[..]).unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        assert!(read_chart_metadata(&bytes[..]).is_err());
    }

    #[test]
    fn test_read_metadata_from_garbage() {
        assert!(read_chart_metadata(&b"definitely not gzip"[..]).is_err());
    }
}
