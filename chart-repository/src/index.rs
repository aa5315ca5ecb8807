//! Repository index (`index.yaml`) generation.

use crate::archive::read_chart_metadata_from_path;
use crate::chart::ChartMetadata;
use crate::hash::digest_file;
use crate::version::newest_first;
use crate::{ChartRepositoryError, Result, ARCHIVE_EXTENSION, INDEX_API_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// One packaged chart version as listed in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartVersion {
    /// Metadata from the archive's `Chart.yaml`.
    #[serde(flatten)]
    pub metadata: ChartMetadata,
    /// Download locations for the archive.
    #[serde(default)]
    pub urls: Vec<String>,
    /// When the archive was created.
    pub created: DateTime<Utc>,
    /// Hex-encoded SHA-256 digest of the archive.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

/// A chart repository index document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    /// Index format version.
    pub api_version: String,
    /// Chart versions keyed by chart name.
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
    /// When the index was generated.
    pub generated: DateTime<Utc>,
}

impl IndexFile {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self {
            api_version: INDEX_API_VERSION.to_string(),
            entries: BTreeMap::new(),
            generated: Utc::now(),
        }
    }

    /// Add an archive to the index.
    ///
    /// The download URL is `base_url/filename`.
    pub fn add(
        &mut self,
        metadata: ChartMetadata,
        filename: &str,
        base_url: &str,
        digest: String,
        created: DateTime<Utc>,
    ) {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), filename);
        self.entries
            .entry(metadata.name.clone())
            .or_default()
            .push(ChartVersion {
                metadata,
                urls: vec![url],
                created,
                digest,
            });
    }

    /// Sort every chart's versions newest first.
    pub fn sort_entries(&mut self) {
        for versions in self.entries.values_mut() {
            versions.sort_by(|a, b| newest_first(&a.metadata.version, &b.metadata.version));
        }
    }

    /// Look up a specific chart version.
    pub fn get(&self, name: &str, version: &str) -> Option<&ChartVersion> {
        self.entries
            .get(name)?
            .iter()
            .find(|v| v.metadata.version == version)
    }

    /// Total number of chart versions in the index.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Check whether the index lists no charts at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every download URL in the index.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries
            .values()
            .flatten()
            .flat_map(|v| v.urls.iter().map(String::as_str))
    }

    /// Build an index from the archives directly inside `dir`.
    ///
    /// Only regular `*.tgz` files are considered; subdirectories and other
    /// files are ignored. Each archive is opened to read its metadata and
    /// digested so clients can verify downloads.
    pub fn index_directory<P: AsRef<Path>>(dir: P, base_url: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let mut archives = Vec::new();

        let read_dir = fs::read_dir(dir).map_err(|e| {
            ChartRepositoryError::index(format!("unable to read {}: {}", dir.display(), e))
        })?;
        for entry in read_dir {
            let entry = entry.map_err(|e| ChartRepositoryError::index(e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| ChartRepositoryError::index(e))?;
            if !file_type.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXTENSION)
            {
                continue;
            }
            archives.push(path);
        }
        archives.sort();

        let mut index = Self::new();
        for path in archives {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    ChartRepositoryError::index(format!("non UTF-8 file name {}", path.display()))
                })?
                .to_string();

            let metadata = match read_chart_metadata_from_path(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: {}", filename, e);
                    continue;
                }
            };
            if let Err(e) = metadata.validate() {
                warn!("Skipping {}: {}", filename, e);
                continue;
            }
            let (_, digest) = digest_file(&path).map_err(|e| ChartRepositoryError::index(e))?;
            let created = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            debug!("Indexing {} {} from {}", metadata.name, metadata.version, filename);
            index.add(metadata, &filename, base_url, digest, created);
        }

        index.sort_entries();
        Ok(index)
    }

    /// Serialize the index to its YAML wire form.
    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| ChartRepositoryError::index(e))
    }

    /// Parse an index from its YAML wire form.
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(data)?)
    }
}

impl Default for IndexFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(name: &str, version: &str) -> ChartMetadata {
        ChartMetadata {
            api_version: "v2".to_string(),
            name: name.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_builds_urls() {
        let mut index = IndexFile::new();
        index.add(
            metadata("a", "1.0.0"),
            "a-1.0.0.tgz",
            "https://host/charts/",
            "abc".to_string(),
            Utc::now(),
        );

        let entry = index.get("a", "1.0.0").unwrap();
        assert_eq!(entry.urls, vec!["https://host/charts/a-1.0.0.tgz"]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_sort_entries_newest_first() {
        let mut index = IndexFile::new();
        for version in ["1.0.0", "1.10.0", "1.2.0"] {
            index.add(
                metadata("a", version),
                &format!("a-{}.tgz", version),
                "https://host/charts",
                String::new(),
                Utc::now(),
            );
        }
        index.sort_entries();

        let versions: Vec<_> = index.entries["a"]
            .iter()
            .map(|v| v.metadata.version.as_str())
            .collect();
        assert_eq!(versions, vec!["1.10.0", "1.2.0", "1.0.0"]);
    }

    #[test]
    fn test_yaml_shape() {
        let mut index = IndexFile::new();
        index.add(
            metadata("a", "1.0.0"),
            "a-1.0.0.tgz",
            "https://host/charts",
            "abc".to_string(),
            Utc::now(),
        );

        let yaml = String::from_utf8(index.to_yaml().unwrap()).unwrap();
        assert!(yaml.starts_with("apiVersion: v1\n"));
        assert!(yaml.contains("entries:"));
        assert!(yaml.contains("generated:"));
        assert!(yaml.contains("https://host/charts/a-1.0.0.tgz"));
        assert!(yaml.contains("digest: abc"));

        let parsed = IndexFile::from_yaml(yaml.as_bytes()).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_index_missing_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let err = IndexFile::index_directory(temp_dir.path().join("missing"), "https://host")
            .unwrap_err();
        assert!(matches!(err, ChartRepositoryError::Index(_)));
    }
}
