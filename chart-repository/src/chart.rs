//! Chart directory loading and `Chart.yaml` metadata.

use crate::{ChartRepositoryError, Result, ARCHIVE_EXTENSION, CHART_FILE_NAME};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directories that never belong in a packaged chart.
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Per-chart ignore file, in gitignore syntax.
pub const IGNORE_FILE_NAME: &str = ".helmignore";

/// Default values file.
pub const VALUES_FILE_NAME: &str = "values.yaml";

/// Rule applied to every chart whether or not it has an ignore file.
const DEFAULT_IGNORE: &str = "templates/.?*";

/// Metadata declared in a chart's `Chart.yaml`.
///
/// Fields this library does not know about are kept in `extra` so that
/// rewriting the file does not drop them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart API version (`v1` or `v2`).
    #[serde(default)]
    pub api_version: String,
    /// Chart name.
    #[serde(default)]
    pub name: String,
    /// Chart version.
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,
    /// Supported Kubernetes versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,
    /// One-line description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Chart type (`application` or `library`).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,
    /// Search keywords.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Project home page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    /// Source code locations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    /// Chart dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    /// Chart maintainers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    /// Icon URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Version of the packaged application.
    #[serde(
        default,
        deserialize_with = "optional_scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_version: Option<String>,
    /// Whether the chart is deprecated.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
    /// Free-form annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Fields not covered above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A dependency declared in `Chart.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Dependency chart name.
    pub name: String,
    /// Version constraint.
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,
    /// Repository URL or alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Values path that enables the dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Tags that enable the dependency.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Alternative name for the dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Fields not covered above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A chart maintainer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    /// Maintainer name.
    pub name: String,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Contact URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ChartMetadata {
    /// Parse metadata from the contents of a `Chart.yaml` file.
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Render the metadata back to `Chart.yaml` form.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check the fields every chart must declare.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.api_version.trim().is_empty() {
            return Err("apiVersion is required".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        if self.name.contains('/') || self.name.contains('\\') || self.name.contains("..") {
            return Err(format!("name '{}' must not contain path elements", self.name));
        }
        if self.version.trim().is_empty() {
            return Err("version is required".to_string());
        }
        Ok(())
    }

    /// File name of the archive this chart packages into.
    pub fn archive_file_name(&self) -> String {
        format!("{}-{}.{}", self.name, self.version, ARCHIVE_EXTENSION)
    }
}

/// A chart loaded from a directory.
#[derive(Debug, Clone)]
pub struct Chart {
    /// Parsed `Chart.yaml`.
    pub metadata: ChartMetadata,
    /// Chart root directory.
    pub root: PathBuf,
    /// Every other regular file in the chart, relative to `root`, in
    /// sorted order.
    pub files: Vec<PathBuf>,
}

impl Chart {
    /// Load a chart from its source directory.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let root = dir.as_ref();
        if !root.is_dir() {
            return Err(ChartRepositoryError::load(root, "not a directory"));
        }

        let chart_file = root.join(CHART_FILE_NAME);
        let content = fs::read_to_string(&chart_file).map_err(|e| {
            ChartRepositoryError::load(root, format!("unable to read {}: {}", CHART_FILE_NAME, e))
        })?;
        let metadata = ChartMetadata::from_yaml(&content).map_err(|e| {
            ChartRepositoryError::load(root, format!("invalid {}: {}", CHART_FILE_NAME, e))
        })?;
        metadata
            .validate()
            .map_err(|e| ChartRepositoryError::load(root, e))?;

        let files = collect_files(root)?;
        if files.iter().any(|f| f == Path::new(VALUES_FILE_NAME)) {
            check_values(root)?;
        }
        debug!(
            "Loaded chart {} with {} files from {:?}",
            metadata.name,
            files.len(),
            root
        );

        Ok(Self {
            metadata,
            root: root.to_path_buf(),
            files,
        })
    }

    /// Chart name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Currently declared chart version.
    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Overwrite the declared version.
    pub fn set_version<S: Into<String>>(&mut self, version: S) {
        self.metadata.version = version.into();
    }
}

/// Load the ignore rules for a chart: the default rule plus `.helmignore`.
fn ignore_rules(root: &Path) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    builder
        .add_line(None, DEFAULT_IGNORE)
        .map_err(|e| ChartRepositoryError::load(root, e))?;

    let ignore_file = root.join(IGNORE_FILE_NAME);
    if ignore_file.is_file() {
        if let Some(e) = builder.add(&ignore_file) {
            return Err(ChartRepositoryError::load(
                root,
                format!("invalid {}: {}", IGNORE_FILE_NAME, e),
            ));
        }
    }

    builder
        .build()
        .map_err(|e| ChartRepositoryError::load(root, e))
}

fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let rules = ignore_rules(root)?;
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().is_dir();
            if is_dir && SKIPPED_DIRS.iter().any(|d| entry.file_name() == *d) {
                return false;
            }
            if rules.matched(entry.path(), is_dir).is_ignore() {
                debug!("Ignoring {:?}", entry.path());
                return false;
            }
            true
        });

    for entry in walker {
        let entry = entry.map_err(|e| ChartRepositoryError::load(root, e))?;
        if !entry.file_type().is_file() {
            if entry.file_type().is_symlink() {
                debug!("Skipping symlink {:?}", entry.path());
            }
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ChartRepositoryError::load(root, e))?
            .to_path_buf();
        if relative == Path::new(CHART_FILE_NAME) {
            continue;
        }
        files.push(relative);
    }

    Ok(files)
}

/// Check that `values.yaml` parses to a mapping.
fn check_values(root: &Path) -> Result<()> {
    let content = fs::read_to_string(root.join(VALUES_FILE_NAME)).map_err(|e| {
        ChartRepositoryError::load(root, format!("unable to read {}: {}", VALUES_FILE_NAME, e))
    })?;
    match serde_yaml::from_str::<serde_yaml::Value>(&content) {
        Ok(serde_yaml::Value::Mapping(_)) | Ok(serde_yaml::Value::Null) => Ok(()),
        Ok(other) => {
            warn!("{:?} holds {:?} instead of a mapping", root.join(VALUES_FILE_NAME), other);
            Err(ChartRepositoryError::load(
                root,
                format!("{} must be a mapping", VALUES_FILE_NAME),
            ))
        }
        Err(e) => Err(ChartRepositoryError::load(
            root,
            format!("invalid {}: {}", VALUES_FILE_NAME, e),
        )),
    }
}

/// Accept unquoted numbers where Helm expects a string (`version: 1.0`).
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_scalar_string(deserializer)?.unwrap_or_default())
}

fn optional_scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Null => Ok(None),
        serde_yaml::Value::String(s) => Ok(Some(s)),
        serde_yaml::Value::Number(n) => Ok(Some(n.to_string())),
        serde_yaml::Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(D::Error::custom(format!(
            "expected a scalar, found {:?}",
            other
        ))),
    }
}
