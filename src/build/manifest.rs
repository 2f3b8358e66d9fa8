//! Image manifest parsing
//!
//! A `cairn.toml` manifest describes a slim image declaratively: python
//! version, packages, extra commands and the mounts to attach.

use crate::build::slim::SlimImage;
use crate::error::{CairnError, CairnResult};
use crate::sync::mount::Mount;
use crate::sync::walker::{all_files, extension_predicate};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default manifest file name
pub const MANIFEST_FILE: &str = "cairn.toml";

/// Parsed image manifest from cairn.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageManifest {
    #[serde(default)]
    pub image: ImageSection,

    /// Mounts to attach; none means the default python mount
    #[serde(default, rename = "mount")]
    pub mounts: Vec<MountSpec>,

    /// Directory relative mount paths resolve against
    #[serde(skip)]
    base_dir: PathBuf,
}

/// `[image]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSection {
    /// Falls back to the configured default when absent
    pub python_version: Option<String>,

    #[serde(default)]
    pub packages: Vec<String>,

    #[serde(default)]
    pub commands: Vec<String>,
}

/// One `[[mount]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSpec {
    pub local: PathBuf,
    pub remote: String,

    /// File extensions to include (without the dot); empty includes every file
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl ImageManifest {
    /// Parse a manifest from a TOML file on disk
    pub async fn from_file(path: &Path) -> CairnResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CairnError::io(format!("reading image manifest {}", path.display()), e))?;

        let mut manifest = Self::parse_at(&content, path)?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    /// Parse a manifest from a TOML string; relative mounts resolve against the working directory
    pub fn parse(content: &str) -> CairnResult<Self> {
        Self::parse_at(content, Path::new(MANIFEST_FILE))
    }

    fn parse_at(content: &str, path: &Path) -> CairnResult<Self> {
        let invalid = |reason: String| CairnError::ManifestInvalid {
            path: path.to_path_buf(),
            reason,
        };

        let manifest: Self = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;
        manifest.validate().map_err(invalid)?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(version) = &self.image.python_version {
            if version.trim().is_empty() || version.contains(char::is_whitespace) {
                return Err(format!("invalid python_version {version:?}"));
            }
        }
        if self.image.packages.iter().any(|p| p.trim().is_empty()) {
            return Err("packages must not contain empty names".to_string());
        }
        for mount in &self.mounts {
            if !mount.remote.starts_with('/') {
                return Err(format!("mount remote path {:?} must be absolute", mount.remote));
            }
        }
        Ok(())
    }

    /// Build the described image, hashing every mount with `workers` tasks
    pub fn into_image(self, default_python_version: &str, workers: usize) -> SlimImage {
        let version = self
            .image
            .python_version
            .clone()
            .unwrap_or_else(|| default_python_version.to_string());

        let mounts = if self.mounts.is_empty() {
            vec![Arc::new(Mount::python_workdir().with_workers(workers))]
        } else {
            self.mounts
                .iter()
                .map(|spec| Arc::new(spec.to_mount(&self.base_dir).with_workers(workers)))
                .collect()
        };

        SlimImage::new(version)
            .with_mounts(mounts)
            .compose(&self.image.packages, &self.image.commands)
    }
}

impl MountSpec {
    fn to_mount(&self, base_dir: &Path) -> Mount {
        let local = if self.local.is_absolute() || base_dir.as_os_str().is_empty() {
            self.local.clone()
        } else {
            base_dir.join(&self.local)
        };
        let predicate = if self.extensions.is_empty() {
            all_files()
        } else {
            extension_predicate(&self.extensions)
        };
        Mount::new(local, self.remote.clone(), predicate)
    }
}
