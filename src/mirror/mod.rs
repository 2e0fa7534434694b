// src/mirror/mod.rs

//! Local artifact repository and mirror index
//!
//! Artifacts produced by builds are stored under deterministic filenames
//! in a per-package directory tree and exposed through a package-index
//! compatible HTTP interface (see [`server`]). The in-memory index is
//! guarded by a single-writer mutex: workers publish one artifact at a
//! time while readers always see a consistent snapshot.
//!
//! Publishing is write-then-rename so the HTTP server never serves a
//! partially written file.

pub mod server;

pub use server::MirrorServer;

use crate::error::{Error, Result};
use crate::version::{PackageVersion, VersionConstraint};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Artifact kinds stored in the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Wheel,
    Sdist,
    Metadata,
}

/// A filename parsed back into its package coordinates
#[derive(Debug, Clone)]
pub struct ParsedArtifact {
    pub name: String,
    pub version: PackageVersion,
    pub kind: ArtifactKind,
}

/// The canonical filesystem-safe distribution name: normalized name with
/// `-` replaced by `_`, as used in artifact filenames.
pub fn dist_name(normalized_name: &str) -> String {
    normalized_name.replace('-', "_")
}

/// Parse an artifact filename into (name, version, kind).
///
/// Recognized shapes:
/// - `{dist}-{version}-{build...}.whl`
/// - `{dist}-{version}.tar.gz`
/// - `{dist}-{version}.metadata.json`
pub fn parse_artifact_name(filename: &str) -> Option<ParsedArtifact> {
    let (stem, kind) = if let Some(stem) = filename.strip_suffix(".whl") {
        (stem, ArtifactKind::Wheel)
    } else if let Some(stem) = filename.strip_suffix(".tar.gz") {
        (stem, ArtifactKind::Sdist)
    } else if let Some(stem) = filename.strip_suffix(".metadata.json") {
        (stem, ArtifactKind::Metadata)
    } else {
        return None;
    };

    let mut parts = stem.split('-');
    let raw_name = parts.next()?;
    let raw_version = parts.next()?;
    if raw_name.is_empty() || raw_version.is_empty() {
        return None;
    }
    let version = PackageVersion::parse(raw_version).ok()?;
    Some(ParsedArtifact {
        name: raw_name.replace('_', "-"),
        version,
        kind,
    })
}

/// On-disk store of built artifacts plus the shared mirror index
pub struct LocalRepository {
    root: PathBuf,
    /// package name -> artifact filenames; single writer, snapshot readers
    index: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl LocalRepository {
    /// Open (creating if necessary) a repository rooted at `root` and
    /// build the index from whatever artifacts are already present.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let package = entry.file_name().to_string_lossy().to_string();
            let mut files = BTreeSet::new();
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                if file.file_type()?.is_file() {
                    let name = file.file_name().to_string_lossy().to_string();
                    if !name.ends_with(".tmp") {
                        files.insert(name);
                    }
                }
            }
            if !files.is_empty() {
                index.insert(package, files);
            }
        }

        debug!(
            "opened artifact repository at {} with {} packages",
            root.display(),
            index.len()
        );
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All packages currently present, sorted
    pub fn packages(&self) -> Vec<String> {
        self.index.lock().unwrap().keys().cloned().collect()
    }

    /// Snapshot of the artifact filenames for one package, sorted
    pub fn listing(&self, normalized_name: &str) -> Vec<String> {
        self.index
            .lock()
            .unwrap()
            .get(normalized_name)
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Absolute path of an artifact file
    pub fn artifact_path(&self, normalized_name: &str, filename: &str) -> PathBuf {
        self.root.join(normalized_name).join(filename)
    }

    /// Find a wheel whose filename carries the given build tag
    pub fn find_wheel(
        &self,
        normalized_name: &str,
        version: &PackageVersion,
        build_tag: &str,
    ) -> Option<PathBuf> {
        let needle = format!("-{build_tag}");
        for filename in self.listing(normalized_name) {
            if !filename.ends_with(".whl") {
                continue;
            }
            let Some(parsed) = parse_artifact_name(&filename) else {
                continue;
            };
            if parsed.version == *version && filename.trim_end_matches(".whl").contains(&needle) {
                return Some(self.artifact_path(normalized_name, &filename));
            }
        }
        None
    }

    /// True when the repository already holds a wheel for this package
    /// satisfying the constraint. Used to break build-time dependency
    /// cycles with an already-available artifact.
    pub fn has_satisfying_wheel(
        &self,
        normalized_name: &str,
        constraint: &VersionConstraint,
    ) -> bool {
        self.listing(normalized_name).iter().any(|filename| {
            parse_artifact_name(filename)
                .map(|p| p.kind == ArtifactKind::Wheel && constraint.satisfies(&p.version))
                .unwrap_or(false)
        })
    }

    /// Versions for which an sdist is available, ascending
    pub fn sdist_versions(&self, normalized_name: &str) -> Vec<(PackageVersion, String)> {
        let mut versions: Vec<(PackageVersion, String)> = self
            .listing(normalized_name)
            .into_iter()
            .filter_map(|filename| {
                let parsed = parse_artifact_name(&filename)?;
                (parsed.kind == ArtifactKind::Sdist).then_some((parsed.version, filename))
            })
            .collect();
        versions.sort();
        versions
    }

    /// Publish a file into the repository under its own filename.
    ///
    /// The file is copied to a temporary name in the destination directory
    /// and renamed into place, then the index is updated. Returns the
    /// published path.
    pub fn publish(&self, normalized_name: &str, source: &Path) -> Result<PathBuf> {
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::MirrorIo {
                filename: source.display().to_string(),
                reason: "artifact has no usable filename".to_string(),
            })?
            .to_string();
        self.publish_as(normalized_name, source, &filename)
    }

    /// Publish a file under an explicit target filename
    pub fn publish_as(
        &self,
        normalized_name: &str,
        source: &Path,
        filename: &str,
    ) -> Result<PathBuf> {
        let filename = filename.to_string();
        let package_dir = self.root.join(normalized_name);
        fs::create_dir_all(&package_dir).map_err(|e| Error::MirrorIo {
            filename: filename.clone(),
            reason: e.to_string(),
        })?;

        let tmp_path = package_dir.join(format!("{filename}.tmp"));
        let final_path = package_dir.join(&filename);
        fs::copy(source, &tmp_path).map_err(|e| Error::MirrorIo {
            filename: filename.clone(),
            reason: e.to_string(),
        })?;
        fs::rename(&tmp_path, &final_path).map_err(|e| Error::MirrorIo {
            filename: filename.clone(),
            reason: e.to_string(),
        })?;

        let mut index = self.index.lock().unwrap();
        index
            .entry(normalized_name.to_string())
            .or_default()
            .insert(filename.clone());
        info!("published {} to local mirror", filename);
        Ok(final_path)
    }

    /// Publish raw bytes under an explicit filename (used for metadata
    /// documents). Same write-then-rename discipline as [`publish`].
    ///
    /// [`publish`]: LocalRepository::publish
    pub fn publish_bytes(
        &self,
        normalized_name: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let package_dir = self.root.join(normalized_name);
        fs::create_dir_all(&package_dir).map_err(|e| Error::MirrorIo {
            filename: filename.to_string(),
            reason: e.to_string(),
        })?;
        let tmp_path = package_dir.join(format!("{filename}.tmp"));
        let final_path = package_dir.join(filename);
        fs::write(&tmp_path, bytes).map_err(|e| Error::MirrorIo {
            filename: filename.to_string(),
            reason: e.to_string(),
        })?;
        fs::rename(&tmp_path, &final_path).map_err(|e| Error::MirrorIo {
            filename: filename.to_string(),
            reason: e.to_string(),
        })?;

        let mut index = self.index.lock().unwrap();
        index
            .entry(normalized_name.to_string())
            .or_default()
            .insert(filename.to_string());
        Ok(final_path)
    }
}
