// src/build/patches.rs

//! Patch discovery and application
//!
//! Patches live in per-package directories under the patches root, keyed
//! by the normalized source-directory name (`{name}-{version}`), and are
//! applied in filename order with the system `patch` tool. A patch that
//! fails to apply is fatal for that package's build but not for the run.

use crate::context::WorkContext;
use crate::error::{Error, Result};
use crate::overrides::PatchSource;
use crate::requirements::Requirement;
use crate::version::PackageVersion;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Default patch source: `{patches_dir}/{directory_name}/*.patch`,
/// lexically sorted
pub struct DirectoryPatchSource;

impl PatchSource for DirectoryPatchSource {
    fn patches(
        &self,
        ctx: &WorkContext,
        req: &Requirement,
        version: &PackageVersion,
    ) -> Result<Vec<PathBuf>> {
        let name = req.normalized_name();
        let dir_name = ctx
            .registry
            .directory_naming_for(&name)
            .directory_name(req, version);
        let patch_dir = ctx.patches_dir.join(&dir_name);
        if !patch_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut patches = Vec::new();
        for entry in std::fs::read_dir(&patch_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "patch") && entry.file_type()?.is_file() {
                patches.push(path);
            }
        }
        patches.sort();
        debug!(
            "{}: {} patches in {}",
            name,
            patches.len(),
            patch_dir.display()
        );
        Ok(patches)
    }
}

/// Apply one patch file with `patch -p1`, content piped via stdin
fn apply_patch(package: &str, source_dir: &Path, patch_path: &Path) -> Result<()> {
    let patch_name = patch_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| patch_path.display().to_string());
    let content = std::fs::read(patch_path)?;

    let mut child = Command::new("patch")
        .arg("-p1")
        .arg("--no-backup-if-mismatch")
        .arg("-d")
        .arg(source_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::PatchFailed {
            package: package.to_string(),
            patch: patch_name.clone(),
            reason: format!("failed to run patch command: {e}"),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&content).map_err(|e| Error::PatchFailed {
            package: package.to_string(),
            patch: patch_name.clone(),
            reason: format!("failed to write patch content: {e}"),
        })?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        return Err(Error::PatchFailed {
            package: package.to_string(),
            patch: patch_name,
            reason: if stderr.is_empty() { stdout } else { stderr },
        });
    }
    info!("{}: applied {}", package, patch_name);
    Ok(())
}

/// Apply a patch set in order; the first failure aborts this package
pub fn apply_patches(package: &str, source_dir: &Path, patches: &[PathBuf]) -> Result<()> {
    for patch in patches {
        apply_patch(package, source_dir, patch)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::test_context;
    use std::fs;

    const GOOD_PATCH: &str = "\
--- a/module.py
+++ b/module.py
@@ -1 +1 @@
-print('old')
+print('new')
";

    #[test]
    fn test_patch_discovery_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let patch_dir = ctx.patches_dir.join("frob-1.0");
        fs::create_dir_all(&patch_dir).unwrap();
        fs::write(patch_dir.join("0002-second.patch"), "b").unwrap();
        fs::write(patch_dir.join("0001-first.patch"), "a").unwrap();
        fs::write(patch_dir.join("notes.txt"), "ignored").unwrap();

        let req = Requirement::parse("frob").unwrap();
        let version = PackageVersion::parse("1.0").unwrap();
        let patches = DirectoryPatchSource.patches(&ctx, &req, &version).unwrap();
        let names: Vec<_> = patches
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["0001-first.patch", "0002-second.patch"]);
    }

    #[test]
    fn test_no_patch_dir_means_no_patches() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let req = Requirement::parse("frob").unwrap();
        let version = PackageVersion::parse("1.0").unwrap();
        assert!(DirectoryPatchSource
            .patches(&ctx, &req, &version)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_apply_patch_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("module.py"), "print('old')\n").unwrap();
        let patch = dir.path().join("0001-change.patch");
        fs::write(&patch, GOOD_PATCH).unwrap();

        apply_patches("frob", &source, &[patch]).unwrap();
        assert_eq!(
            fs::read_to_string(source.join("module.py")).unwrap(),
            "print('new')\n"
        );
    }

    #[test]
    fn test_failing_patch_is_package_local() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("module.py"), "something else entirely\n").unwrap();
        let patch = dir.path().join("0001-change.patch");
        fs::write(&patch, GOOD_PATCH).unwrap();

        let err = apply_patches("frob", &source, &[patch]).unwrap_err();
        assert!(err.is_package_local());
        assert!(matches!(err, Error::PatchFailed { .. }));
    }
}
