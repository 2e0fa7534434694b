// src/build/mod.rs

//! Build orchestration for one package in one round
//!
//! The orchestrator checks the local repository for a still-valid
//! artifact first, otherwise fetches the source, applies the package's
//! patch set, constructs an isolated build environment and invokes the
//! resolved hooks in sequence: environ mutator, sdist builder, wheel
//! builder, post-build. Successful artifacts are published to the local
//! repository (with bounded retries) so later rounds resolve them from
//! the mirror instead of rebuilding.

pub mod environment;
pub mod patches;

use crate::archive;
use crate::context::WorkContext;
use crate::error::{Error, Result};
use crate::graph::schedule::PlanEntry;
use crate::mirror::dist_name;
use crate::overrides::{SdistBuilder, WheelBuilder};
use crate::requirements::Requirement;
use crate::resolver::ArtifactMetadata;
use crate::version::PackageVersion;
use environment::BuildEnvironment;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Bounded retries for mirror publication failures
const PUBLISH_ATTEMPTS: u32 = 3;

/// How one plan entry ended up satisfied
#[derive(Debug)]
pub struct BuildOutcome {
    /// Final wheel location inside the local repository
    pub wheel: PathBuf,
    /// The artifact was already present with a matching build tag
    pub cached: bool,
    /// The artifact was downloaded prebuilt instead of being built
    pub prebuilt: bool,
}

/// Compute the build tag for a package: a digest over the name, the
/// (locally labelled) version, and the patch set's names and contents.
/// Anything that changes the build output changes the tag.
pub fn compute_build_tag(
    name: &str,
    tagged_version: &PackageVersion,
    patch_files: &[PathBuf],
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(tagged_version.to_string().as_bytes());
    for patch in patch_files {
        let filename = patch
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        hasher.update(b"\0");
        hasher.update(filename.as_bytes());
        hasher.update(b"\0");
        hasher.update(fs::read(patch)?);
    }
    let digest = hex::encode(hasher.finalize());
    Ok(digest[..12].to_string())
}

/// Fetch a source archive (or prebuilt wheel) into the sources cache.
///
/// `location` is an http(s) URL, a `file://` URL, or a plain filesystem
/// path. Downloads are write-then-rename so an interrupted fetch never
/// poisons the cache.
pub fn fetch_source(ctx: &WorkContext, location: &str, package: &str) -> Result<PathBuf> {
    let filename = location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| Error::BuildFailed {
            package: package.to_string(),
            phase: "fetch".to_string(),
            reason: format!("source location '{location}' has no filename"),
        })?;
    let dest = ctx.sources_dir.join(filename);
    if dest.exists() {
        info!("{}: using cached source {}", package, filename);
        return Ok(dest);
    }

    enum Location {
        Remote(String),
        Local(PathBuf),
    }
    let resolved = match url::Url::parse(location) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {
            Location::Remote(location.to_string())
        }
        Ok(parsed) if parsed.scheme() == "file" => {
            Location::Local(parsed.to_file_path().map_err(|_| Error::BuildFailed {
                package: package.to_string(),
                phase: "fetch".to_string(),
                reason: format!("unusable file URL '{location}'"),
            })?)
        }
        _ => Location::Local(PathBuf::from(location)),
    };

    let tmp = ctx.sources_dir.join(format!("{filename}.tmp"));
    match resolved {
        Location::Remote(url) => {
            info!("{}: downloading {}", package, url);
            let response = ctx.client.get(&url).send()?.error_for_status()?;
            let bytes = response.bytes()?;
            fs::write(&tmp, &bytes)?;
        }
        Location::Local(path) => {
            info!("{}: copying source from {}", package, path.display());
            fs::copy(&path, &tmp).map_err(|e| Error::BuildFailed {
                package: package.to_string(),
                phase: "fetch".to_string(),
                reason: format!("cannot copy '{}': {e}", path.display()),
            })?;
        }
    }
    fs::rename(&tmp, &dest)?;
    Ok(dest)
}

/// Default sdist builder: a deterministic tar.gz of the patched source
/// tree, named by the archive-naming hook
pub struct ArchiveSdistBuilder;

impl SdistBuilder for ArchiveSdistBuilder {
    fn build_sdist(
        &self,
        ctx: &WorkContext,
        env: &BuildEnvironment,
        req: &Requirement,
        version: &PackageVersion,
    ) -> Result<PathBuf> {
        let name = req.normalized_name();
        let archive_name = ctx
            .registry
            .archive_naming_for(&name)
            .archive_name(req, version);
        let root_prefix = ctx
            .registry
            .directory_naming_for(&name)
            .directory_name(req, version);
        let dest = env.dist_dir().join(&archive_name);
        archive::create_deterministic_archive(env.source_dir(), &dest, &root_prefix)?;
        info!("{}: built sdist {}", name, archive_name);
        Ok(dest)
    }
}

/// Default wheel builder: run the configured build command (per-package
/// override, global default, or `python -m build`) and pick up the wheel
/// it drops into `$WHEEL_OUTPUT_DIR`.
pub struct CommandWheelBuilder;

impl WheelBuilder for CommandWheelBuilder {
    fn build_wheel(
        &self,
        ctx: &WorkContext,
        env: &BuildEnvironment,
        req: &Requirement,
        version: &PackageVersion,
    ) -> Result<PathBuf> {
        let name = req.normalized_name();
        let script = ctx.settings.build_command(&name);
        let mut cmd = env.shell_command(&script);
        cmd.env("WHEEL_OUTPUT_DIR", env.dist_dir());

        let log_path = ctx.build_log(&name, version);
        env.run_logged(cmd, &name, "wheel", &log_path, ctx.build_timeout)?;

        // the command may name the wheel however the backend likes; any
        // single wheel in the output directory is the artifact
        let mut wheels = Vec::new();
        for entry in fs::read_dir(env.dist_dir())? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "whl") {
                wheels.push(path);
            }
        }
        wheels.sort();
        wheels.pop().ok_or_else(|| Error::BuildFailed {
            package: name.clone(),
            phase: "wheel".to_string(),
            reason: format!(
                "build command produced no wheel, log in {}",
                log_path.display()
            ),
        })
    }
}

/// Publish with bounded retries; repeated mirror I/O failure becomes the
/// package's build failure
fn publish_with_retry<F>(filename: &str, mut attempt: F) -> Result<PathBuf>
where
    F: FnMut() -> Result<PathBuf>,
{
    let mut last = None;
    for n in 1..=PUBLISH_ATTEMPTS {
        match attempt() {
            Ok(path) => return Ok(path),
            Err(err @ Error::MirrorIo { .. }) => {
                warn!("publish attempt {}/{} for {} failed: {}", n, PUBLISH_ATTEMPTS, filename, err);
                last = Some(err);
            }
            Err(other) => return Err(other),
        }
    }
    Err(last.expect("at least one attempt was made"))
}

/// Build (or reuse, or download) the artifact for one plan entry.
///
/// Errors returned here are local to this package; the executor turns
/// them into a `failed` state and skips the package's dependents while
/// siblings continue.
pub fn build_package(ctx: &WorkContext, entry: &PlanEntry) -> Result<BuildOutcome> {
    let name = entry.name.clone();
    let version = PackageVersion::parse(&entry.version)?;
    let tagged_version = version.with_local_label(ctx.local_version_label.as_deref());
    let req = Requirement::parse(&format!("{}=={}", name, version))?;

    // 1. A mirrored artifact with a matching build tag is still valid.
    if let Some(existing) = ctx
        .repository
        .find_wheel(&name, &tagged_version, &entry.build_tag)
    {
        info!("{}: artifact {} already available, skipping build", name, existing.display());
        return Ok(BuildOutcome {
            wheel: existing,
            cached: true,
            prebuilt: false,
        });
    }

    // 2. Pre-built packages are downloaded, never built.
    if entry.pre_built {
        let fetched = fetch_source(ctx, &entry.source_url, &name)?;
        let wheel = publish_with_retry(&entry.key(), || ctx.repository.publish(&name, &fetched))?;
        publish_metadata(ctx, entry, &tagged_version)?;
        info!("{}: registered prebuilt wheel", name);
        return Ok(BuildOutcome {
            wheel,
            cached: false,
            prebuilt: true,
        });
    }

    // 3. Fetch and unpack the source.
    let source_archive = fetch_source(ctx, &entry.source_url, &name)?;
    let dir_name = ctx
        .registry
        .directory_naming_for(&name)
        .directory_name(&req, &version);
    let mut env = BuildEnvironment::new(ctx, &dir_name)?;
    archive::extract_archive(&source_archive, env.source_root())?;
    if let Some(root) = archive::single_root_dir(env.source_root())? {
        env.set_source_dir(root);
    }

    // 4. Patches, in filename order; the first failure stops this package.
    let patch_set = ctx
        .registry
        .patch_source_for(&name)
        .patches(ctx, &req, &version)?;
    patches::apply_patches(&name, env.source_dir(), &patch_set)?;

    // 5. Environment overlay: settings first, then the mirror location,
    //    then whatever the environ-mutator hook decides.
    for (key, value) in ctx.settings.package(&name).env {
        env.insert_environ(key, value);
    }
    if let Some(mirror_url) = ctx.mirror_url() {
        env.insert_environ("PIP_INDEX_URL", mirror_url);
    }
    {
        let mut environ = std::mem::take(env.extra_environ_mut());
        ctx.registry
            .environ_mutator_for(&name)
            .mutate_environ(ctx, &req, &tagged_version, &mut environ)?;
        *env.extra_environ_mut() = environ;
    }

    // 6. Build steps.
    let sdist = ctx
        .registry
        .sdist_builder_for(&name)
        .build_sdist(ctx, &env, &req, &tagged_version)?;
    let wheel = ctx
        .registry
        .wheel_builder_for(&name)
        .build_wheel(ctx, &env, &req, &tagged_version)?;

    // 7. Publish under the deterministic repository filename.
    let wheel_name = format!(
        "{}-{}-{}.whl",
        dist_name(&name),
        tagged_version,
        entry.build_tag
    );
    let published = publish_with_retry(&wheel_name, || {
        ctx.repository.publish_as(&name, &wheel, &wheel_name)
    })?;
    let sdist_name = sdist
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("{}-{}.tar.gz", dist_name(&name), tagged_version));
    publish_with_retry(&sdist_name, || ctx.repository.publish(&name, &sdist))?;
    publish_metadata(ctx, entry, &tagged_version)?;

    // 8. Post-build hook is informational; its failure does not
    //    invalidate the artifact.
    if let Err(err) = ctx.registry.post_build_for(&name).post_build(
        ctx,
        &req,
        &tagged_version,
        Some(&sdist),
        &published,
    ) {
        warn!("{}: post-build hook failed: {}", name, err);
    }

    env.cleanup()?;
    info!("{}: built and published {}", name, wheel_name);
    Ok(BuildOutcome {
        wheel: published,
        cached: false,
        prebuilt: false,
    })
}

/// Publish the dependency metadata document consulted by later
/// resolutions against the mirror
fn publish_metadata(
    ctx: &WorkContext,
    entry: &PlanEntry,
    tagged_version: &PackageVersion,
) -> Result<()> {
    let metadata = ArtifactMetadata {
        install_requires: entry.install_requires.clone(),
        build_requires: entry.build_requires.clone(),
    };
    let filename = format!(
        "{}-{}.metadata.json",
        dist_name(&entry.name),
        tagged_version
    );
    let bytes = serde_json::to_vec_pretty(&metadata)?;
    publish_with_retry(&filename, || {
        ctx.repository.publish_bytes(&entry.name, &filename, &bytes)
    })?;
    Ok(())
}
