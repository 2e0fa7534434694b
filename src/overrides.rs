// src/overrides.rs

//! Per-package override dispatch
//!
//! Packages with unusual build procedures register an [`OverrideBundle`]
//! exposing one optional hook per kind: resolver provider, sdist builder,
//! wheel builder, post-build, environ mutator, archive naming, directory
//! naming, patch source. The registry is populated once at process start
//! and is read-only afterwards; every lookup falls back to the built-in
//! default for that hook kind, so no bundle has to implement everything.
//!
//! A malformed registration (empty name, non-normalized name, duplicate)
//! is fatal at startup, before any resolution begins.

use crate::build::environment::BuildEnvironment;
use crate::build::patches::DirectoryPatchSource;
use crate::build::{ArchiveSdistBuilder, CommandWheelBuilder};
use crate::context::WorkContext;
use crate::error::{Error, Result};
use crate::mirror::dist_name;
use crate::requirements::{normalize_name, Requirement};
use crate::resolver::{IndexResolver, ResolverProvider};
use crate::version::PackageVersion;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Build an sdist archive from the prepared (patched) source tree
pub trait SdistBuilder: Send + Sync {
    fn build_sdist(
        &self,
        ctx: &WorkContext,
        env: &BuildEnvironment,
        req: &Requirement,
        version: &PackageVersion,
    ) -> Result<PathBuf>;
}

/// Build the wheel artifact for a package
pub trait WheelBuilder: Send + Sync {
    fn build_wheel(
        &self,
        ctx: &WorkContext,
        env: &BuildEnvironment,
        req: &Requirement,
        version: &PackageVersion,
    ) -> Result<PathBuf>;
}

/// Informational hook invoked after a successful build; failures are
/// logged but do not invalidate the artifact
pub trait PostBuildHook: Send + Sync {
    fn post_build(
        &self,
        ctx: &WorkContext,
        req: &Requirement,
        version: &PackageVersion,
        sdist: Option<&Path>,
        wheel: &Path,
    ) -> Result<()>;
}

/// Mutate the environment overlay passed to every subsequent subprocess
/// invocation for this package
pub trait EnvironMutator: Send + Sync {
    fn mutate_environ(
        &self,
        ctx: &WorkContext,
        req: &Requirement,
        version: &PackageVersion,
        environ: &mut BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Name of the sdist archive produced for a package
pub trait ArchiveNaming: Send + Sync {
    fn archive_name(&self, req: &Requirement, version: &PackageVersion) -> String;
}

/// Name of the unpacked source directory (also keys the patch set)
pub trait DirectoryNaming: Send + Sync {
    fn directory_name(&self, req: &Requirement, version: &PackageVersion) -> String;
}

/// The ordered patch set for a package build
pub trait PatchSource: Send + Sync {
    fn patches(
        &self,
        ctx: &WorkContext,
        req: &Requirement,
        version: &PackageVersion,
    ) -> Result<Vec<PathBuf>>;
}

/// A bundle of optional hook implementations for exactly one package.
///
/// Every accessor defaults to `None`; the registry substitutes the
/// built-in default for each kind a bundle does not provide.
pub trait OverrideBundle: Send + Sync {
    /// The normalized package name this bundle applies to
    fn package(&self) -> &str;

    fn resolver(&self) -> Option<&dyn ResolverProvider> {
        None
    }
    fn sdist_builder(&self) -> Option<&dyn SdistBuilder> {
        None
    }
    fn wheel_builder(&self) -> Option<&dyn WheelBuilder> {
        None
    }
    fn post_build(&self) -> Option<&dyn PostBuildHook> {
        None
    }
    fn environ_mutator(&self) -> Option<&dyn EnvironMutator> {
        None
    }
    fn archive_naming(&self) -> Option<&dyn ArchiveNaming> {
        None
    }
    fn directory_naming(&self) -> Option<&dyn DirectoryNaming> {
        None
    }
    fn patch_source(&self) -> Option<&dyn PatchSource> {
        None
    }
}

/// Post-build hook that does nothing
struct NoopPostBuild;

impl PostBuildHook for NoopPostBuild {
    fn post_build(
        &self,
        _ctx: &WorkContext,
        req: &Requirement,
        version: &PackageVersion,
        _sdist: Option<&Path>,
        wheel: &Path,
    ) -> Result<()> {
        debug!("{}=={}: built {}", req.name, version, wheel.display());
        Ok(())
    }
}

/// Environ mutator that leaves the overlay untouched
struct NoopEnvironMutator;

impl EnvironMutator for NoopEnvironMutator {
    fn mutate_environ(
        &self,
        _ctx: &WorkContext,
        _req: &Requirement,
        _version: &PackageVersion,
        _environ: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Default artifact and directory naming
struct DefaultNaming;

impl ArchiveNaming for DefaultNaming {
    fn archive_name(&self, req: &Requirement, version: &PackageVersion) -> String {
        format!("{}-{}.tar.gz", dist_name(&req.normalized_name()), version)
    }
}

impl DirectoryNaming for DefaultNaming {
    fn directory_name(&self, req: &Requirement, version: &PackageVersion) -> String {
        format!("{}-{}", req.normalized_name(), version)
    }
}

/// Process-wide registry of per-package overrides, with built-in
/// defaults per hook kind
pub struct OverrideRegistry {
    overrides: BTreeMap<String, Arc<dyn OverrideBundle>>,
    base_resolver: Box<dyn ResolverProvider>,
    default_sdist: ArchiveSdistBuilder,
    default_wheel: CommandWheelBuilder,
    default_post: NoopPostBuild,
    default_environ: NoopEnvironMutator,
    default_naming: DefaultNaming,
    default_patches: DirectoryPatchSource,
}

impl std::fmt::Debug for OverrideRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideRegistry")
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl OverrideRegistry {
    /// Populate the registry from a set of override bundles.
    ///
    /// Validation failures are fatal: an empty package name, a name that
    /// is not in normalized form, or two bundles claiming the same name.
    pub fn discover(bundles: Vec<Arc<dyn OverrideBundle>>) -> Result<Self> {
        let mut overrides: BTreeMap<String, Arc<dyn OverrideBundle>> = BTreeMap::new();
        for bundle in bundles {
            let name = bundle.package().to_string();
            if name.is_empty() {
                return Err(Error::OverrideRegistration {
                    package: name,
                    reason: "empty package name".to_string(),
                });
            }
            if name != normalize_name(&name) {
                return Err(Error::OverrideRegistration {
                    package: name.clone(),
                    reason: format!("package name must be normalized ('{}')", normalize_name(&name)),
                });
            }
            if overrides.insert(name.clone(), bundle).is_some() {
                return Err(Error::OverrideRegistration {
                    package: name,
                    reason: "duplicate registration".to_string(),
                });
            }
        }
        debug!("registered overrides: {:?}", overrides.keys().collect::<Vec<_>>());
        Ok(Self {
            overrides,
            base_resolver: Box::new(IndexResolver),
            default_sdist: ArchiveSdistBuilder,
            default_wheel: CommandWheelBuilder,
            default_post: NoopPostBuild,
            default_environ: NoopEnvironMutator,
            default_naming: DefaultNaming,
            default_patches: DirectoryPatchSource,
        })
    }

    /// A registry with no overrides, dispatching everything to defaults
    pub fn empty() -> Self {
        Self::discover(Vec::new()).expect("empty registry is always valid")
    }

    /// Replace the resolver used when a package has no resolver override.
    /// Used for history-based resolution from a previous graph.
    pub fn set_base_resolver(&mut self, resolver: Box<dyn ResolverProvider>) {
        self.base_resolver = resolver;
    }

    /// Normalized names with a registered override, sorted
    pub fn registered(&self) -> Vec<String> {
        self.overrides.keys().cloned().collect()
    }

    fn bundle(&self, name: &str) -> Option<&Arc<dyn OverrideBundle>> {
        self.overrides.get(name)
    }

    pub fn resolver_for(&self, name: &str) -> &dyn ResolverProvider {
        self.bundle(name)
            .and_then(|b| b.resolver())
            .unwrap_or(self.base_resolver.as_ref())
    }

    pub fn sdist_builder_for(&self, name: &str) -> &dyn SdistBuilder {
        self.bundle(name)
            .and_then(|b| b.sdist_builder())
            .unwrap_or(&self.default_sdist)
    }

    pub fn wheel_builder_for(&self, name: &str) -> &dyn WheelBuilder {
        self.bundle(name)
            .and_then(|b| b.wheel_builder())
            .unwrap_or(&self.default_wheel)
    }

    pub fn post_build_for(&self, name: &str) -> &dyn PostBuildHook {
        self.bundle(name)
            .and_then(|b| b.post_build())
            .unwrap_or(&self.default_post)
    }

    pub fn environ_mutator_for(&self, name: &str) -> &dyn EnvironMutator {
        self.bundle(name)
            .and_then(|b| b.environ_mutator())
            .unwrap_or(&self.default_environ)
    }

    pub fn archive_naming_for(&self, name: &str) -> &dyn ArchiveNaming {
        self.bundle(name)
            .and_then(|b| b.archive_naming())
            .unwrap_or(&self.default_naming)
    }

    pub fn directory_naming_for(&self, name: &str) -> &dyn DirectoryNaming {
        self.bundle(name)
            .and_then(|b| b.directory_naming())
            .unwrap_or(&self.default_naming)
    }

    pub fn patch_source_for(&self, name: &str) -> &dyn PatchSource {
        self.bundle(name)
            .and_then(|b| b.patch_source())
            .unwrap_or(&self.default_patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::PackageVersion;

    struct NamedBundle {
        name: &'static str,
        naming: SuffixNaming,
    }

    struct SuffixNaming {
        suffix: &'static str,
    }

    impl ArchiveNaming for SuffixNaming {
        fn archive_name(&self, req: &Requirement, version: &PackageVersion) -> String {
            format!("{}-{}-{}.tar.gz", req.normalized_name(), version, self.suffix)
        }
    }

    impl OverrideBundle for NamedBundle {
        fn package(&self) -> &str {
            self.name
        }
        fn archive_naming(&self) -> Option<&dyn ArchiveNaming> {
            Some(&self.naming)
        }
    }

    fn bundle(name: &'static str, suffix: &'static str) -> Arc<dyn OverrideBundle> {
        Arc::new(NamedBundle {
            name,
            naming: SuffixNaming { suffix },
        })
    }

    #[test]
    fn test_override_applies_only_to_its_package() {
        let registry =
            OverrideRegistry::discover(vec![bundle("frob", "custom"), bundle("grub", "other")])
                .unwrap();
        let req_frob = Requirement::parse("frob").unwrap();
        let req_grub = Requirement::parse("grub").unwrap();
        let req_none = Requirement::parse("plain").unwrap();
        let version = PackageVersion::parse("1.0").unwrap();

        assert_eq!(
            registry.archive_naming_for("frob").archive_name(&req_frob, &version),
            "frob-1.0-custom.tar.gz"
        );
        assert_eq!(
            registry.archive_naming_for("grub").archive_name(&req_grub, &version),
            "grub-1.0-other.tar.gz"
        );
        // no override: built-in default naming
        assert_eq!(
            registry.archive_naming_for("plain").archive_name(&req_none, &version),
            "plain-1.0.tar.gz"
        );
    }

    #[test]
    fn test_missing_hook_falls_back_to_default() {
        let registry = OverrideRegistry::discover(vec![bundle("frob", "custom")]).unwrap();
        let req = Requirement::parse("frob").unwrap();
        let version = PackageVersion::parse("2.0").unwrap();
        // the bundle has no directory naming hook
        assert_eq!(
            registry
                .directory_naming_for("frob")
                .directory_name(&req, &version),
            "frob-2.0"
        );
    }

    #[test]
    fn test_duplicate_registration_is_fatal() {
        let err = OverrideRegistry::discover(vec![bundle("frob", "a"), bundle("frob", "b")])
            .unwrap_err();
        assert!(matches!(err, Error::OverrideRegistration { .. }));
    }

    #[test]
    fn test_non_normalized_name_is_fatal() {
        let err = OverrideRegistry::discover(vec![bundle("Flit_Core", "a")]).unwrap_err();
        assert!(matches!(err, Error::OverrideRegistration { .. }));
    }

    #[test]
    fn test_registered_names_sorted() {
        let registry =
            OverrideRegistry::discover(vec![bundle("zeta", "z"), bundle("alpha", "a")]).unwrap();
        assert_eq!(registry.registered(), vec!["alpha", "zeta"]);
    }
}
