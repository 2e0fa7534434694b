// src/resolver/mod.rs

//! Resolver providers: map a requirement to a concrete version and
//! source location
//!
//! A [`ResolverProvider`] is selected per package through the override
//! registry. The built-in [`IndexResolver`] queries a package index (the
//! upstream index when configured, the local mirror otherwise), picks the
//! highest version satisfying the constraint, and reads the candidate's
//! declared dependencies from the metadata document published beside the
//! artifact. [`PinnedResolver`] answers from a previously recorded graph
//! without touching any index.

use crate::context::WorkContext;
use crate::error::{Error, Result};
use crate::mirror::{dist_name, parse_artifact_name, ArtifactKind};
use crate::requirements::Requirement;
use crate::version::PackageVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// The outcome of resolving one requirement. Immutable once created.
#[derive(Debug, Clone)]
pub struct ResolvedCandidate {
    /// Normalized package name
    pub name: String,
    pub version: PackageVersion,
    /// Where the source (or prebuilt wheel) can be fetched from: an
    /// http(s) URL or a local filesystem path
    pub source_url: String,
    /// The requirement that triggered this resolution
    pub origin: Requirement,
    /// Declared runtime dependencies
    pub install_requires: Vec<Requirement>,
    /// Declared build-system dependencies
    pub build_requires: Vec<Requirement>,
    /// The artifact is consumed prebuilt instead of being built here
    pub pre_built: bool,
}

/// Pluggable resolution strategy, selected per package via the override
/// registry
pub trait ResolverProvider: Send + Sync {
    fn resolve(&self, ctx: &WorkContext, req: &Requirement) -> Result<ResolvedCandidate>;
}

/// Dependency metadata published beside each artifact as
/// `{dist}-{version}.metadata.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(default)]
    pub install_requires: Vec<String>,
    #[serde(default)]
    pub build_requires: Vec<String>,
}

impl ArtifactMetadata {
    pub fn parse_requirements(specs: &[String]) -> Result<Vec<Requirement>> {
        specs.iter().map(|s| Requirement::parse(s)).collect()
    }
}

/// Extract the targets of `href="..."` anchors from an index listing page
pub fn extract_hrefs(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("href=\"") {
        rest = &rest[start + 6..];
        if let Some(end) = rest.find('"') {
            let href = &rest[..end];
            // keep the last path component, drop any fragment
            let href = href.split('#').next().unwrap_or(href);
            if let Some(name) = href.trim_end_matches('/').rsplit('/').next() {
                if !name.is_empty() {
                    out.push(name.to_string());
                }
            }
            rest = &rest[end..];
        } else {
            break;
        }
    }
    out
}

/// Default provider: resolve against a package index
///
/// Queries `{index}/{name}/` for the available artifact filenames, picks
/// the best (highest) version whose sdist satisfies the requirement, and
/// loads the metadata document when one is published. Packages marked
/// pre-built resolve to a wheel instead of an sdist.
pub struct IndexResolver;

impl IndexResolver {
    /// Filenames available for a package, from the upstream index if one
    /// is configured, else from the local repository.
    fn available_filenames(&self, ctx: &WorkContext, name: &str) -> Result<Vec<String>> {
        if let Some(index_url) = &ctx.index_url {
            let url = format!("{}{}/", index_url, name);
            debug!("querying index {}", url);
            let response = ctx.client.get(&url).send()?;
            if !response.status().is_success() {
                return Ok(Vec::new());
            }
            Ok(extract_hrefs(&response.text()?))
        } else {
            Ok(ctx.repository.listing(name))
        }
    }

    /// Fetch the metadata document for a resolved version, if published
    fn fetch_metadata(
        &self,
        ctx: &WorkContext,
        name: &str,
        version: &PackageVersion,
        filenames: &[String],
    ) -> Result<ArtifactMetadata> {
        let metadata_name = format!("{}-{}.metadata.json", dist_name(name), version);
        if !filenames.iter().any(|f| f == &metadata_name) {
            return Ok(ArtifactMetadata::default());
        }
        let bytes = if let Some(index_url) = &ctx.index_url {
            let url = format!("{}{}/{}", index_url, name, metadata_name);
            ctx.client.get(&url).send()?.bytes()?.to_vec()
        } else {
            std::fs::read(ctx.repository.artifact_path(name, &metadata_name))?
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn location_for(&self, ctx: &WorkContext, name: &str, filename: &str) -> String {
        match &ctx.index_url {
            Some(index_url) => format!("{}{}/{}", index_url, name, filename),
            None => ctx
                .repository
                .artifact_path(name, filename)
                .display()
                .to_string(),
        }
    }
}

impl ResolverProvider for IndexResolver {
    fn resolve(&self, ctx: &WorkContext, req: &Requirement) -> Result<ResolvedCandidate> {
        let name = req.normalized_name();
        let package_settings = ctx.settings.package(&name);
        let wanted_kind = if package_settings.pre_built {
            ArtifactKind::Wheel
        } else {
            ArtifactKind::Sdist
        };

        let filenames = self.available_filenames(ctx, &name)?;
        let mut best: Option<(PackageVersion, String)> = None;
        for filename in &filenames {
            let Some(parsed) = parse_artifact_name(filename) else {
                continue;
            };
            if parsed.kind != wanted_kind || parsed.name != name {
                continue;
            }
            if !req.constraint.satisfies(&parsed.version) {
                continue;
            }
            match &best {
                Some((version, _)) if *version >= parsed.version => {}
                _ => best = Some((parsed.version, filename.clone())),
            }
        }

        let (version, filename) = best.ok_or_else(|| Error::Resolution {
            requirement: req.to_string(),
            reason: format!(
                "no matching {} found among {} index entries",
                if wanted_kind == ArtifactKind::Wheel {
                    "wheel"
                } else {
                    "sdist"
                },
                filenames.len()
            ),
        })?;

        let source_url = match &package_settings.download_url {
            Some(template) => template.replace("{version}", &version.to_string()),
            None => self.location_for(ctx, &name, &filename),
        };

        let metadata = self.fetch_metadata(ctx, &name, &version, &filenames)?;
        info!("{} resolves to {}", req, version);
        Ok(ResolvedCandidate {
            name,
            version,
            source_url,
            origin: req.clone(),
            install_requires: ArtifactMetadata::parse_requirements(&metadata.install_requires)?,
            build_requires: ArtifactMetadata::parse_requirements(&metadata.build_requires)?,
            pre_built: package_settings.pre_built,
        })
    }
}

/// A single pinned resolution answer
#[derive(Debug, Clone)]
pub struct Pin {
    pub version: PackageVersion,
    pub source_url: String,
    pub pre_built: bool,
    pub install_requires: Vec<Requirement>,
    pub build_requires: Vec<Requirement>,
}

/// Resolve from a fixed table of pinned candidates, without consulting
/// any index. Backs history-based resolution from a previous run's graph
/// file.
#[derive(Debug, Default)]
pub struct PinnedResolver {
    pins: BTreeMap<String, Pin>,
}

impl PinnedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pin for a normalized package name
    pub fn pin(&mut self, name: impl Into<String>, pin: Pin) {
        self.pins.insert(name.into(), pin);
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

impl ResolverProvider for PinnedResolver {
    fn resolve(&self, _ctx: &WorkContext, req: &Requirement) -> Result<ResolvedCandidate> {
        let name = req.normalized_name();
        let pin = self.pins.get(&name).ok_or_else(|| Error::Resolution {
            requirement: req.to_string(),
            reason: "no pinned candidate for this package".to_string(),
        })?;
        if !req.constraint.satisfies(&pin.version) {
            return Err(Error::Resolution {
                requirement: req.to_string(),
                reason: format!("pinned version {} does not satisfy requirement", pin.version),
            });
        }
        Ok(ResolvedCandidate {
            name,
            version: pin.version.clone(),
            source_url: pin.source_url.clone(),
            origin: req.clone(),
            install_requires: pin.install_requires.clone(),
            build_requires: pin.build_requires.clone(),
            pre_built: pin.pre_built,
        })
    }
}
