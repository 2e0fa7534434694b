// src/settings.rs

//! Per-package build settings loaded from a TOML file
//!
//! Settings influence how individual packages are resolved and built:
//! pre-built markers (the package is downloaded instead of built, and may
//! break build-time dependency cycles), extra environment variables, a
//! build-command override, and a download-source URL template.

use crate::error::{Error, Result};
use crate::requirements::normalize_name;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Settings for a single package
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSettings {
    /// The package is never built from source; a prebuilt artifact is
    /// downloaded and registered instead. Also marks the package as an
    /// acceptable external break point for build-time dependency cycles.
    #[serde(default)]
    pub pre_built: bool,

    /// Override for the wheel build command
    #[serde(default)]
    pub build_command: Option<String>,

    /// Download URL template; `{version}` is substituted with the
    /// resolved version
    #[serde(default)]
    pub download_url: Option<String>,

    /// Extra environment variables applied to every build subprocess for
    /// this package
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// The full settings document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Wheel build command used when a package has no override
    #[serde(default)]
    pub default_build_command: Option<String>,

    /// Per-package sections, keyed by package name
    #[serde(default)]
    pub packages: BTreeMap<String, PackageSettings>,
}

impl Settings {
    /// Load settings from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no settings file at {}, using defaults", path.display());
            return Ok(Settings::default());
        }
        let content = fs::read_to_string(path)?;
        let mut settings: Settings =
            toml::from_str(&content).map_err(|e| Error::Settings(e.to_string()))?;
        // Re-key package sections by normalized name so lookups match
        // graph identity no matter how the operator spelled the name.
        settings.packages = settings
            .packages
            .into_iter()
            .map(|(name, pkg)| (normalize_name(&name), pkg))
            .collect();
        Ok(settings)
    }

    /// Settings for one package by normalized name
    pub fn package(&self, normalized_name: &str) -> PackageSettings {
        self.packages
            .get(normalized_name)
            .cloned()
            .unwrap_or_default()
    }

    /// The wheel build command for a package: the per-package override if
    /// present, else the global default, else a `python -m build` call.
    pub fn build_command(&self, normalized_name: &str) -> String {
        self.package(normalized_name)
            .build_command
            .or_else(|| self.default_build_command.clone())
            .unwrap_or_else(|| "python -m build --wheel --no-isolation".to_string())
    }
}
