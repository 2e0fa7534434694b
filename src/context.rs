// src/context.rs

//! Shared work context for a resolve/build run
//!
//! Owns the directory layout, the per-package settings, the override
//! registry and the local artifact repository. Constructed once per run,
//! then shared immutably across worker threads; the only late-bound piece
//! is the mirror URL, which becomes known after the mirror server binds
//! its port.

use crate::error::Result;
use crate::mirror::LocalRepository;
use crate::overrides::OverrideRegistry;
use crate::settings::Settings;
use crate::version::PackageVersion;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Configuration collected from the command line
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Scratch space: graph/plan files, per-package work trees, logs
    pub work_dir: PathBuf,
    /// Directory holding per-package patch sets
    pub patches_dir: PathBuf,
    /// Root of the local artifact repository served by the mirror
    pub mirror_dir: PathBuf,
    /// Optional TOML settings file
    pub settings_file: PathBuf,
    /// Upstream package index URL (ending in `/`), if any
    pub index_url: Option<String>,
    /// Local-version label appended to every built version
    pub local_version_label: Option<String>,
    /// Bounded size of the per-round worker pool
    pub max_workers: usize,
    /// Keep per-package build trees for debugging
    pub keep_build_dirs: bool,
    /// External deadline applied to each build subprocess
    pub build_timeout: Option<Duration>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("work-dir"),
            patches_dir: PathBuf::from("patches"),
            mirror_dir: PathBuf::from("wheels-repo"),
            settings_file: PathBuf::from("settings.toml"),
            index_url: None,
            local_version_label: None,
            max_workers: 4,
            keep_build_dirs: false,
            build_timeout: None,
        }
    }
}

/// Shared state for one run
pub struct WorkContext {
    pub work_dir: PathBuf,
    pub patches_dir: PathBuf,
    /// Downloaded source archives, cached across packages and runs
    pub sources_dir: PathBuf,
    /// Per-package build logs
    pub logs_dir: PathBuf,
    pub settings: Settings,
    pub registry: OverrideRegistry,
    pub repository: LocalRepository,
    pub index_url: Option<String>,
    pub local_version_label: Option<String>,
    pub max_workers: usize,
    pub keep_build_dirs: bool,
    pub build_timeout: Option<Duration>,
    pub client: reqwest::blocking::Client,
    mirror_url: Mutex<Option<String>>,
}

impl WorkContext {
    pub fn new(config: ContextConfig, registry: OverrideRegistry) -> Result<Self> {
        let sources_dir = config.work_dir.join("sources");
        let logs_dir = config.work_dir.join("logs");
        fs::create_dir_all(&config.work_dir)?;
        fs::create_dir_all(&sources_dir)?;
        fs::create_dir_all(&logs_dir)?;
        fs::create_dir_all(&config.patches_dir)?;

        let settings = Settings::load(&config.settings_file)?;
        let repository = LocalRepository::open(&config.mirror_dir)?;
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("forgeron/", env!("CARGO_PKG_VERSION")))
            .build()?;

        debug!("work context rooted at {}", config.work_dir.display());
        Ok(Self {
            work_dir: config.work_dir,
            patches_dir: config.patches_dir,
            sources_dir,
            logs_dir,
            settings,
            registry,
            repository,
            index_url: config.index_url,
            local_version_label: config.local_version_label,
            max_workers: config.max_workers.max(1),
            keep_build_dirs: config.keep_build_dirs,
            build_timeout: config.build_timeout,
            client,
            mirror_url: Mutex::new(None),
        })
    }

    /// The running mirror server's index URL, once known
    pub fn mirror_url(&self) -> Option<String> {
        self.mirror_url.lock().unwrap().clone()
    }

    pub fn set_mirror_url(&self, url: String) {
        *self.mirror_url.lock().unwrap() = Some(url);
    }

    /// Path of the serialized dependency graph
    pub fn graph_file(&self) -> PathBuf {
        self.work_dir.join("graph.json")
    }

    /// Path of the serialized build plan
    pub fn plan_file(&self) -> PathBuf {
        self.work_dir.join("build-plan.json")
    }

    /// Path of the per-node execution progress record
    pub fn progress_file(&self) -> PathBuf {
        self.work_dir.join("build-progress.json")
    }

    /// Scratch tree for one package build
    pub fn package_work_dir(&self, directory_name: &str) -> PathBuf {
        self.work_dir.join(directory_name)
    }

    /// Build log path for one package
    pub fn build_log(&self, name: &str, version: &PackageVersion) -> PathBuf {
        self.logs_dir.join(format!("{name}-{version}.log"))
    }
}

impl std::fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkContext")
            .field("work_dir", &self.work_dir)
            .field("patches_dir", &self.patches_dir)
            .field("index_url", &self.index_url)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}
