// src/cli.rs

//! Command-line definitions
//!
//! The resolve-and-build and build-from-plan entry points share one
//! configuration surface (`BuildOptions`); the plan-driven entry point
//! additionally takes the plan file produced by an earlier run.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forgeron")]
#[command(author, version, about = "Build a dependency tree of source packages into a local wheel mirror", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Configuration shared by the build entry points
#[derive(Args, Debug, Clone)]
pub struct BuildOptions {
    /// Scratch directory for graph/plan files, build trees and logs
    #[arg(long, default_value = "work-dir")]
    pub work_dir: PathBuf,

    /// Directory holding per-package patch sets
    #[arg(long, default_value = "patches")]
    pub patches_dir: PathBuf,

    /// Root of the local artifact repository served by the mirror
    #[arg(long, default_value = "wheels-repo")]
    pub mirror_dir: PathBuf,

    /// Per-package settings file
    #[arg(long, default_value = "settings.toml")]
    pub settings_file: PathBuf,

    /// Upstream package index URL (ending in /)
    #[arg(long)]
    pub index_url: Option<String>,

    /// Local-version label appended to every built version
    #[arg(long)]
    pub local_version: Option<String>,

    /// Maximum number of concurrent builds within a round
    #[arg(long, default_value_t = 4)]
    pub max_workers: usize,

    /// Keep per-package build trees for debugging
    #[arg(long)]
    pub keep_build_dirs: bool,

    /// Deadline in seconds applied to each build subprocess
    #[arg(long)]
    pub build_timeout: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve requirements, write the graph and plan, then build
    /// everything round by round
    Bootstrap {
        #[command(flatten)]
        options: BuildOptions,

        /// Toplevel requirement strings
        #[arg(value_name = "REQUIREMENT")]
        requirements: Vec<String>,

        /// Requirement files, one requirement per line
        #[arg(short = 'r', long = "requirements-file", value_name = "FILE")]
        requirements_files: Vec<PathBuf>,

        /// Stop after writing the graph and plan files
        #[arg(long)]
        plan_only: bool,
    },

    /// Build from an existing plan file, in parallel, without
    /// re-resolving anything
    BuildParallel {
        #[command(flatten)]
        options: BuildOptions,

        /// Plan file produced by bootstrap
        #[arg(value_name = "PLAN_FILE")]
        plan_file: PathBuf,
    },

    /// Print the round ordering recorded in a plan file
    BuildOrder {
        /// Plan file produced by bootstrap
        #[arg(value_name = "PLAN_FILE")]
        plan_file: PathBuf,
    },

    /// Serve an existing mirror directory over HTTP
    Server {
        /// Root of the local artifact repository
        #[arg(long, default_value = "wheels-repo")]
        mirror_dir: PathBuf,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },

    /// List package names with a registered override bundle
    ListOverrides,
}

impl BuildOptions {
    /// Translate CLI options into a context configuration
    pub fn to_context_config(&self) -> forgeron::ContextConfig {
        forgeron::ContextConfig {
            work_dir: self.work_dir.clone(),
            patches_dir: self.patches_dir.clone(),
            mirror_dir: self.mirror_dir.clone(),
            settings_file: self.settings_file.clone(),
            index_url: self.index_url.clone(),
            local_version_label: self.local_version.clone(),
            max_workers: self.max_workers,
            keep_build_dirs: self.keep_build_dirs,
            build_timeout: self.build_timeout.map(std::time::Duration::from_secs),
        }
    }
}
