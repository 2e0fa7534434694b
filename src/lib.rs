// src/lib.rs

//! Forgeron
//!
//! Builds a full dependency tree of source packages into installable
//! wheel artifacts: resolves version constraints transitively, computes a
//! deterministic round-based build order, executes builds concurrently
//! (with per-package override hooks), and serves everything already built
//! through a local package-index mirror so later builds resolve sibling
//! dependencies locally first.
//!
//! # Architecture
//!
//! - Graph-first: resolution happens single-threaded up front; execution
//!   replays a serialized plan and never mutates the graph
//! - Rounds: packages whose dependencies are all satisfied by earlier
//!   rounds build concurrently under a bounded worker pool
//! - Overrides: per-package hook bundles replace any step of the default
//!   procedure, registered once at startup
//! - Mirror: artifacts are published write-then-rename and become
//!   resolvable mid-run without a server restart

pub mod archive;
pub mod build;
pub mod context;
mod error;
pub mod executor;
pub mod graph;
pub mod mirror;
pub mod overrides;
pub mod requirements;
pub mod resolver;
pub mod settings;
pub mod version;

pub use context::{ContextConfig, WorkContext};
pub use error::{Error, Result};
pub use executor::{ExecutionReport, NodeState, ParallelExecutor};
pub use graph::schedule::{BuildPlan, PlanEntry};
pub use graph::{DependencyGraph, EdgeKind, GraphBuilder, NodeKey, Requester};
pub use mirror::{LocalRepository, MirrorServer};
pub use overrides::{OverrideBundle, OverrideRegistry};
pub use requirements::{normalize_name, Requirement, RequirementSource};
pub use resolver::{IndexResolver, Pin, PinnedResolver, ResolvedCandidate, ResolverProvider};
pub use settings::Settings;
pub use version::{PackageVersion, VersionConstraint};
