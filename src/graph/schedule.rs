// src/graph/schedule.rs

//! Round scheduling: turn a completed dependency graph into a build plan
//!
//! Topological leveling assigns every node a round: nodes with no
//! dependencies land in round 1, every other node one round after its
//! deepest dependency. For every edge `A depends on B`,
//! `round(A) > round(B)`, so all packages of one round can build
//! concurrently once earlier rounds finished. Ties within a round are
//! ordered by name, and the plan is re-derivable byte-for-byte from the
//! same graph so the persisted plan file can be diffed and audited.

use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, EdgeKind, NodeKey};
use crate::requirements::Requirement;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// One scheduled package with full edge provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Normalized package name
    pub name: String,
    /// Resolved version, without any local-version label
    pub version: String,
    pub source_url: String,
    pub build_tag: String,
    pub pre_built: bool,
    /// Node keys this package depends on (externally satisfied cycle
    /// edges excluded); drives skip propagation at execution time
    pub depends_on: Vec<String>,
    /// Who asked for this package and why, for audit
    pub requested_by: Vec<String>,
    /// Declared runtime requirements
    pub install_requires: Vec<String>,
    /// Declared build-system requirements
    pub build_requires: Vec<String>,
}

impl PlanEntry {
    /// The `name==version` node key
    pub fn key(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }

    /// The pinned requirement this entry satisfies
    pub fn requirement(&self) -> Result<Requirement> {
        Requirement::parse(&self.key())
    }
}

/// An ordered sequence of rounds, serializable and replayable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPlan {
    pub package_count: usize,
    pub rounds: Vec<Vec<PlanEntry>>,
}

impl BuildPlan {
    /// Compute the plan for a completed graph.
    ///
    /// Rejects graphs with an unresolved cycle: every node must be
    /// reachable through dependencies that level out.
    pub fn from_graph(graph: &DependencyGraph) -> Result<BuildPlan> {
        // round per node key, computed by repeated relaxation in
        // deterministic key order
        let mut rounds: BTreeMap<NodeKey, usize> = BTreeMap::new();
        let total = graph.len();

        loop {
            let mut progressed = false;
            for node in graph.nodes() {
                if rounds.contains_key(&node.key) {
                    continue;
                }
                let deps = graph.dependencies_of(&node.key);
                let mut deepest = 0usize;
                let mut ready = true;
                for edge in deps {
                    match rounds.get(&edge.to) {
                        Some(r) => deepest = deepest.max(*r),
                        None => {
                            ready = false;
                            break;
                        }
                    }
                }
                if ready {
                    rounds.insert(node.key.clone(), deepest + 1);
                    progressed = true;
                }
            }
            if rounds.len() == total {
                break;
            }
            if !progressed {
                let stuck: Vec<String> = graph
                    .nodes()
                    .filter(|n| !rounds.contains_key(&n.key))
                    .map(|n| n.key.to_string())
                    .collect();
                return Err(Error::UnresolvableCycle {
                    chain: stuck.join(" -> "),
                });
            }
        }

        let round_count = rounds.values().copied().max().unwrap_or(0);
        let mut plan_rounds: Vec<Vec<PlanEntry>> = vec![Vec::new(); round_count];
        // BTreeMap iteration is key-ordered, so ties inside a round come
        // out name-sorted
        for (key, round) in &rounds {
            let node = graph.node(key).expect("levelled node exists");
            let requested_by = node
                .incoming
                .iter()
                .map(|edge| {
                    format!(
                        "{} -{}-> {}",
                        edge.requester, edge.kind, edge.requirement
                    )
                })
                .collect();
            let mut depends_on: Vec<String> = Vec::new();
            for edge in graph.dependencies_of(key) {
                let rendered = edge.to.to_string();
                if !depends_on.contains(&rendered) {
                    depends_on.push(rendered);
                }
            }
            plan_rounds[round - 1].push(PlanEntry {
                name: key.name.clone(),
                version: key.version.to_string(),
                source_url: node.source_url.clone(),
                build_tag: node.build_tag.clone(),
                pre_built: node.pre_built,
                depends_on,
                requested_by,
                install_requires: node.declared_requirements(EdgeKind::Install),
                build_requires: node.declared_requirements(EdgeKind::BuildTime),
            });
        }

        debug!("planned {} packages in {} rounds", total, round_count);
        Ok(BuildPlan {
            package_count: total,
            rounds: plan_rounds,
        })
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// All entries in round order
    pub fn entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.rounds.iter().flatten()
    }

    /// Human-readable rendering: total counts first, then one line per
    /// round listing `name==version` pairs.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Building {} packages in {} rounds",
            self.package_count,
            self.rounds.len()
        );
        for (i, round) in self.rounds.iter().enumerate() {
            let members: Vec<String> = round.iter().map(|e| e.key()).collect();
            out.push('\n');
            out.push_str(&format!("{}. {}", i + 1, members.join(", ")));
        }
        out
    }

    /// Serialize as the pretty JSON plan document
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a plan document
    pub fn load_from(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let plan: BuildPlan =
            serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| {
                Error::PlanFormat(format!("{}: {e}", path.display()))
            })?;
        let counted = plan.entries().count();
        if counted != plan.package_count {
            return Err(Error::PlanFormat(format!(
                "plan claims {} packages but lists {counted}",
                plan.package_count
            )));
        }
        Ok(plan)
    }
}
