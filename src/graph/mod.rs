// src/graph/mod.rs

//! Dependency graph construction
//!
//! Accumulates resolved packages and the edges between them: who requires
//! whom, with which requirement, and whether the edge is a runtime
//! (install) or build-time dependency. A package resolves to exactly one
//! version per run; a later requirement the resolved version cannot
//! satisfy is a constraint conflict naming both requesters, never a
//! silent re-resolution.
//!
//! Nodes live in an arena keyed by `name==version`, so the back-edges
//! created by build-time self-dependencies (a build backend that needs
//! its own released version to build itself) do not create ownership
//! cycles. Such a cyclic edge is allowed only when it can be satisfied by
//! an already-available artifact; otherwise graph construction fails.
//!
//! Construction is single-threaded and completes before any build
//! starts; traversal follows declared requirement order so identical
//! inputs produce identical graphs.

pub mod schedule;

use crate::context::WorkContext;
use crate::error::{Error, Result};
use crate::requirements::Requirement;
use crate::version::PackageVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Unique identity of a resolved package within a graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub name: String,
    pub version: PackageVersion,
}

impl NodeKey {
    pub fn new(name: impl Into<String>, version: PackageVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse a `name==version` key string
    pub fn parse(s: &str) -> Result<Self> {
        let (name, version) = s
            .split_once("==")
            .ok_or_else(|| Error::PlanFormat(format!("bad node key '{s}'")))?;
        Ok(Self {
            name: name.to_string(),
            version: PackageVersion::parse(version)?,
        })
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// Why an edge exists: runtime dependency or build-system dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Install,
    BuildTime,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Install => write!(f, "install"),
            EdgeKind::BuildTime => write!(f, "build-time"),
        }
    }
}

/// The origin of an edge: a user-supplied toplevel requirement or
/// another resolved node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    Toplevel,
    Node(NodeKey),
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requester::Toplevel => write!(f, "<toplevel>"),
            Requester::Node(key) => write!(f, "{key}"),
        }
    }
}

/// An outgoing dependency edge
#[derive(Debug, Clone)]
pub struct Edge {
    pub requirement: Requirement,
    pub kind: EdgeKind,
    pub to: NodeKey,
    /// The edge closes a build-time cycle and is satisfied by an
    /// already-available artifact, not by anything built this run
    pub satisfied_externally: bool,
}

/// An incoming dependency edge, recording who asked for this node
#[derive(Debug, Clone)]
pub struct IncomingEdge {
    pub requester: Requester,
    pub requirement: Requirement,
    pub kind: EdgeKind,
    pub satisfied_externally: bool,
}

/// One resolved package at one version
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub key: NodeKey,
    pub source_url: String,
    pub pre_built: bool,
    /// Captures everything that affects the build output (version with
    /// local label, patch set); decides whether a mirrored artifact is
    /// still valid
    pub build_tag: String,
    /// Ordered incoming edges; only ever appended to
    pub incoming: Vec<IncomingEdge>,
    /// Ordered outgoing edges in declared-requirement order
    pub requires: Vec<Edge>,
}

impl GraphNode {
    /// Declared requirement strings for one edge kind, deduplicated
    pub fn declared_requirements(&self, kind: EdgeKind) -> Vec<String> {
        let mut out = Vec::new();
        for edge in &self.requires {
            if edge.kind == kind {
                let rendered = edge.requirement.to_string();
                if !out.contains(&rendered) {
                    out.push(rendered);
                }
            }
        }
        out
    }
}

/// The accumulated dependency graph for one run
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<NodeKey, GraphNode>,
    /// One resolved version per normalized name
    by_name: BTreeMap<String, NodeKey>,
    /// Edges from the toplevel requirements, in intake order
    toplevel: Vec<Edge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    pub fn node_by_name(&self, normalized_name: &str) -> Option<&GraphNode> {
        self.by_name
            .get(normalized_name)
            .and_then(|key| self.nodes.get(key))
    }

    /// All nodes in key order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn toplevel(&self) -> &[Edge] {
        &self.toplevel
    }

    /// Dependency edges of a node that must be satisfied by this run
    /// (externally satisfied cycle edges are excluded)
    pub fn dependencies_of(&self, key: &NodeKey) -> Vec<&Edge> {
        self.nodes
            .get(key)
            .map(|node| {
                node.requires
                    .iter()
                    .filter(|e| !e.satisfied_externally)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn insert_node(&mut self, node: GraphNode) {
        self.by_name.insert(node.key.name.clone(), node.key.clone());
        self.nodes.insert(node.key.clone(), node);
    }

    fn add_edge(
        &mut self,
        requester: Requester,
        requirement: Requirement,
        kind: EdgeKind,
        to: NodeKey,
        satisfied_externally: bool,
    ) {
        debug!(
            "recording {} dependency {} -> {}",
            kind, requester, to
        );
        let edge = Edge {
            requirement: requirement.clone(),
            kind,
            to: to.clone(),
            satisfied_externally,
        };
        match &requester {
            Requester::Toplevel => self.toplevel.push(edge),
            Requester::Node(from) => {
                if let Some(node) = self.nodes.get_mut(from) {
                    node.requires.push(edge);
                }
            }
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.incoming.push(IncomingEdge {
                requester,
                requirement,
                kind,
                satisfied_externally,
            });
        }
    }

    /// Serialize to the JSON graph document
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let doc = self.to_doc();
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &doc)?;
        Ok(())
    }

    /// Load a previously serialized graph document
    pub fn load_from(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let doc: GraphDoc = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::from_doc(doc)
    }

    fn to_doc(&self) -> GraphDoc {
        let nodes = self
            .nodes
            .values()
            .map(|node| {
                (
                    node.key.to_string(),
                    NodeDoc {
                        name: node.key.name.clone(),
                        version: node.key.version.to_string(),
                        source_url: node.source_url.clone(),
                        pre_built: node.pre_built,
                        build_tag: node.build_tag.clone(),
                        edges: node.requires.iter().map(EdgeDoc::from_edge).collect(),
                    },
                )
            })
            .collect();
        GraphDoc {
            toplevel: self.toplevel.iter().map(EdgeDoc::from_edge).collect(),
            nodes,
        }
    }

    fn from_doc(doc: GraphDoc) -> Result<Self> {
        let mut graph = DependencyGraph::new();
        for (key_str, node_doc) in &doc.nodes {
            let key = NodeKey::parse(key_str)?;
            if key.name != node_doc.name || key.version.to_string() != node_doc.version {
                return Err(Error::PlanFormat(format!(
                    "node key '{key_str}' does not match its record"
                )));
            }
            graph.insert_node(GraphNode {
                key,
                source_url: node_doc.source_url.clone(),
                pre_built: node_doc.pre_built,
                build_tag: node_doc.build_tag.clone(),
                incoming: Vec::new(),
                requires: Vec::new(),
            });
        }
        for edge_doc in &doc.toplevel {
            let (req, kind, to, external) = edge_doc.parse()?;
            if !graph.nodes.contains_key(&to) {
                return Err(Error::PlanFormat(format!("dangling toplevel edge to '{to}'")));
            }
            graph.add_edge(Requester::Toplevel, req, kind, to, external);
        }
        for (key_str, node_doc) in &doc.nodes {
            let from = NodeKey::parse(key_str)?;
            for edge_doc in &node_doc.edges {
                let (req, kind, to, external) = edge_doc.parse()?;
                if !graph.nodes.contains_key(&to) {
                    return Err(Error::PlanFormat(format!(
                        "dangling edge {key_str} -> '{to}'"
                    )));
                }
                graph.add_edge(Requester::Node(from.clone()), req, kind, to, external);
            }
        }
        Ok(graph)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeDoc {
    key: String,
    requirement: String,
    kind: EdgeKind,
    #[serde(default)]
    satisfied_externally: bool,
}

impl EdgeDoc {
    fn from_edge(edge: &Edge) -> Self {
        Self {
            key: edge.to.to_string(),
            requirement: edge.requirement.to_string(),
            kind: edge.kind,
            satisfied_externally: edge.satisfied_externally,
        }
    }

    fn parse(&self) -> Result<(Requirement, EdgeKind, NodeKey, bool)> {
        Ok((
            Requirement::parse(&self.requirement)?,
            self.kind,
            NodeKey::parse(&self.key)?,
            self.satisfied_externally,
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeDoc {
    name: String,
    version: String,
    source_url: String,
    pre_built: bool,
    build_tag: String,
    edges: Vec<EdgeDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphDoc {
    toplevel: Vec<EdgeDoc>,
    nodes: BTreeMap<String, NodeDoc>,
}

/// Builds a [`DependencyGraph`] by resolving requirements recursively
/// through the per-package resolver providers.
pub struct GraphBuilder<'a> {
    ctx: &'a WorkContext,
    graph: DependencyGraph,
    /// Names currently being resolved, innermost last; an edge back into
    /// this stack is a dependency cycle
    visiting: Vec<NodeKey>,
    /// First requester recorded per package, for conflict reporting
    first_request: BTreeMap<String, (String, String)>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(ctx: &'a WorkContext) -> Self {
        Self {
            ctx,
            graph: DependencyGraph::new(),
            visiting: Vec::new(),
            first_request: BTreeMap::new(),
        }
    }

    /// Resolve one toplevel requirement and everything below it
    pub fn resolve_toplevel(&mut self, req: &Requirement) -> Result<NodeKey> {
        info!("resolving toplevel requirement {}", req);
        self.resolve(req, Requester::Toplevel, EdgeKind::Install)
    }

    pub fn finish(self) -> DependencyGraph {
        self.graph
    }

    /// Look up or create the node satisfying `req`, record the edge from
    /// `requester`, and return the node's key.
    fn resolve(
        &mut self,
        req: &Requirement,
        requester: Requester,
        kind: EdgeKind,
    ) -> Result<NodeKey> {
        let ctx = self.ctx;
        let name = req.normalized_name();

        if let Some(key) = self.graph.by_name.get(&name).cloned() {
            if !req.constraint.satisfies(&key.version) {
                let (existing_requester, existing_requirement) = self
                    .first_request
                    .get(&name)
                    .cloned()
                    .unwrap_or_else(|| (Requester::Toplevel.to_string(), name.clone()));
                return Err(Error::ConstraintConflict {
                    package: name,
                    resolved_version: key.version.to_string(),
                    existing_requester,
                    existing_requirement,
                    new_requester: requester.to_string(),
                    new_requirement: req.to_string(),
                });
            }

            let satisfied_externally = if self.visiting.iter().any(|k| k.name == name) {
                // The edge closes a cycle. It is tolerable only when an
                // already-available artifact can stand in for the node,
                // so nothing built this run depends on its own output.
                let node = self.graph.nodes.get(&key).expect("visiting node exists");
                let available =
                    node.pre_built || ctx.repository.has_satisfying_wheel(&name, &req.constraint);
                if !available {
                    let mut chain: Vec<String> =
                        self.visiting.iter().map(|k| k.to_string()).collect();
                    chain.push(key.to_string());
                    return Err(Error::UnresolvableCycle {
                        chain: chain.join(" -> "),
                    });
                }
                info!(
                    "{}: build-time cycle broken by already-available artifact",
                    key
                );
                true
            } else {
                false
            };

            self.graph
                .add_edge(requester, req.clone(), kind, key.clone(), satisfied_externally);
            return Ok(key);
        }

        let provider = ctx.registry.resolver_for(&name);
        let candidate = provider.resolve(ctx, req)?;
        if candidate.name != name {
            return Err(Error::Resolution {
                requirement: req.to_string(),
                reason: format!(
                    "resolver returned candidate for '{}' instead",
                    candidate.name
                ),
            });
        }
        if !req.constraint.satisfies(&candidate.version) {
            return Err(Error::Resolution {
                requirement: req.to_string(),
                reason: format!(
                    "resolver returned version {} that does not satisfy the requirement",
                    candidate.version
                ),
            });
        }

        let tagged_version = candidate
            .version
            .with_local_label(ctx.local_version_label.as_deref());
        let patches = ctx
            .registry
            .patch_source_for(&name)
            .patches(ctx, req, &candidate.version)?;
        let build_tag = crate::build::compute_build_tag(&name, &tagged_version, &patches)?;

        let key = NodeKey::new(name.clone(), candidate.version.clone());
        info!("new {} dependency {} resolves to {}", kind, req, key.version);
        self.graph.insert_node(GraphNode {
            key: key.clone(),
            source_url: candidate.source_url.clone(),
            pre_built: candidate.pre_built,
            build_tag,
            incoming: Vec::new(),
            requires: Vec::new(),
        });
        self.first_request
            .insert(name, (requester.to_string(), req.to_string()));

        self.visiting.push(key.clone());
        let recursed = (|| -> Result<()> {
            for dep in &candidate.install_requires {
                self.resolve(dep, Requester::Node(key.clone()), EdgeKind::Install)?;
            }
            for dep in &candidate.build_requires {
                self.resolve(dep, Requester::Node(key.clone()), EdgeKind::BuildTime)?;
            }
            Ok(())
        })();
        self.visiting.pop();
        recursed?;

        self.graph.add_edge(requester, req.clone(), kind, key.clone(), false);
        Ok(key)
    }
}
