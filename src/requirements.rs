// src/requirements.rs

//! Requirement value type and requirement-file intake
//!
//! Requirements arrive either on the command line or from line-oriented
//! requirement files. Intake normalizes both into an ordered list of
//! (origin, requirement) pairs; order is preserved because it drives the
//! deterministic traversal order of the dependency graph.

use crate::error::{Error, Result};
use crate::version::VersionConstraint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Normalize a package name: lowercase, runs of `-`, `_` and `.`
/// collapse to a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.chars() {
        if ch == '-' || ch == '_' || ch == '.' {
            if !last_was_sep {
                out.push('-');
            }
            last_was_sep = true;
        } else {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        }
    }
    out
}

/// A single parsed requirement: name, optional extras, version constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub constraint: VersionConstraint,
}

impl Requirement {
    /// Parse a requirement string such as `frob`, `frob>=1.0,<2.0` or
    /// `frob[extra1,extra2]==1.5`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidRequirement(
                s.to_string(),
                "empty requirement".to_string(),
            ));
        }

        // The name runs until the first extras bracket or operator character.
        let name_end = s
            .find(|c: char| c == '[' || c == '<' || c == '>' || c == '=' || c == '!')
            .unwrap_or(s.len());
        let name = s[..name_end].trim();
        if name.is_empty() {
            return Err(Error::InvalidRequirement(
                s.to_string(),
                "missing package name".to_string(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::InvalidRequirement(
                s.to_string(),
                "package name contains invalid characters".to_string(),
            ));
        }

        let mut rest = s[name_end..].trim();
        let mut extras = Vec::new();
        if let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']').ok_or_else(|| {
                Error::InvalidRequirement(s.to_string(), "unterminated extras".to_string())
            })?;
            extras = stripped[..close]
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
            rest = stripped[close + 1..].trim();
        }

        let constraint = VersionConstraint::parse(rest)?;

        Ok(Self {
            name: name.to_string(),
            extras,
            constraint,
        })
    }

    /// The normalized name used for graph identity and override lookup
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        write!(f, "{}", self.constraint)
    }
}

impl TryFrom<String> for Requirement {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Requirement::parse(&s)
    }
}

impl From<Requirement> for String {
    fn from(r: Requirement) -> String {
        r.to_string()
    }
}

/// Where a toplevel requirement came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementSource {
    /// Supplied directly on the command line
    CommandLine,
    /// Read from a requirement file
    File(PathBuf),
}

impl fmt::Display for RequirementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementSource::CommandLine => write!(f, "<toplevel>"),
            RequirementSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Parse a line-oriented requirement file.
///
/// Everything after a `#` is a comment; blank lines are skipped; the
/// remaining lines are parsed in file order.
pub fn parse_requirements_file(path: &Path) -> Result<Vec<Requirement>> {
    let content = fs::read_to_string(path)?;
    let mut reqs = Vec::new();
    for line in content.lines() {
        let useful = line.split('#').next().unwrap_or("").trim();
        debug!("line {:?} useful {:?}", line, useful);
        if useful.is_empty() {
            continue;
        }
        reqs.push(Requirement::parse(useful)?);
    }
    Ok(reqs)
}

/// Normalize command-line requirement strings and requirement files into
/// an ordered list of (origin, requirement) pairs. Command-line
/// requirements come first, then each file's requirements in file order.
pub fn collect_toplevel(
    args: &[String],
    files: &[PathBuf],
) -> Result<Vec<(RequirementSource, Requirement)>> {
    let mut out = Vec::new();
    for arg in args {
        out.push((RequirementSource::CommandLine, Requirement::parse(arg)?));
    }
    for file in files {
        for req in parse_requirements_file(file)? {
            out.push((RequirementSource::File(file.clone()), req));
        }
    }
    Ok(out)
}
