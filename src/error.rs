// src/error.rs

//! Error types for the forgeron build pipeline
//!
//! Failures fall into two groups: planning errors (graph construction,
//! round computation, override registration) abort the whole run before
//! any build starts; per-package errors (patching, build hooks, mirror
//! publishing) are recorded against that package and its dependents
//! while sibling builds continue.

use thiserror::Error;

/// Errors that can occur while resolving, planning and building packages
#[derive(Error, Debug)]
pub enum Error {
    /// Two requesters asked for versions of the same package that cannot
    /// both be satisfied by a single resolved version
    #[error(
        "constraint conflict for '{package}': {existing_requester} requires \
         {existing_requirement} (resolved to {resolved_version}), but \
         {new_requester} requires {new_requirement}"
    )]
    ConstraintConflict {
        package: String,
        resolved_version: String,
        existing_requester: String,
        existing_requirement: String,
        new_requester: String,
        new_requirement: String,
    },

    /// A build-time dependency cycle with no already-available artifact
    /// to break it
    #[error("unresolvable dependency cycle: {chain}")]
    UnresolvableCycle { chain: String },

    /// A resolver provider could not map a requirement to a candidate
    #[error("cannot resolve requirement '{requirement}': {reason}")]
    Resolution { requirement: String, reason: String },

    /// A patch from the package's patch set failed to apply
    #[error("patch '{patch}' failed to apply to {package}: {reason}")]
    PatchFailed {
        package: String,
        patch: String,
        reason: String,
    },

    /// An sdist/wheel/backend build step returned failure
    #[error("build of {package} failed during {phase}: {reason}")]
    BuildFailed {
        package: String,
        phase: String,
        reason: String,
    },

    /// A malformed override registration, fatal at process startup
    #[error("invalid override registration for '{package}': {reason}")]
    OverrideRegistration { package: String, reason: String },

    /// The local artifact repository or mirror index could not be updated
    #[error("mirror I/O failure for '{filename}': {reason}")]
    MirrorIo { filename: String, reason: String },

    /// A version string that could not be parsed
    #[error("invalid version '{0}': {1}")]
    InvalidVersion(String, String),

    /// A requirement string that could not be parsed
    #[error("invalid requirement '{0}': {1}")]
    InvalidRequirement(String, String),

    /// A graph or plan document that does not match the expected format
    #[error("invalid plan or graph file: {0}")]
    PlanFormat(String),

    /// Settings file problems
    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that are local to a single package build and must
    /// not abort sibling work in the same round.
    pub fn is_package_local(&self) -> bool {
        matches!(
            self,
            Error::PatchFailed { .. } | Error::BuildFailed { .. } | Error::MirrorIo { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_conflict_names_both_requesters() {
        let err = Error::ConstraintConflict {
            package: "frob".to_string(),
            resolved_version: "1.2.0".to_string(),
            existing_requester: "alpha==1.0".to_string(),
            existing_requirement: "frob>=1.2".to_string(),
            new_requester: "beta==2.0".to_string(),
            new_requirement: "frob<1.0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alpha==1.0"));
        assert!(msg.contains("beta==2.0"));
        assert!(msg.contains("frob"));
    }

    #[test]
    fn test_package_local_classification() {
        let patch = Error::PatchFailed {
            package: "frob".to_string(),
            patch: "0001-fix.patch".to_string(),
            reason: "hunk rejected".to_string(),
        };
        assert!(patch.is_package_local());

        let cycle = Error::UnresolvableCycle {
            chain: "a -> b -> a".to_string(),
        };
        assert!(!cycle.is_package_local());
    }
}
