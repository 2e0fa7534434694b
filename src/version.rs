// src/version.rs

//! Version handling and constraint satisfaction for package dependencies
//!
//! Versions follow the `[epoch!]release[+local]` shape used by source
//! package indexes. The release component is compared numerically segment
//! by segment (via semver where it parses cleanly), the local segment is
//! compared per dotted part with numeric parts ordered numerically.

use crate::error::{Error, Result};
use semver::Version as SemVersion;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A parsed package version with epoch, release, and local components
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageVersion {
    pub epoch: u64,
    pub release: String,
    pub local: Option<String>,
}

impl PackageVersion {
    /// Parse a version string
    ///
    /// Format: [epoch!]release[+local]
    /// Examples:
    /// - "3.12.0" → epoch=0, release="3.12.0", local=None
    /// - "1!2.0" → epoch=1, release="2.0", local=None
    /// - "2.7.1+cu118" → epoch=0, release="2.7.1", local=Some("cu118")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch_str, rest) = match s.find('!') {
            Some(pos) => (&s[..pos], &s[pos + 1..]),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str
                .parse::<u64>()
                .map_err(|e| Error::InvalidVersion(s.to_string(), format!("bad epoch: {e}")))?
        };

        let (release, local) = match rest.find('+') {
            Some(pos) => (rest[..pos].to_string(), Some(rest[pos + 1..].to_string())),
            None => (rest.to_string(), None),
        };

        if release.is_empty() {
            return Err(Error::InvalidVersion(
                s.to_string(),
                "empty release component".to_string(),
            ));
        }
        if let Some(ref l) = local {
            if l.is_empty() {
                return Err(Error::InvalidVersion(
                    s.to_string(),
                    "empty local segment".to_string(),
                ));
            }
        }

        Ok(Self {
            epoch,
            release,
            local,
        })
    }

    /// Extend the version with a local-version label.
    ///
    /// Appending to a version with no local segment uses `+`; appending to
    /// a version that already has one uses `.`, the canonical separator
    /// for segments of the local version string. No label is a no-op.
    pub fn with_local_label(&self, label: Option<&str>) -> PackageVersion {
        let label = match label {
            Some(l) => l,
            None => return self.clone(),
        };
        let local = match &self.local {
            None => label.to_string(),
            Some(existing) => format!("{existing}.{label}"),
        };
        PackageVersion {
            epoch: self.epoch,
            release: self.release.clone(),
            local: Some(local),
        }
    }

    /// Convert the release component to a semver::Version for comparison
    ///
    /// Not every release is semver-compliant, so we normalize: if it parses
    /// directly we use it, otherwise we extract up to three numeric
    /// dotted segments.
    fn to_semver(&self) -> SemVersion {
        if let Ok(v) = SemVersion::parse(&self.release) {
            return v;
        }
        let parts: Vec<&str> = self.release.split('.').collect();
        let major = parts
            .first()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        let minor = parts.get(1).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        let patch = parts.get(2).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        SemVersion::new(major, minor, patch)
    }

    /// Compare two versions: epoch, then release, then local segment
    pub fn compare(&self, other: &PackageVersion) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match self.to_semver().cmp(&other.to_semver()) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match compare_local(self.local.as_deref(), other.local.as_deref()) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Fall back to the raw strings so ordering stays consistent with
        // structural equality ("1.0" and "1.0.0" must not collapse into
        // one map key).
        match self.release.cmp(&other.release) {
            Ordering::Equal => {}
            ord => return ord,
        }
        self.local.cmp(&other.local)
    }
}

/// Compare local segments part by part; absent sorts before present
fn compare_local(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let mut left = a.split('.');
            let mut right = b.split('.');
            loop {
                match (left.next(), right.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some(l), Some(r)) => {
                        let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                            (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                            _ => l.cmp(r),
                        };
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                }
            }
        }
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}!", self.epoch)?;
        }
        write!(f, "{}", self.release)?;
        if let Some(ref local) = self.local {
            write!(f, "+{}", local)?;
        }
        Ok(())
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TryFrom<String> for PackageVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        PackageVersion::parse(&s)
    }
}

impl From<PackageVersion> for String {
    fn from(v: PackageVersion) -> String {
        v.to_string()
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    /// Exact version match
    Exact(PackageVersion),
    /// Greater than
    GreaterThan(PackageVersion),
    /// Greater than or equal
    GreaterOrEqual(PackageVersion),
    /// Less than
    LessThan(PackageVersion),
    /// Less than or equal
    LessOrEqual(PackageVersion),
    /// Not equal
    NotEqual(PackageVersion),
    /// All constraints must be satisfied (for ranges like ">=1.0,<2.0")
    All(Vec<VersionConstraint>),
}

impl VersionConstraint {
    /// Parse a constraint expression
    ///
    /// Examples:
    /// - "" or "*" → Any
    /// - "==1.5.0" → Exact(1.5.0)
    /// - ">=1.0,<2.0" → All([GreaterOrEqual(1.0), LessThan(2.0)])
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if s.contains(',') {
            let parts = s
                .split(',')
                .map(|p| Self::parse(p.trim()))
                .collect::<Result<Vec<_>>>()?;
            return Ok(VersionConstraint::All(parts));
        }

        if let Some(rest) = s.strip_prefix("==") {
            Ok(VersionConstraint::Exact(PackageVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("!=") {
            Ok(VersionConstraint::NotEqual(PackageVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(PackageVersion::parse(
                rest,
            )?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionConstraint::LessOrEqual(PackageVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionConstraint::GreaterThan(PackageVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionConstraint::LessThan(PackageVersion::parse(rest)?))
        } else {
            Err(Error::InvalidRequirement(
                s.to_string(),
                "unknown constraint operator".to_string(),
            ))
        }
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &PackageVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version.compare(v) == Ordering::Equal,
            VersionConstraint::NotEqual(v) => version.compare(v) != Ordering::Equal,
            VersionConstraint::GreaterThan(v) => version.compare(v) == Ordering::Greater,
            VersionConstraint::GreaterOrEqual(v) => version.compare(v) != Ordering::Less,
            VersionConstraint::LessThan(v) => version.compare(v) == Ordering::Less,
            VersionConstraint::LessOrEqual(v) => version.compare(v) != Ordering::Greater,
            VersionConstraint::All(parts) => parts.iter().all(|c| c.satisfies(version)),
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => Ok(()),
            VersionConstraint::Exact(v) => write!(f, "=={v}"),
            VersionConstraint::NotEqual(v) => write!(f, "!={v}"),
            VersionConstraint::GreaterThan(v) => write!(f, ">{v}"),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">={v}"),
            VersionConstraint::LessThan(v) => write!(f, "<{v}"),
            VersionConstraint::LessOrEqual(v) => write!(f, "<={v}"),
            VersionConstraint::All(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let v = PackageVersion::parse("3.12.0").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.release, "3.12.0");
        assert_eq!(v.local, None);
    }

    #[test]
    fn test_parse_with_epoch() {
        let v = PackageVersion::parse("1!2.0").unwrap();
        assert_eq!(v.epoch, 1);
        assert_eq!(v.release, "2.0");
    }

    #[test]
    fn test_parse_with_local() {
        let v = PackageVersion::parse("2.7.1+cu118").unwrap();
        assert_eq!(v.release, "2.7.1");
        assert_eq!(v.local, Some("cu118".to_string()));
    }

    #[test]
    fn test_parse_rejects_empty_release() {
        assert!(PackageVersion::parse("").is_err());
        assert!(PackageVersion::parse("1!").is_err());
    }

    #[test]
    fn test_local_label_appends_with_plus() {
        let v = PackageVersion::parse("1.2.3").unwrap();
        let tagged = v.with_local_label(Some("rebuild1"));
        assert_eq!(tagged.to_string(), "1.2.3+rebuild1");
    }

    #[test]
    fn test_local_label_appends_with_dot_when_local_exists() {
        let v = PackageVersion::parse("1.2.3+cu118").unwrap();
        let tagged = v.with_local_label(Some("rebuild1"));
        assert_eq!(tagged.to_string(), "1.2.3+cu118.rebuild1");
    }

    #[test]
    fn test_local_label_none_is_noop() {
        let v = PackageVersion::parse("1.2.3+cu118").unwrap();
        assert_eq!(v.with_local_label(None), v);
    }

    #[test]
    fn test_compare_epoch_wins() {
        let v1 = PackageVersion::parse("1!1.0").unwrap();
        let v2 = PackageVersion::parse("2.0").unwrap();
        assert!(v1 > v2);
    }

    #[test]
    fn test_compare_releases() {
        let v1 = PackageVersion::parse("3.12.0").unwrap();
        let v2 = PackageVersion::parse("80.8.0").unwrap();
        assert!(v1 < v2);
    }

    #[test]
    fn test_compare_local_numeric_parts() {
        let v1 = PackageVersion::parse("1.0+build.2").unwrap();
        let v2 = PackageVersion::parse("1.0+build.10").unwrap();
        assert!(v1 < v2);
    }

    #[test]
    fn test_plain_sorts_before_local() {
        let v1 = PackageVersion::parse("1.0").unwrap();
        let v2 = PackageVersion::parse("1.0+rebuild1").unwrap();
        assert!(v1 < v2);
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["3.12.0", "1!2.0", "2.7.1+cu118", "1!1.0+a.2"] {
            assert_eq!(PackageVersion::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_constraint_exact() {
        let c = VersionConstraint::parse("==1.5.0").unwrap();
        assert!(c.satisfies(&PackageVersion::parse("1.5.0").unwrap()));
        assert!(!c.satisfies(&PackageVersion::parse("1.5.1").unwrap()));
    }

    #[test]
    fn test_constraint_range() {
        let c = VersionConstraint::parse(">=1.0,<2.0").unwrap();
        assert!(c.satisfies(&PackageVersion::parse("1.5").unwrap()));
        assert!(!c.satisfies(&PackageVersion::parse("2.0").unwrap()));
        assert!(!c.satisfies(&PackageVersion::parse("0.9").unwrap()));
    }

    #[test]
    fn test_constraint_any() {
        let c = VersionConstraint::parse("").unwrap();
        assert!(c.satisfies(&PackageVersion::parse("99.0").unwrap()));
    }

    #[test]
    fn test_constraint_display() {
        let c = VersionConstraint::parse(">=1.0,<2.0").unwrap();
        assert_eq!(c.to_string(), ">=1.0,<2.0");
    }
}
