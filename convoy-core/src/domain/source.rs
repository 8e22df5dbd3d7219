//! Source domain types
//!
//! A pipeline watches exactly one kind of source, chosen when it is deployed.
//! The resolved [`SourceReference`] pins the change a run builds from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of artifact source a pipeline is wired to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Version-control repository, pinned to a branch
    Vcs,
    /// Container registry repository, pinned to the `latest` tag
    Registry,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Vcs => write!(f, "vcs"),
            SourceKind::Registry => write!(f, "registry"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vcs" | "git" => Ok(SourceKind::Vcs),
            "registry" => Ok(SourceKind::Registry),
            other => Err(format!(
                "unknown source kind '{}' (expected 'vcs' or 'registry')",
                other
            )),
        }
    }
}

/// Resolved reference to the change a run builds from
///
/// Immutable once resolved: the build stage derives the image tag from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceReference {
    Vcs {
        branch: String,
        #[serde(rename = "commitHash")]
        commit_hash: String,
    },
    Registry {
        #[serde(rename = "imageTag")]
        image_tag: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
    },
}

impl SourceReference {
    /// Returns the discriminant of this reference
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceReference::Vcs { .. } => SourceKind::Vcs,
            SourceReference::Registry { .. } => SourceKind::Registry,
        }
    }

    /// The value that identifies this exact change
    ///
    /// Commit hash for VCS sources, image digest (or the tag when no digest
    /// was read) for registry sources.
    pub fn revision(&self) -> &str {
        match self {
            SourceReference::Vcs { commit_hash, .. } => commit_hash,
            SourceReference::Registry {
                image_tag, digest, ..
            } => digest.as_deref().unwrap_or(image_tag),
        }
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceReference::Vcs {
                branch,
                commit_hash,
            } => write!(f, "{}@{}", branch, commit_hash),
            SourceReference::Registry { image_tag, digest } => match digest {
                Some(digest) => write!(f, "{} ({})", image_tag, digest),
                None => write!(f, "{}", image_tag),
            },
        }
    }
}

/// Whether `value` is a full or abbreviated git commit hash (7 to 40 hex digits)
pub fn is_commit_hash(value: &str) -> bool {
    (7..=40).contains(&value.len()) && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Event that starts a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Source version resolved by whoever fired the trigger (e.g. a commit hash)
    #[serde(default)]
    pub source_version: Option<String>,
}

impl Trigger {
    /// A trigger pinned to an already-resolved source version
    pub fn pinned(version: impl Into<String>) -> Self {
        Self {
            source_version: Some(version.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_reference_wire_shape() {
        let reference = SourceReference::Vcs {
            branch: "main".to_string(),
            commit_hash: "a1b2c3d4e5f6".to_string(),
        };

        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["kind"], "vcs");
        assert_eq!(json["commitHash"], "a1b2c3d4e5f6");

        let registry: SourceReference =
            serde_json::from_str(r#"{"kind":"registry","imageTag":"latest"}"#).unwrap();
        assert_eq!(registry.kind(), SourceKind::Registry);
        assert_eq!(registry.revision(), "latest");
    }

    #[test]
    fn test_source_kind_parse() {
        assert_eq!("VCS".parse::<SourceKind>().unwrap(), SourceKind::Vcs);
        assert_eq!(
            "registry".parse::<SourceKind>().unwrap(),
            SourceKind::Registry
        );
        assert!("s3".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_commit_hash_shape() {
        assert!(is_commit_hash("a1b2c3d"));
        assert!(is_commit_hash("0123456789abcdef0123456789ABCDEF01234567"));
        assert!(!is_commit_hash("a1b2c3"));
        assert!(!is_commit_hash("HEAD; touch pwned"));
        assert!(!is_commit_hash("ab$cd!ef"));
        assert!(!is_commit_hash(&"a".repeat(41)));
    }

    #[test]
    fn test_registry_revision_prefers_digest() {
        let reference = SourceReference::Registry {
            image_tag: "latest".to_string(),
            digest: Some("sha256:abc".to_string()),
        };
        assert_eq!(reference.revision(), "sha256:abc");
    }
}
