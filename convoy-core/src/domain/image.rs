//! Image tagging and the image-descriptor artifact
//!
//! The build stage hands exactly one file to the deploy stage:
//! `imagedefinitions.json`, a JSON array holding a single
//! `{"name": ..., "imageUri": ...}` object. Everything here exists to produce
//! and read that file consistently.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::source::SourceReference;

/// Literal tag used when no better tag can be derived
pub const LATEST_TAG: &str = "latest";

/// Well-known file name of the descriptor artifact
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

/// Number of commit-hash characters used as a tag
const COMMIT_TAG_LEN: usize = 7;

/// Errors reading or validating an image descriptor
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("invalid image definitions JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image definitions must hold exactly one entry, found {0}")]
    EntryCount(usize),

    #[error("image definition has an empty container name")]
    EmptyName,

    #[error("image URI '{0}' has no tag")]
    MissingTag(String),

    #[error("invalid image tag '{0}'")]
    InvalidTag(String),
}

/// A validated container image tag (never empty)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageTag(String);

impl ImageTag {
    /// The `latest` fallback tag
    pub fn latest() -> Self {
        Self(LATEST_TAG.to_string())
    }

    /// First seven characters of a commit hash, or `latest` when the hash is empty
    pub fn from_commit(commit_hash: &str) -> Result<Self, DescriptorError> {
        let prefix: String = commit_hash.chars().take(COMMIT_TAG_LEN).collect();
        if prefix.is_empty() {
            Ok(Self::latest())
        } else {
            Self::try_from(prefix)
        }
    }

    /// Tag for a registry-promoted image: the pipeline build number
    pub fn from_build_number(build_number: u64) -> Self {
        Self(build_number.to_string())
    }

    /// Computes the tag for a run
    ///
    /// VCS-sourced runs are tagged by commit, registry-sourced runs by the
    /// pipeline's build number.
    pub fn for_source(source: &SourceReference, build_number: u64) -> Result<Self, DescriptorError> {
        match source {
            SourceReference::Vcs { commit_hash, .. } => Self::from_commit(commit_hash),
            SourceReference::Registry { .. } => Ok(Self::from_build_number(build_number)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_latest(&self) -> bool {
        self.0 == LATEST_TAG
    }
}

impl TryFrom<String> for ImageTag {
    type Error = DescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let valid = !value.is_empty()
            && value.len() <= 128
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
            && !value.starts_with(['.', '-']);

        if valid {
            Ok(Self(value))
        } else {
            Err(DescriptorError::InvalidTag(value))
        }
    }
}

impl From<ImageTag> for String {
    fn from(tag: ImageTag) -> Self {
        tag.0
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of an image repository: `registry/repository`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryUri {
    pub registry: String,
    pub repository: String,
}

impl RepositoryUri {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            registry: registry.into().trim_end_matches('/').to_string(),
            repository: repository.into().trim_matches('/').to_string(),
        }
    }

    /// Full reference of this repository under `tag`
    pub fn image(&self, tag: &str) -> String {
        format!("{}:{}", self, tag)
    }
}

impl fmt::Display for RepositoryUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}

/// Names the image a service container must run
///
/// `name` is the container name inside the running service; the deploy
/// stage matches on it, so it must be exactly that name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub name: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

impl ImageDescriptor {
    pub fn new(name: impl Into<String>, repository: &RepositoryUri, tag: &ImageTag) -> Self {
        Self {
            name: name.into(),
            image_uri: repository.image(tag.as_str()),
        }
    }

    /// Tag part of the image URI, if there is one
    ///
    /// A `:` before the last `/` belongs to a registry port, not a tag.
    pub fn tag(&self) -> Option<&str> {
        let last_segment = self.image_uri.rsplit('/').next()?;
        let (_, tag) = last_segment.rsplit_once(':')?;
        (!tag.is_empty()).then_some(tag)
    }

    /// Serializes to the single-element array written as the build artifact
    pub fn to_definitions_json(&self) -> Result<String, DescriptorError> {
        self.validate()?;
        Ok(serde_json::to_string(std::slice::from_ref(self))?)
    }

    /// Parses and validates a build artifact
    pub fn from_definitions_json(json: &str) -> Result<Self, DescriptorError> {
        let mut entries: Vec<ImageDescriptor> = serde_json::from_str(json)?;
        if entries.len() != 1 {
            return Err(DescriptorError::EntryCount(entries.len()));
        }

        let descriptor = entries.remove(0);
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        if self.name.trim().is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        match self.tag() {
            Some(tag) => ImageTag::try_from(tag.to_string()).map(|_| ()),
            None => Err(DescriptorError::MissingTag(self.image_uri.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository() -> RepositoryUri {
        RepositoryUri::new(
            "123456789012.dkr.ecr.ap-northeast-2.amazonaws.com",
            "echo",
        )
    }

    #[test]
    fn test_commit_tag_is_seven_char_prefix() {
        assert_eq!(ImageTag::from_commit("a1b2c3d4e5f6").unwrap().as_str(), "a1b2c3d");
        assert_eq!(ImageTag::from_commit("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_empty_commit_falls_back_to_latest() {
        let tag = ImageTag::from_commit("").unwrap();
        assert!(tag.is_latest());
        assert_eq!(tag.as_str(), "latest");
    }

    #[test]
    fn test_tag_for_source() {
        let vcs = SourceReference::Vcs {
            branch: "main".to_string(),
            commit_hash: "0123456789abcdef".to_string(),
        };
        let registry = SourceReference::Registry {
            image_tag: "latest".to_string(),
            digest: None,
        };

        assert_eq!(ImageTag::for_source(&vcs, 42).unwrap().as_str(), "0123456");
        assert_eq!(ImageTag::for_source(&registry, 42).unwrap().as_str(), "42");
    }

    #[test]
    fn test_commit_with_tag_unsafe_characters_is_rejected() {
        let err = ImageTag::from_commit("ab$cd!ef").unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidTag(tag) if tag == "ab$cd!e"));

        let vcs = SourceReference::Vcs {
            branch: "main".to_string(),
            commit_hash: "HEAD; rm".to_string(),
        };
        assert!(ImageTag::for_source(&vcs, 1).is_err());
    }

    #[test]
    fn test_definitions_file_shape() {
        let tag = ImageTag::from_commit("a1b2c3d4").unwrap();
        let descriptor = ImageDescriptor::new("echo", &repository(), &tag);
        let json = descriptor.to_definitions_json().unwrap();

        assert_eq!(
            json,
            r#"[{"name":"echo","imageUri":"123456789012.dkr.ecr.ap-northeast-2.amazonaws.com/echo:a1b2c3d"}]"#
        );

        let parsed = ImageDescriptor::from_definitions_json(&json).unwrap();
        assert_eq!(parsed, descriptor);
    }

    #[test]
    fn test_definitions_reject_wrong_entry_count() {
        let err = ImageDescriptor::from_definitions_json("[]").unwrap_err();
        assert!(matches!(err, DescriptorError::EntryCount(0)));

        let two = r#"[{"name":"a","imageUri":"r/a:1"},{"name":"b","imageUri":"r/b:1"}]"#;
        let err = ImageDescriptor::from_definitions_json(two).unwrap_err();
        assert!(matches!(err, DescriptorError::EntryCount(2)));
    }

    #[test]
    fn test_definitions_reject_untagged_uri() {
        let json = r#"[{"name":"echo","imageUri":"localhost:5000/echo"}]"#;
        let err = ImageDescriptor::from_definitions_json(json).unwrap_err();
        assert!(matches!(err, DescriptorError::MissingTag(_)));
    }

    #[test]
    fn test_tag_ignores_registry_port() {
        let descriptor = ImageDescriptor {
            name: "echo".to_string(),
            image_uri: "localhost:5000/team/echo:17".to_string(),
        };
        assert_eq!(descriptor.tag(), Some("17"));
    }

    #[test]
    fn test_invalid_tag_rejected() {
        assert!(ImageTag::try_from(String::new()).is_err());
        assert!(ImageTag::try_from("has space".to_string()).is_err());
        assert!(ImageTag::try_from("-lead".to_string()).is_err());
        assert!(ImageTag::try_from("v1.2_rc-3".to_string()).is_ok());
    }
}
