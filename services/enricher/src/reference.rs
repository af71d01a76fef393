//! Container image references.
//!
//! Parses references the way the Docker CLI does, including Docker Hub
//! normalisation:
//!
//! - `mongo:4` -> `docker.io/library/mongo:4`
//! - `ghcr.io/mongo/mongo:4` -> `ghcr.io/mongo/mongo:4`
//! - `localhost:5000/app@sha256:...` -> digest reference on a local registry

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical Docker Hub domain.
pub const DOCKER_HUB_DOMAIN: &str = "docker.io";

/// Tag implied when a reference has neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

static PATH_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid path component pattern")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("valid tag pattern"));

static DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[0-9a-fA-F]{32,}$").expect("valid digest pattern")
});

/// Errors from reference parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid image reference '{reference}': {reason}")]
    InvalidFormat { reference: String, reason: String },
}

impl ReferenceError {
    fn invalid(reference: &str, reason: impl Into<String>) -> Self {
        ReferenceError::InvalidFormat {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parsed image identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl Reference {
    /// Parse and normalise an image reference.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name_and_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !DIGEST.is_match(digest) {
                    return Err(ReferenceError::invalid(reference, "malformed digest"));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A colon after the last slash separates the tag; earlier colons are ports.
        let last_slash = name_and_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name_and_tag[split + 1..];
                if !TAG.is_match(tag) {
                    return Err(ReferenceError::invalid(reference, "malformed tag"));
                }
                (&name_and_tag[..split], Some(tag.to_string()))
            }
            None => (name_and_tag, None),
        };

        let (domain, path) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (normalize_domain(first), rest.to_string())
            }
            _ => (DOCKER_HUB_DOMAIN.to_string(), name.to_string()),
        };

        if domain.is_empty() || path.is_empty() {
            return Err(ReferenceError::invalid(reference, "missing repository name"));
        }

        let path = if domain == DOCKER_HUB_DOMAIN && !path.contains('/') {
            format!("library/{path}")
        } else {
            path
        };

        if let Some(component) = path.split('/').find(|c| !PATH_COMPONENT.is_match(c)) {
            return Err(ReferenceError::invalid(
                reference,
                format!("invalid path component '{component}'"),
            ));
        }

        Ok(Self {
            domain,
            path,
            tag,
            digest,
        })
    }

    /// Registry domain, e.g. `docker.io`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Repository path, e.g. `library/mongo`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The tag to resolve versions against; `latest` if none was given.
    pub fn version_tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// First path segment (the Docker Hub namespace or owner).
    pub fn namespace(&self) -> &str {
        self.path.split_once('/').map_or(&self.path, |(ns, _)| ns)
    }

    /// Path without the namespace.
    pub fn repository(&self) -> &str {
        self.path.split_once('/').map_or(&self.path, |(_, repo)| repo)
    }

    /// Same image with a different tag and no digest.
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            domain: self.domain.clone(),
            path: self.path.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    /// `domain/path` without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }
}

fn normalize_domain(domain: &str) -> String {
    match domain {
        "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB_DOMAIN.to_string(),
        other => other.to_string(),
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Reference {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const DIGEST: &str = "sha256:a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4";

    #[test]
    fn test_parse_docker_hub_library() {
        let reference = Reference::parse("mongo:4").unwrap();
        assert_eq!(reference.domain(), "docker.io");
        assert_eq!(reference.path(), "library/mongo");
        assert_eq!(reference.tag(), Some("4"));
        assert_eq!(reference.digest(), None);
    }

    #[test]
    fn test_parse_ghcr() {
        let reference = Reference::parse("ghcr.io/mongo/mongo:4").unwrap();
        assert_eq!(reference.domain(), "ghcr.io");
        assert_eq!(reference.path(), "mongo/mongo");
        assert_eq!(reference.tag(), Some("4"));
    }

    #[test]
    fn test_parse_no_tag_implies_latest() {
        let reference = Reference::parse("alpine").unwrap();
        assert_eq!(reference.tag(), None);
        assert_eq!(reference.version_tag(), "latest");
        assert_eq!(reference.to_string(), "docker.io/library/alpine");
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let reference = Reference::parse(&format!("nginx:1.25@{DIGEST}")).unwrap();
        assert_eq!(reference.tag(), Some("1.25"));
        assert_eq!(reference.digest(), Some(DIGEST));
    }

    #[test]
    fn test_parse_localhost_port() {
        let reference = Reference::parse("localhost:5000/myimage:dev").unwrap();
        assert_eq!(reference.domain(), "localhost:5000");
        assert_eq!(reference.path(), "myimage");
        assert_eq!(reference.tag(), Some("dev"));

        let untagged = Reference::parse("registry.example.com:5000/team/app").unwrap();
        assert_eq!(untagged.domain(), "registry.example.com:5000");
        assert_eq!(untagged.tag(), None);
    }

    #[rstest]
    #[case("index.docker.io/library/redis:7", "docker.io/library/redis:7")]
    #[case("registry-1.docker.io/bitnami/redis", "docker.io/bitnami/redis")]
    #[case("myuser/myapp:v1", "docker.io/myuser/myapp:v1")]
    #[case("registry.gitlab.com/group/sub/project:1.0", "registry.gitlab.com/group/sub/project:1.0")]
    fn test_normalisation(#[case] input: &str, #[case] canonical: &str) {
        assert_eq!(Reference::parse(input).unwrap().to_string(), canonical);
    }

    #[rstest]
    #[case("")]
    #[case("UPPER/case")]
    #[case("mongo:")]
    #[case("mongo@sha256:xyz")]
    #[case("ghcr.io/")]
    #[case("a//b")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(Reference::parse(input).is_err());
    }

    #[test]
    fn test_namespace_and_repository() {
        let reference = Reference::parse("bitnami/postgresql:16").unwrap();
        assert_eq!(reference.namespace(), "bitnami");
        assert_eq!(reference.repository(), "postgresql");
    }

    #[test]
    fn test_with_tag_drops_digest() {
        let reference = Reference::parse(&format!("nginx:1.25@{DIGEST}")).unwrap();
        let newer = reference.with_tag("1.26");
        assert_eq!(newer.to_string(), "docker.io/library/nginx:1.26");
    }

    #[test]
    fn test_serde_as_string() {
        let reference = Reference::parse("quay.io/prometheus/node-exporter:v1.7.0").unwrap();
        let json = serde_json::to_string(&reference).unwrap();
        assert_eq!(json, "\"quay.io/prometheus/node-exporter:v1.7.0\"");
        let back: Reference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reference);
    }
}
