//! Container registry protocol clients.
//!
//! Every supported registry implements [`RegistryClient`], the surface the
//! enrichment jobs consume uniformly. Manifest pulls share one generic OCI
//! distribution fetch ([`OciClient`]) parameterised by an [`Authorizer`];
//! version discovery goes through each registry's own tag-listing API.
//!
//! | Registry | Manifests | Version discovery |
//! |----------|-----------|-------------------|
//! | Docker Hub | token exchange + OCI fetch | Hub REST tags, ordered by `last_updated` |
//! | GHCR | token exchange + OCI fetch | not available |
//! | GitLab | JWT exchange + OCI fetch | GraphQL tags, ordered by `publishedAt` |
//! | Quay | not available | REST tags, active only |
//!
//! Version discovery takes the first compatible, not-older tag from a
//! single page of most-recently-updated tags. A newer version whose tag was
//! last pushed before the page window is missed.

mod auth;
mod dockerhub;
mod ghcr;
mod gitlab;
mod oci;
mod quay;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tagscout_version::{Version, VersionError};
use thiserror::Error;
use tracing::debug;

use crate::reference::Reference;

pub use auth::{Authorizer, Credentials, NoAuth, StaticToken, TokenExchange};
pub use dockerhub::{DockerHubClient, DockerHubConfig, DockerHubOwner, DockerHubRepository, DockerHubTag};
pub use ghcr::{GhcrClient, GhcrConfig};
pub use gitlab::{GitLabClient, GitLabConfig, GitLabRepository, GitLabTag};
pub use oci::{OciClient, INDEX_MEDIA_TYPES, MANIFEST_MEDIA_TYPES};
pub use quay::{QuayClient, QuayConfig, QuayTag};

pub const DOCKER_HUB: &str = "docker.io";
pub const GHCR: &str = "ghcr.io";
pub const GITLAB: &str = "registry.gitlab.com";
pub const QUAY: &str = "quay.io";

const USER_AGENT: &str = concat!("tagscout/", env!("CARGO_PKG_VERSION"));

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unexpected status {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("token exchange failed: {0}")]
    Token(String),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("unsupported manifest schema version {0}")]
    UnsupportedSchemaVersion(u32),

    #[error("unsupported manifest media type '{0}'")]
    UnsupportedMediaType(String),

    #[error("unsupported registry domain '{0}'")]
    UnsupportedDomain(String),

    #[error("{registry} does not support {operation}")]
    UnsupportedOperation {
        registry: &'static str,
        operation: &'static str,
    },

    #[error("version error: {0}")]
    Version(#[from] VersionError),
}

impl RegistryError {
    /// Returns true if the registry reported the entity as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

/// Platform a manifest variant targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, rename = "os.version", skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}

/// One variant of an image, as listed in a manifest index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A discovered image version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub reference: Reference,
    pub published: Option<DateTime<Utc>>,
    pub digest: Option<String>,
}

/// Capability surface shared by all registries.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Short registry name for logging.
    fn name(&self) -> &'static str;

    /// Manifests of every platform variant of the referenced image.
    async fn get_manifests(&self, reference: &Reference) -> Result<Vec<Manifest>, RegistryError>;

    /// Newest compatible version of the referenced image.
    ///
    /// `Ok(None)` when the current tag is not a version or nothing newer or
    /// equal was found.
    async fn get_latest_version(&self, reference: &Reference)
        -> Result<Option<Image>, RegistryError>;
}

/// Configuration for all registry clients.
#[derive(Debug, Clone)]
pub struct RegistriesConfig {
    pub http_timeout: Duration,
    pub docker_hub: DockerHubConfig,
    pub ghcr: GhcrConfig,
    pub gitlab: GitLabConfig,
    pub quay: QuayConfig,
}

impl Default for RegistriesConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            docker_hub: DockerHubConfig::default(),
            ghcr: GhcrConfig::default(),
            gitlab: GitLabConfig::default(),
            quay: QuayConfig::default(),
        }
    }
}

/// Routes references to the client for their registry domain.
#[derive(Clone)]
pub struct Registries {
    docker_hub: Arc<DockerHubClient>,
    ghcr: Arc<GhcrClient>,
    gitlab: Arc<GitLabClient>,
    quay: Arc<QuayClient>,
}

impl Registries {
    /// Create every client, sharing one HTTP connection pool.
    pub fn new(config: &RegistriesConfig) -> Result<Self, RegistryError> {
        let client = http_client(config.http_timeout)?;
        Ok(Self {
            docker_hub: Arc::new(DockerHubClient::new(config.docker_hub.clone(), client.clone())),
            ghcr: Arc::new(GhcrClient::new(config.ghcr.clone(), client.clone())),
            gitlab: Arc::new(GitLabClient::new(config.gitlab.clone(), client.clone())),
            quay: Arc::new(QuayClient::new(config.quay.clone(), client)),
        })
    }

    /// Client for `reference`'s registry.
    pub fn client_for(
        &self,
        reference: &Reference,
    ) -> Result<Arc<dyn RegistryClient>, RegistryError> {
        let client: Arc<dyn RegistryClient> = match reference.domain() {
            DOCKER_HUB => self.docker_hub.clone(),
            GHCR => self.ghcr.clone(),
            GITLAB => self.gitlab.clone(),
            QUAY => self.quay.clone(),
            other => return Err(RegistryError::UnsupportedDomain(other.to_string())),
        };
        Ok(client)
    }

    pub fn docker_hub(&self) -> &Arc<DockerHubClient> {
        &self.docker_hub
    }

    pub fn gitlab(&self) -> &Arc<GitLabClient> {
        &self.gitlab
    }
}

/// Build the HTTP client used by every registry client.
pub fn http_client(timeout: Duration) -> Result<Client, RegistryError> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Map a non-success response to a [`RegistryError`].
pub(crate) async fn check_status(response: Response) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    match status {
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(url)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::Unauthorized(url)),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(RegistryError::Status {
                url,
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Parse the version of `reference`'s tag, or `None` if it has none to compare.
pub(crate) fn current_version(reference: &Reference) -> Result<Option<Version>, RegistryError> {
    let version = Version::parse(reference.version_tag())?;
    if version.is_none() {
        debug!(
            reference = %reference,
            tag = reference.version_tag(),
            "Tag is not a version, skipping discovery"
        );
    }
    Ok(version)
}

/// Tag or digest to request a manifest by.
pub(crate) fn manifest_reference(reference: &Reference) -> &str {
    reference
        .tag()
        .or(reference.digest())
        .unwrap_or(reference.version_tag())
}
