//! Docker Hub: token-exchanged manifest pulls plus the Hub REST API for
//! repository metadata, owners, and recency-ordered tags.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tagscout_version::select_candidate;
use tracing::{debug, info};

use super::{
    check_status, current_version, manifest_reference, Credentials, Image, Manifest, OciClient,
    RegistryClient, RegistryError, TokenExchange,
};
use crate::reference::Reference;

/// Configuration for the Docker Hub client.
#[derive(Debug, Clone)]
pub struct DockerHubConfig {
    /// Distribution API endpoint.
    pub registry_url: String,
    /// Hub REST API endpoint.
    pub hub_url: String,
    /// Token endpoint.
    pub auth_url: String,
    pub auth_service: String,
    /// Tags fetched per discovery request.
    pub tag_page_size: u32,
    /// Account used for the token exchange; anonymous when `None`.
    pub credentials: Option<Credentials>,
}

impl Default for DockerHubConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://registry-1.docker.io".to_string(),
            hub_url: "https://hub.docker.com".to_string(),
            auth_url: "https://auth.docker.io/token".to_string(),
            auth_service: "registry.docker.io".to_string(),
            tag_page_size: 100,
            credentials: None,
        }
    }
}

/// Repository metadata from the Hub API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerHubRepository {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub star_count: u64,
    #[serde(default)]
    pub pull_count: u64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_private: bool,
}

/// Organization or user owning a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerHubOwner {
    #[serde(alias = "orgname", alias = "username")]
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub gravatar_url: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// One entry of the tag listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerHubTag {
    pub name: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    results: Vec<DockerHubTag>,
}

/// Docker Hub client.
pub struct DockerHubClient {
    config: DockerHubConfig,
    client: Client,
    oci: OciClient,
    authorizer: TokenExchange,
}

impl DockerHubClient {
    pub fn new(config: DockerHubConfig, client: Client) -> Self {
        let mut authorizer = TokenExchange::new(
            client.clone(),
            config.auth_url.clone(),
            config.auth_service.clone(),
        );
        if let Some(credentials) = config.credentials.clone() {
            authorizer = authorizer.with_credentials(credentials);
        }
        Self {
            oci: OciClient::new(client.clone()),
            config,
            client,
            authorizer,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, RegistryError> {
        debug!(url = %url, "Docker Hub request");
        let response = check_status(self.client.get(url).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Repository metadata.
    pub async fn get_repository(
        &self,
        reference: &Reference,
    ) -> Result<DockerHubRepository, RegistryError> {
        let url = format!(
            "{}/v2/namespaces/{}/repositories/{}",
            self.config.hub_url,
            reference.namespace(),
            reference.repository()
        );
        self.get_json(&url).await
    }

    /// Owner metadata, looked up as an organization first and then as a user.
    pub async fn get_owner(&self, namespace: &str) -> Result<DockerHubOwner, RegistryError> {
        let url = format!("{}/v2/orgs/{}", self.config.hub_url, namespace);
        match self.get_json(&url).await {
            Err(e) if e.is_not_found() => {
                let url = format!("{}/v2/users/{}", self.config.hub_url, namespace);
                self.get_json(&url).await
            }
            result => result,
        }
    }

    /// First page of tags, most recently updated first.
    pub async fn list_tags(&self, reference: &Reference) -> Result<Vec<DockerHubTag>, RegistryError> {
        let url = format!(
            "{}/v2/namespaces/{}/repositories/{}/tags?page_size={}&ordering=last_updated",
            self.config.hub_url,
            reference.namespace(),
            reference.repository(),
            self.config.tag_page_size
        );
        let page: TagPage = self.get_json(&url).await?;
        Ok(page.results)
    }
}

#[async_trait]
impl RegistryClient for DockerHubClient {
    fn name(&self) -> &'static str {
        "docker-hub"
    }

    async fn get_manifests(&self, reference: &Reference) -> Result<Vec<Manifest>, RegistryError> {
        self.oci
            .get_manifest_index(
                &self.config.registry_url,
                reference.path(),
                manifest_reference(reference),
                &self.authorizer,
            )
            .await
    }

    async fn get_latest_version(
        &self,
        reference: &Reference,
    ) -> Result<Option<Image>, RegistryError> {
        let Some(current) = current_version(reference)? else {
            return Ok(None);
        };

        let tags = self.list_tags(reference).await?;
        let scanned = tags.len();
        let latest = select_candidate(&current, tags, |tag| tag.name.as_str()).map(|tag| Image {
            reference: reference.with_tag(&tag.name),
            published: tag.last_updated,
            digest: tag.digest,
        });

        info!(
            reference = %reference,
            scanned = scanned,
            latest = ?latest.as_ref().map(|image| image.reference.to_string()),
            "Docker Hub version discovery complete"
        );

        Ok(latest)
    }
}
