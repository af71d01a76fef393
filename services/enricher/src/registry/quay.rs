//! Quay.io: version discovery through the REST tag API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tagscout_version::select_candidate;
use tracing::{debug, info};

use super::{check_status, current_version, Image, Manifest, RegistryClient, RegistryError};
use crate::reference::Reference;

/// Configuration for the Quay client.
#[derive(Debug, Clone)]
pub struct QuayConfig {
    pub api_url: String,
    /// Tags fetched per discovery request.
    pub tag_page_size: u32,
}

impl Default for QuayConfig {
    fn default() -> Self {
        Self {
            api_url: "https://quay.io/api/v1".to_string(),
            tag_page_size: 100,
        }
    }
}

/// One active tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuayTag {
    pub name: String,
    #[serde(default)]
    pub manifest_digest: Option<String>,
    /// Unix seconds at which the tag started pointing at its manifest.
    #[serde(default)]
    pub start_ts: Option<i64>,
}

impl QuayTag {
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.start_ts.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    tags: Vec<QuayTag>,
}

/// Quay client.
pub struct QuayClient {
    config: QuayConfig,
    client: Client,
}

impl QuayClient {
    pub fn new(config: QuayConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// First page of active tags, most recent first.
    pub async fn list_tags(&self, reference: &Reference) -> Result<Vec<QuayTag>, RegistryError> {
        let url = format!("{}/repository/{}/tag/", self.config.api_url, reference.path());
        let limit = self.config.tag_page_size.to_string();

        debug!(url = %url, "Listing Quay tags");

        let request = self.client.get(&url).query(&[
            ("onlyActiveTags", "true"),
            ("limit", limit.as_str()),
            ("page", "1"),
        ]);
        let response = check_status(request.send().await?).await?;
        let page: TagPage = response.json().await?;
        Ok(page.tags)
    }
}

#[async_trait]
impl RegistryClient for QuayClient {
    fn name(&self) -> &'static str {
        "quay"
    }

    async fn get_manifests(&self, _reference: &Reference) -> Result<Vec<Manifest>, RegistryError> {
        Err(RegistryError::UnsupportedOperation {
            registry: "quay",
            operation: "manifest listing",
        })
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
            published: tag.published(),
            digest: tag.manifest_digest,
        });

        info!(
            reference = %reference,
            scanned = scanned,
            latest = ?latest.as_ref().map(|image| image.reference.to_string()),
            "Quay version discovery complete"
        );

        Ok(latest)
    }
}
