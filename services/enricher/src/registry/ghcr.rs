//! GitHub Container Registry.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{
    manifest_reference, Image, Manifest, OciClient, RegistryClient, RegistryError, TokenExchange,
};
use crate::reference::Reference;

/// Configuration for the GHCR client.
#[derive(Debug, Clone)]
pub struct GhcrConfig {
    pub registry_url: String,
    pub auth_url: String,
    pub auth_service: String,
}

impl Default for GhcrConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://ghcr.io".to_string(),
            auth_url: "https://ghcr.io/token".to_string(),
            auth_service: "ghcr.io".to_string(),
        }
    }
}

/// GHCR client. Manifests only; GHCR has no anonymous tag-discovery API.
pub struct GhcrClient {
    config: GhcrConfig,
    oci: OciClient,
    authorizer: TokenExchange,
}

impl GhcrClient {
    pub fn new(config: GhcrConfig, client: Client) -> Self {
        let authorizer = TokenExchange::new(
            client.clone(),
            config.auth_url.clone(),
            config.auth_service.clone(),
        );
        Self {
            oci: OciClient::new(client),
            config,
            authorizer,
        }
    }
}

#[async_trait]
impl RegistryClient for GhcrClient {
    fn name(&self) -> &'static str {
        "ghcr"
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
        debug!(reference = %reference, "GHCR has no version discovery");
        Ok(None)
    }
}
