//! Generic OCI distribution manifest fetch.
//!
//! Reference: https://github.com/opencontainers/distribution-spec

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{check_status, Authorizer, Manifest, RegistryError};

pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_IMAGE_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_IMAGE_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";

/// Multi-platform media types this client accepts as a response.
pub const INDEX_MEDIA_TYPES: [&str; 2] = [DOCKER_MANIFEST_LIST_V2, OCI_IMAGE_INDEX_V1];

/// Every media type listed in the `Accept` header.
pub const MANIFEST_MEDIA_TYPES: [&str; 4] = [
    DOCKER_MANIFEST_LIST_V2,
    OCI_IMAGE_INDEX_V1,
    DOCKER_MANIFEST_V2,
    OCI_IMAGE_MANIFEST_V1,
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestIndex {
    schema_version: u32,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<Manifest>,
}

/// OCI distribution client.
#[derive(Clone)]
pub struct OciClient {
    client: Client,
}

impl OciClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch the manifest index for `name:reference` from `endpoint`.
    ///
    /// Only multi-platform responses (Docker manifest list or OCI image
    /// index, schema version 2) are accepted; single-platform manifests fail
    /// with [`RegistryError::UnsupportedMediaType`].
    pub async fn get_manifest_index(
        &self,
        endpoint: &str,
        name: &str,
        reference: &str,
        authorizer: &dyn Authorizer,
    ) -> Result<Vec<Manifest>, RegistryError> {
        let url = format!("{}/v2/{}/manifests/{}", endpoint.trim_end_matches('/'), name, reference);

        debug!(url = %url, "Fetching manifest index");

        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, MANIFEST_MEDIA_TYPES.join(", "));

        if let Some(token) = authorizer.authorize(name).await? {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = check_status(request.send().await?).await?;

        // An OCI index may omit mediaType from the body.
        let header_media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());

        let body = response.bytes().await?;
        let index: ManifestIndex = serde_json::from_slice(&body)?;

        if index.schema_version != 2 {
            return Err(RegistryError::UnsupportedSchemaVersion(index.schema_version));
        }

        let media_type = index
            .media_type
            .or(header_media_type)
            .unwrap_or_default();
        if !INDEX_MEDIA_TYPES.contains(&media_type.as_str()) {
            return Err(RegistryError::UnsupportedMediaType(media_type));
        }

        debug!(
            url = %url,
            media_type = %media_type,
            count = index.manifests.len(),
            "Fetched manifest index"
        );

        Ok(index.manifests)
    }
}
