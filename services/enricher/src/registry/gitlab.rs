//! GitLab container registry.
//!
//! Repository identity and tags come from the GitLab GraphQL API; manifests
//! are pulled from the registry with a token from GitLab's JWT endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tagscout_version::select_candidate;
use tracing::{debug, info};

use super::{
    check_status, current_version, manifest_reference, Image, Manifest, OciClient, RegistryClient,
    RegistryError, TokenExchange,
};
use crate::reference::Reference;

const REPOSITORIES_QUERY: &str = r#"
query containerRepositories($fullPath: ID!, $name: String) {
  project(fullPath: $fullPath) {
    containerRepositories(name: $name) {
      nodes {
        id
        name
        path
        location
      }
    }
  }
}
"#;

const TAGS_QUERY: &str = r#"
query containerRepositoryTags($id: ContainerRepositoryID!, $first: Int!) {
  containerRepository(id: $id) {
    tags(first: $first, sort: PUBLISHED_AT_DESC) {
      nodes {
        name
        digest
        publishedAt
      }
    }
  }
}
"#;

/// Configuration for the GitLab client.
#[derive(Debug, Clone)]
pub struct GitLabConfig {
    pub registry_url: String,
    pub graphql_url: String,
    pub auth_url: String,
    pub auth_service: String,
    /// Optional token for the GraphQL API.
    pub api_token: Option<String>,
    /// Tags fetched per discovery request.
    pub tag_page_size: u32,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://registry.gitlab.com".to_string(),
            graphql_url: "https://gitlab.com/api/graphql".to_string(),
            auth_url: "https://gitlab.com/jwt/auth".to_string(),
            auth_service: "container_registry".to_string(),
            api_token: None,
            tag_page_size: 100,
        }
    }
}

/// A container repository of a GitLab project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLabRepository {
    /// Global ID, e.g. `gid://gitlab/ContainerRepository/42`.
    pub id: String,
    pub name: String,
    pub path: String,
    pub location: String,
    /// Full path of the owning project.
    #[serde(default)]
    pub project_path: String,
}

/// One tag of a container repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitLabTag {
    pub name: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a, V> {
    query: &'a str,
    variables: V,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ProjectData {
    project: Option<ProjectNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectNode {
    container_repositories: Nodes<GitLabRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryData {
    container_repository: Option<TagsNode>,
}

#[derive(Debug, Deserialize)]
struct TagsNode {
    tags: Nodes<GitLabTag>,
}

/// GitLab client.
pub struct GitLabClient {
    config: GitLabConfig,
    client: Client,
    oci: OciClient,
    authorizer: TokenExchange,
}

impl GitLabClient {
    pub fn new(config: GitLabConfig, client: Client) -> Self {
        let authorizer = TokenExchange::new(
            client.clone(),
            config.auth_url.clone(),
            config.auth_service.clone(),
        );
        Self {
            oci: OciClient::new(client.clone()),
            config,
            client,
            authorizer,
        }
    }

    async fn graphql<V: Serialize, T: DeserializeOwned>(
        &self,
        query: &str,
        variables: V,
    ) -> Result<Option<T>, RegistryError> {
        let mut request = self
            .client
            .post(&self.config.graphql_url)
            .json(&GraphQlRequest { query, variables });
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = check_status(request.send().await?).await?;
        let body: GraphQlResponse<T> = response.json().await?;

        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(RegistryError::GraphQl(messages.join("; ")));
        }
        Ok(body.data)
    }

    /// Find the container repository a reference points to.
    ///
    /// The project owning an image is ambiguous from the path alone (nested
    /// groups, images below the project root), so candidate project paths are
    /// tried from longest to shortest.
    pub async fn get_repository(
        &self,
        reference: &Reference,
    ) -> Result<GitLabRepository, RegistryError> {
        let segments: Vec<&str> = reference.path().split('/').collect();
        let shortest = segments.len().min(2);

        for split in (shortest..=segments.len()).rev() {
            let project_path = segments[..split].join("/");
            let image_name = segments[split..].join("/");
            let name = (!image_name.is_empty()).then_some(image_name.as_str());

            debug!(project = %project_path, image = %image_name, "Looking up GitLab container repository");

            let data: Option<ProjectData> = self
                .graphql(
                    REPOSITORIES_QUERY,
                    serde_json::json!({ "fullPath": project_path, "name": name }),
                )
                .await?;

            let Some(project) = data.and_then(|d| d.project) else {
                continue;
            };

            if let Some(mut repository) = project
                .container_repositories
                .nodes
                .into_iter()
                .find(|r| r.path == reference.path())
            {
                repository.project_path = project_path;
                return Ok(repository);
            }
        }

        Err(RegistryError::NotFound(reference.name()))
    }

    /// First page of tags, most recently published first.
    pub async fn list_tags(&self, repository_id: &str) -> Result<Vec<GitLabTag>, RegistryError> {
        let data: Option<RepositoryData> = self
            .graphql(
                TAGS_QUERY,
                serde_json::json!({ "id": repository_id, "first": self.config.tag_page_size }),
            )
            .await?;

        data.and_then(|d| d.container_repository)
            .map(|repository| repository.tags.nodes)
            .ok_or_else(|| RegistryError::NotFound(repository_id.to_string()))
    }
}

#[async_trait]
impl RegistryClient for GitLabClient {
    fn name(&self) -> &'static str {
        "gitlab"
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

        let repository = self.get_repository(reference).await?;
        let tags = self.list_tags(&repository.id).await?;
        let scanned = tags.len();
        let latest = select_candidate(&current, tags, |tag| tag.name.as_str()).map(|tag| Image {
            reference: reference.with_tag(&tag.name),
            published: tag.published_at,
            digest: tag.digest,
        });

        info!(
            reference = %reference,
            repository_id = %repository.id,
            scanned = scanned,
            latest = ?latest.as_ref().map(|image| image.reference.to_string()),
            "GitLab version discovery complete"
        );

        Ok(latest)
    }
}
