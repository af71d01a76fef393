//! GitHub releases, for attaching release notes to a discovered version.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::{check_status, RegistryError};

/// OCI annotation naming the source repository of an image.
pub const SOURCE_ANNOTATION: &str = "org.opencontainers.image.source";

/// Configuration for the GitHub client.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    /// Optional static token; raises the anonymous rate limit.
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: None,
        }
    }
}

/// A GitHub repository, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRepository {
    pub owner: String,
    pub name: String,
}

impl SourceRepository {
    /// Parse a `https://github.com/owner/repo[.git][/...]` URL.
    pub fn from_url(url: &str) -> Option<Self> {
        let rest = url
            .trim()
            .strip_prefix("https://github.com/")
            .or_else(|| url.trim().strip_prefix("http://github.com/"))
            .or_else(|| url.trim().strip_prefix("git@github.com:"))?;

        let mut parts = rest.split('/');
        let owner = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        let name = name.strip_suffix(".git").unwrap_or(name);

        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

/// Release notes for one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerelease: bool,
}

/// GitHub REST client.
pub struct GitHubClient {
    config: GitHubConfig,
    client: Client,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Release for `tag`, also trying the `v`-prefixed spelling.
    pub async fn get_release(
        &self,
        repository: &SourceRepository,
        tag: &str,
    ) -> Result<Option<Release>, RegistryError> {
        let mut candidates = vec![tag.to_string()];
        if !tag.starts_with('v') {
            candidates.push(format!("v{tag}"));
        }

        for candidate in candidates {
            let url = format!(
                "{}/repos/{}/{}/releases/tags/{}",
                self.config.api_url, repository.owner, repository.name, candidate
            );
            debug!(url = %url, "Fetching GitHub release");

            let mut request = self
                .client
                .get(&url)
                .header("Accept", "application/vnd.github+json");
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                continue;
            }
            let response = check_status(response).await?;
            return Ok(Some(response.json().await?));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[rstest]
    #[case("https://github.com/docker-library/mongo", Some(("docker-library", "mongo")))]
    #[case("https://github.com/grafana/grafana.git", Some(("grafana", "grafana")))]
    #[case("https://github.com/home-assistant/core/tree/dev", Some(("home-assistant", "core")))]
    #[case("git@github.com:owner/repo.git", Some(("owner", "repo")))]
    #[case("https://gitlab.com/group/project", None)]
    #[case("https://github.com/only-owner", None)]
    fn test_source_repository_from_url(#[case] url: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = SourceRepository::from_url(url);
        assert_eq!(
            parsed.as_ref().map(|r| (r.owner.as_str(), r.name.as_str())),
            expected
        );
    }

    #[tokio::test]
    async fn test_get_release_falls_back_to_v_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/grafana/grafana/releases/tags/10.4.2"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/grafana/grafana/releases/tags/v10.4.2"))
            .and(header("authorization", "Bearer gh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tag_name": "v10.4.2",
                "name": "10.4.2 (2024-04-10)",
                "body": "Bug fixes",
                "html_url": "https://github.com/grafana/grafana/releases/tag/v10.4.2",
                "published_at": "2024-04-10T12:00:00Z",
                "prerelease": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GitHubClient::new(
            GitHubConfig {
                api_url: server.uri(),
                token: Some("gh-token".to_string()),
            },
            Client::new(),
        );
        let repository = SourceRepository {
            owner: "grafana".to_string(),
            name: "grafana".to_string(),
        };
        let release = client.get_release(&repository, "10.4.2").await.unwrap().unwrap();
        assert_eq!(release.tag_name, "v10.4.2");
        assert_eq!(release.body.as_deref(), Some("Bug fixes"));
    }

    #[tokio::test]
    async fn test_get_release_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GitHubClient::new(
            GitHubConfig {
                api_url: server.uri(),
                token: None,
            },
            Client::new(),
        );
        let repository = SourceRepository {
            owner: "a".to_string(),
            name: "b".to_string(),
        };
        assert_eq!(client.get_release(&repository, "v1.0.0").await.unwrap(), None);
    }
}
