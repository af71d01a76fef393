//! Pull authorization for registry requests.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{check_status, RegistryError};

/// Supplies the bearer token for pulling from a repository.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Bearer token for `name`, or `None` to send the request anonymously.
    async fn authorize(&self, name: &str) -> Result<Option<String>, RegistryError>;
}

/// Anonymous access.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl Authorizer for NoAuth {
    async fn authorize(&self, _name: &str) -> Result<Option<String>, RegistryError> {
        Ok(None)
    }
}

/// A fixed, pre-issued bearer token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl Authorizer for StaticToken {
    async fn authorize(&self, _name: &str) -> Result<Option<String>, RegistryError> {
        Ok(Some(self.0.clone()))
    }
}

/// Username and password for a registry token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Exchanges (anonymous or basic) credentials for a repository-scoped
/// pull token at a registry token endpoint.
#[derive(Clone)]
pub struct TokenExchange {
    client: Client,
    realm: String,
    service: String,
    credentials: Option<Credentials>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl TokenExchange {
    /// Anonymous exchange against `realm` for `service`.
    pub fn new(client: Client, realm: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            client,
            realm: realm.into(),
            service: service.into(),
            credentials: None,
        }
    }

    /// Authenticate the exchange with basic credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[async_trait]
impl Authorizer for TokenExchange {
    async fn authorize(&self, name: &str) -> Result<Option<String>, RegistryError> {
        let scope = format!("repository:{name}:pull");
        debug!(realm = %self.realm, service = %self.service, scope = %scope, "Exchanging token");

        let mut request = self
            .client
            .get(&self.realm)
            .query(&[("service", self.service.as_str()), ("scope", scope.as_str())]);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = check_status(request.send().await?).await?;
        let body: TokenResponse = response.json().await?;

        body.token
            .or(body.access_token)
            .filter(|token| !token.is_empty())
            .map(Some)
            .ok_or_else(|| RegistryError::Token(format!("no token returned for {scope}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_no_auth_and_static_token() {
        assert_eq!(NoAuth.authorize("library/mongo").await.unwrap(), None);
        assert_eq!(
            StaticToken::new("abc").authorize("x").await.unwrap(),
            Some("abc".to_string())
        );
    }

    #[tokio::test]
    async fn test_token_exchange_scopes_to_repository() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("service", "registry.docker.io"))
            .and(query_param("scope", "repository:library/mongo:pull"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "pull-token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = TokenExchange::new(
            Client::new(),
            format!("{}/token", server.uri()),
            "registry.docker.io",
        );
        let token = exchange.authorize("library/mongo").await.unwrap();
        assert_eq!(token, Some("pull-token".to_string()));
    }

    #[tokio::test]
    async fn test_token_exchange_accepts_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "oauth-style"
            })))
            .mount(&server)
            .await;

        let exchange = TokenExchange::new(Client::new(), format!("{}/token", server.uri()), "svc");
        assert_eq!(
            exchange.authorize("a/b").await.unwrap(),
            Some("oauth-style".to_string())
        );
    }

    #[tokio::test]
    async fn test_token_exchange_without_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let exchange = TokenExchange::new(Client::new(), format!("{}/token", server.uri()), "svc");
        assert!(matches!(
            exchange.authorize("a/b").await,
            Err(RegistryError::Token(_))
        ));
    }

    #[tokio::test]
    async fn test_token_exchange_sends_basic_credentials() {
        let server = MockServer::start().await;
        // base64("user:pass")
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "private"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = TokenExchange::new(Client::new(), format!("{}/token", server.uri()), "svc")
            .with_credentials(Credentials {
                username: "user".to_string(),
                password: "pass".to_string(),
            });
        assert_eq!(
            exchange.authorize("someone/private").await.unwrap(),
            Some("private".to_string())
        );
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "user".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }
}
