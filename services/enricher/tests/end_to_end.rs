//! Full enrichment runs against mock registries.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use reqwest::Client;
use serde_json::json;
use tagscout_cache::{Cache, CacheConfig};
use tagscout_enricher::github::{GitHubClient, GitHubConfig};
use tagscout_enricher::jobs::{build_pipeline, CacheTtls, ImageRecord, PipelineDeps, RepositoryInfo};
use tagscout_enricher::pipeline::{ExecutionContext, JobError, Pipeline};
use tagscout_enricher::reference::Reference;
use tagscout_enricher::registry::{
    DockerHubConfig, QuayConfig, Registries, RegistriesConfig, RegistryError,
};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    _dir: TempDir,
    cache: Arc<Cache>,
    pipeline: Pipeline<ImageRecord>,
}

async fn harness(server: &MockServer) -> Harness {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(
        Cache::open(dir.path().join("cache.db"), CacheConfig::default())
            .await
            .unwrap(),
    );

    let config = RegistriesConfig {
        docker_hub: DockerHubConfig {
            registry_url: server.uri(),
            hub_url: server.uri(),
            auth_url: format!("{}/token", server.uri()),
            ..Default::default()
        },
        quay: QuayConfig {
            api_url: format!("{}/api/v1", server.uri()),
            ..Default::default()
        },
        ..Default::default()
    };
    let deps = PipelineDeps {
        registries: Registries::new(&config).unwrap(),
        github: Arc::new(GitHubClient::new(
            GitHubConfig {
                api_url: server.uri(),
                token: None,
            },
            Client::new(),
        )),
        ttls: CacheTtls::default(),
    };

    Harness {
        pipeline: Pipeline::new(build_pipeline(&deps), Arc::clone(&cache)),
        cache,
        _dir: dir,
    }
}

/// Every upstream call of a Docker Hub image, each allowed exactly once.
async fn mount_docker_hub(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("scope", "repository:library/mongo:pull"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "anon" })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/library/mongo/manifests/4.4.0"))
        .and(header("authorization", "Bearer anon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": [
                {
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "digest": "sha256:amd64",
                    "size": 1024,
                    "platform": { "architecture": "amd64", "os": "linux" },
                    "annotations": {
                        "org.opencontainers.image.source": "https://github.com/docker-library/mongo"
                    }
                },
                {
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "digest": "sha256:arm64",
                    "size": 1024,
                    "platform": { "architecture": "arm64", "os": "linux", "variant": "v8" }
                }
            ]
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/namespaces/library/repositories/mongo/tags"))
        .and(query_param("ordering", "last_updated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 5,
            "results": [
                { "name": "latest", "last_updated": "2024-05-02T00:00:00Z" },
                { "name": "7.0.5-jammy", "last_updated": "2024-05-01T00:00:00Z" },
                { "name": "7.0", "last_updated": "2024-05-01T00:00:00Z" },
                { "name": "7.0.5", "last_updated": "2024-05-01T00:00:00Z", "digest": "sha256:705" },
                { "name": "4.4.0", "last_updated": "2020-07-30T00:00:00Z" }
            ]
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/namespaces/library/repositories/mongo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "mongo",
            "namespace": "library",
            "description": "MongoDB document databases",
            "star_count": 10000,
            "pull_count": 1000000000u64,
            "last_updated": "2024-05-02T00:00:00Z",
            "is_private": false
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/orgs/library"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orgname": "library",
            "full_name": "Docker Official Images",
            "type": "Organization"
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/docker-library/mongo/releases/tags/7.0.5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tag_name": "7.0.5",
            "name": "7.0.5",
            "body": "Fixes",
            "html_url": "https://github.com/docker-library/mongo/releases/tag/7.0.5",
            "published_at": "2024-05-01T00:00:00Z",
            "prerelease": false
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_cold_then_warm_run() {
    let server = MockServer::start().await;
    mount_docker_hub(&server).await;
    let harness = harness(&server).await;
    let reference = Reference::parse("mongo:4.4.0").unwrap();

    let (cold, result) = harness
        .pipeline
        .run(ExecutionContext::background(), ImageRecord::new(reference.clone()))
        .await;
    result.unwrap();

    assert_eq!(cold.manifests.len(), 2);
    let latest = cold.latest.as_ref().unwrap();
    assert_eq!(latest.reference.tag(), Some("7.0.5"));
    assert_eq!(latest.digest.as_deref(), Some("sha256:705"));
    assert!(cold.has_update());
    assert!(matches!(&cold.repository, Some(RepositoryInfo::DockerHub(r)) if r.star_count == 10000));
    assert_eq!(cold.owner.as_ref().unwrap().name, "library");
    assert_eq!(cold.source_repository.as_ref().unwrap().owner, "docker-library");
    assert_eq!(cold.release_notes.as_ref().unwrap().body.as_deref(), Some("Fixes"));

    for key in [
        "manifests:docker.io/library/mongo:4.4.0",
        "latest:docker.io/library/mongo:4.4.0",
        "dockerhub:repository:library/mongo",
        "dockerhub:owner:library",
        "github:release:docker-library/mongo@7.0.5",
    ] {
        assert!(harness.cache.has(key).await.unwrap(), "missing cache entry {key}");
    }

    let (warm, result) = harness
        .pipeline
        .run(ExecutionContext::background(), ImageRecord::new(reference))
        .await;
    result.unwrap();

    assert_eq!(warm, cold);
    assert_eq!(harness.cache.stats().hits.load(Ordering::Relaxed), 5);

    harness.cache.close().await.unwrap();
    // Dropping the server verifies every mock was hit exactly once.
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repository/prometheus/node-exporter/tag/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tags": [{ "name": "v1.8.0", "manifest_digest": "sha256:180", "start_ts": 1714500000 }]
        })))
        .expect(2)
        .mount(&server)
        .await;
    let harness = harness(&server).await;
    let reference = Reference::parse("quay.io/prometheus/node-exporter:v1.7.0").unwrap();

    let (first, result) = harness
        .pipeline
        .run(ExecutionContext::background(), ImageRecord::new(reference.clone()))
        .await;
    result.unwrap();
    assert_eq!(first.latest.unwrap().reference.tag(), Some("v1.8.0"));

    // Backdate the entry so it is past expiry without waiting for a sweep
    let key = "latest:quay.io/prometheus/node-exporter:v1.7.0";
    let stored = harness.cache.get(key).await.unwrap();
    let past = chrono::Utc::now() - chrono::Duration::minutes(1);
    harness.cache.set(key, stored, Some(past)).await.unwrap();

    let (second, result) = harness
        .pipeline
        .run(ExecutionContext::background(), ImageRecord::new(reference))
        .await;
    result.unwrap();
    assert_eq!(second.latest.unwrap().reference.tag(), Some("v1.8.0"));

    harness.cache.close().await.unwrap();
}

#[tokio::test]
async fn test_quay_without_manifests_is_partial_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/repository/prometheus/node-exporter/tag/"))
        .and(query_param("onlyActiveTags", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tags": [] })))
        .expect(1)
        .mount(&server)
        .await;
    let harness = harness(&server).await;

    let reference = Reference::parse("quay.io/prometheus/node-exporter:v1.7.0").unwrap();
    let (record, result) = harness
        .pipeline
        .run(ExecutionContext::background(), ImageRecord::new(reference))
        .await;

    result.unwrap();
    assert!(record.manifests.is_empty());
    assert_eq!(record.latest, None);
    assert_eq!(record.release_notes, None);

    harness.cache.close().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_domain_fails_the_run() {
    let server = MockServer::start().await;
    let harness = harness(&server).await;

    let reference = Reference::parse("gcr.io/project/image:1.0.0").unwrap();
    let (record, result) = harness
        .pipeline
        .run(ExecutionContext::background(), ImageRecord::new(reference.clone()))
        .await;

    assert_eq!(record.reference, reference);
    let err = result.unwrap_err();
    assert!(err.leaves().iter().all(|e| matches!(
        e,
        JobError::Registry(RegistryError::UnsupportedDomain(domain)) if domain == "gcr.io"
    )));
    assert!(server.received_requests().await.unwrap().is_empty());

    harness.cache.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_repository_is_soft() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let harness = harness(&server).await;

    // Token exchange 404s: manifests fail as not found, which is soft
    let reference = Reference::parse("someone/gone:1.0.0").unwrap();
    let (record, result) = harness
        .pipeline
        .run(ExecutionContext::background(), ImageRecord::new(reference))
        .await;

    result.unwrap();
    assert!(record.manifests.is_empty());
    assert_eq!(record.repository, None);
    assert_eq!(record.owner, None);

    harness.cache.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_lookup_keeps_sibling_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "anon" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/someone/app/manifests/1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": { "mediaType": "application/vnd.docker.container.image.v1+json", "digest": "sha256:c", "size": 1 },
            "layers": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/namespaces/someone/repositories/app/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 2,
            "results": [
                { "name": "1.1.0", "last_updated": "2024-05-01T00:00:00Z" },
                { "name": "1.0.0", "last_updated": "2024-01-01T00:00:00Z" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/namespaces/someone/repositories/app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "app",
            "namespace": "someone",
            "star_count": 3,
            "pull_count": 42,
            "is_private": false
        })))
        .mount(&server)
        .await;
    let harness = harness(&server).await;

    // Single-platform manifest is a hard error; owner lookup 404s and is soft
    let reference = Reference::parse("someone/app:1.0.0").unwrap();
    let (record, result) = harness
        .pipeline
        .run(ExecutionContext::background(), ImageRecord::new(reference))
        .await;

    let err = result.unwrap_err();
    assert!(err.leaves().iter().any(|e| matches!(
        e,
        JobError::Registry(RegistryError::UnsupportedMediaType(_))
    )));
    assert!(record.manifests.is_empty());
    assert_eq!(record.latest.unwrap().reference.tag(), Some("1.1.0"));
    assert!(matches!(&record.repository, Some(RepositoryInfo::DockerHub(r)) if r.pull_count == 42));
    assert_eq!(record.owner, None);
    assert_eq!(record.release_notes, None);

    harness.cache.close().await.unwrap();
}
