//! Repository and owner metadata.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::cached::{fetch_cached, skip_missing};
use super::{CacheTtls, ImageRecord, RepositoryInfo};
use crate::pipeline::{Job, JobError, Output, PipelineContext};
use crate::registry::{DockerHubOwner, Registries, DOCKER_HUB, GITLAB};

/// Fetches repository metadata from Docker Hub or GitLab. Other registries
/// have none and are skipped.
pub struct FetchRepositoryInfo {
    registries: Registries,
    ttls: CacheTtls,
    output: Output<RepositoryInfo>,
}

impl FetchRepositoryInfo {
    pub fn new(registries: Registries, ttls: CacheTtls, output: Output<RepositoryInfo>) -> Self {
        Self {
            registries,
            ttls,
            output,
        }
    }
}

#[async_trait]
impl Job<ImageRecord> for FetchRepositoryInfo {
    fn name(&self) -> &str {
        "fetch-repository-info"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        let reference = ctx.read(|record| record.reference.clone()).await;

        let fetched = match reference.domain() {
            DOCKER_HUB => {
                let key = format!("dockerhub:repository:{}", reference.path());
                let hub = self.registries.docker_hub();
                fetch_cached(ctx, &key, self.ttls.repository, || hub.get_repository(&reference))
                    .await
                    .map(RepositoryInfo::DockerHub)
            }
            GITLAB => {
                let key = format!("gitlab:repository:{}", reference.path());
                let gitlab = self.registries.gitlab();
                fetch_cached(ctx, &key, self.ttls.gitlab_repository, || {
                    gitlab.get_repository(&reference)
                })
                .await
                .map(RepositoryInfo::GitLab)
            }
            other => {
                debug!(domain = other, "No repository metadata for registry");
                return Ok(());
            }
        };

        if let Some(info) = skip_missing(self.name(), &reference, fetched)? {
            ctx.publish(&self.output, info).await;
        }
        Ok(())
    }
}

/// Fetches the Docker Hub organization or user owning the repository.
pub struct FetchOwnerInfo {
    registries: Registries,
    ttl: Duration,
    output: Output<DockerHubOwner>,
}

impl FetchOwnerInfo {
    pub fn new(registries: Registries, ttl: Duration, output: Output<DockerHubOwner>) -> Self {
        Self {
            registries,
            ttl,
            output,
        }
    }
}

#[async_trait]
impl Job<ImageRecord> for FetchOwnerInfo {
    fn name(&self) -> &str {
        "fetch-owner-info"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        let reference = ctx.read(|record| record.reference.clone()).await;
        if reference.domain() != DOCKER_HUB {
            return Ok(());
        }

        let namespace = reference.namespace();
        let key = format!("dockerhub:owner:{namespace}");
        let hub = self.registries.docker_hub();
        let fetched = fetch_cached(ctx, &key, self.ttl, || hub.get_owner(namespace)).await;

        if let Some(owner) = skip_missing(self.name(), &reference, fetched)? {
            ctx.publish(&self.output, owner).await;
        }
        Ok(())
    }
}

/// Copies repository metadata into the record.
pub struct ApplyRepositoryInfo {
    output: Output<RepositoryInfo>,
}

impl ApplyRepositoryInfo {
    pub fn new(output: Output<RepositoryInfo>) -> Self {
        Self { output }
    }
}

#[async_trait]
impl Job<ImageRecord> for ApplyRepositoryInfo {
    fn name(&self) -> &str {
        "apply-repository-info"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        let Some(info) = ctx.output(&self.output).await else {
            debug!("No repository metadata to apply");
            return Ok(());
        };
        ctx.update(|record| record.repository = Some(info)).await;
        Ok(())
    }
}

/// Copies owner metadata into the record.
pub struct ApplyOwnerInfo {
    output: Output<DockerHubOwner>,
}

impl ApplyOwnerInfo {
    pub fn new(output: Output<DockerHubOwner>) -> Self {
        Self { output }
    }
}

#[async_trait]
impl Job<ImageRecord> for ApplyOwnerInfo {
    fn name(&self) -> &str {
        "apply-owner-info"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        if let Some(owner) = ctx.output(&self.output).await {
            ctx.update(|record| record.owner = Some(owner)).await;
        }
        Ok(())
    }
}
