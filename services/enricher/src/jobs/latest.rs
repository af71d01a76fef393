use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::cached::{fetch_cached, skip_missing};
use super::ImageRecord;
use crate::pipeline::{Job, JobError, Output, PipelineContext};
use crate::registry::{Image, Registries};

/// Discovers the newest compatible version of the image.
///
/// "Nothing newer" is cached as well, so a warm cache answers without a
/// network call either way.
pub struct FetchLatestVersion {
    registries: Registries,
    ttl: Duration,
    output: Output<Image>,
}

impl FetchLatestVersion {
    pub fn new(registries: Registries, ttl: Duration, output: Output<Image>) -> Self {
        Self {
            registries,
            ttl,
            output,
        }
    }
}

#[async_trait]
impl Job<ImageRecord> for FetchLatestVersion {
    fn name(&self) -> &str {
        "fetch-latest-version"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        let reference = ctx.read(|record| record.reference.clone()).await;
        let client = self.registries.client_for(&reference)?;

        let key = format!("latest:{reference}");
        let fetched = fetch_cached(ctx, &key, self.ttl, || {
            client.get_latest_version(&reference)
        })
        .await;

        match skip_missing(self.name(), &reference, fetched)?.flatten() {
            Some(image) => {
                info!(reference = %reference, latest = %image.reference, "Latest version found");
                ctx.publish(&self.output, image).await;
            }
            None => debug!(reference = %reference, "No newer compatible version"),
        }
        Ok(())
    }
}

/// Copies the discovered version into the record.
pub struct ApplyLatestVersion {
    input: Output<Image>,
}

impl ApplyLatestVersion {
    pub fn new(input: Output<Image>) -> Self {
        Self { input }
    }
}

#[async_trait]
impl Job<ImageRecord> for ApplyLatestVersion {
    fn name(&self) -> &str {
        "apply-latest-version"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        if let Some(image) = ctx.output(&self.input).await {
            ctx.update(|record| record.latest = Some(image)).await;
        }
        Ok(())
    }
}
