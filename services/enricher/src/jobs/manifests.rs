use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::cached::{fetch_cached, skip_missing};
use super::ImageRecord;
use crate::github::{SourceRepository, SOURCE_ANNOTATION};
use crate::pipeline::{Job, JobError, Output, PipelineContext};
use crate::registry::{Manifest, Registries};

/// Fetches the manifest index of the image.
pub struct FetchManifests {
    registries: Registries,
    ttl: Duration,
    output: Output<Vec<Manifest>>,
}

impl FetchManifests {
    pub fn new(registries: Registries, ttl: Duration, output: Output<Vec<Manifest>>) -> Self {
        Self {
            registries,
            ttl,
            output,
        }
    }
}

#[async_trait]
impl Job<ImageRecord> for FetchManifests {
    fn name(&self) -> &str {
        "fetch-manifests"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        let reference = ctx.read(|record| record.reference.clone()).await;
        let client = self.registries.client_for(&reference)?;

        let key = format!("manifests:{reference}");
        let fetched = fetch_cached(ctx, &key, self.ttl, || client.get_manifests(&reference)).await;

        if let Some(manifests) = skip_missing(self.name(), &reference, fetched)? {
            debug!(reference = %reference, count = manifests.len(), "Fetched manifests");
            ctx.publish(&self.output, manifests).await;
        }
        Ok(())
    }
}

/// Copies fetched manifests into the record and derives the source
/// repository from their annotations.
pub struct ApplyManifests {
    input: Output<Vec<Manifest>>,
}

impl ApplyManifests {
    pub fn new(input: Output<Vec<Manifest>>) -> Self {
        Self { input }
    }
}

#[async_trait]
impl Job<ImageRecord> for ApplyManifests {
    fn name(&self) -> &str {
        "apply-manifests"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        let Some(manifests) = ctx.output(&self.input).await else {
            debug!("No manifests to apply");
            return Ok(());
        };

        let source = source_repository(&manifests);
        ctx.update(|record| {
            record.manifests = manifests;
            if source.is_some() {
                record.source_repository = source;
            }
        })
        .await;
        Ok(())
    }
}

/// First GitHub repository named by a source annotation.
fn source_repository(manifests: &[Manifest]) -> Option<SourceRepository> {
    manifests
        .iter()
        .filter_map(|manifest| manifest.annotations.get(SOURCE_ANNOTATION))
        .find_map(|url| SourceRepository::from_url(url))
}
