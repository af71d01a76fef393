use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::cached::{fetch_cached, skip_missing};
use super::ImageRecord;
use crate::github::{GitHubClient, Release};
use crate::pipeline::{Job, JobError, Output, PipelineContext};

/// Fetches GitHub release notes for the discovered version.
///
/// Needs both a source repository and a discovered version in the record;
/// without either there is nothing to look up.
pub struct FetchReleaseNotes {
    github: Arc<GitHubClient>,
    ttl: Duration,
    output: Output<Release>,
}

impl FetchReleaseNotes {
    pub fn new(github: Arc<GitHubClient>, ttl: Duration, output: Output<Release>) -> Self {
        Self {
            github,
            ttl,
            output,
        }
    }
}

#[async_trait]
impl Job<ImageRecord> for FetchReleaseNotes {
    fn name(&self) -> &str {
        "fetch-release-notes"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        let (reference, source, tag) = ctx
            .read(|record| {
                (
                    record.reference.clone(),
                    record.source_repository.clone(),
                    record
                        .latest
                        .as_ref()
                        .and_then(|image| image.reference.tag().map(str::to_string)),
                )
            })
            .await;

        let (Some(source), Some(tag)) = (source, tag) else {
            debug!(reference = %reference, "No source repository or version, skipping release notes");
            return Ok(());
        };

        let key = format!("github:release:{}/{}@{}", source.owner, source.name, tag);
        let fetched = fetch_cached(ctx, &key, self.ttl, || {
            self.github.get_release(&source, &tag)
        })
        .await;

        match skip_missing(self.name(), &reference, fetched)?.flatten() {
            Some(release) => ctx.publish(&self.output, release).await,
            None => debug!(key = %key, "No release for version"),
        }
        Ok(())
    }
}

/// Copies release notes into the record.
pub struct ApplyReleaseNotes {
    input: Output<Release>,
}

impl ApplyReleaseNotes {
    pub fn new(input: Output<Release>) -> Self {
        Self { input }
    }
}

#[async_trait]
impl Job<ImageRecord> for ApplyReleaseNotes {
    fn name(&self) -> &str {
        "apply-release-notes"
    }

    async fn execute(&self, ctx: &PipelineContext<ImageRecord>) -> Result<(), JobError> {
        if let Some(release) = ctx.output(&self.input).await {
            ctx.update(|record| record.release_notes = Some(release)).await;
        }
        Ok(())
    }
}
