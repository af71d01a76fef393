//! Image enrichment jobs.
//!
//! [`build_pipeline`] assembles the job tree run once per image:
//!
//! ```text
//! Series
//! ├── Parallel "lookup"
//! │   ├── Series  fetch + apply manifests
//! │   ├── Series  fetch + apply latest version
//! │   ├── Series  fetch + apply repository metadata
//! │   └── Series  fetch + apply owner metadata
//! ├── fetch release notes (needs the source repository and latest version)
//! └── apply release notes
//! ```
//!
//! Each lookup applies its own result, so one failing lookup never keeps the
//! others out of the record. Fetch jobs read through the cache and publish
//! typed outputs; apply jobs treat a missing output as nothing to do.

mod cached;
mod latest;
mod manifests;
mod metadata;
mod release_notes;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::github::{GitHubClient, Release, SourceRepository};
use crate::pipeline::{Output, Parallel, Series};
use crate::reference::Reference;
use crate::registry::{
    DockerHubOwner, DockerHubRepository, GitLabRepository, Image, Manifest, Registries,
};

pub use latest::{ApplyLatestVersion, FetchLatestVersion};
pub use manifests::{ApplyManifests, FetchManifests};
pub use metadata::{ApplyOwnerInfo, ApplyRepositoryInfo, FetchOwnerInfo, FetchRepositoryInfo};
pub use release_notes::{ApplyReleaseNotes, FetchReleaseNotes};

/// Enrichment result for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub reference: Reference,
    #[serde(default)]
    pub manifests: Vec<Manifest>,
    #[serde(default)]
    pub latest: Option<Image>,
    #[serde(default)]
    pub repository: Option<RepositoryInfo>,
    #[serde(default)]
    pub owner: Option<DockerHubOwner>,
    #[serde(default)]
    pub source_repository: Option<SourceRepository>,
    #[serde(default)]
    pub release_notes: Option<Release>,
}

impl ImageRecord {
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            manifests: Vec::new(),
            latest: None,
            repository: None,
            owner: None,
            source_repository: None,
            release_notes: None,
        }
    }

    /// Returns true if a version other than the current tag was discovered.
    pub fn has_update(&self) -> bool {
        self.latest
            .as_ref()
            .is_some_and(|image| image.reference.tag() != Some(self.reference.version_tag()))
    }
}

/// Registry-specific repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "registry", rename_all = "kebab-case")]
pub enum RepositoryInfo {
    DockerHub(DockerHubRepository),
    #[serde(rename = "gitlab")]
    GitLab(GitLabRepository),
}

/// Cache TTL per lookup kind.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub manifests: Duration,
    pub latest: Duration,
    pub repository: Duration,
    pub owner: Duration,
    pub release_notes: Duration,
    pub gitlab_repository: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            manifests: Duration::from_secs(60 * 60),
            latest: Duration::from_secs(60 * 60),
            repository: Duration::from_secs(24 * 60 * 60),
            owner: Duration::from_secs(24 * 60 * 60),
            release_notes: Duration::from_secs(24 * 60 * 60),
            gitlab_repository: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Output handles shared between the fetch and apply jobs of one tree.
#[derive(Debug, Clone)]
pub struct Outputs {
    pub manifests: Output<Vec<Manifest>>,
    pub latest: Output<Image>,
    pub repository: Output<RepositoryInfo>,
    pub owner: Output<DockerHubOwner>,
    pub release_notes: Output<Release>,
}

impl Default for Outputs {
    fn default() -> Self {
        Self {
            manifests: Output::new("manifests"),
            latest: Output::new("latest"),
            repository: Output::new("repository"),
            owner: Output::new("owner"),
            release_notes: Output::new("release-notes"),
        }
    }
}

/// Clients and settings the enrichment jobs need.
#[derive(Clone)]
pub struct PipelineDeps {
    pub registries: Registries,
    pub github: Arc<GitHubClient>,
    pub ttls: CacheTtls,
}

/// Build the enrichment job tree. The tree reads the image to enrich from
/// the payload, so one tree serves any number of runs.
pub fn build_pipeline(deps: &PipelineDeps) -> Series<ImageRecord> {
    let outputs = Outputs::default();
    let ttls = &deps.ttls;

    let manifests = Series::new("manifests")
        .with(FetchManifests::new(
            deps.registries.clone(),
            ttls.manifests,
            outputs.manifests.clone(),
        ))
        .with(ApplyManifests::new(outputs.manifests.clone()));

    let latest = Series::new("latest-version")
        .with(FetchLatestVersion::new(
            deps.registries.clone(),
            ttls.latest,
            outputs.latest.clone(),
        ))
        .with(ApplyLatestVersion::new(outputs.latest.clone()));

    let repository = Series::new("repository-info")
        .with(FetchRepositoryInfo::new(
            deps.registries.clone(),
            ttls.clone(),
            outputs.repository.clone(),
        ))
        .with(ApplyRepositoryInfo::new(outputs.repository.clone()));

    let owner = Series::new("owner-info")
        .with(FetchOwnerInfo::new(
            deps.registries.clone(),
            ttls.owner,
            outputs.owner.clone(),
        ))
        .with(ApplyOwnerInfo::new(outputs.owner.clone()));

    let lookup = Parallel::new("lookup")
        .with(manifests)
        .with(latest)
        .with(repository)
        .with(owner);

    Series::new("enrich-image")
        .with(lookup)
        .with(FetchReleaseNotes::new(
            Arc::clone(&deps.github),
            ttls.release_notes,
            outputs.release_notes.clone(),
        ))
        .with(ApplyReleaseNotes::new(outputs.release_notes))
}
