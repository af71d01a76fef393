//! # tagscout-enricher
//!
//! Finds out whether a newer compatible version of a container image exists.
//!
//! For each image reference a [`pipeline::Pipeline`] runs the enrichment
//! jobs from [`jobs`]: manifests, latest version, repository and owner
//! metadata, and GitHub release notes. Every network lookup goes through the
//! shared [`tagscout_cache::Cache`], so a warm cache answers a run without
//! touching any registry.
//!
//! ## Modules
//!
//! - [`reference`]: image reference parsing and normalization
//! - [`registry`]: Docker Hub, GHCR, GitLab and Quay protocol clients
//! - [`github`]: release-notes lookups
//! - [`pipeline`]: the job engine (`Series`, `Parallel`, typed outputs)
//! - [`jobs`]: the enrichment job tree
//! - [`config`]: environment configuration for the `tagscout` binary

pub mod config;
pub mod github;
pub mod jobs;
pub mod pipeline;
pub mod reference;
pub mod registry;

pub use reference::{Reference, ReferenceError};
