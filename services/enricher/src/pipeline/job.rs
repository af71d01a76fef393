//! Job trait and its composites.

use std::marker::PhantomData;

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use tracing::{debug, warn};

use super::context::PipelineContext;
use super::error::JobError;

/// A unit of work over a shared [`PipelineContext`].
///
/// Jobs may read the payload and published outputs, publish their own
/// outputs, and must leave the payload valid (possibly partial) on failure.
#[async_trait]
pub trait Job<P>: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &PipelineContext<P>) -> Result<(), JobError>;
}

#[async_trait]
impl<P> Job<P> for Box<dyn Job<P>>
where
    P: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn execute(&self, ctx: &PipelineContext<P>) -> Result<(), JobError> {
        (**self).execute(ctx).await
    }
}

/// Runs children in order, stopping at the first error.
pub struct Series<P> {
    name: String,
    jobs: Vec<Box<dyn Job<P>>>,
}

impl<P> Series<P>
where
    P: Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
        }
    }

    pub fn with(mut self, job: impl Job<P> + 'static) -> Self {
        self.jobs.push(Box::new(job));
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl<P> Job<P> for Series<P>
where
    P: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &PipelineContext<P>) -> Result<(), JobError> {
        for job in &self.jobs {
            debug!(series = %self.name, job = job.name(), "Running job");
            if let Err(e) = job.execute(ctx).await {
                warn!(
                    series = %self.name,
                    job = job.name(),
                    error = %e,
                    "Job failed, skipping remaining jobs"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Runs every child concurrently and waits for all of them.
///
/// A failing child never stops its siblings; every error is returned in one
/// [`JobError::Joined`].
pub struct Parallel<P> {
    name: String,
    jobs: Vec<Box<dyn Job<P>>>,
}

impl<P> Parallel<P>
where
    P: Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
        }
    }

    pub fn with(mut self, job: impl Job<P> + 'static) -> Self {
        self.jobs.push(Box::new(job));
        self
    }
}

#[async_trait]
impl<P> Job<P> for Parallel<P>
where
    P: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &PipelineContext<P>) -> Result<(), JobError> {
        debug!(parallel = %self.name, jobs = self.jobs.len(), "Starting parallel group");

        let results = join_all(self.jobs.iter().map(|job| job.execute(ctx))).await;

        let mut errors = Vec::new();
        for (job, result) in self.jobs.iter().zip(results) {
            if let Err(e) = result {
                warn!(parallel = %self.name, job = job.name(), error = %e, "Job failed");
                errors.push(e);
            }
        }

        JobError::join(errors)
    }
}

/// Leaf job backed by a closure.
pub struct FnJob<P, F> {
    name: String,
    f: F,
    _marker: PhantomData<fn(&P)>,
}

/// Wrap `f` as a named leaf job.
///
/// ```
/// use futures_util::FutureExt;
/// use tagscout_enricher::pipeline::{job_fn, Job, PipelineContext};
///
/// let job = job_fn("increment", |ctx: &PipelineContext<u32>| {
///     async move {
///         ctx.update(|count: &mut u32| *count += 1).await;
///         Ok(())
///     }
///     .boxed()
/// });
/// assert_eq!(job.name(), "increment");
/// ```
pub fn job_fn<P, F>(name: impl Into<String>, f: F) -> FnJob<P, F>
where
    P: Send + Sync + 'static,
    F: for<'a> Fn(&'a PipelineContext<P>) -> BoxFuture<'a, Result<(), JobError>> + Send + Sync,
{
    FnJob {
        name: name.into(),
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<P, F> Job<P> for FnJob<P, F>
where
    P: Send + Sync + 'static,
    F: for<'a> Fn(&'a PipelineContext<P>) -> BoxFuture<'a, Result<(), JobError>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &PipelineContext<P>) -> Result<(), JobError> {
        (self.f)(ctx).await
    }
}
