//! Job pipeline engine.
//!
//! A pipeline runs a tree of [`Job`]s over one [`PipelineContext`]:
//!
//! - [`Series`] runs children in order and stops at the first error.
//! - [`Parallel`] runs children concurrently, waits for all of them, and
//!   joins their errors.
//! - Leaf jobs ([`job_fn`] or custom [`Job`] impls) read and publish typed
//!   [`Output`]s and mutate the payload through
//!   [`PipelineContext::update`].
//!
//! Every I/O a job performs should go through [`PipelineContext::guard`] so
//! cancellation and the run deadline abort it promptly.

mod context;
mod error;
mod job;
mod output;

use std::sync::Arc;
use std::time::Instant;

use tagscout_cache::Cache;
use tracing::{info, warn};

pub use context::{CancelHandle, ExecutionContext, PipelineContext};
pub use error::JobError;
pub use job::{job_fn, FnJob, Job, Parallel, Series};
pub use output::Output;

/// A job tree bound to a cache, runnable any number of times.
pub struct Pipeline<P> {
    root: Box<dyn Job<P>>,
    cache: Arc<Cache>,
}

impl<P> Pipeline<P>
where
    P: Send + Sync + 'static,
{
    pub fn new(root: impl Job<P> + 'static, cache: Arc<Cache>) -> Self {
        Self {
            root: Box::new(root),
            cache,
        }
    }

    /// Run the whole tree over `payload`.
    ///
    /// Returns once every job, including nested parallel groups, has
    /// finished. The payload is returned even on error and may be partially
    /// enriched.
    pub async fn run(&self, exec: ExecutionContext, payload: P) -> (P, Result<(), JobError>) {
        let ctx = PipelineContext::new(exec, payload, Arc::clone(&self.cache));
        let started = Instant::now();

        let result = self.root.execute(&ctx).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(pipeline = self.root.name(), elapsed_ms, "Pipeline complete"),
            Err(e) => warn!(
                pipeline = self.root.name(),
                elapsed_ms,
                error = %e,
                "Pipeline finished with errors"
            ),
        }

        (ctx.into_payload(), result)
    }
}
