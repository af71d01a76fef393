//! Per-run shared state.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tagscout_cache::Cache;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::warn;

use super::error::JobError;
use super::output::Output;

/// Cancellation and deadline threaded through every I/O a run performs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every [`ExecutionContext`] created from it.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl ExecutionContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A cancellable context and the handle that cancels it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancel: Some(rx),
            deadline: None,
        };
        (ctx, CancelHandle(tx))
    }

    /// Derive a context cancelled when `shutdown` flips to `true`.
    pub fn from_shutdown(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            cancel: Some(shutdown),
            deadline: None,
        }
    }

    /// Same context with a deadline `timeout` from now; an earlier existing
    /// deadline is kept.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run `fut` unless the context is cancelled or its deadline passes first.
    ///
    /// Dropping the losing future aborts an in-flight request.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, JobError> {
        if self.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(JobError::DeadlineExceeded);
        }

        let cancelled = async {
            match self.cancel.clone() {
                Some(mut rx) => loop {
                    let flagged = *rx.borrow_and_update();
                    if flagged {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // Sender gone: can no longer be cancelled.
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(JobError::Cancelled),
            _ = deadline => Err(JobError::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

type Slot = Arc<dyn Any + Send + Sync>;

/// State shared by every job of one pipeline run.
///
/// The payload is only reachable through [`read`](Self::read) and
/// [`update`](Self::update), which hold the lock for exactly the span of the
/// closure. Closures are synchronous, so a lock is never held across I/O.
pub struct PipelineContext<P> {
    exec: ExecutionContext,
    payload: RwLock<P>,
    outputs: RwLock<HashMap<String, Slot>>,
    cache: Arc<Cache>,
}

impl<P> PipelineContext<P>
where
    P: Send + Sync,
{
    pub fn new(exec: ExecutionContext, payload: P, cache: Arc<Cache>) -> Self {
        Self {
            exec,
            payload: RwLock::new(payload),
            outputs: RwLock::new(HashMap::new()),
            cache,
        }
    }

    pub fn exec(&self) -> &ExecutionContext {
        &self.exec
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Shorthand for `self.exec().guard(fut)`.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, JobError> {
        self.exec.guard(fut).await
    }

    /// Read the payload under the shared lock.
    pub async fn read<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        let payload = self.payload.read().await;
        f(&payload)
    }

    /// Mutate the payload under the exclusive lock.
    pub async fn update<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        let mut payload = self.payload.write().await;
        f(&mut payload)
    }

    /// Publish a value under `output`'s key.
    pub async fn publish<T>(&self, output: &Output<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        let mut outputs = self.outputs.write().await;
        if outputs
            .insert(output.key().to_string(), Arc::new(value))
            .is_some()
        {
            warn!(key = output.key(), "Output published twice, keeping latest value");
        }
    }

    /// The value published under `output`, or `None` if nothing was published.
    pub async fn output<T>(&self, output: &Output<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let outputs = self.outputs.read().await;
        let slot = outputs.get(output.key())?;
        let value = slot.downcast_ref::<T>().cloned();
        if value.is_none() {
            warn!(
                key = output.key(),
                expected = std::any::type_name::<T>(),
                "Output key reused with a different type"
            );
        }
        value
    }

    pub(crate) fn into_payload(self) -> P {
        self.payload.into_inner()
    }
}
