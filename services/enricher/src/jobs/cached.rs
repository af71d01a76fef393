//! Cache-through fetch shared by the fetch jobs.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tagscout_cache::CacheError;
use tracing::{debug, warn};

use crate::pipeline::{JobError, PipelineContext};
use crate::reference::Reference;
use crate::registry::RegistryError;

/// Return the cached value under `key`, or run `fetch`, store its result for
/// `ttl` and return it.
///
/// A value that no longer deserializes is treated as a miss and replaced.
pub(crate) async fn fetch_cached<P, T, F, Fut>(
    ctx: &PipelineContext<P>,
    key: &str,
    ttl: Duration,
    fetch: F,
) -> Result<T, JobError>
where
    P: Send + Sync,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, RegistryError>>,
{
    match ctx.guard(ctx.cache().get_json::<T>(key)).await? {
        Ok(value) => {
            debug!(key = %key, "Cache hit");
            return Ok(value);
        }
        Err(e) if e.is_not_found() => debug!(key = %key, "Cache miss"),
        Err(CacheError::Serialization(e)) => {
            warn!(key = %key, error = %e, "Discarding undecodable cache entry");
        }
        Err(e) => return Err(e.into()),
    }

    let value = ctx.guard(fetch()).await??;
    ctx.guard(ctx.cache().set_json_with_ttl(key, &value, ttl)).await??;
    Ok(value)
}

/// Turn "no upstream data" into `Ok(None)`; every other error stays hard.
pub(crate) fn skip_missing<T>(
    job: &str,
    reference: &Reference,
    result: Result<T, JobError>,
) -> Result<Option<T>, JobError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(JobError::Registry(e)) if e.is_not_found() => {
            warn!(job = job, reference = %reference, error = %e, "No upstream data, skipping");
            Ok(None)
        }
        Err(JobError::Registry(e @ RegistryError::UnsupportedOperation { .. })) => {
            debug!(job = job, reference = %reference, error = %e, "Not available for registry, skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
