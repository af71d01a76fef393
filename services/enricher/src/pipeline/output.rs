//! Typed output slots shared between producer and consumer jobs.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handle to a value one job publishes and others read.
///
/// Create the handle once while building the job tree and give clones to the
/// producer and every consumer; the value type is then fixed at construction.
/// Keys must be unique within a run.
pub struct Output<T> {
    key: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Output<T> {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Arc::from(key.into()),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Output")
            .field(&self.key)
            .field(&std::any::type_name::<T>())
            .finish()
    }
}
