//! Job errors.

use tagscout_cache::CacheError;
use thiserror::Error;

use crate::registry::RegistryError;

/// Errors returned by jobs and by [`crate::pipeline::Pipeline::run`].
#[derive(Debug, Error)]
pub enum JobError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("job '{job}' failed: {message}")]
    Failed { job: String, message: String },

    /// The execution context was cancelled while the job was waiting on I/O.
    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Every error from the failed branches of a parallel group.
    #[error("{}", join_messages(.0))]
    Joined(Vec<JobError>),
}

fn join_messages(errors: &[JobError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl JobError {
    pub fn failed(job: impl Into<String>, message: impl Into<String>) -> Self {
        JobError::Failed {
            job: job.into(),
            message: message.into(),
        }
    }

    /// Combine branch errors; `Ok` when there are none.
    pub fn join(errors: Vec<JobError>) -> Result<(), JobError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(JobError::Joined(errors))
        }
    }

    /// Leaf errors, with joined groups flattened.
    pub fn leaves(&self) -> Vec<&JobError> {
        match self {
            JobError::Joined(errors) => errors.iter().flat_map(JobError::leaves).collect(),
            other => vec![other],
        }
    }

    /// Returns true if the run was cut short by cancellation or deadline.
    pub fn is_cancellation(&self) -> bool {
        self.leaves()
            .iter()
            .any(|e| matches!(e, JobError::Cancelled | JobError::DeadlineExceeded))
    }
}
