//! Error types for tag parsing.

use thiserror::Error;

/// Errors that can occur when parsing a tag into a [`crate::Version`].
///
/// A tag that simply does not look like a version is not an error; parsing
/// returns `Ok(None)` for it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// A release component does not fit in 64 bits.
    #[error("release component '{component}' in tag '{tag}' is out of range")]
    ComponentOutOfRange { tag: String, component: String },
}
