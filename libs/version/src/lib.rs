//! # tagscout-version
//!
//! Imposes an order on free-form container image tags.
//!
//! Container tags are human-assigned labels, so only some of them carry a
//! version. A tag that does parse is split into three parts:
//!
//! - `release`: the dot-separated integers at the front (`3.8.0`)
//! - `prerelease`: word characters glued to the release (`b1` in `3.8.0b1`)
//! - `suffix`: everything after the first hyphen (`alpine` in `3.8.0-alpine`)
//!
//! Ordering is only meaningful between *compatible* versions, i.e. versions
//! with the same suffix and the same number of release components. The
//! ordering rules match the widely used container tag scheme where a shorter
//! release sorts above a longer one sharing its prefix (`2.1` > `2.1.1`) and
//! a prerelease always sorts below the plain release.
//!
//! ```
//! use tagscout_version::Version;
//!
//! let current = Version::parse("v3.7.0b1").unwrap().unwrap();
//! let release = Version::parse("3.7.0").unwrap().unwrap();
//! assert!(current.is_compatible(&release));
//! assert!(release > current);
//! ```

mod error;
mod version;

pub use error::VersionError;
pub use version::{compare, select_candidate, Version};
