//! Version parsing and comparison.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::VersionError;

/// Bare commit hashes are used as tags by many CI pipelines.
static COMMIT_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{7,40}$").expect("valid commit hash pattern"));

/// `digits(.digits)*` followed by optional word characters.
static RELEASE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+(?:\.[0-9]+)*)([A-Za-z0-9_]*)$").expect("valid release pattern")
});

/// A version parsed from a container tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Release components, never empty.
    pub release: Vec<u64>,
    /// Verbatim remainder after the first hyphen.
    pub suffix: String,
    /// Word characters trailing the release components.
    pub prerelease: String,
}

impl Version {
    /// Parse a tag.
    ///
    /// Returns `Ok(None)` for tags that are not versions at all (`latest`,
    /// commit hashes, `stable-alpine`, ...). Fails only when a tag is shaped
    /// like a version but a release component does not fit in a `u64`.
    pub fn parse(tag: &str) -> Result<Option<Self>, VersionError> {
        if COMMIT_HASH.is_match(tag) && !tag.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }

        let tag_without_v = tag.strip_prefix('v').unwrap_or(tag);

        let (prefix, suffix) = match tag_without_v.split_once('-') {
            Some((prefix, suffix)) => (prefix, suffix),
            None => (tag_without_v, ""),
        };

        let Some(captures) = RELEASE_PREFIX.captures(prefix) else {
            return Ok(None);
        };

        let release = captures[1]
            .split('.')
            .map(|component| {
                component
                    .parse::<u64>()
                    .map_err(|_| VersionError::ComponentOutOfRange {
                        tag: tag.to_string(),
                        component: component.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Self {
            release,
            suffix: suffix.to_string(),
            prerelease: captures[2].to_string(),
        }))
    }

    /// A version without a prerelease marker.
    pub fn is_stable(&self) -> bool {
        self.prerelease.is_empty()
    }

    /// Whether ordering against `other` is meaningful.
    pub fn is_compatible(&self, other: &Version) -> bool {
        self.suffix == other.suffix && self.release.len() == other.release.len()
    }
}

/// Compare two versions.
///
/// Only meaningful when `a.is_compatible(b)`; the order is total regardless.
pub fn compare(a: &Version, b: &Version) -> Ordering {
    let len = a.release.len().max(b.release.len());
    for i in 0..len {
        let ordering = match (a.release.get(i), b.release.get(i)) {
            // A missing trailing component makes the shorter release the greater one.
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.cmp(y),
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    let ordering = match (a.prerelease.is_empty(), b.prerelease.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.prerelease.cmp(&b.prerelease),
    };
    if ordering != Ordering::Equal {
        return ordering;
    }

    // Operands intentionally reversed.
    b.suffix.cmp(&a.suffix)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.release.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
        }
        f.write_str(&self.prerelease)?;
        if !self.suffix.is_empty() {
            write!(f, "-{}", self.suffix)?;
        }
        Ok(())
    }
}

/// Pick an upgrade candidate from tags listed most-recently-updated first.
///
/// Returns the first item whose tag parses, is compatible with `current`
/// and compares greater than or equal to it. Scanning stops at that item,
/// so a newer version that was last updated further in the past than an
/// older compatible one is not found. Tags that fail to parse are skipped.
pub fn select_candidate<T, I, F>(current: &Version, candidates: I, tag_of: F) -> Option<T>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> &str,
{
    candidates.into_iter().find(|candidate| {
        match Version::parse(tag_of(candidate)) {
            Ok(Some(version)) => version.is_compatible(current) && version >= *current,
            _ => false,
        }
    })
}
