//! Migration version ordering.
//!
//! Versions are dotted numeric sequences (`1`, `1.2`, `2.0.1`) with two
//! sentinels: [`MigrationVersion::Empty`] sorts below every real version and
//! [`MigrationVersion::Latest`] above every real version.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SextantError};

/// A parsed migration version, totally ordered.
#[derive(Debug, Clone)]
pub enum MigrationVersion {
    /// Below all real versions. Used as the target when nothing should apply.
    Empty,
    /// A dotted numeric version, stored as its numeric segments.
    Version(Vec<u64>),
    /// Above all real versions. The default migration target.
    Latest,
}

impl MigrationVersion {
    /// Parse a version string like `"1.2.3"` into segments.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(SextantError::InvalidVersion {
                raw: raw.to_string(),
                reason: "version string is empty".to_string(),
            });
        }

        let segments: std::result::Result<Vec<u64>, _> =
            raw.split('.').map(|s| s.parse::<u64>()).collect();

        match segments {
            Ok(segments) => Ok(MigrationVersion::Version(segments)),
            Err(e) => Err(SextantError::InvalidVersion {
                raw: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Whether this version is `>=` the other.
    pub fn is_at_least(&self, other: &MigrationVersion) -> bool {
        self >= other
    }

    /// Whether this version is strictly `>` the other.
    pub fn is_newer_than(&self, other: &MigrationVersion) -> bool {
        self > other
    }

    /// The numeric segments, if this is a real version.
    pub fn segments(&self) -> Option<&[u64]> {
        match self {
            MigrationVersion::Version(segments) => Some(segments),
            _ => None,
        }
    }
}

impl Ord for MigrationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        use MigrationVersion::{Empty, Latest, Version};
        match (self, other) {
            (Empty, Empty) | (Latest, Latest) => Ordering::Equal,
            (Empty, _) => Ordering::Less,
            (_, Empty) => Ordering::Greater,
            (Latest, _) => Ordering::Greater,
            (_, Latest) => Ordering::Less,
            (Version(a), Version(b)) => {
                // Shorter versions compare as if padded with zeros,
                // so 1.2 == 1.2.0 and 1.2 < 1.2.1.
                let max_len = a.len().max(b.len());
                for i in 0..max_len {
                    let x = a.get(i).copied().unwrap_or(0);
                    let y = b.get(i).copied().unwrap_or(0);
                    match x.cmp(&y) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                Ordering::Equal
            }
        }
    }
}

impl PartialOrd for MigrationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MigrationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MigrationVersion {}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationVersion::Empty => write!(f, "<< Empty >>"),
            MigrationVersion::Latest => write!(f, "<< Latest >>"),
            MigrationVersion::Version(segments) => {
                // Canonical form: trailing zero segments trimmed, but "0" stays "0".
                let mut end = segments.len();
                while end > 1 && segments[end - 1] == 0 {
                    end -= 1;
                }
                let text = segments[..end]
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(".");
                write!(f, "{}", text)
            }
        }
    }
}

impl FromStr for MigrationVersion {
    type Err = SextantError;

    fn from_str(s: &str) -> Result<Self> {
        MigrationVersion::parse(s)
    }
}

impl serde::Serialize for MigrationVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
