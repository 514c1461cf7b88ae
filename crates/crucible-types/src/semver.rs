use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// A `(branch, api, inc)` version triple.
///
/// Ordering is only meaningful within a branch: two versions on different
/// branches compare equal under [`PartialOrd`] returning `None`, matching the
/// source design's "cross-branch ordering is undefined" rule. [`Ord`] is not
/// implemented for that reason — callers that need a total order must first
/// group by branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemanticVersion {
    pub branch: String,
    pub api: u32,
    pub inc: u32,
}

impl SemanticVersion {
    /// `("master", 0, 0)` — the version assigned to a component's first commit.
    pub fn zero() -> Self {
        Self {
            branch: "master".to_string(),
            api: 0,
            inc: 0,
        }
    }

    pub fn new(branch: impl Into<String>, api: u32, inc: u32) -> Self {
        Self {
            branch: branch.into(),
            api,
            inc,
        }
    }

    /// Advance to the next version on the same branch.
    ///
    /// The source threads an `api-version-updated` boolean through library
    /// manifests to decide whether a fresh commit bumps `api` (resetting
    /// `inc` to zero) or just `inc`; that behavior is preserved verbatim
    /// here rather than inferred from the package set.
    pub fn next(&self, api_version_updated: bool) -> Self {
        if api_version_updated {
            Self {
                branch: self.branch.clone(),
                api: self.api + 1,
                inc: 0,
            }
        } else {
            Self {
                branch: self.branch.clone(),
                api: self.api,
                inc: self.inc + 1,
            }
        }
    }

    /// Ordering within the same branch, lexicographic on `(api, inc)`.
    /// Returns `None` if `self` and `other` are on different branches.
    pub fn compare_same_branch(&self, other: &Self) -> Option<Ordering> {
        if self.branch != other.branch {
            return None;
        }
        Some((self.api, self.inc).cmp(&(other.api, other.inc)))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.branch, self.api, self.inc)
    }
}

impl FromStr for SemanticVersion {
    type Err = ParseError;

    /// Parses `"<branch>.<api>.<inc>"`. The branch is any run of non-whitespace
    /// characters (it may itself contain dots); `api`/`inc` are the trailing
    /// two dot-separated decimal integers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::SemanticVersion(s.to_string());
        if s.chars().any(char::is_whitespace) || s.is_empty() {
            return Err(err());
        }
        let mut parts = s.rsplitn(3, '.');
        let inc_s = parts.next().ok_or_else(err)?;
        let api_s = parts.next().ok_or_else(err)?;
        let branch = parts.next().ok_or_else(err)?;
        if branch.is_empty() {
            return Err(err());
        }
        let api = api_s.parse::<u32>().map_err(|_| err())?;
        let inc = inc_s.parse::<u32>().map_err(|_| err())?;
        Ok(Self {
            branch: branch.to_string(),
            api,
            inc,
        })
    }
}
