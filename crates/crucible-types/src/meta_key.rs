use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::semver::SemanticVersion;
use crate::ParseError;

/// The kind of entity a [`MetaKey`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Dataset,
    Library,
    Workspace,
    Solution,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentType::Dataset => "dataset",
            ComponentType::Library => "library",
            ComponentType::Workspace => "workspace",
            ComponentType::Solution => "solution",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ComponentType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dataset" => Ok(ComponentType::Dataset),
            "library" => Ok(ComponentType::Library),
            "workspace" => Ok(ComponentType::Workspace),
            "solution" => Ok(ComponentType::Solution),
            other => Err(ParseError::ComponentType(other.to_string())),
        }
    }
}

/// `{type, name, version}` — identifies one component at one version.
///
/// Serializes as `"type::name::branch.api.inc"`. Equality is full-tuple
/// equality; use [`MetaKey::type_name_equal_to`] to compare ignoring version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaKey {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub name: String,
    pub version: SemanticVersion,
}

impl MetaKey {
    pub fn new(kind: ComponentType, name: impl Into<String>, version: SemanticVersion) -> Self {
        Self {
            kind,
            name: name.into(),
            version,
        }
    }

    /// Equality ignoring the version component.
    pub fn type_name_equal_to(&self, other: &MetaKey) -> bool {
        self.kind == other.kind && self.name == other.name
    }

    /// The `"type::name"` prefix, used as the VCS branch-head key.
    pub fn without_version(&self) -> String {
        format!("{}::{}", self.kind, self.name)
    }

    /// Parses either `"type::name"` or `"type::name::branch.api.inc"`.
    /// The unversioned form is rejected when a version is required by the
    /// caller; use [`MetaKey::parse_unversioned`] when it is acceptable.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let err = || ParseError::MetaKey(s.to_string());
        let mut parts = s.splitn(3, "::");
        let kind_s = parts.next().ok_or_else(err)?;
        let name = parts.next().ok_or_else(err)?;
        let version_s = parts.next().ok_or_else(err)?;
        if parts.next().is_some() {
            return Err(err());
        }
        let kind = kind_s.parse().map_err(|_| err())?;
        let version = version_s.parse().map_err(|_| err())?;
        Ok(Self {
            kind,
            name: name.to_string(),
            version,
        })
    }

    /// Parses `"type::name"` without a version, defaulting to
    /// [`SemanticVersion::zero`].
    pub fn parse_unversioned(s: &str) -> Result<Self, ParseError> {
        let err = || ParseError::MetaKey(s.to_string());
        let mut parts = s.splitn(2, "::");
        let kind_s = parts.next().ok_or_else(err)?;
        let name = parts.next().ok_or_else(err)?;
        if name.contains("::") {
            return Err(err());
        }
        let kind = kind_s.parse().map_err(|_| err())?;
        Ok(Self {
            kind,
            name: name.to_string(),
            version: SemanticVersion::zero(),
        })
    }
}

impl fmt::Display for MetaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.kind, self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> MetaKey {
        MetaKey::new(ComponentType::Library, "sklearn-wrapper", SemanticVersion::new("master", 1, 2))
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let k = key();
        let parsed = MetaKey::parse(&k.to_string()).unwrap();
        assert_eq!(k, parsed);
    }

    #[test]
    fn type_name_equal_ignores_version() {
        let a = key();
        let mut b = key();
        b.version = SemanticVersion::new("master", 9, 9);
        assert!(a.type_name_equal_to(&b));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_wrong_shape() {
        assert!(MetaKey::parse("library::only-name").is_err());
        assert!(MetaKey::parse("library::n::1.0.0::extra").is_err());
        assert!(MetaKey::parse("bogus::n::master.0.0").is_err());
    }

    #[test]
    fn unversioned_defaults_to_zero() {
        let k = MetaKey::parse_unversioned("dataset::mnist").unwrap();
        assert_eq!(k.version, SemanticVersion::zero());
    }
}
