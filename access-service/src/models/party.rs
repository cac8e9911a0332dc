use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One permission on the legacy platform, identified by service code and edition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyGrant {
    pub service_code: String,
    pub service_edition: String,
}

impl LegacyGrant {
    pub fn new(service_code: impl Into<String>, service_edition: impl Into<String>) -> Self {
        Self {
            service_code: service_code.into(),
            service_edition: service_edition.into(),
        }
    }

    /// Parse a `"{code}:{edition}"` key. Both halves must be non-empty.
    pub fn parse_key(key: &str) -> Option<Self> {
        let (code, edition) = key.split_once(':')?;
        if code.is_empty() || edition.is_empty() || edition.contains(':') {
            return None;
        }
        Some(Self::new(code, edition))
    }

    /// Rendered form used in responses and filters.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LegacyGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service_code, self.service_edition)
    }
}

/// A party node as returned by the modern platform's authorized-parties API.
///
/// Person-type parties carry neither organization number nor unit type and are
/// never materialized into the access tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    #[serde(default)]
    pub organization_number: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit_type: Option<String>,
    #[serde(default)]
    pub authorized_resources: BTreeSet<String>,
    #[serde(default)]
    pub authorized_roles: BTreeSet<String>,
    #[serde(default)]
    pub authorized_access_packages: BTreeSet<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub subunits: Vec<Party>,
}

impl Party {
    /// Organization number and unit type, when both are present.
    pub fn org_unit(&self) -> Option<(&str, &str)> {
        match (&self.organization_number, &self.unit_type) {
            (Some(org_number), Some(unit_type)) => Some((org_number, unit_type)),
            _ => None,
        }
    }
}
