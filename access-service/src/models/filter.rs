use crate::catalog::AccessCatalog;
use crate::models::AccessNode;
use serde::Deserialize;
use service_core::error::AppError;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Unknown legacy grant: {0}")]
    UnknownLegacyGrant(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),
}

impl From<FilterError> for AppError {
    fn from(err: FilterError) -> Self {
        AppError::BadRequest(anyhow::Error::new(err))
    }
}

/// Validated grant filter. Both sets empty is the identity filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    altinn2_grants: BTreeSet<String>,
    altinn3_grants: BTreeSet<String>,
    include_deleted: bool,
}

impl Filter {
    /// The identity filter, optionally keeping soft-deleted nodes.
    pub fn identity(include_deleted: bool) -> Self {
        Self {
            include_deleted,
            ..Default::default()
        }
    }

    /// Build a filter, rejecting any identifier the catalog does not know.
    pub fn parse<A, B>(
        catalog: &AccessCatalog,
        altinn2_grants: A,
        altinn3_grants: B,
        include_deleted: bool,
    ) -> Result<Self, FilterError>
    where
        A: IntoIterator,
        A::Item: Into<String>,
        B: IntoIterator,
        B::Item: Into<String>,
    {
        let altinn2_grants = altinn2_grants
            .into_iter()
            .map(|key| {
                let key: String = key.into();
                if catalog.is_known_legacy_key(&key) {
                    Ok(key)
                } else {
                    Err(FilterError::UnknownLegacyGrant(key))
                }
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        let altinn3_grants = altinn3_grants
            .into_iter()
            .map(|resource_id| {
                let resource_id: String = resource_id.into();
                if catalog.is_known_resource(&resource_id) {
                    Ok(resource_id)
                } else {
                    Err(FilterError::UnknownResource(resource_id))
                }
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            altinn2_grants,
            altinn3_grants,
            include_deleted,
        })
    }

    pub fn altinn2_grants(&self) -> &BTreeSet<String> {
        &self.altinn2_grants
    }

    pub fn altinn3_grants(&self) -> &BTreeSet<String> {
        &self.altinn3_grants
    }

    pub fn include_deleted(&self) -> bool {
        self.include_deleted
    }

    pub fn is_identity(&self) -> bool {
        self.altinn2_grants.is_empty() && self.altinn3_grants.is_empty()
    }

    /// Whether the node's own grants satisfy the filter.
    pub fn matches(&self, node: &AccessNode) -> bool {
        self.is_identity()
            || !self.altinn2_grants.is_disjoint(&node.altinn2_grants)
            || !self.altinn3_grants.is_disjoint(&node.altinn3_grants)
    }
}

/// Unvalidated filter as supplied by a caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterInput {
    #[serde(default)]
    pub altinn2_grants: Vec<String>,
    #[serde(default)]
    pub altinn3_grants: Vec<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl FilterInput {
    pub fn validate(self, catalog: &AccessCatalog) -> Result<Filter, FilterError> {
        Filter::parse(
            catalog,
            self.altinn2_grants,
            self.altinn3_grants,
            self.include_deleted,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LegacyGrant;

    fn catalog() -> AccessCatalog {
        AccessCatalog::new(
            vec![LegacyGrant::new("4936", "1")],
            [(
                "nav_rekruttering_kandidater".to_string(),
                vec![LegacyGrant::new("5078", "1")],
            )],
        )
    }

    #[test]
    fn test_default_is_identity_without_deleted() {
        let filter = Filter::default();
        assert!(filter.is_identity());
        assert!(!filter.include_deleted());
    }

    #[test]
    fn test_parse_accepts_known_identifiers() {
        let filter = Filter::parse(
            &catalog(),
            ["4936:1", "5078:1"],
            ["nav_rekruttering_kandidater"],
            true,
        )
        .unwrap();

        assert_eq!(filter.altinn2_grants().len(), 2);
        assert!(filter.altinn3_grants().contains("nav_rekruttering_kandidater"));
        assert!(filter.include_deleted());
        assert!(!filter.is_identity());
    }

    #[test]
    fn test_parse_rejects_unknown_legacy_grant() {
        let err = Filter::parse(&catalog(), ["9999:1"], Vec::<String>::new(), false).unwrap_err();
        assert_eq!(err, FilterError::UnknownLegacyGrant("9999:1".to_string()));
    }

    #[test]
    fn test_parse_rejects_unknown_resource() {
        let err = Filter::parse(&catalog(), Vec::<String>::new(), ["nope"], false).unwrap_err();
        assert_eq!(err, FilterError::UnknownResource("nope".to_string()));
    }

    #[test]
    fn test_filter_error_is_bad_request() {
        let err: AppError = FilterError::UnknownResource("nope".to_string()).into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_filter_input_deserializes_with_defaults() {
        let input: FilterInput = serde_json::from_str(r#"{"altinn2Grants": ["4936:1"]}"#).unwrap();
        let filter = input.validate(&catalog()).unwrap();
        assert!(filter.altinn3_grants().is_empty());
        assert!(!filter.include_deleted());
    }

    #[test]
    fn test_matches_only_own_grants() {
        let filter = Filter::parse(&catalog(), ["4936:1"], Vec::<String>::new(), false).unwrap();
        let mut node = AccessNode {
            org_number: "910825496".to_string(),
            name: "Org".to_string(),
            organization_form: "BEDR".to_string(),
            altinn3_grants: BTreeSet::new(),
            altinn2_grants: BTreeSet::new(),
            is_deleted: false,
            subunits: vec![],
        };
        assert!(!filter.matches(&node));

        node.altinn2_grants.insert("4936:1".to_string());
        assert!(filter.matches(&node));
    }
}
