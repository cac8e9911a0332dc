#![allow(dead_code)]

use access_service::catalog::AccessCatalog;
use access_service::models::{LegacyGrant, Party, SubjectId};
use access_service::services::{
    AccessAggregator, AccessCache, LegacyAccessResult, MockCache, MockLegacySource,
    MockModernSource, ResourceRegistry, StaticPolicySubjects,
};
use std::collections::HashMap;
use std::sync::Arc;

pub const SUBJECT: &str = "26050711071";

pub fn subject() -> SubjectId {
    SubjectId::new(SUBJECT)
}

/// Resources used across the tests. `test-fager` has no legacy
/// counterpart, the other two map to one legacy service each.
pub fn catalog() -> AccessCatalog {
    AccessCatalog::new(
        vec![LegacyGrant::new("4936", "1"), LegacyGrant::new("5332", "2")],
        [
            ("test-fager".to_string(), vec![]),
            (
                "nav_permittering-og-nedbemmaning_innsyn-i-alle-innsendte-meldinger".to_string(),
                vec![LegacyGrant::new("5810", "1")],
            ),
            (
                "nav_forebygge-og-redusere-sykefravar_samarbeid".to_string(),
                vec![LegacyGrant::new("4936", "1")],
            ),
        ],
    )
}

pub fn org(org_number: &str, unit_type: &str, resources: &[&str]) -> Party {
    Party {
        organization_number: Some(org_number.to_string()),
        name: format!("Org {org_number}"),
        unit_type: Some(unit_type.to_string()),
        authorized_resources: resources.iter().map(|r| r.to_string()).collect(),
        ..Default::default()
    }
}

pub fn legacy_grants(entries: Vec<(&str, Vec<(&str, &str)>)>) -> LegacyAccessResult {
    LegacyAccessResult {
        is_error: false,
        grants: entries
            .into_iter()
            .map(|(org_number, grants)| {
                (
                    org_number.to_string(),
                    grants
                        .into_iter()
                        .map(|(code, edition)| LegacyGrant::new(code, edition))
                        .collect(),
                )
            })
            .collect::<HashMap<_, _>>(),
    }
}

pub struct TestAggregator {
    pub aggregator: AccessAggregator,
    pub legacy: Arc<MockLegacySource>,
    pub modern: Arc<MockModernSource>,
    pub cache: Arc<MockCache>,
    pub registry: Arc<ResourceRegistry>,
}

impl TestAggregator {
    pub async fn new(legacy: MockLegacySource, modern: MockModernSource) -> Self {
        Self::with_cache(legacy, modern, MockCache::new()).await
    }

    /// Registry is loaded before returning; its own cache is separate from
    /// the access cache so call counts only reflect access lookups.
    pub async fn with_cache(
        legacy: MockLegacySource,
        modern: MockModernSource,
        cache: MockCache,
    ) -> Self {
        let registry = Arc::new(ResourceRegistry::new(
            Arc::new(catalog()),
            Arc::new(StaticPolicySubjects::new([
                ("test-fager", vec!["urn:altinn:rolecode:dagl"]),
                (
                    "nav_permittering-og-nedbemmaning_innsyn-i-alle-innsendte-meldinger",
                    vec!["urn:altinn:accesspackage:permittering"],
                ),
                ("nav_forebygge-og-redusere-sykefravar_samarbeid", vec![]),
            ])),
            Arc::new(MockCache::new()),
        ));
        assert!(registry.refresh().await, "registry failed to load");

        let legacy = Arc::new(legacy);
        let modern = Arc::new(modern);
        let cache = Arc::new(cache);

        let aggregator = AccessAggregator::new(
            legacy.clone(),
            modern.clone(),
            registry.clone(),
            AccessCache::new(cache.clone()),
        );

        Self {
            aggregator,
            legacy,
            modern,
            cache,
            registry,
        }
    }
}
