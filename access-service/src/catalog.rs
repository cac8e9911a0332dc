//! Compiled-in knowledge about both platform generations.
//!
//! Lists the legacy service definitions queried per subject, the modern
//! resources whose policy subjects the registry tracks, and the hand-kept
//! equivalence between the two. It is also the validation source for filters.

use crate::models::LegacyGrant;
use std::collections::BTreeMap;

const LEGACY_SERVICES: &[(&str, &str)] = &[
    ("3403", "1"),
    ("4936", "1"),
    ("5078", "1"),
    ("5278", "1"),
    ("5332", "1"),
    ("5332", "2"),
    ("5384", "1"),
    ("5441", "1"),
    ("5516", "1"),
    ("5516", "2"),
    ("5516", "3"),
    ("5516", "4"),
    ("5516", "5"),
    ("5810", "1"),
    ("5902", "1"),
    ("5934", "1"),
];

const RESOURCES: &[(&str, &[(&str, &str)])] = &[
    (
        "nav_permittering-og-nedbemmaning_innsyn-i-alle-innsendte-meldinger",
        &[("5810", "1")],
    ),
    ("nav_forebygge-og-redusere-sykefravar_samarbeid", &[("5934", "1")]),
    (
        "nav_forebygge-og-redusere-sykefravar_sykefravarsstatistikk",
        &[("3403", "1")],
    ),
    ("nav_rekruttering_kandidater", &[("5078", "1")]),
    ("nav_tiltak_arbeidstrening", &[("5332", "1"), ("5332", "2")]),
    ("nav_tiltak_ekspertbistand", &[("5384", "1")]),
    (
        "nav_tiltak_tilskuddsbrev-om-lonnstilskudd",
        &[("5516", "1"), ("5516", "2"), ("5516", "3")],
    ),
    ("nav_arbeidsforhold_aa-registeret-innsyn-arbeidsgiver", &[("5441", "1")]),
    ("nav_sosialtjenester_digisos-avtale", &[]),
];

/// Static catalog of known legacy services, modern resources, and their mapping.
#[derive(Debug, Clone, Default)]
pub struct AccessCatalog {
    legacy_services: Vec<LegacyGrant>,
    resources: BTreeMap<String, Vec<LegacyGrant>>,
}

impl AccessCatalog {
    /// Every grant referenced by the resource table is also treated as a
    /// known legacy service.
    pub fn new(
        legacy_services: Vec<LegacyGrant>,
        resources: impl IntoIterator<Item = (String, Vec<LegacyGrant>)>,
    ) -> Self {
        let resources: BTreeMap<_, _> = resources.into_iter().collect();
        let mut legacy_services = legacy_services;
        for grant in resources.values().flatten() {
            if !legacy_services.contains(grant) {
                legacy_services.push(grant.clone());
            }
        }
        Self {
            legacy_services,
            resources,
        }
    }

    pub fn builtin() -> Self {
        Self::new(
            LEGACY_SERVICES
                .iter()
                .map(|(code, edition)| LegacyGrant::new(*code, *edition))
                .collect(),
            RESOURCES.iter().map(|(resource_id, grants)| {
                (
                    resource_id.to_string(),
                    grants
                        .iter()
                        .map(|(code, edition)| LegacyGrant::new(*code, *edition))
                        .collect(),
                )
            }),
        )
    }

    /// Legacy service definitions to query for every subject.
    pub fn legacy_services(&self) -> &[LegacyGrant] {
        &self.legacy_services
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Legacy grants equivalent to a modern resource; empty when unmapped.
    pub fn legacy_equivalents(&self, resource_id: &str) -> &[LegacyGrant] {
        self.resources
            .get(resource_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_known_resource(&self, resource_id: &str) -> bool {
        self.resources.contains_key(resource_id)
    }

    pub fn is_known_legacy_key(&self, key: &str) -> bool {
        LegacyGrant::parse_key(key).is_some_and(|grant| self.legacy_services.contains(&grant))
    }
}
