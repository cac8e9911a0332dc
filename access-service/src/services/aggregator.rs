//! Merges both platform generations into one cached access tree.

use crate::models::{
    AccessNode, AccessRequest, AccessResponse, AggregationResult, Filter, LegacyGrant, Party,
    SubjectId,
};
use crate::services::cache::{AccessCache, subject_cache_key};
use crate::services::legacy::{LegacyAccessResult, LegacyAccessSource};
use crate::services::metrics::record_aggregation;
use crate::services::modern::ModernAccessSource;
use crate::services::registry::ResourceRegistry;
use crate::services::tree_filter::filter_tree;
use crate::services::SourceError;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

const ROLE_URN_PREFIX: &str = "urn:altinn:rolecode:";

#[derive(Clone)]
pub struct AccessAggregator {
    legacy: Arc<dyn LegacyAccessSource>,
    modern: Arc<dyn ModernAccessSource>,
    registry: Arc<ResourceRegistry>,
    cache: AccessCache,
}

impl AccessAggregator {
    pub fn new(
        legacy: Arc<dyn LegacyAccessSource>,
        modern: Arc<dyn ModernAccessSource>,
        registry: Arc<ResourceRegistry>,
        cache: AccessCache,
    ) -> Self {
        Self {
            legacy,
            modern,
            registry,
            cache,
        }
    }

    /// Cached-or-fresh access tree for `subject`, pruned by `filter`.
    ///
    /// Never fails: upstream trouble shows up as `is_error` with whatever
    /// partial data was collected.
    pub async fn get_accesses(&self, subject: &SubjectId, filter: &Filter) -> AggregationResult {
        let key = subject_cache_key(subject);

        let result = match self.cache.get(&key).await {
            Some(cached) => cached,
            None => self.fetch_detached(subject.clone(), key).await,
        };

        AggregationResult {
            is_error: result.is_error,
            nodes: filter_tree(&result.nodes, filter),
        }
    }

    pub async fn get_access_response(&self, request: AccessRequest) -> AccessResponse {
        let kind = request.kind();
        let (subject, filter) = request.into_parts();
        let result = self.get_accesses(&subject, &filter).await;

        tracing::debug!(
            request_kind = kind,
            is_error = result.is_error,
            nodes = result.nodes.len(),
            "Resolved accesses"
        );

        AccessResponse::from(result)
    }

    /// Runs fetch-merge-store on its own task so a dropped caller cannot
    /// abandon it halfway.
    async fn fetch_detached(&self, subject: SubjectId, key: String) -> AggregationResult {
        let this = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move { this.fetch_and_store(&subject, &task_key).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(subject_hash = %key, error = %e, "Access aggregation task failed");
                AggregationResult::failed()
            }
        }
    }

    async fn fetch_and_store(&self, subject: &SubjectId, key: &str) -> AggregationResult {
        let started = Instant::now();

        let (legacy, modern) = tokio::join!(self.legacy.fetch(subject), self.modern.fetch(subject));
        let result = self.merge(legacy, modern);

        record_aggregation(started.elapsed(), result.is_error);

        if result.is_error {
            tracing::warn!(subject_hash = %key, "Upstream failure, not caching partial accesses");
        } else {
            self.cache.set(key, &result).await;
        }

        result
    }

    /// Deterministic merge of one legacy and one modern answer.
    pub fn merge(
        &self,
        legacy: LegacyAccessResult,
        modern: Result<Vec<Party>, SourceError>,
    ) -> AggregationResult {
        let (parties, modern_error) = match modern {
            Ok(parties) => (enrich_parties(parties, &self.registry), false),
            Err(_) => (Vec::new(), true),
        };

        let legacy_by_org = combine_legacy_grants(&parties, &legacy.grants, &self.registry);

        AggregationResult {
            is_error: legacy.is_error || modern_error,
            nodes: build_nodes(&parties, &legacy_by_org),
        }
    }
}

/// Adds to every party the resources its roles and access packages entitle
/// it to, according to the registry.
pub fn enrich_parties(parties: Vec<Party>, registry: &ResourceRegistry) -> Vec<Party> {
    parties
        .into_iter()
        .map(|party| enrich_party(party, registry))
        .collect()
}

fn enrich_party(party: Party, registry: &ResourceRegistry) -> Party {
    let role_urns = party
        .authorized_roles
        .iter()
        .map(|role| format!("{}{}", ROLE_URN_PREFIX, role.to_lowercase()));
    let subject_urns: Vec<String> = role_urns
        .chain(party.authorized_access_packages.iter().cloned())
        .collect();

    let mut authorized_resources = party.authorized_resources;
    for urn in &subject_urns {
        authorized_resources.extend(registry.get_resource_ids_for_policy_subject(urn));
    }

    Party {
        authorized_resources,
        subunits: enrich_parties(party.subunits, registry),
        ..party
    }
}

/// Legacy grants per org: those implied by each org's modern resources,
/// followed by those the legacy platform reported directly. Duplicates are
/// kept here and collapse when rendered.
pub fn combine_legacy_grants(
    parties: &[Party],
    direct: &HashMap<String, Vec<LegacyGrant>>,
    registry: &ResourceRegistry,
) -> HashMap<String, Vec<LegacyGrant>> {
    let mut combined: HashMap<String, Vec<LegacyGrant>> = HashMap::new();
    let mut stack: Vec<&Party> = parties.iter().rev().collect();

    while let Some(party) = stack.pop() {
        stack.extend(party.subunits.iter().rev());

        let Some((org_number, _)) = party.org_unit() else {
            continue;
        };

        let grants = combined.entry(org_number.to_string()).or_default();
        for resource_id in &party.authorized_resources {
            grants.extend_from_slice(registry.legacy_equivalents(resource_id));
        }
        if let Some(direct_grants) = direct.get(org_number) {
            grants.extend_from_slice(direct_grants);
        }
    }

    combined
}

/// Maps qualifying parties to nodes. A party without org number or unit
/// type is dropped together with its subunits.
pub fn build_nodes(
    parties: &[Party],
    legacy_by_org: &HashMap<String, Vec<LegacyGrant>>,
) -> Vec<AccessNode> {
    parties
        .iter()
        .filter_map(|party| {
            let (org_number, unit_type) = party.org_unit()?;

            let altinn2_grants: BTreeSet<String> = legacy_by_org
                .get(org_number)
                .into_iter()
                .flatten()
                .map(LegacyGrant::key)
                .collect();

            Some(AccessNode {
                org_number: org_number.to_string(),
                name: party.name.clone(),
                organization_form: unit_type.to_string(),
                altinn3_grants: party.authorized_resources.clone(),
                altinn2_grants,
                is_deleted: party.is_deleted,
                subunits: build_nodes(&party.subunits, legacy_by_org),
            })
        })
        .collect()
}
