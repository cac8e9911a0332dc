use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One org unit in the merged access tree.
///
/// Every node carries an organization number and form; parties lacking either
/// never become nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessNode {
    pub org_number: String,
    pub name: String,
    pub organization_form: String,
    pub altinn3_grants: BTreeSet<String>,
    pub altinn2_grants: BTreeSet<String>,
    pub is_deleted: bool,
    pub subunits: Vec<AccessNode>,
}

impl AccessNode {
    /// Grants held directly by this node, modern first.
    pub fn own_grants(&self) -> impl Iterator<Item = &String> {
        self.altinn3_grants.iter().chain(self.altinn2_grants.iter())
    }
}

/// The cached unit: merged tree plus whether any upstream failed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub is_error: bool,
    pub nodes: Vec<AccessNode>,
}

impl AggregationResult {
    pub fn failed() -> Self {
        Self {
            is_error: true,
            nodes: Vec::new(),
        }
    }
}

/// Caller-facing view of a filtered aggregation with flattened lookup maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResponse {
    pub is_error: bool,
    pub hierarchy: Vec<AccessNode>,
    pub org_number_to_grants: BTreeMap<String, BTreeSet<String>>,
    pub grant_to_org_numbers: BTreeMap<String, BTreeSet<String>>,
}

impl From<AggregationResult> for AccessResponse {
    fn from(result: AggregationResult) -> Self {
        let mut org_number_to_grants: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut grant_to_org_numbers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        let mut stack: Vec<&AccessNode> = result.nodes.iter().collect();
        while let Some(node) = stack.pop() {
            let grants = org_number_to_grants
                .entry(node.org_number.clone())
                .or_default();
            for grant in node.own_grants() {
                grants.insert(grant.clone());
                grant_to_org_numbers
                    .entry(grant.clone())
                    .or_default()
                    .insert(node.org_number.clone());
            }
            stack.extend(node.subunits.iter());
        }

        Self {
            is_error: result.is_error,
            hierarchy: result.nodes,
            org_number_to_grants,
            grant_to_org_numbers,
        }
    }
}
