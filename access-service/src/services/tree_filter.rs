//! Bottom-up pruning of the access tree.

use crate::models::{AccessNode, Filter};

/// Returns the nodes that survive `filter`; the input is left untouched.
///
/// A node survives when it is not excluded as deleted, and either matches the
/// filter with its own grants or keeps at least one surviving subunit. A node
/// whose subunits were all pruned is pruned too.
pub fn filter_tree(nodes: &[AccessNode], filter: &Filter) -> Vec<AccessNode> {
    nodes
        .iter()
        .filter_map(|node| filter_node(node, filter))
        .collect()
}

fn filter_node(node: &AccessNode, filter: &Filter) -> Option<AccessNode> {
    let subunits = filter_tree(&node.subunits, filter);

    if node.is_deleted && !filter.include_deleted() {
        return None;
    }

    if !node.subunits.is_empty() && subunits.is_empty() {
        return None;
    }

    if !filter.matches(node) && subunits.is_empty() {
        return None;
    }

    Some(AccessNode {
        org_number: node.org_number.clone(),
        name: node.name.clone(),
        organization_form: node.organization_form.clone(),
        altinn3_grants: node.altinn3_grants.clone(),
        altinn2_grants: node.altinn2_grants.clone(),
        is_deleted: node.is_deleted,
        subunits,
    })
}
