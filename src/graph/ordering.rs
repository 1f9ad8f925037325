// ABOUTME: Deployment ordering for flattened chains of linked resources.
// ABOUTME: Hard link priority decides order unless an explicit reference overrides it.

use thiserror::Error;

use crate::provider::LinkKind;

use super::chain::{ChainGraph, NodeId};
use super::refs::ReferenceIndex;

/// Errors from the ordering pass. A missing link implementation means the
/// graph was built incorrectly upstream and is reported rather than
/// silently ignored.
#[derive(Debug, Error)]
pub enum OrderingError {
    #[error("no link implementation registered between {resource_a} and {resource_b}")]
    MissingLinkImplementation {
        resource_a: String,
        resource_b: String,
    },
}

/// Produces a flat ordered list of chain link nodes for change staging and
/// deployment.
///
/// Ordering is determined by the priority resource type of each hard link
/// and by explicit references between resources. An explicit reference is
/// a dependency on the referenced resource: it wins over any link-derived
/// priority, and forces the referenced resource first even when no link
/// relationship exists at all.
///
/// Only resources with a genuine dependency relationship have a guaranteed
/// relative order; unrelated nodes keep their discovery order. The input
/// chains must not contain direct or transitive circular hard links.
pub fn order_for_deployment(
    graph: &ChainGraph,
    chains: &[NodeId],
    refs: &ReferenceIndex,
) -> Result<Vec<NodeId>, OrderingError> {
    let mut flattened = Vec::new();
    flatten_chains(graph, chains, &mut flattened);
    validate_link_implementations(graph, &flattened)?;

    // Insertion sort over a partial order: an element only moves left past
    // a neighbour that must come after it. A comparator-based library sort
    // is unsuitable because the relation is not total.
    for i in 1..flattened.len() {
        let mut j = i;
        while j > 0 && must_precede(graph, refs, flattened[j], flattened[j - 1]) {
            flattened.swap(j, j - 1);
            j -= 1;
        }
    }

    Ok(flattened)
}

/// Flattens all chains into a deduplicated list, depth first.
fn flatten_chains(graph: &ChainGraph, chains: &[NodeId], flattened: &mut Vec<NodeId>) {
    for &chain in chains {
        if !flattened.contains(&chain) {
            flattened.push(chain);
            let links_to = graph.node(chain).links_to.clone();
            if !links_to.is_empty() {
                flatten_chains(graph, &links_to, flattened);
            }
        }
    }
}

fn validate_link_implementations(
    graph: &ChainGraph,
    nodes: &[NodeId],
) -> Result<(), OrderingError> {
    for &id in nodes {
        let node = graph.node(id);
        for &neighbour_id in &node.links_to {
            let neighbour = graph.node(neighbour_id);
            let registered = node
                .link_implementations
                .contains_key(&neighbour.resource_name)
                || neighbour
                    .link_implementations
                    .contains_key(&node.resource_name);
            if !registered {
                return Err(OrderingError::MissingLinkImplementation {
                    resource_a: node.resource_name.clone(),
                    resource_b: neighbour.resource_name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Whether node `a` must be deployed before node `b`.
fn must_precede(graph: &ChainGraph, refs: &ReferenceIndex, a: NodeId, b: NodeId) -> bool {
    // If b references a (or any of a's descendants) without a link
    // relationship, a must exist first regardless of link priorities.
    if refs.references_resource(graph, b, a) {
        return true;
    }

    let node_a = graph.node(a);
    let node_b = graph.node(b);

    let paths_with_a: Vec<&String> = node_b
        .paths
        .iter()
        .filter(|path| path_contains(path, &node_a.resource_name))
        .collect();
    let a_is_ancestor = !paths_with_a.is_empty();
    let a_is_descendant = node_a
        .paths
        .iter()
        .any(|path| path_contains(path, &node_b.resource_name));
    if !a_is_ancestor && !a_is_descendant {
        return false;
    }

    // An explicit reference from a to b (or b's descendants) is a
    // dependency on b, cancelling any link-derived priority a may have.
    if refs.references_resource(graph, a, b) {
        return false;
    }

    // a has priority when a direct parent of b on an a-rooted path, or a
    // direct child of b, is the priority resource type of a hard link
    // with b.
    let parent_with_priority = node_b.linked_from.iter().any(|&parent_id| {
        let parent = graph.node(parent_id);
        let on_a_rooted_path = paths_with_a
            .iter()
            .any(|path| path.ends_with(&format!("/{}", parent.resource_name)));
        on_a_rooted_path && has_priority_over(graph, parent_id, b)
    });
    let child_with_priority = node_b
        .links_to
        .iter()
        .any(|&child_id| has_priority_over(graph, child_id, b));

    (a_is_ancestor && parent_with_priority) || (a_is_descendant && child_with_priority)
}

/// Whether `candidate` is the priority resource type in a hard link with
/// `other`. The relationship could be registered either way around.
pub(crate) fn has_priority_over(graph: &ChainGraph, candidate: NodeId, other: NodeId) -> bool {
    let candidate_node = graph.node(candidate);
    let other_node = graph.node(other);
    let link = candidate_node
        .link_implementations
        .get(&other_node.resource_name)
        .or_else(|| {
            other_node
                .link_implementations
                .get(&candidate_node.resource_name)
        });
    let Some(link) = link else {
        return false;
    };
    link.kind() == LinkKind::Hard
        && link
            .priority_resource_type()
            .is_some_and(|priority| priority == candidate_node.resource_type)
}

fn path_contains(path: &str, resource_name: &str) -> bool {
    path.split('/').any(|segment| segment == resource_name)
}
