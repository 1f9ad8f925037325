// ABOUTME: Partition of ordered deployment nodes into parallel-safe groups.
// ABOUTME: A node lands one level after the deepest element it depends on.

use super::chain::{ChainGraph, NodeId};
use super::ordering::has_priority_over;
use super::refs::ReferenceIndex;

/// One element scheduled for deployment: a resource in the chain graph or
/// a child blueprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeploymentNode {
    Resource { node: NodeId, name: String },
    Child { name: String },
}

impl DeploymentNode {
    /// The element name used in the reference index: plain resource names,
    /// `children.{name}` for child blueprints.
    pub fn element_name(&self) -> String {
        match self {
            DeploymentNode::Resource { name, .. } => name.clone(),
            DeploymentNode::Child { name } => format!("children.{name}"),
        }
    }

    /// The logical name without namespacing.
    pub fn logical_name(&self) -> &str {
        match self {
            DeploymentNode::Resource { name, .. } => name,
            DeploymentNode::Child { name } => name,
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, DeploymentNode::Resource { .. })
    }
}

/// Partitions an ordered flat list of deployment nodes into groups safe
/// for concurrent execution.
///
/// Groups are ordered: group `i` must fully complete before group `i + 1`
/// starts. A node is placed one group after the deepest node that must
/// come before it: its structural link parents, any hard-link neighbour
/// with priority over it, and every element it explicitly references.
/// An explicit reference from a parent to its own descendant inverts the
/// structural edge, matching the ordering comparator. Elements with no
/// dependency relationship share a group.
pub fn group_deployment_nodes(
    graph: &ChainGraph,
    ordered: &[DeploymentNode],
    refs: &ReferenceIndex,
) -> Vec<Vec<DeploymentNode>> {
    let predecessors = predecessor_sets(graph, ordered, refs);

    let mut memo: Vec<Option<usize>> = vec![None; ordered.len()];
    let mut visiting = vec![false; ordered.len()];
    let mut groups: Vec<Vec<DeploymentNode>> = Vec::new();
    for index in 0..ordered.len() {
        let group_index = group_index(index, &predecessors, &mut memo, &mut visiting);
        while groups.len() <= group_index {
            groups.push(Vec::new());
        }
        groups[group_index].push(ordered[index].clone());
    }
    groups
}

/// For each node, the indices of nodes that must complete in an earlier
/// group.
fn predecessor_sets(
    graph: &ChainGraph,
    ordered: &[DeploymentNode],
    refs: &ReferenceIndex,
) -> Vec<Vec<usize>> {
    let index_of_resource = |node_id: NodeId| -> Option<usize> {
        ordered.iter().position(|candidate| {
            matches!(candidate, DeploymentNode::Resource { node, .. } if *node == node_id)
        })
    };

    ordered
        .iter()
        .map(|node| {
            let mut preds = Vec::new();
            if let DeploymentNode::Resource { node: node_id, .. } = node {
                let chain_node = graph.node(*node_id);

                for &parent_id in &chain_node.linked_from {
                    // A reference from the parent to this node (or its
                    // descendants) inverts the structural edge.
                    if !refs.references_resource(graph, parent_id, *node_id)
                        && let Some(parent_index) = index_of_resource(parent_id)
                    {
                        preds.push(parent_index);
                    }
                }

                for &child_id in &chain_node.links_to {
                    let child_has_priority = has_priority_over(graph, child_id, *node_id)
                        && !refs.references_resource(graph, child_id, *node_id);
                    // A reference from this node into its own child's
                    // subtree puts the child first.
                    let reference_inversion =
                        refs.references_resource(graph, *node_id, child_id);
                    if (child_has_priority || reference_inversion)
                        && let Some(child_index) = index_of_resource(child_id)
                    {
                        preds.push(child_index);
                    }
                }
            }

            let element_name = node.element_name();
            for (other_index, other) in ordered.iter().enumerate() {
                if other == node {
                    continue;
                }
                if refs.has_direct_reference(&element_name, &other.element_name()) {
                    preds.push(other_index);
                }
            }

            preds.sort_unstable();
            preds.dedup();
            preds
        })
        .collect()
}

fn group_index(
    index: usize,
    predecessors: &[Vec<usize>],
    memo: &mut Vec<Option<usize>>,
    visiting: &mut Vec<bool>,
) -> usize {
    if let Some(group) = memo[index] {
        return group;
    }
    if visiting[index] {
        // Dependency cycles are validated out upstream; a back-edge here
        // contributes no constraint rather than recursing forever.
        return 0;
    }
    visiting[index] = true;
    let mut group = 0;
    for &pred in &predecessors[index] {
        group = group.max(group_index(pred, predecessors, memo, visiting) + 1);
    }
    visiting[index] = false;
    memo[index] = Some(group);
    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::orders_graph;
    use crate::graph::{ChainGraph, order_for_deployment};

    fn group_of(groups: &[Vec<DeploymentNode>], name: &str) -> usize {
        groups
            .iter()
            .position(|group| group.iter().any(|node| node.logical_name() == name))
            .unwrap_or_else(|| panic!("{name} missing from groups"))
    }

    fn resource_nodes(fixture: &crate::graph::fixtures::OrdersGraph) -> Vec<DeploymentNode> {
        let ordered = order_for_deployment(
            &fixture.graph,
            &[fixture.order_api],
            &ReferenceIndex::new(),
        )
        .unwrap();
        ordered
            .iter()
            .map(|id| DeploymentNode::Resource {
                node: *id,
                name: fixture.graph.node(*id).resource_name.clone(),
            })
            .collect()
    }

    #[test]
    fn lambdas_share_a_group_and_table_comes_strictly_later() {
        let fixture = orders_graph();
        let nodes = resource_nodes(&fixture);

        let groups = group_deployment_nodes(&fixture.graph, &nodes, &ReferenceIndex::new());

        let get_orders = group_of(&groups, "getOrdersFunction");
        let create_order = group_of(&groups, "createOrderFunction");
        let update_order = group_of(&groups, "updateOrderFunction");
        assert_eq!(get_orders, create_order);
        assert_eq!(get_orders, update_order);

        let table = group_of(&groups, "ordersTable");
        assert!(table > get_orders, "table must be strictly later");
        assert!(table > create_order);
        assert!(table > update_order);
        assert!(group_of(&groups, "ordersStream") > table);
    }

    #[test]
    fn referencing_child_lands_in_a_later_group() {
        let fixture = orders_graph();
        let mut refs = ReferenceIndex::new();
        refs.add_reference("children.analytics", "ordersTable");

        let mut nodes = resource_nodes(&fixture);
        nodes.push(DeploymentNode::Child {
            name: "analytics".to_string(),
        });

        let groups = group_deployment_nodes(&fixture.graph, &nodes, &refs);
        assert!(group_of(&groups, "analytics") > group_of(&groups, "ordersTable"));
    }

    #[test]
    fn unrelated_elements_share_the_first_group() {
        let mut graph = ChainGraph::new();
        let a = graph.add_resource("bucketA", "aws/s3/bucket");
        let b = graph.add_resource("bucketB", "aws/s3/bucket");
        let nodes = vec![
            DeploymentNode::Resource {
                node: a,
                name: "bucketA".to_string(),
            },
            DeploymentNode::Resource {
                node: b,
                name: "bucketB".to_string(),
            },
        ];

        let groups = group_deployment_nodes(&graph, &nodes, &ReferenceIndex::new());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }
}
