// ABOUTME: Arena-based chain link graph connecting resources through provider links.
// ABOUTME: Nodes record reachability paths used by the ordering comparator.

use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::LinkImplementation;

/// Index of a node in a [`ChainGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// One resource in the link graph, with its outgoing and incoming link
/// edges.
///
/// A node may be reachable along multiple paths (diamond dependencies);
/// every path by which it is reachable from a chain root is recorded for
/// the ordering comparator. The link implementation map is keyed by the
/// name of the neighbouring resource on the `links_to` side.
pub struct ChainLinkNode {
    pub resource_name: String,
    pub resource_type: String,
    /// Ancestor paths such as `/orderApi/getOrdersFunction`, excluding
    /// this node itself. Empty for chain roots.
    pub paths: Vec<String>,
    pub link_implementations: HashMap<String, Arc<dyn LinkImplementation>>,
    pub links_to: Vec<NodeId>,
    pub linked_from: Vec<NodeId>,
}

/// The link graph for one blueprint, owning all chain link nodes.
#[derive(Default)]
pub struct ChainGraph {
    nodes: Vec<ChainLinkNode>,
}

impl ChainGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(
        &mut self,
        resource_name: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(ChainLinkNode {
            resource_name: resource_name.into(),
            resource_type: resource_type.into(),
            paths: Vec::new(),
            link_implementations: HashMap::new(),
            links_to: Vec::new(),
            linked_from: Vec::new(),
        });
        id
    }

    /// Connects `from` to `to` through a provider link implementation.
    ///
    /// Reachability paths accumulate top-down, so parents must be
    /// connected before their children.
    pub fn connect(&mut self, from: NodeId, to: NodeId, link: Arc<dyn LinkImplementation>) {
        let parent_paths = {
            let parent = &self.nodes[from.0];
            if parent.paths.is_empty() {
                vec![format!("/{}", parent.resource_name)]
            } else {
                parent
                    .paths
                    .iter()
                    .map(|path| format!("{}/{}", path, parent.resource_name))
                    .collect()
            }
        };
        let child_name = self.nodes[to.0].resource_name.clone();

        let parent = &mut self.nodes[from.0];
        parent.link_implementations.insert(child_name, link);
        if !parent.links_to.contains(&to) {
            parent.links_to.push(to);
        }

        let child = &mut self.nodes[to.0];
        if !child.linked_from.contains(&from) {
            child.linked_from.push(from);
        }
        for path in parent_paths {
            if !child.paths.contains(&path) {
                child.paths.push(path);
            }
        }
    }

    pub fn node(&self, id: NodeId) -> &ChainLinkNode {
        &self.nodes[id.0]
    }

    pub fn node_id(&self, resource_name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.resource_name == resource_name)
            .map(NodeId)
    }

    /// The roots of all independent chains: nodes with no incoming links.
    pub fn roots(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .map(NodeId)
            .filter(|id| self.nodes[id.0].linked_from.is_empty())
            .collect()
    }

    /// All nodes reachable from `id` through outgoing links, deduplicated.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut visited = Vec::new();
        let mut queue: Vec<NodeId> = self.nodes[id.0].links_to.clone();
        while let Some(next) = queue.pop() {
            if !visited.contains(&next) {
                visited.push(next);
                queue.extend(self.nodes[next.0].links_to.iter().copied());
            }
        }
        visited
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Removes the implementation entries for the link between the two
    /// resources, in both directions.
    #[cfg(test)]
    pub(crate) fn strip_link_implementation(&mut self, resource_a: &str, resource_b: &str) {
        if let Some(a) = self.node_id(resource_a) {
            self.nodes[a.0].link_implementations.remove(resource_b);
        }
        if let Some(b) = self.node_id(resource_b) {
            self.nodes[b.0].link_implementations.remove(resource_a);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::fixtures::{TestLink, orders_graph};

    #[test]
    fn paths_accumulate_top_down() {
        let fixture = orders_graph();
        for lambda in [
            fixture.get_orders,
            fixture.create_order,
            fixture.update_order,
        ] {
            assert_eq!(fixture.graph.node(lambda).paths, vec!["/orderApi".to_string()]);
        }
        let table = fixture.graph.node(fixture.orders_table);
        assert_eq!(
            table.paths,
            vec![
                "/orderApi/getOrdersFunction".to_string(),
                "/orderApi/createOrderFunction".to_string(),
                "/orderApi/updateOrderFunction".to_string(),
            ]
        );
    }

    #[test]
    fn roots_are_nodes_without_incoming_links() {
        let fixture = orders_graph();
        assert_eq!(fixture.graph.roots(), vec![fixture.order_api]);
    }

    #[test]
    fn descendants_follow_outgoing_links_transitively() {
        let fixture = orders_graph();
        let descendants = fixture.graph.descendants(fixture.orders_table);
        assert!(descendants.contains(&fixture.orders_stream));
        assert!(descendants.contains(&fixture.stats_accumulator));
        assert!(!descendants.contains(&fixture.order_api));
    }

    #[test]
    fn connect_dedups_repeated_edges() {
        let mut fixture = orders_graph();
        let link = TestLink::soft();
        fixture
            .graph
            .connect(fixture.order_api, fixture.get_orders, link);
        let api = fixture.graph.node(fixture.order_api);
        let count = api
            .links_to
            .iter()
            .filter(|id| **id == fixture.get_orders)
            .count();
        assert_eq!(count, 1);
    }
}
