// ABOUTME: Index of explicit references between blueprint elements.
// ABOUTME: A referenced element must exist before the element referencing it.

use std::collections::{HashMap, HashSet};

use super::chain::{ChainGraph, NodeId};

/// Records explicit references between elements, e.g. a function sourcing
/// a table name from configuration via interpolation.
///
/// Resources are keyed by their plain logical name; child blueprints by
/// `children.{name}`. A reference is a dependency on the referenced
/// element even when no link relationship exists between the two.
#[derive(Clone, Debug, Default)]
pub struct ReferenceIndex {
    references: HashMap<String, HashSet<String>>,
}

impl ReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `referenced_by` explicitly references `referenced`.
    pub fn add_reference(
        &mut self,
        referenced_by: impl Into<String>,
        referenced: impl Into<String>,
    ) {
        self.references
            .entry(referenced_by.into())
            .or_default()
            .insert(referenced.into());
    }

    /// The element names `referenced_by` directly references, sorted for
    /// deterministic output.
    pub fn direct_references(&self, referenced_by: &str) -> Vec<String> {
        let mut references: Vec<String> = self
            .references
            .get(referenced_by)
            .map(|refs| refs.iter().cloned().collect())
            .unwrap_or_default();
        references.sort();
        references
    }

    pub fn has_direct_reference(&self, referenced_by: &str, referenced: &str) -> bool {
        self.references
            .get(referenced_by)
            .is_some_and(|refs| refs.contains(referenced))
    }

    /// True when the resource at `by` references the resource at `to` or
    /// any of `to`'s descendants in the chain graph.
    pub fn references_resource(&self, graph: &ChainGraph, by: NodeId, to: NodeId) -> bool {
        let by_name = &graph.node(by).resource_name;
        let Some(refs) = self.references.get(by_name) else {
            return false;
        };
        if refs.contains(&graph.node(to).resource_name) {
            return true;
        }
        graph
            .descendants(to)
            .iter()
            .any(|descendant| refs.contains(&graph.node(*descendant).resource_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::orders_graph;

    #[test]
    fn direct_reference_lookup() {
        let mut refs = ReferenceIndex::new();
        refs.add_reference("createOrderFunction", "ordersTable");
        assert!(refs.has_direct_reference("createOrderFunction", "ordersTable"));
        assert!(!refs.has_direct_reference("ordersTable", "createOrderFunction"));
    }

    #[test]
    fn descendant_references_count_as_references() {
        let fixture = orders_graph();
        let mut refs = ReferenceIndex::new();
        // statsAccumulatorFunction is a descendant of ordersTable.
        refs.add_reference("orderApi", "statsAccumulatorFunction");

        assert!(refs.references_resource(
            &fixture.graph,
            fixture.order_api,
            fixture.orders_table
        ));
        assert!(!refs.references_resource(
            &fixture.graph,
            fixture.orders_table,
            fixture.order_api
        ));
    }
}
