// ABOUTME: Property tests for the pending-link barrier during change staging.
// ABOUTME: Randomized arrival order must yield exactly one ready notification.

mod support;

use std::collections::HashSet;

use proptest::prelude::*;

use support::RecordingLink;
use trellis::graph::{ChainGraph, NodeId};
use trellis::staging::ChangeStagingState;

/// The orders API chain used throughout the engine tests:
/// `orderApi -> {getOrders, createOrder, updateOrder} -> ordersTable ->
/// ordersStream -> statsAccumulator`.
fn orders_graph() -> (ChainGraph, Vec<NodeId>) {
    let mut graph = ChainGraph::new();
    let api = graph.add_resource("orderApi", "aws/apigateway/api");
    let get_orders = graph.add_resource("getOrdersFunction", "aws/lambda/function");
    let create_order = graph.add_resource("createOrderFunction", "aws/lambda/function");
    let update_order = graph.add_resource("updateOrderFunction", "aws/lambda/function");
    let table = graph.add_resource("ordersTable", "aws/dynamodb/table");
    let stream = graph.add_resource("ordersStream", "aws/dynamodb/stream");
    let stats = graph.add_resource("statsAccumulatorFunction", "aws/lambda/function");

    graph.connect(api, get_orders, RecordingLink::soft());
    graph.connect(api, create_order, RecordingLink::soft());
    graph.connect(api, update_order, RecordingLink::soft());
    graph.connect(get_orders, table, RecordingLink::soft());
    graph.connect(create_order, table, RecordingLink::soft());
    graph.connect(update_order, table, RecordingLink::soft());
    graph.connect(table, stream, RecordingLink::hard("aws/dynamodb/table"));
    graph.connect(stream, stats, RecordingLink::soft());

    let nodes = vec![
        api,
        get_orders,
        create_order,
        update_order,
        table,
        stream,
        stats,
    ];
    (graph, nodes)
}

const LINK_COUNT: usize = 8;

proptest! {
    /// Whatever order the endpoint resources are staged in, every link is
    /// reported ready exactly once, and never before both of its
    /// endpoints have been staged.
    #[test]
    fn every_link_becomes_ready_exactly_once(
        order in Just((0..7usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let (graph, nodes) = orders_graph();
        let staging = ChangeStagingState::new();

        let mut staged: HashSet<String> = HashSet::new();
        let mut ready_links: Vec<String> = Vec::new();

        for index in order {
            let node_id = nodes[index];
            let node_name = graph.node(node_id).resource_name.clone();
            staged.insert(node_name);

            for ready in staging.update_link_staging_state(&graph, node_id) {
                prop_assert!(
                    staged.contains(&ready.resource_a_name),
                    "link {} ready before {} was staged",
                    ready.link_name(),
                    ready.resource_a_name
                );
                prop_assert!(
                    staged.contains(&ready.resource_b_name),
                    "link {} ready before {} was staged",
                    ready.link_name(),
                    ready.resource_b_name
                );
                ready_links.push(ready.link_name());
            }
        }

        let unique: HashSet<&String> = ready_links.iter().collect();
        prop_assert_eq!(
            unique.len(),
            ready_links.len(),
            "a link was reported ready more than once: {:?}",
            &ready_links
        );
        prop_assert_eq!(ready_links.len(), LINK_COUNT);
    }
}
