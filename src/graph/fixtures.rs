// ABOUTME: Shared graph fixtures for ordering and grouping tests.
// ABOUTME: An orders API chain with a single hard link, table before stream.

use std::sync::Arc;

use async_trait::async_trait;

use crate::provider::{
    LinkImplementation, LinkKind, LinkUpdateIntermediaryResourcesInput,
    LinkUpdateIntermediaryResourcesOutput, LinkUpdateResourceInput, LinkUpdateResourceOutput,
    ProviderError,
};

use super::{ChainGraph, NodeId};

/// Minimal link implementation carrying only ordering metadata.
pub(crate) struct TestLink {
    kind: LinkKind,
    priority: Option<String>,
}

impl TestLink {
    pub(crate) fn soft() -> Arc<dyn LinkImplementation> {
        Arc::new(TestLink {
            kind: LinkKind::Soft,
            priority: None,
        })
    }

    pub(crate) fn hard(priority_resource_type: &str) -> Arc<dyn LinkImplementation> {
        Arc::new(TestLink {
            kind: LinkKind::Hard,
            priority: Some(priority_resource_type.to_string()),
        })
    }
}

#[async_trait]
impl LinkImplementation for TestLink {
    fn kind(&self) -> LinkKind {
        self.kind
    }

    fn priority_resource_type(&self) -> Option<&str> {
        self.priority.as_deref()
    }

    async fn update_resource_a(
        &self,
        _input: &LinkUpdateResourceInput,
    ) -> Result<LinkUpdateResourceOutput, ProviderError> {
        Ok(LinkUpdateResourceOutput::default())
    }

    async fn update_resource_b(
        &self,
        _input: &LinkUpdateResourceInput,
    ) -> Result<LinkUpdateResourceOutput, ProviderError> {
        Ok(LinkUpdateResourceOutput::default())
    }

    async fn update_intermediary_resources(
        &self,
        _input: &LinkUpdateIntermediaryResourcesInput,
    ) -> Result<LinkUpdateIntermediaryResourcesOutput, ProviderError> {
        Ok(LinkUpdateIntermediaryResourcesOutput::default())
    }
}

pub(crate) struct OrdersGraph {
    pub graph: ChainGraph,
    pub order_api: NodeId,
    pub get_orders: NodeId,
    pub create_order: NodeId,
    pub update_order: NodeId,
    pub orders_table: NodeId,
    pub orders_stream: NodeId,
    pub stats_accumulator: NodeId,
}

/// The orders API chain:
///
/// `orderApi -> {getOrdersFunction, createOrderFunction,
/// updateOrderFunction} -> ordersTable -> ordersStream ->
/// statsAccumulatorFunction`
///
/// The only hard link in the chain is between the orders table and the
/// orders stream, with the table as the priority resource type.
pub(crate) fn orders_graph() -> OrdersGraph {
    let mut graph = ChainGraph::new();
    let order_api = graph.add_resource("orderApi", "aws/apigateway/api");
    let get_orders = graph.add_resource("getOrdersFunction", "aws/lambda/function");
    let create_order = graph.add_resource("createOrderFunction", "aws/lambda/function");
    let update_order = graph.add_resource("updateOrderFunction", "aws/lambda/function");
    let orders_table = graph.add_resource("ordersTable", "aws/dynamodb/table");
    let orders_stream = graph.add_resource("ordersStream", "aws/dynamodb/stream");
    let stats_accumulator = graph.add_resource("statsAccumulatorFunction", "aws/lambda/function");

    graph.connect(order_api, get_orders, TestLink::soft());
    graph.connect(order_api, create_order, TestLink::soft());
    graph.connect(order_api, update_order, TestLink::soft());
    graph.connect(get_orders, orders_table, TestLink::soft());
    graph.connect(create_order, orders_table, TestLink::soft());
    graph.connect(update_order, orders_table, TestLink::soft());
    graph.connect(orders_table, orders_stream, TestLink::hard("aws/dynamodb/table"));
    graph.connect(orders_stream, stats_accumulator, TestLink::soft());

    OrdersGraph {
        graph,
        order_api,
        get_orders,
        create_order,
        update_order,
        orders_table,
        orders_stream,
        stats_accumulator,
    }
}
