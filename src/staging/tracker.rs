// ABOUTME: Thread-safe accumulator for the state of a change staging pass.
// ABOUTME: Ephemeral; lasts for the duration of one staging operation.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::graph::{ChainGraph, DeploymentNode, NodeId};
use crate::types::{
    BlueprintChanges, CollectedElements, FieldChange, LinkChanges, NewBlueprintDefinition,
    ResourceChanges,
};

use super::pending::{LinkPendingCompletion, logical_link_name};

/// Staged changes for a single resource.
#[derive(Clone, Debug)]
pub struct ResourceChangesMessage {
    pub resource_name: String,
    pub new: bool,
    pub removed: bool,
    pub changes: ResourceChanges,
}

/// Staged changes for a single link.
#[derive(Clone, Debug)]
pub struct LinkChangesMessage {
    pub resource_a_name: String,
    pub resource_b_name: String,
    pub new: bool,
    pub removed: bool,
    pub changes: LinkChanges,
}

/// Staged changes for a single child blueprint.
#[derive(Clone, Debug)]
pub struct ChildChangesMessage {
    pub child_blueprint_name: String,
    pub new: bool,
    pub removed: bool,
    pub changes: BlueprintChanges,
}

/// Collected export changes applied in one update.
#[derive(Clone, Debug, Default)]
pub struct ExportChangesUpdate {
    pub new_exports: HashMap<String, FieldChange>,
    pub export_changes: HashMap<String, FieldChange>,
    pub removed_exports: Vec<String>,
    pub unchanged_exports: Vec<String>,
    pub resolve_on_deploy: Vec<String>,
}

#[derive(Default)]
struct StagingInner {
    /// Logical link name to pending completion state.
    pending_links: HashMap<String, LinkPendingCompletion>,
    /// Resource name to the pending links that include the resource.
    resource_name_link_map: HashMap<String, Vec<String>>,
    /// The diff being accumulated, extracted once staging completes.
    output: BlueprintChanges,
    /// Elements that must be recreated due to removal of dependencies.
    must_recreate: CollectedElements,
}

/// Tracks and sets state while staging changes for a deployment.
///
/// Thread-safe behind a single coarse lock; resources are staged
/// concurrently but every update is a short map operation. The tracker is
/// only ever used within one staging pass and must be discarded afterward.
#[derive(Default)]
pub struct ChangeStagingState {
    inner: Mutex<StagingInner>,
}

impl ChangeStagingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds elements that must be recreated due to removal of
    /// dependencies. The set only ever grows.
    pub fn add_elements_that_must_be_recreated(&self, must_recreate: &CollectedElements) {
        let mut inner = self.inner.lock();
        for resource in &must_recreate.resources {
            if !inner.must_recreate.has_resource(&resource.resource_name) {
                inner.must_recreate.resources.push(resource.clone());
                inner.must_recreate.total += 1;
            }
        }
        for child in &must_recreate.children {
            if !inner.must_recreate.has_child(&child.child_name) {
                inner.must_recreate.children.push(child.clone());
                inner.must_recreate.total += 1;
            }
        }
    }

    /// True when the named resource must be recreated due to the removal
    /// of dependencies.
    pub fn must_recreate_resource_on_removed_dependencies(&self, resource_name: &str) -> bool {
        self.inner.lock().must_recreate.has_resource(resource_name)
    }

    /// Applies the staged changes for a resource, idempotently: the last
    /// message for a given resource name wins.
    pub fn apply_resource_changes(&self, message: ResourceChangesMessage) {
        let mut inner = self.inner.lock();
        let resolve_on_deploy: Vec<String> = message
            .changes
            .field_changes_known_on_deploy
            .iter()
            .map(|path| full_resource_path(&message.resource_name, path))
            .collect();

        if message.new {
            inner.output.resource_changes.remove(&message.resource_name);
            inner
                .output
                .new_resources
                .insert(message.resource_name.clone(), message.changes);
        } else if message.removed {
            push_unique(
                &mut inner.output.removed_resources,
                message.resource_name.clone(),
            );
        } else {
            inner.output.new_resources.remove(&message.resource_name);
            inner
                .output
                .resource_changes
                .insert(message.resource_name.clone(), message.changes);
        }

        extend_unique(&mut inner.output.resolve_on_deploy, resolve_on_deploy);
    }

    /// Applies the staged changes for a link to the resource change set of
    /// the link's resource A.
    pub fn apply_link_changes(&self, message: LinkChangesMessage) {
        let mut inner = self.inner.lock();
        let link_name = logical_link_name(&message.resource_a_name, &message.resource_b_name);

        if message.removed {
            push_unique(&mut inner.output.removed_links, link_name);
            return;
        }

        let resolve_on_deploy: Vec<String> = message
            .changes
            .field_changes_known_on_deploy
            .iter()
            .map(|path| full_link_path(&link_name, path))
            .collect();

        let resource_changes = resource_changes_mut(&mut inner.output, &message.resource_a_name);
        if let Some(resource_changes) = resource_changes {
            if message.new {
                resource_changes
                    .new_outbound_links
                    .insert(message.resource_b_name.clone(), message.changes);
            } else {
                resource_changes
                    .outbound_link_changes
                    .insert(message.resource_b_name.clone(), message.changes);
            }
            extend_unique(&mut inner.output.resolve_on_deploy, resolve_on_deploy);
        }
    }

    /// Applies the staged changes for a child blueprint, idempotently.
    pub fn apply_child_changes(&self, message: ChildChangesMessage) {
        let mut inner = self.inner.lock();
        if message.new {
            let definition = NewBlueprintDefinition {
                new_resources: message.changes.new_resources,
                new_children: message.changes.new_children,
                new_exports: message.changes.new_exports,
            };
            inner
                .output
                .new_children
                .insert(message.child_blueprint_name.clone(), definition);
        } else if message.removed {
            push_unique(
                &mut inner.output.removed_children,
                message.child_blueprint_name.clone(),
            );
        } else {
            inner
                .output
                .child_changes
                .insert(message.child_blueprint_name.clone(), message.changes);
        }
    }

    /// Returns the staged changes for a resource, if any.
    pub fn resource_changes(&self, resource_name: &str) -> Option<ResourceChanges> {
        let inner = self.inner.lock();
        inner
            .output
            .new_resources
            .get(resource_name)
            .or_else(|| inner.output.resource_changes.get(resource_name))
            .cloned()
    }

    /// Registers pending links for every edge adjacent to the node that is
    /// not tracked yet, then clears this node's side of every tracked
    /// adjacent link.
    ///
    /// Returns the links whose both sides are now resolved and are
    /// therefore ready for their own link-level diff to be computed. This
    /// realises a barrier: a link cannot be diffed until both of its
    /// endpoint resources have been diffed.
    pub fn update_link_staging_state(
        &self,
        graph: &ChainGraph,
        node_id: NodeId,
    ) -> Vec<LinkPendingCompletion> {
        let mut inner = self.inner.lock();
        let node = graph.node(node_id);
        let has_links = !node.links_to.is_empty() || !node.linked_from.is_empty();
        let already_pending = inner
            .resource_name_link_map
            .get(&node.resource_name)
            .cloned()
            .unwrap_or_default();

        if has_links {
            add_pending_links(&mut inner, graph, node_id, &already_pending);
        }
        update_pending_links(&mut inner, &node.resource_name, &already_pending)
    }

    /// Number of links still pending for the resources in the group.
    pub fn count_pending_links_for_group(&self, group: &[DeploymentNode]) -> usize {
        let inner = self.inner.lock();
        let mut count = 0;
        for node in group {
            if let DeploymentNode::Resource { name, .. } = node
                && let Some(link_names) = inner.resource_name_link_map.get(name)
            {
                count += link_names
                    .iter()
                    .filter(|link_name| {
                        inner
                            .pending_links
                            .get(*link_name)
                            .is_some_and(|link| link.link_pending)
                    })
                    .count();
            }
        }
        count
    }

    /// Marks the link between the two resources as no longer pending.
    pub fn mark_link_as_no_longer_pending(
        &self,
        resource_a_name: &str,
        resource_b_name: &str,
    ) {
        let mut inner = self.inner.lock();
        let link_name = logical_link_name(resource_a_name, resource_b_name);
        if let Some(pending) = inner.pending_links.get_mut(&link_name) {
            pending.link_pending = false;
        }
    }

    /// Replaces the export changes in the staging state.
    pub fn update_export_changes(&self, update: ExportChangesUpdate) {
        let mut inner = self.inner.lock();
        inner.output.new_exports = update.new_exports;
        inner.output.export_changes = update.export_changes;
        inner.output.removed_exports = update.removed_exports;
        inner.output.unchanged_exports = update.unchanged_exports;
        extend_unique(&mut inner.output.resolve_on_deploy, update.resolve_on_deploy);
    }

    /// Produces the final immutable diff snapshot.
    ///
    /// Children that must be recreated are reported in
    /// `recreate_children` when child changes were staged for them.
    pub fn extract_blueprint_changes(&self) -> BlueprintChanges {
        let inner = self.inner.lock();
        let mut changes = inner.output.clone();
        changes.recreate_children = inner
            .must_recreate
            .children
            .iter()
            .filter(|child| inner.output.child_changes.contains_key(&child.child_name))
            .map(|child| child.child_name.clone())
            .collect();
        changes
    }
}

/// Must only be called with the staging lock held.
fn add_pending_links(
    inner: &mut StagingInner,
    graph: &ChainGraph,
    node_id: NodeId,
    already_pending: &[String],
) {
    let node = graph.node(node_id);

    for &links_to_id in &node.links_to {
        let links_to = graph.node(links_to_id);
        let link_name = logical_link_name(&node.resource_name, &links_to.resource_name);
        if !already_pending.contains(&link_name) && !inner.pending_links.contains_key(&link_name)
        {
            inner.pending_links.insert(
                link_name.clone(),
                LinkPendingCompletion {
                    resource_a_name: node.resource_name.clone(),
                    resource_b_name: links_to.resource_name.clone(),
                    resource_a_pending: false,
                    resource_b_pending: true,
                    link_pending: true,
                },
            );
            index_link(inner, &node.resource_name, &link_name);
            index_link(inner, &links_to.resource_name, &link_name);
        }
    }

    for &linked_from_id in &node.linked_from {
        let linked_from = graph.node(linked_from_id);
        let link_name = logical_link_name(&linked_from.resource_name, &node.resource_name);
        if !already_pending.contains(&link_name) && !inner.pending_links.contains_key(&link_name)
        {
            inner.pending_links.insert(
                link_name.clone(),
                LinkPendingCompletion {
                    resource_a_name: linked_from.resource_name.clone(),
                    resource_b_name: node.resource_name.clone(),
                    resource_a_pending: true,
                    resource_b_pending: false,
                    link_pending: true,
                },
            );
            index_link(inner, &linked_from.resource_name, &link_name);
            index_link(inner, &node.resource_name, &link_name);
        }
    }
}

/// Must only be called with the staging lock held.
fn update_pending_links(
    inner: &mut StagingInner,
    resource_name: &str,
    pending_link_names: &[String],
) -> Vec<LinkPendingCompletion> {
    let mut ready = Vec::new();
    for link_name in pending_link_names {
        if let Some(completion) = inner.pending_links.get_mut(link_name) {
            if completion.resource_a_name == resource_name {
                completion.resource_a_pending = false;
            } else if completion.resource_b_name == resource_name {
                completion.resource_b_pending = false;
            }
            if completion.endpoints_complete() {
                ready.push(completion.clone());
            }
        }
    }
    ready
}

fn index_link(inner: &mut StagingInner, resource_name: &str, link_name: &str) {
    let links = inner
        .resource_name_link_map
        .entry(resource_name.to_string())
        .or_default();
    if !links.iter().any(|existing| existing == link_name) {
        links.push(link_name.to_string());
    }
}

fn resource_changes_mut<'a>(
    output: &'a mut BlueprintChanges,
    resource_name: &str,
) -> Option<&'a mut ResourceChanges> {
    if output.new_resources.contains_key(resource_name) {
        return output.new_resources.get_mut(resource_name);
    }
    output.resource_changes.get_mut(resource_name)
}

fn full_resource_path(resource_name: &str, field_path: &str) -> String {
    let element_id = format!("resources.{resource_name}");
    if field_path.starts_with('[') {
        format!("{element_id}{field_path}")
    } else {
        format!("{element_id}.{field_path}")
    }
}

fn full_link_path(link_name: &str, field_path: &str) -> String {
    let element_id = format!("links.{link_name}");
    if field_path.starts_with('[') {
        format!("{element_id}{field_path}")
    } else {
        format!("{element_id}.{field_path}")
    }
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

fn extend_unique(values: &mut Vec<String>, additions: Vec<String>) {
    for addition in additions {
        push_unique(values, addition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::orders_graph;
    use crate::types::ResourceIdInfo;

    fn resource_message(name: &str, new: bool) -> ResourceChangesMessage {
        ResourceChangesMessage {
            resource_name: name.to_string(),
            new,
            removed: false,
            changes: ResourceChanges {
                field_changes_known_on_deploy: vec!["spec.tableName".to_string()],
                ..Default::default()
            },
        }
    }

    #[test]
    fn applying_the_same_resource_changes_twice_is_idempotent() {
        let staging = ChangeStagingState::new();
        staging.apply_resource_changes(resource_message("ordersTable", true));
        staging.apply_resource_changes(resource_message("ordersTable", true));

        let changes = staging.extract_blueprint_changes();
        assert_eq!(changes.new_resources.len(), 1);
        assert_eq!(
            changes.resolve_on_deploy,
            vec!["resources.ordersTable.spec.tableName".to_string()]
        );
    }

    #[test]
    fn later_message_for_the_same_resource_wins() {
        let staging = ChangeStagingState::new();
        staging.apply_resource_changes(resource_message("ordersTable", true));
        staging.apply_resource_changes(resource_message("ordersTable", false));

        let changes = staging.extract_blueprint_changes();
        assert!(changes.new_resources.is_empty());
        assert_eq!(changes.resource_changes.len(), 1);
    }

    #[test]
    fn link_changes_attach_to_resource_a() {
        let staging = ChangeStagingState::new();
        staging.apply_resource_changes(resource_message("ordersTable", false));
        staging.apply_link_changes(LinkChangesMessage {
            resource_a_name: "ordersTable".to_string(),
            resource_b_name: "ordersStream".to_string(),
            new: true,
            removed: false,
            changes: LinkChanges::default(),
        });

        let changes = staging.extract_blueprint_changes();
        let table_changes = changes.resource_changes.get("ordersTable").unwrap();
        assert!(table_changes.new_outbound_links.contains_key("ordersStream"));
    }

    #[test]
    fn removed_links_are_recorded_once() {
        let staging = ChangeStagingState::new();
        let message = LinkChangesMessage {
            resource_a_name: "ordersTable".to_string(),
            resource_b_name: "ordersStream".to_string(),
            new: false,
            removed: true,
            changes: LinkChanges::default(),
        };
        staging.apply_link_changes(message.clone());
        staging.apply_link_changes(message);

        let changes = staging.extract_blueprint_changes();
        assert_eq!(
            changes.removed_links,
            vec!["ordersTable::ordersStream".to_string()]
        );
    }

    #[test]
    fn link_is_ready_only_after_both_endpoints_are_staged() {
        let fixture = orders_graph();
        let staging = ChangeStagingState::new();

        let ready = staging.update_link_staging_state(&fixture.graph, fixture.orders_table);
        assert!(
            ready.is_empty(),
            "no link is ready before both endpoints are staged"
        );

        let ready = staging.update_link_staging_state(&fixture.graph, fixture.orders_stream);
        let ready_names: Vec<String> = ready.iter().map(|link| link.link_name()).collect();
        assert!(ready_names.contains(&"ordersTable::ordersStream".to_string()));
    }

    #[test]
    fn export_changes_replace_previous_export_state() {
        let staging = ChangeStagingState::new();
        staging.update_export_changes(ExportChangesUpdate {
            removed_exports: vec!["stale".to_string()],
            ..Default::default()
        });
        staging.update_export_changes(ExportChangesUpdate {
            new_exports: [(
                "ordersTableName".to_string(),
                FieldChange {
                    field_path: "exports.ordersTableName".to_string(),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
            removed_exports: vec!["oldEndpoint".to_string()],
            resolve_on_deploy: vec!["exports.ordersTableName".to_string()],
            ..Default::default()
        });

        let changes = staging.extract_blueprint_changes();
        assert!(changes.new_exports.contains_key("ordersTableName"));
        assert_eq!(changes.removed_exports, vec!["oldEndpoint".to_string()]);
        assert_eq!(
            changes.resolve_on_deploy,
            vec!["exports.ordersTableName".to_string()]
        );
    }

    #[test]
    fn must_recreate_set_grows_monotonically() {
        let staging = ChangeStagingState::new();
        let mut collected = CollectedElements::default();
        collected.resources.push(ResourceIdInfo {
            resource_id: "res-1".to_string(),
            resource_name: "ordersTable".to_string(),
        });
        collected.total += 1;

        staging.add_elements_that_must_be_recreated(&collected);
        staging.add_elements_that_must_be_recreated(&collected);

        assert!(staging.must_recreate_resource_on_removed_dependencies("ordersTable"));
        assert!(!staging.must_recreate_resource_on_removed_dependencies("ordersStream"));
    }

    #[test]
    fn pending_count_reflects_links_not_yet_staged() {
        let fixture = orders_graph();
        let staging = ChangeStagingState::new();
        staging.update_link_staging_state(&fixture.graph, fixture.orders_table);

        let group = vec![DeploymentNode::Resource {
            node: fixture.orders_table,
            name: "ordersTable".to_string(),
        }];
        // All of the table's adjacent links are still pending.
        assert_eq!(staging.count_pending_links_for_group(&group), 4);

        staging.mark_link_as_no_longer_pending("ordersTable", "ordersStream");
        assert_eq!(staging.count_pending_links_for_group(&group), 3);
    }
}
