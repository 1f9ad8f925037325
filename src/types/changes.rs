// ABOUTME: The blueprint diff structure consumed by ordering and deployment.
// ABOUTME: Produced by change staging; the sole source of truth for execution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A change to a single field of a resource or link.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    #[serde(default)]
    pub must_recreate: bool,
}

/// Changes staged for a single link between two resources.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkChanges {
    pub modified_fields: Vec<FieldChange>,
    pub new_fields: Vec<FieldChange>,
    pub removed_fields: Vec<String>,
    pub unchanged_fields: Vec<String>,
    /// Field paths whose values can only be resolved during deployment.
    pub field_changes_known_on_deploy: Vec<String>,
}

/// Changes staged for a single resource, including its outbound links.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceChanges {
    /// The resource must be destroyed and recreated to apply the changes.
    pub must_recreate: bool,
    pub modified_fields: Vec<FieldChange>,
    pub new_fields: Vec<FieldChange>,
    pub removed_fields: Vec<String>,
    pub unchanged_fields: Vec<String>,
    /// Field paths whose values can only be resolved during deployment.
    pub field_changes_known_on_deploy: Vec<String>,
    pub new_outbound_links: HashMap<String, LinkChanges>,
    pub outbound_link_changes: HashMap<String, LinkChanges>,
    pub removed_outbound_links: Vec<String>,
}

/// The definition of a child blueprint that is new to the parent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewBlueprintDefinition {
    pub new_resources: HashMap<String, ResourceChanges>,
    pub new_children: HashMap<String, NewBlueprintDefinition>,
    pub new_exports: HashMap<String, FieldChange>,
}

/// The full set of changes staged for a blueprint instance deployment.
///
/// This is the input to the deployment orchestrator and the output of
/// change staging.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlueprintChanges {
    pub new_resources: HashMap<String, ResourceChanges>,
    pub resource_changes: HashMap<String, ResourceChanges>,
    pub removed_resources: Vec<String>,
    pub removed_links: Vec<String>,
    pub new_children: HashMap<String, NewBlueprintDefinition>,
    /// Children that must be destroyed and recreated due to removal of
    /// dependencies.
    pub recreate_children: Vec<String>,
    pub child_changes: HashMap<String, BlueprintChanges>,
    pub removed_children: Vec<String>,
    pub new_exports: HashMap<String, FieldChange>,
    pub export_changes: HashMap<String, FieldChange>,
    pub removed_exports: Vec<String>,
    pub unchanged_exports: Vec<String>,
    /// Full element paths whose values can only be resolved during
    /// deployment.
    pub resolve_on_deploy: Vec<String>,
}

impl BlueprintChanges {
    /// True when the diff contains no changes at all. An empty diff is a
    /// contract violation when supplied to the orchestrator.
    pub fn is_empty(&self) -> bool {
        self.new_resources.is_empty()
            && self.resource_changes.is_empty()
            && self.removed_resources.is_empty()
            && self.removed_links.is_empty()
            && self.new_children.is_empty()
            && self.recreate_children.is_empty()
            && self.child_changes.is_empty()
            && self.removed_children.is_empty()
            && self.new_exports.is_empty()
            && self.export_changes.is_empty()
            && self.removed_exports.is_empty()
    }

    /// Looks up staged changes for a resource in the new and changed
    /// buckets.
    pub fn resource_changes_for(&self, resource_name: &str) -> Option<&ResourceChanges> {
        self.new_resources
            .get(resource_name)
            .or_else(|| self.resource_changes.get(resource_name))
    }
}
