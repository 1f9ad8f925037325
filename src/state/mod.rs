// ABOUTME: Abstract state container contract and persisted element state records.
// ABOUTME: Not-found errors are distinguishable from other failures by kind.

mod memory;

pub use memory::MemoryStateContainer;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{
    InstanceStatus, LinkStatus, PreciseLinkStatus, PreciseResourceStatus, ResourceStatus,
};

/// Errors from state container operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("blueprint instance not found: {0}")]
    InstanceNotFound(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("link not found: {0}")]
    LinkNotFound(String),

    #[error("child blueprint not found: {0}")]
    ChildNotFound(String),

    #[error("state container failure: {0}")]
    Internal(String),
}

impl StateError {
    /// True for the not-found error kinds, which callers are expected to
    /// treat differently from genuine failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StateError::InstanceNotFound(_)
                | StateError::ResourceNotFound(_)
                | StateError::LinkNotFound(_)
                | StateError::ChildNotFound(_)
        )
    }
}

/// Duration information for a finished blueprint instance operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceCompletionDurations {
    /// Duration of the prepare phase, tracked separately from execution.
    pub prepare_duration_ms: Option<f64>,
    pub total_duration_ms: Option<f64>,
}

/// Duration information for a resource deployment or removal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceCompletionDurations {
    pub total_duration_ms: Option<f64>,
    /// Durations of the individual attempts, including retries.
    pub attempt_durations_ms: Vec<f64>,
}

/// Duration information for one phase of a link update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkComponentCompletionDurations {
    pub total_duration_ms: Option<f64>,
    pub attempt_durations_ms: Vec<f64>,
}

/// Duration information for a link update across all three phases.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkCompletionDurations {
    pub resource_a_update: Option<LinkComponentCompletionDurations>,
    pub resource_b_update: Option<LinkComponentCompletionDurations>,
    pub intermediary_resources: Option<LinkComponentCompletionDurations>,
    pub total_duration_ms: Option<f64>,
}

/// Persisted state of a resource within a blueprint instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceState {
    pub resource_id: String,
    pub resource_name: String,
    pub resource_type: String,
    pub status: ResourceStatus,
    pub precise_status: PreciseResourceStatus,
    /// The computed resource spec as of the last successful deployment.
    pub spec_state: Option<Value>,
    /// IDs of resources this resource holds a dependency on.
    pub depends_on_resources: Vec<String>,
    /// IDs of child blueprints this resource holds a dependency on.
    pub depends_on_children: Vec<String>,
    pub failure_reasons: Vec<String>,
    pub durations: Option<ResourceCompletionDurations>,
}

/// Persisted state of an intermediary resource owned by a link.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkIntermediaryResourceState {
    pub resource_id: String,
    pub resource_type: String,
    pub spec_state: Option<Value>,
}

/// Persisted state of a link within a blueprint instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkState {
    pub link_id: String,
    pub link_name: String,
    pub instance_id: String,
    pub status: LinkStatus,
    pub precise_status: PreciseLinkStatus,
    /// Merged link data from the resource A, resource B and intermediary
    /// resource update phases.
    pub link_data: Option<Value>,
    pub intermediary_resource_states: Vec<LinkIntermediaryResourceState>,
    pub failure_reasons: Vec<String>,
    pub durations: Option<LinkCompletionDurations>,
}

/// Dependencies a child blueprint holds on other elements of its parent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChildDependencyInfo {
    pub depends_on_resources: Vec<String>,
    pub depends_on_children: Vec<String>,
}

/// Persisted state of a blueprint instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceState {
    pub instance_id: String,
    pub status: InstanceStatus,
    /// Logical resource name to resource ID.
    pub resource_ids: HashMap<String, String>,
    /// Resource ID to resource state.
    pub resources: HashMap<String, ResourceState>,
    /// Logical link name to link state.
    pub links: HashMap<String, LinkState>,
    /// Logical child name to child instance state.
    pub child_blueprints: HashMap<String, InstanceState>,
    /// Logical child name to the dependencies the child holds.
    pub child_dependencies: HashMap<String, ChildDependencyInfo>,
    pub exports: HashMap<String, Value>,
    pub durations: Option<InstanceCompletionDurations>,
}

impl InstanceState {
    pub fn resource_by_name(&self, resource_name: &str) -> Option<&ResourceState> {
        let resource_id = self.resource_ids.get(resource_name)?;
        self.resources.get(resource_id)
    }

    pub fn child_by_name(&self, child_name: &str) -> Option<&InstanceState> {
        self.child_blueprints.get(child_name)
    }

    pub fn link_by_name(&self, link_name: &str) -> Option<&LinkState> {
        self.links.get(link_name)
    }
}

/// Status update payload for a resource.
#[derive(Clone, Debug, Default)]
pub struct ResourceStatusInfo {
    pub status: ResourceStatus,
    pub precise_status: PreciseResourceStatus,
    pub failure_reasons: Vec<String>,
    pub durations: Option<ResourceCompletionDurations>,
}

/// Status update payload for a link.
#[derive(Clone, Debug, Default)]
pub struct LinkStatusInfo {
    pub status: LinkStatus,
    pub precise_status: PreciseLinkStatus,
    pub failure_reasons: Vec<String>,
    pub durations: Option<LinkCompletionDurations>,
}

/// Status update payload for a blueprint instance or child.
#[derive(Clone, Debug, Default)]
pub struct InstanceStatusInfo {
    pub status: InstanceStatus,
    pub durations: Option<InstanceCompletionDurations>,
}

/// The persistence contract the engine depends on.
///
/// All operations are instance-scoped and expected to be internally
/// consistent; the engine serialises its own writes by applying them in
/// message receipt order.
#[async_trait]
pub trait StateContainer: Send + Sync {
    async fn get_instance(&self, instance_id: &str) -> Result<InstanceState, StateError>;

    async fn save_instance(&self, instance: InstanceState) -> Result<(), StateError>;

    /// Removes the instance record entirely, returning it.
    async fn remove_instance(&self, instance_id: &str) -> Result<InstanceState, StateError>;

    async fn update_instance_status(
        &self,
        instance_id: &str,
        info: InstanceStatusInfo,
    ) -> Result<(), StateError>;

    /// Inserts or replaces a resource record.
    async fn save_resource(
        &self,
        instance_id: &str,
        resource: ResourceState,
    ) -> Result<(), StateError>;

    async fn update_resource_status(
        &self,
        instance_id: &str,
        resource_id: &str,
        info: ResourceStatusInfo,
    ) -> Result<(), StateError>;

    /// Removes the resource record entirely, returning it. Removal rather
    /// than status marking is load-bearing: dependents are checked for
    /// absence, not for a status field.
    async fn remove_resource(
        &self,
        instance_id: &str,
        resource_id: &str,
    ) -> Result<ResourceState, StateError>;

    /// Inserts or replaces a link record.
    async fn save_link(&self, instance_id: &str, link: LinkState) -> Result<(), StateError>;

    async fn update_link_status(
        &self,
        instance_id: &str,
        link_id: &str,
        info: LinkStatusInfo,
    ) -> Result<(), StateError>;

    async fn remove_link(&self, instance_id: &str, link_id: &str)
    -> Result<LinkState, StateError>;

    /// Updates the status of a child blueprint, creating the child record
    /// when absent.
    async fn update_child_status(
        &self,
        parent_instance_id: &str,
        child_name: &str,
        child_instance_id: &str,
        info: InstanceStatusInfo,
    ) -> Result<(), StateError>;

    async fn remove_child(
        &self,
        parent_instance_id: &str,
        child_name: &str,
    ) -> Result<InstanceState, StateError>;
}
