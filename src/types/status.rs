// ABOUTME: Status enums for blueprint instances, resources and links.
// ABOUTME: High-level statuses carry the rollback dimension, precise ones the phase.

use serde::{Deserialize, Serialize};

/// High-level status of a blueprint instance operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceStatus {
    Unknown,
    Preparing,
    Deploying,
    Deployed,
    DeployFailed,
    DeployRollingBack,
    DeployRollbackFailed,
    DeployRollbackComplete,
    Destroying,
    Destroyed,
    DestroyFailed,
    DestroyRollingBack,
    DestroyRollbackFailed,
    DestroyRollbackComplete,
}

impl Default for InstanceStatus {
    fn default() -> Self {
        InstanceStatus::Unknown
    }
}

/// High-level status of a resource within a blueprint instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceStatus {
    Unknown,
    Creating,
    Created,
    CreateFailed,
    CreateRollingBack,
    CreateRollbackFailed,
    CreateRollbackComplete,
    Updating,
    Updated,
    UpdateFailed,
    UpdateRollingBack,
    UpdateRollbackFailed,
    UpdateRollbackComplete,
    Destroying,
    Destroyed,
    DestroyFailed,
    DestroyRollingBack,
    DestroyRollbackFailed,
    DestroyRollbackComplete,
}

impl Default for ResourceStatus {
    fn default() -> Self {
        ResourceStatus::Unknown
    }
}

/// Precise status of a resource, independent of the rollback dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreciseResourceStatus {
    Unknown,
    Creating,
    Created,
    CreateFailed,
    Updating,
    Updated,
    UpdateFailed,
    Destroying,
    Destroyed,
    DestroyFailed,
}

impl Default for PreciseResourceStatus {
    fn default() -> Self {
        PreciseResourceStatus::Unknown
    }
}

/// High-level status of a link between two resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkStatus {
    Unknown,
    Creating,
    Created,
    CreateFailed,
    CreateRollingBack,
    CreateRollbackFailed,
    CreateRollbackComplete,
    Updating,
    Updated,
    UpdateFailed,
    UpdateRollingBack,
    UpdateRollbackFailed,
    UpdateRollbackComplete,
    Destroying,
    Destroyed,
    DestroyFailed,
    DestroyRollingBack,
    DestroyRollbackFailed,
    DestroyRollbackComplete,
}

impl Default for LinkStatus {
    fn default() -> Self {
        LinkStatus::Unknown
    }
}

/// Precise status of a link, one per phase transition of the three-phase
/// update protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreciseLinkStatus {
    Unknown,
    UpdatingResourceA,
    ResourceAUpdated,
    ResourceAUpdateFailed,
    UpdatingResourceB,
    ResourceBUpdated,
    ResourceBUpdateFailed,
    UpdatingIntermediaryResources,
    IntermediaryResourcesUpdated,
    IntermediaryResourceUpdateFailed,
}

impl Default for PreciseLinkStatus {
    fn default() -> Self {
        PreciseLinkStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_in_camel_case() {
        let status = serde_json::to_string(&InstanceStatus::DeployRollingBack).unwrap();
        assert_eq!(status, "\"deployRollingBack\"");

        let status = serde_json::to_string(&PreciseLinkStatus::UpdatingResourceA).unwrap();
        assert_eq!(status, "\"updatingResourceA\"");
    }
}
