// ABOUTME: Provider link contract driving the three-phase link update protocol.
// ABOUTME: Kind and priority metadata also feed the deployment ordering.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{LinkIntermediaryResourceState, ResourceState};

use super::ProviderError;

/// Categorises links to help determine deployment order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkKind {
    /// The priority resource type must be deployed before the other
    /// resource in the relationship.
    Hard,
    /// Deployment order between the two resources does not matter.
    Soft,
}

/// The operation a link update is carried out for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkUpdateType {
    Create,
    Update,
    Destroy,
}

/// Information about one endpoint resource of a link.
#[derive(Clone, Debug, Default)]
pub struct ResourceInfo {
    pub resource_id: String,
    pub resource_name: String,
    pub instance_id: String,
    pub current_state: Option<ResourceState>,
}

/// Input for updating one of the two resources in a link relationship.
#[derive(Clone, Debug)]
pub struct LinkUpdateResourceInput {
    pub resource_info: Option<ResourceInfo>,
    pub other_resource_info: Option<ResourceInfo>,
    pub update_type: LinkUpdateType,
}

/// Output of updating one of the two resources in a link relationship.
#[derive(Clone, Debug, Default)]
pub struct LinkUpdateResourceOutput {
    /// Link data contributed by this phase, merged into the final link
    /// deploy result.
    pub link_data: Option<Value>,
}

/// Input for updating the intermediary resources a link itself owns.
#[derive(Clone, Debug)]
pub struct LinkUpdateIntermediaryResourcesInput {
    pub resource_a_info: Option<ResourceInfo>,
    pub resource_b_info: Option<ResourceInfo>,
    pub update_type: LinkUpdateType,
}

/// Output of updating the intermediary resources a link itself owns.
#[derive(Clone, Debug, Default)]
pub struct LinkUpdateIntermediaryResourcesOutput {
    pub link_data: Option<Value>,
    pub intermediary_resource_states: Vec<LinkIntermediaryResourceState>,
}

/// A provider implementation of a link between two resource types.
///
/// Deployment of a link is always the strict three-phase protocol: update
/// resource A, update resource B with A's output as context, then update
/// any intermediary resources the link owns.
#[async_trait]
pub trait LinkImplementation: Send + Sync {
    /// Hard links impose deployment order between the two resource types.
    fn kind(&self) -> LinkKind;

    /// The resource type that must be deployed first in a hard link.
    fn priority_resource_type(&self) -> Option<&str>;

    async fn update_resource_a(
        &self,
        input: &LinkUpdateResourceInput,
    ) -> Result<LinkUpdateResourceOutput, ProviderError>;

    async fn update_resource_b(
        &self,
        input: &LinkUpdateResourceInput,
    ) -> Result<LinkUpdateResourceOutput, ProviderError>;

    async fn update_intermediary_resources(
        &self,
        input: &LinkUpdateIntermediaryResourcesInput,
    ) -> Result<LinkUpdateIntermediaryResourcesOutput, ProviderError>;
}
