// ABOUTME: Provider resource contract for deploying and destroying resources.
// ABOUTME: Single-phase operations with the shared provider error taxonomy.

use async_trait::async_trait;
use serde_json::Value;

use crate::state::ResourceState;
use crate::types::ResourceChanges;

use super::{ProviderError, RetryPolicy};

/// Input for deploying (creating or updating) a resource.
#[derive(Clone, Debug)]
pub struct ResourceDeployInput {
    pub instance_id: String,
    pub resource_id: String,
    pub resource_name: String,
    pub resource_type: String,
    /// True when the resource does not exist yet.
    pub is_new: bool,
    pub changes: ResourceChanges,
    pub current_state: Option<ResourceState>,
}

/// Output of a successful resource deployment.
#[derive(Clone, Debug, Default)]
pub struct ResourceDeployOutput {
    /// The computed spec of the resource after deployment, persisted into
    /// its state record.
    pub spec_state: Option<Value>,
}

/// Input for destroying a resource.
#[derive(Clone, Debug)]
pub struct ResourceDestroyInput {
    pub instance_id: String,
    pub resource_id: String,
    pub resource_name: String,
    pub current_state: Option<ResourceState>,
}

/// A provider of resource deploy and destroy operations.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn deploy(
        &self,
        input: &ResourceDeployInput,
    ) -> Result<ResourceDeployOutput, ProviderError>;

    async fn destroy(&self, input: &ResourceDestroyInput) -> Result<(), ProviderError>;

    /// Provider-specific retry policy; the engine default applies when
    /// `None`.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }
}
