// ABOUTME: Contract for deploying and destroying child blueprint instances.
// ABOUTME: The engine treats child blueprints as opaque nested deployments.

use async_trait::async_trait;

use crate::types::BlueprintChanges;

use super::{ProviderError, RetryPolicy};

/// Input for deploying a child blueprint instance.
#[derive(Clone, Debug)]
pub struct ChildDeployInput {
    pub parent_instance_id: String,
    pub child_instance_id: String,
    pub child_name: String,
    /// The instance tree path of the child, used for nesting depth and
    /// cycle checks by the handler.
    pub instance_tree_path: String,
    pub changes: BlueprintChanges,
}

/// Input for destroying a child blueprint instance.
#[derive(Clone, Debug)]
pub struct ChildDestroyInput {
    pub parent_instance_id: String,
    pub child_instance_id: String,
    pub child_name: String,
    pub instance_tree_path: String,
}

/// Handler that deploys and destroys child blueprint instances on behalf
/// of the engine.
#[async_trait]
pub trait ChildBlueprintHandler: Send + Sync {
    async fn deploy(&self, input: &ChildDeployInput) -> Result<(), ProviderError>;

    async fn destroy(&self, input: &ChildDestroyInput) -> Result<(), ProviderError>;

    /// Handler-specific retry policy; the engine default applies when
    /// `None`.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }
}
