// ABOUTME: Abstract provider contracts consumed by the deployment engine.
// ABOUTME: Resources, links, child blueprints, retry policy and the registry.

mod child;
mod error;
mod link;
mod registry;
mod resource;
mod retry;

pub use child::{ChildBlueprintHandler, ChildDeployInput, ChildDestroyInput};
pub use error::ProviderError;
pub use link::{
    LinkImplementation, LinkKind, LinkUpdateIntermediaryResourcesInput,
    LinkUpdateIntermediaryResourcesOutput, LinkUpdateResourceInput, LinkUpdateResourceOutput,
    LinkUpdateType, ResourceInfo,
};
pub use registry::ProviderRegistry;
pub use resource::{
    ResourceDeployInput, ResourceDeployOutput, ResourceDestroyInput, ResourceProvider,
};
pub use retry::{RetryPolicy, calculate_retry_wait};
