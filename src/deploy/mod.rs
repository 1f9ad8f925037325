// ABOUTME: The deployment and destruction orchestration engine.
// ABOUTME: Group-barrier execution of an already-computed diff.

mod cancel;
mod channels;
mod child_deployer;
mod context;
mod link_deployer;
mod orchestrator;
mod removal;
mod resource_deployer;
mod retry;
mod state;
mod statuses;

pub use cancel::{CancelHandle, CancelSignal, cancellation};
pub use channels::{
    ChildUpdateMessage, DeployChannels, DeployEvents, DeploymentFinishedMessage,
    DeploymentUpdateMessage, LinkUpdateMessage, ResourceUpdateMessage,
};
pub use context::{BlueprintGraph, BlueprintParams, DeployInput, DestroyInput};
pub use link_deployer::LinkDeployResult;
pub use orchestrator::Orchestrator;
pub use removal::instance_removal_changes;
pub use retry::RetryInfo;
pub use state::{DeploymentState, RollbackSnapshot};
