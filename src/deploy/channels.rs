// ABOUTME: Deployment event channels and status update messages.
// ABOUTME: Unbounded streams; exactly one finish message per invocation.

use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::EngineError;
use crate::state::{
    InstanceCompletionDurations, LinkCompletionDurations, ResourceCompletionDurations,
};
use crate::types::{
    InstanceStatus, LinkStatus, PreciseLinkStatus, PreciseResourceStatus, ResourceStatus,
};

/// Status update for a resource being deployed or destroyed.
///
/// Messages report status changes only; the full state of the resource is
/// read from the state container.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpdateMessage {
    pub instance_id: String,
    pub resource_id: String,
    pub resource_name: String,
    /// The group the resource belongs to in the ordering for the current
    /// blueprint. A group is a collection of elements deployed at the same
    /// time.
    pub group: usize,
    pub status: ResourceStatus,
    pub precise_status: PreciseResourceStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
    /// The current attempt number for deploying or destroying the
    /// resource.
    pub attempt: u32,
    /// Whether the operation can be retried after this attempt.
    pub can_retry: bool,
    /// Unix timestamp in seconds for when the status update occurred.
    pub update_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durations: Option<ResourceCompletionDurations>,
}

/// Status update for a link being deployed or destroyed.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUpdateMessage {
    pub instance_id: String,
    pub link_id: String,
    pub link_name: String,
    pub status: LinkStatus,
    pub precise_status: PreciseLinkStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
    /// Attempt number for the current stage; each of the three link update
    /// stages retries independently.
    pub current_stage_attempt: u32,
    pub can_retry_current_stage: bool,
    pub update_timestamp: i64,
    /// Status updates for later stages carry duration information for the
    /// stages that came before them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durations: Option<LinkCompletionDurations>,
}

/// Status update for a child blueprint being deployed or destroyed.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildUpdateMessage {
    pub parent_instance_id: String,
    pub child_instance_id: String,
    pub child_name: String,
    pub group: usize,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
    pub attempt: u32,
    pub can_retry: bool,
    pub update_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durations: Option<InstanceCompletionDurations>,
}

/// Blueprint-wide phase transition for the instance operation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentUpdateMessage {
    pub instance_id: String,
    pub status: InstanceStatus,
    pub update_timestamp: i64,
}

/// The terminal message of a deploy or destroy invocation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentFinishedMessage {
    pub instance_id: String,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
    pub finish_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durations: Option<InstanceCompletionDurations>,
}

/// Sender half of the deployment event surface, held by the engine.
#[derive(Clone)]
pub struct DeployChannels {
    resource_update: UnboundedSender<ResourceUpdateMessage>,
    link_update: UnboundedSender<LinkUpdateMessage>,
    child_update: UnboundedSender<ChildUpdateMessage>,
    deployment_update: UnboundedSender<DeploymentUpdateMessage>,
    finish: UnboundedSender<DeploymentFinishedMessage>,
    err: UnboundedSender<EngineError>,
}

/// Receiver half of the deployment event surface, held by the caller.
pub struct DeployEvents {
    pub resource_updates: UnboundedReceiver<ResourceUpdateMessage>,
    pub link_updates: UnboundedReceiver<LinkUpdateMessage>,
    pub child_updates: UnboundedReceiver<ChildUpdateMessage>,
    pub deployment_updates: UnboundedReceiver<DeploymentUpdateMessage>,
    pub finished: UnboundedReceiver<DeploymentFinishedMessage>,
    pub errors: UnboundedReceiver<EngineError>,
}

impl DeployChannels {
    /// Creates a connected channel pair: senders for the engine, receivers
    /// for the caller.
    pub fn create() -> (DeployChannels, DeployEvents) {
        let (resource_update, resource_updates) = unbounded_channel();
        let (link_update, link_updates) = unbounded_channel();
        let (child_update, child_updates) = unbounded_channel();
        let (deployment_update, deployment_updates) = unbounded_channel();
        let (finish, finished) = unbounded_channel();
        let (err, errors) = unbounded_channel();
        (
            DeployChannels {
                resource_update,
                link_update,
                child_update,
                deployment_update,
                finish,
                err,
            },
            DeployEvents {
                resource_updates,
                link_updates,
                child_updates,
                deployment_updates,
                finished,
                errors,
            },
        )
    }

    pub(crate) fn send_resource_update(&self, message: ResourceUpdateMessage) {
        let _ = self.resource_update.send(message);
    }

    pub(crate) fn send_link_update(&self, message: LinkUpdateMessage) {
        let _ = self.link_update.send(message);
    }

    pub(crate) fn send_child_update(&self, message: ChildUpdateMessage) {
        let _ = self.child_update.send(message);
    }

    pub(crate) fn send_deployment_update(&self, message: DeploymentUpdateMessage) {
        let _ = self.deployment_update.send(message);
    }

    pub(crate) fn send_finished(&self, message: DeploymentFinishedMessage) {
        let _ = self.finish.send(message);
    }

    pub(crate) fn send_err(&self, error: EngineError) {
        let _ = self.err.send(error);
    }
}

/// Unix timestamp in seconds for status update messages.
pub(crate) fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
