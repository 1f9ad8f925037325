// ABOUTME: Deploys and destroys child blueprint instances via the handler.
// ABOUTME: Mirrors the resource deployer with child status messages.

use std::sync::Arc;
use std::time::Instant;

use crate::error::EngineError;
use crate::provider::{
    ChildBlueprintHandler, ChildDeployInput, ChildDestroyInput, ProviderError, RetryPolicy,
    calculate_retry_wait,
};
use crate::state::InstanceCompletionDurations;
use crate::types::{BlueprintChanges, ChildBlueprintIdInfo, InstanceStatus};

use super::cancel::sleep_or_cancel;
use super::channels::{ChildUpdateMessage, now_timestamp};
use super::context::DeployContext;
use super::retry::{RetryInfo, fractional_millis};
use super::statuses::{
    child_deploy_failed_status, child_deployed_status, child_deploying_status,
    child_destroy_failed_status, child_destroyed_status, child_destroying_status,
};

pub(crate) struct ChildDeployer;

enum ChildOperation {
    Deploy { changes: Box<BlueprintChanges> },
    Destroy,
}

impl ChildDeployer {
    pub(crate) async fn destroy(
        element: &ChildBlueprintIdInfo,
        parent_instance_id: &str,
        handler: Arc<dyn ChildBlueprintHandler>,
        retry_policy: RetryPolicy,
        ctx: &DeployContext,
    ) -> Result<(), EngineError> {
        Self::run(
            element,
            parent_instance_id,
            handler,
            retry_policy,
            ChildOperation::Destroy,
            ctx,
        )
        .await
    }

    pub(crate) async fn deploy(
        element: &ChildBlueprintIdInfo,
        parent_instance_id: &str,
        changes: BlueprintChanges,
        handler: Arc<dyn ChildBlueprintHandler>,
        retry_policy: RetryPolicy,
        ctx: &DeployContext,
    ) -> Result<(), EngineError> {
        Self::run(
            element,
            parent_instance_id,
            handler,
            retry_policy,
            ChildOperation::Deploy {
                changes: Box::new(changes),
            },
            ctx,
        )
        .await
    }

    async fn run(
        element: &ChildBlueprintIdInfo,
        parent_instance_id: &str,
        handler: Arc<dyn ChildBlueprintHandler>,
        retry_policy: RetryPolicy,
        operation: ChildOperation,
        ctx: &DeployContext,
    ) -> Result<(), EngineError> {
        let instance_tree_path = ctx.params.instance_tree_path(&element.child_instance_id);
        let destroying = matches!(operation, ChildOperation::Destroy);
        let (working_status, done_status, failed_status) = if destroying {
            (
                child_destroying_status(ctx.rollback),
                child_destroyed_status(ctx.rollback),
                child_destroy_failed_status(ctx.rollback),
            )
        } else {
            (
                child_deploying_status(ctx.rollback),
                child_deployed_status(ctx.rollback),
                child_deploy_failed_status(ctx.rollback),
            )
        };

        let mut retry = RetryInfo::new(retry_policy);
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let attempt_start = Instant::now();
            send_child_update(
                ctx,
                element,
                parent_instance_id,
                working_status,
                Vec::new(),
                retry.attempt,
                true,
                None,
            );

            let result = match &operation {
                ChildOperation::Deploy { changes } => {
                    handler
                        .deploy(&ChildDeployInput {
                            parent_instance_id: parent_instance_id.to_string(),
                            child_instance_id: element.child_instance_id.clone(),
                            child_name: element.child_name.clone(),
                            instance_tree_path: instance_tree_path.clone(),
                            changes: (**changes).clone(),
                        })
                        .await
                }
                ChildOperation::Destroy => {
                    handler
                        .destroy(&ChildDestroyInput {
                            parent_instance_id: parent_instance_id.to_string(),
                            child_instance_id: element.child_instance_id.clone(),
                            child_name: element.child_name.clone(),
                            instance_tree_path: instance_tree_path.clone(),
                        })
                        .await
                }
            };

            match result {
                Ok(()) => {
                    send_child_update(
                        ctx,
                        element,
                        parent_instance_id,
                        done_status,
                        Vec::new(),
                        retry.attempt,
                        false,
                        Some(total_durations(&retry, attempt_start)),
                    );
                    return Ok(());
                }
                Err(ProviderError::Retryable { reason }) => {
                    let next = retry.next_attempt(attempt_start.elapsed());
                    let durations = next.exceeded_max_retries.then(|| {
                        InstanceCompletionDurations {
                            prepare_duration_ms: None,
                            total_duration_ms: Some(next.attempt_durations_ms.iter().sum()),
                        }
                    });
                    send_child_update(
                        ctx,
                        element,
                        parent_instance_id,
                        failed_status,
                        vec![reason],
                        retry.attempt,
                        !next.exceeded_max_retries,
                        durations,
                    );
                    if next.exceeded_max_retries {
                        return Ok(());
                    }
                    let wait = calculate_retry_wait(&next.policy, next.attempt);
                    sleep_or_cancel(&ctx.cancel, wait).await?;
                    retry = next;
                }
                Err(ProviderError::Terminal { failure_reasons }) => {
                    send_child_update(
                        ctx,
                        element,
                        parent_instance_id,
                        failed_status,
                        failure_reasons,
                        retry.attempt,
                        false,
                        Some(total_durations(&retry, attempt_start)),
                    );
                    return Ok(());
                }
                Err(ProviderError::Fatal { message }) => {
                    return Err(EngineError::FatalProvider { message });
                }
            }
        }
    }
}

fn total_durations(retry: &RetryInfo, attempt_start: Instant) -> InstanceCompletionDurations {
    let total: f64 = retry.attempt_durations_ms.iter().sum::<f64>()
        + fractional_millis(attempt_start.elapsed());
    InstanceCompletionDurations {
        prepare_duration_ms: None,
        total_duration_ms: Some(total),
    }
}

#[allow(clippy::too_many_arguments)]
fn send_child_update(
    ctx: &DeployContext,
    element: &ChildBlueprintIdInfo,
    parent_instance_id: &str,
    status: InstanceStatus,
    failure_reasons: Vec<String>,
    attempt: u32,
    can_retry: bool,
    durations: Option<InstanceCompletionDurations>,
) {
    ctx.channels.send_child_update(ChildUpdateMessage {
        parent_instance_id: parent_instance_id.to_string(),
        child_instance_id: element.child_instance_id.clone(),
        child_name: element.child_name.clone(),
        group: ctx.current_group,
        status,
        failure_reasons,
        attempt,
        can_retry,
        update_timestamp: now_timestamp(),
        durations,
    });
}
