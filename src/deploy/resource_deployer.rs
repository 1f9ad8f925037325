// ABOUTME: Deploys and destroys individual resources through their provider.
// ABOUTME: Single-phase operations with an explicit retry loop.

use std::sync::Arc;
use std::time::Instant;

use crate::error::EngineError;
use crate::provider::{
    ProviderError, ResourceDeployInput, ResourceDestroyInput, ResourceProvider, RetryPolicy,
    calculate_retry_wait,
};
use crate::types::{PreciseResourceStatus, ResourceChanges, ResourceIdInfo};

use super::cancel::sleep_or_cancel;
use super::channels::{ResourceUpdateMessage, now_timestamp};
use super::context::DeployContext;
use super::retry::{
    RetryInfo, resource_exceeded_durations, resource_finished_durations, resource_retry_durations,
};
use super::statuses::{
    resource_deploy_failed_status, resource_deployed_status, resource_deploying_status,
    resource_destroy_failed_status, resource_destroyed_status, resource_destroying_status,
};

pub(crate) struct ResourceDeployer;

impl ResourceDeployer {
    /// Destroys a resource, streaming status updates and retrying
    /// transient failures up to the policy maximum. Terminal failures are
    /// reported as a failure status; only fatal provider errors return an
    /// error.
    pub(crate) async fn destroy(
        element: &ResourceIdInfo,
        instance_id: &str,
        provider: Arc<dyn ResourceProvider>,
        retry_policy: RetryPolicy,
        ctx: &DeployContext,
    ) -> Result<(), EngineError> {
        let current_state = ctx
            .instance_snapshot
            .resource_by_name(&element.resource_name)
            .cloned();
        let input = ResourceDestroyInput {
            instance_id: instance_id.to_string(),
            resource_id: element.resource_id.clone(),
            resource_name: element.resource_name.clone(),
            current_state,
        };

        let mut retry = RetryInfo::new(retry_policy);
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let attempt_start = Instant::now();
            ctx.channels.send_resource_update(ResourceUpdateMessage {
                instance_id: instance_id.to_string(),
                resource_id: element.resource_id.clone(),
                resource_name: element.resource_name.clone(),
                group: ctx.current_group,
                status: resource_destroying_status(ctx.rollback),
                precise_status: PreciseResourceStatus::Destroying,
                failure_reasons: Vec::new(),
                attempt: retry.attempt,
                can_retry: true,
                update_timestamp: now_timestamp(),
                durations: None,
            });

            match provider.destroy(&input).await {
                Ok(()) => {
                    ctx.channels.send_resource_update(ResourceUpdateMessage {
                        instance_id: instance_id.to_string(),
                        resource_id: element.resource_id.clone(),
                        resource_name: element.resource_name.clone(),
                        group: ctx.current_group,
                        status: resource_destroyed_status(ctx.rollback),
                        precise_status: PreciseResourceStatus::Destroyed,
                        failure_reasons: Vec::new(),
                        attempt: retry.attempt,
                        can_retry: false,
                        update_timestamp: now_timestamp(),
                        durations: Some(resource_finished_durations(
                            &retry,
                            attempt_start.elapsed(),
                        )),
                    });
                    return Ok(());
                }
                Err(ProviderError::Retryable { reason }) => {
                    let next = retry.next_attempt(attempt_start.elapsed());
                    ctx.channels.send_resource_update(ResourceUpdateMessage {
                        instance_id: instance_id.to_string(),
                        resource_id: element.resource_id.clone(),
                        resource_name: element.resource_name.clone(),
                        group: ctx.current_group,
                        status: resource_destroy_failed_status(ctx.rollback),
                        precise_status: PreciseResourceStatus::DestroyFailed,
                        failure_reasons: vec![reason],
                        attempt: retry.attempt,
                        can_retry: !next.exceeded_max_retries,
                        update_timestamp: now_timestamp(),
                        durations: Some(if next.exceeded_max_retries {
                            resource_exceeded_durations(&next)
                        } else {
                            resource_retry_durations(&next)
                        }),
                    });
                    if next.exceeded_max_retries {
                        return Ok(());
                    }
                    let wait = calculate_retry_wait(&next.policy, next.attempt);
                    sleep_or_cancel(&ctx.cancel, wait).await?;
                    retry = next;
                }
                Err(ProviderError::Terminal { failure_reasons }) => {
                    ctx.channels.send_resource_update(ResourceUpdateMessage {
                        instance_id: instance_id.to_string(),
                        resource_id: element.resource_id.clone(),
                        resource_name: element.resource_name.clone(),
                        group: ctx.current_group,
                        status: resource_destroy_failed_status(ctx.rollback),
                        precise_status: PreciseResourceStatus::DestroyFailed,
                        failure_reasons,
                        attempt: retry.attempt,
                        can_retry: false,
                        update_timestamp: now_timestamp(),
                        durations: Some(resource_finished_durations(
                            &retry,
                            attempt_start.elapsed(),
                        )),
                    });
                    return Ok(());
                }
                Err(ProviderError::Fatal { message }) => {
                    return Err(EngineError::FatalProvider { message });
                }
            }
        }
    }

    /// Deploys (creates or updates) a resource. On success the provider
    /// output is stashed in the ephemeral deployment state before the
    /// terminal message so the barrier handler can persist it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn deploy(
        element: &ResourceIdInfo,
        resource_type: &str,
        instance_id: &str,
        is_new: bool,
        changes: ResourceChanges,
        provider: Arc<dyn ResourceProvider>,
        retry_policy: RetryPolicy,
        ctx: &DeployContext,
    ) -> Result<(), EngineError> {
        let current_state = ctx
            .instance_snapshot
            .resource_by_name(&element.resource_name)
            .cloned();
        let input = ResourceDeployInput {
            instance_id: instance_id.to_string(),
            resource_id: element.resource_id.clone(),
            resource_name: element.resource_name.clone(),
            resource_type: resource_type.to_string(),
            is_new,
            changes,
            current_state,
        };
        let (updating_precise, updated_precise, failed_precise) = if is_new {
            (
                PreciseResourceStatus::Creating,
                PreciseResourceStatus::Created,
                PreciseResourceStatus::CreateFailed,
            )
        } else {
            (
                PreciseResourceStatus::Updating,
                PreciseResourceStatus::Updated,
                PreciseResourceStatus::UpdateFailed,
            )
        };

        let mut retry = RetryInfo::new(retry_policy);
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let attempt_start = Instant::now();
            ctx.channels.send_resource_update(ResourceUpdateMessage {
                instance_id: instance_id.to_string(),
                resource_id: element.resource_id.clone(),
                resource_name: element.resource_name.clone(),
                group: ctx.current_group,
                status: resource_deploying_status(is_new, ctx.rollback),
                precise_status: updating_precise,
                failure_reasons: Vec::new(),
                attempt: retry.attempt,
                can_retry: true,
                update_timestamp: now_timestamp(),
                durations: None,
            });

            match provider.deploy(&input).await {
                Ok(output) => {
                    ctx.state
                        .set_resource_deploy_result(&element.resource_name, output);
                    ctx.channels.send_resource_update(ResourceUpdateMessage {
                        instance_id: instance_id.to_string(),
                        resource_id: element.resource_id.clone(),
                        resource_name: element.resource_name.clone(),
                        group: ctx.current_group,
                        status: resource_deployed_status(is_new, ctx.rollback),
                        precise_status: updated_precise,
                        failure_reasons: Vec::new(),
                        attempt: retry.attempt,
                        can_retry: false,
                        update_timestamp: now_timestamp(),
                        durations: Some(resource_finished_durations(
                            &retry,
                            attempt_start.elapsed(),
                        )),
                    });
                    return Ok(());
                }
                Err(ProviderError::Retryable { reason }) => {
                    let next = retry.next_attempt(attempt_start.elapsed());
                    ctx.channels.send_resource_update(ResourceUpdateMessage {
                        instance_id: instance_id.to_string(),
                        resource_id: element.resource_id.clone(),
                        resource_name: element.resource_name.clone(),
                        group: ctx.current_group,
                        status: resource_deploy_failed_status(is_new, ctx.rollback),
                        precise_status: failed_precise,
                        failure_reasons: vec![reason],
                        attempt: retry.attempt,
                        can_retry: !next.exceeded_max_retries,
                        update_timestamp: now_timestamp(),
                        durations: Some(if next.exceeded_max_retries {
                            resource_exceeded_durations(&next)
                        } else {
                            resource_retry_durations(&next)
                        }),
                    });
                    if next.exceeded_max_retries {
                        return Ok(());
                    }
                    let wait = calculate_retry_wait(&next.policy, next.attempt);
                    sleep_or_cancel(&ctx.cancel, wait).await?;
                    retry = next;
                }
                Err(ProviderError::Terminal { failure_reasons }) => {
                    ctx.channels.send_resource_update(ResourceUpdateMessage {
                        instance_id: instance_id.to_string(),
                        resource_id: element.resource_id.clone(),
                        resource_name: element.resource_name.clone(),
                        group: ctx.current_group,
                        status: resource_deploy_failed_status(is_new, ctx.rollback),
                        precise_status: failed_precise,
                        failure_reasons,
                        attempt: retry.attempt,
                        can_retry: false,
                        update_timestamp: now_timestamp(),
                        durations: Some(resource_finished_durations(
                            &retry,
                            attempt_start.elapsed(),
                        )),
                    });
                    return Ok(());
                }
                Err(ProviderError::Fatal { message }) => {
                    return Err(EngineError::FatalProvider { message });
                }
            }
        }
    }
}
