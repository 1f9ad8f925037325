// ABOUTME: Deploys a link between two resources as part of an instance operation.
// ABOUTME: Strict three-phase protocol with independent retry per phase.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::error::EngineError;
use crate::provider::{
    LinkImplementation, LinkUpdateIntermediaryResourcesInput,
    LinkUpdateIntermediaryResourcesOutput, LinkUpdateResourceInput, LinkUpdateResourceOutput,
    LinkUpdateType, ProviderError, ResourceInfo, RetryPolicy, calculate_retry_wait,
};
use crate::staging::link_endpoints;
use crate::state::{
    LinkCompletionDurations, LinkIntermediaryResourceState, LinkState, StateContainer,
};
use crate::types::{LinkIdInfo, LinkStatus, PreciseLinkStatus};

use super::cancel::sleep_or_cancel;
use super::channels::{LinkUpdateMessage, now_timestamp};
use super::context::DeployContext;
use super::retry::{
    RetryInfo, component_exceeded_durations, component_finished_durations,
    component_retry_durations,
};
use super::statuses::{link_update_failed_status, link_updated_status, link_updating_status};

/// The result of deploying a link: merged link data from the three update
/// phases plus the intermediary resource states the link owns.
#[derive(Clone, Debug, Default)]
pub struct LinkDeployResult {
    pub link_data: Option<Value>,
    pub intermediary_resource_states: Vec<LinkIntermediaryResourceState>,
}

/// Which of the two endpoint resource phases is being executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResourcePhase {
    A,
    B,
}

impl ResourcePhase {
    fn updating_status(self) -> PreciseLinkStatus {
        match self {
            ResourcePhase::A => PreciseLinkStatus::UpdatingResourceA,
            ResourcePhase::B => PreciseLinkStatus::UpdatingResourceB,
        }
    }

    fn updated_status(self) -> PreciseLinkStatus {
        match self {
            ResourcePhase::A => PreciseLinkStatus::ResourceAUpdated,
            ResourcePhase::B => PreciseLinkStatus::ResourceBUpdated,
        }
    }

    fn failed_status(self) -> PreciseLinkStatus {
        match self {
            ResourcePhase::A => PreciseLinkStatus::ResourceAUpdateFailed,
            ResourcePhase::B => PreciseLinkStatus::ResourceBUpdateFailed,
        }
    }
}

/// Deploys links between resources for create, update and destroy alike.
///
/// "Deploying" a link in the context of destruction means detaching
/// information saved in the two resources and removing any intermediary
/// resources the provider link implementation created.
pub(crate) struct LinkDeployer {
    state_container: Arc<dyn StateContainer>,
}

impl LinkDeployer {
    pub(crate) fn new(state_container: Arc<dyn StateContainer>) -> Self {
        LinkDeployer { state_container }
    }

    pub(crate) async fn deploy(
        &self,
        link: &LinkIdInfo,
        instance_id: &str,
        update_type: LinkUpdateType,
        link_implementation: Arc<dyn LinkImplementation>,
        retry_policy: RetryPolicy,
        ctx: &DeployContext,
    ) -> Result<(), EngineError> {
        let Some((resource_a_name, resource_b_name)) = link_endpoints(&link.link_name) else {
            return Err(EngineError::InvalidLinkName {
                link_name: link.link_name.clone(),
            });
        };

        let resource_a_info = self.endpoint_info(instance_id, resource_a_name, ctx).await;
        let resource_b_info = self.endpoint_info(instance_id, resource_b_name, ctx).await;

        if update_type == LinkUpdateType::Create {
            // Save an initial record so status updates always have
            // something to land on.
            self.state_container
                .save_link(
                    instance_id,
                    LinkState {
                        link_id: link.link_id.clone(),
                        link_name: link.link_name.clone(),
                        instance_id: instance_id.to_string(),
                        status: LinkStatus::Unknown,
                        precise_status: PreciseLinkStatus::Unknown,
                        ..Default::default()
                    },
                )
                .await?;
        }

        let resource_a_output = self
            .update_link_resource(
                ResourcePhase::A,
                link,
                instance_id,
                &LinkUpdateResourceInput {
                    resource_info: resource_a_info.clone(),
                    other_resource_info: resource_b_info.clone(),
                    update_type,
                },
                link_implementation.as_ref(),
                RetryInfo::new(retry_policy.clone()),
                ctx,
            )
            .await?;
        let Some(resource_a_output) = resource_a_output else {
            return Ok(());
        };

        let resource_b_output = self
            .update_link_resource(
                ResourcePhase::B,
                link,
                instance_id,
                &LinkUpdateResourceInput {
                    resource_info: resource_b_info.clone(),
                    other_resource_info: resource_a_info.clone(),
                    update_type,
                },
                link_implementation.as_ref(),
                RetryInfo::new(retry_policy.clone()),
                ctx,
            )
            .await?;
        let Some(resource_b_output) = resource_b_output else {
            return Ok(());
        };

        self.update_intermediary_resources(
            link,
            instance_id,
            &LinkUpdateIntermediaryResourcesInput {
                resource_a_info,
                resource_b_info,
                update_type,
            },
            link_implementation.as_ref(),
            RetryInfo::new(retry_policy),
            &resource_a_output,
            &resource_b_output,
            ctx,
        )
        .await
    }

    /// Endpoint resource info is read from the live state container so
    /// links scheduled after their endpoints were deployed in earlier
    /// groups see fresh state; the start-of-invocation snapshot is the
    /// fallback.
    async fn endpoint_info(
        &self,
        instance_id: &str,
        resource_name: &str,
        ctx: &DeployContext,
    ) -> Option<ResourceInfo> {
        let state = match self.state_container.get_instance(instance_id).await {
            Ok(instance) => instance.resource_by_name(resource_name).cloned(),
            Err(_) => ctx
                .instance_snapshot
                .resource_by_name(resource_name)
                .cloned(),
        }?;
        Some(ResourceInfo {
            resource_id: state.resource_id.clone(),
            resource_name: resource_name.to_string(),
            instance_id: instance_id.to_string(),
            current_state: Some(state),
        })
    }

    /// Runs one endpoint resource phase with its own retry loop.
    ///
    /// Returns `None` when the phase terminally failed and the link
    /// deployment must stop without attempting later phases; earlier,
    /// already succeeded phases are never retried.
    #[allow(clippy::too_many_arguments)]
    async fn update_link_resource(
        &self,
        phase: ResourcePhase,
        link: &LinkIdInfo,
        instance_id: &str,
        input: &LinkUpdateResourceInput,
        link_implementation: &dyn LinkImplementation,
        mut retry: RetryInfo,
        ctx: &DeployContext,
    ) -> Result<Option<LinkUpdateResourceOutput>, EngineError> {
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let attempt_start = Instant::now();
            ctx.channels.send_link_update(LinkUpdateMessage {
                instance_id: instance_id.to_string(),
                link_id: link.link_id.clone(),
                link_name: link.link_name.clone(),
                status: link_updating_status(input.update_type, ctx.rollback),
                precise_status: phase.updating_status(),
                failure_reasons: Vec::new(),
                current_stage_attempt: retry.attempt,
                can_retry_current_stage: true,
                update_timestamp: now_timestamp(),
                durations: None,
            });

            let result = match phase {
                ResourcePhase::A => link_implementation.update_resource_a(input).await,
                ResourcePhase::B => link_implementation.update_resource_b(input).await,
            };

            match result {
                Ok(output) => {
                    let durations = self.stage_finished_durations(
                        phase,
                        &link.link_name,
                        &retry,
                        attempt_start.elapsed(),
                        ctx,
                    );
                    ctx.channels.send_link_update(LinkUpdateMessage {
                        instance_id: instance_id.to_string(),
                        link_id: link.link_id.clone(),
                        link_name: link.link_name.clone(),
                        // Still in the process of updating the link; later
                        // phases follow.
                        status: link_updating_status(input.update_type, ctx.rollback),
                        precise_status: phase.updated_status(),
                        failure_reasons: Vec::new(),
                        current_stage_attempt: retry.attempt,
                        can_retry_current_stage: true,
                        update_timestamp: now_timestamp(),
                        durations: Some(durations),
                    });
                    return Ok(Some(output));
                }
                Err(ProviderError::Retryable { reason }) => {
                    let next = retry.next_attempt(attempt_start.elapsed());
                    ctx.channels.send_link_update(LinkUpdateMessage {
                        instance_id: instance_id.to_string(),
                        link_id: link.link_id.clone(),
                        link_name: link.link_name.clone(),
                        status: link_update_failed_status(input.update_type, ctx.rollback),
                        precise_status: phase.failed_status(),
                        failure_reasons: vec![reason],
                        current_stage_attempt: retry.attempt,
                        can_retry_current_stage: !next.exceeded_max_retries,
                        update_timestamp: now_timestamp(),
                        durations: Some(
                            self.stage_retry_durations(phase, &link.link_name, &next, ctx),
                        ),
                    });
                    if next.exceeded_max_retries {
                        return Ok(None);
                    }
                    let wait = calculate_retry_wait(&next.policy, next.attempt);
                    sleep_or_cancel(&ctx.cancel, wait).await?;
                    retry = next;
                }
                Err(ProviderError::Terminal { failure_reasons }) => {
                    let durations = self.stage_finished_durations(
                        phase,
                        &link.link_name,
                        &retry,
                        attempt_start.elapsed(),
                        ctx,
                    );
                    ctx.channels.send_link_update(LinkUpdateMessage {
                        instance_id: instance_id.to_string(),
                        link_id: link.link_id.clone(),
                        link_name: link.link_name.clone(),
                        status: link_update_failed_status(input.update_type, ctx.rollback),
                        precise_status: phase.failed_status(),
                        failure_reasons,
                        current_stage_attempt: retry.attempt,
                        can_retry_current_stage: false,
                        update_timestamp: now_timestamp(),
                        durations: Some(durations),
                    });
                    return Ok(None);
                }
                // Unwrapped errors indicate a provider contract violation;
                // the deployment stops without a structured failure state.
                Err(ProviderError::Fatal { message }) => {
                    return Err(EngineError::FatalProvider { message });
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_intermediary_resources(
        &self,
        link: &LinkIdInfo,
        instance_id: &str,
        input: &LinkUpdateIntermediaryResourcesInput,
        link_implementation: &dyn LinkImplementation,
        mut retry: RetryInfo,
        resource_a_output: &LinkUpdateResourceOutput,
        resource_b_output: &LinkUpdateResourceOutput,
        ctx: &DeployContext,
    ) -> Result<(), EngineError> {
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let attempt_start = Instant::now();
            ctx.channels.send_link_update(LinkUpdateMessage {
                instance_id: instance_id.to_string(),
                link_id: link.link_id.clone(),
                link_name: link.link_name.clone(),
                status: link_updating_status(input.update_type, ctx.rollback),
                precise_status: PreciseLinkStatus::UpdatingIntermediaryResources,
                failure_reasons: Vec::new(),
                current_stage_attempt: retry.attempt,
                can_retry_current_stage: true,
                update_timestamp: now_timestamp(),
                durations: None,
            });

            match link_implementation.update_intermediary_resources(input).await {
                Ok(output) => {
                    // Stash the merged result before sending the status
                    // update so the handler persisting it sees consistent
                    // ephemeral state.
                    let result =
                        create_link_deploy_result(resource_a_output, resource_b_output, &output);
                    ctx.state.set_link_deploy_result(&link.link_name, result);

                    let mut accumulated = ctx.state.link_duration_info(&link.link_name);
                    accumulated.intermediary_resources = Some(component_finished_durations(
                        &retry,
                        attempt_start.elapsed(),
                    ));
                    accumulated.total_duration_ms = total_from_components(&accumulated);
                    ctx.state
                        .set_link_duration_info(&link.link_name, accumulated.clone());

                    ctx.channels.send_link_update(LinkUpdateMessage {
                        instance_id: instance_id.to_string(),
                        link_id: link.link_id.clone(),
                        link_name: link.link_name.clone(),
                        // Updating intermediary resources is the last step
                        // in the link update process.
                        status: link_updated_status(input.update_type, ctx.rollback),
                        precise_status: PreciseLinkStatus::IntermediaryResourcesUpdated,
                        failure_reasons: Vec::new(),
                        current_stage_attempt: retry.attempt,
                        can_retry_current_stage: true,
                        update_timestamp: now_timestamp(),
                        durations: Some(accumulated),
                    });
                    return Ok(());
                }
                Err(ProviderError::Retryable { reason }) => {
                    let next = retry.next_attempt(attempt_start.elapsed());
                    let mut accumulated = ctx.state.link_duration_info(&link.link_name);
                    accumulated.intermediary_resources = Some(if next.exceeded_max_retries {
                        component_exceeded_durations(&next)
                    } else {
                        component_retry_durations(&next)
                    });
                    ctx.channels.send_link_update(LinkUpdateMessage {
                        instance_id: instance_id.to_string(),
                        link_id: link.link_id.clone(),
                        link_name: link.link_name.clone(),
                        status: link_update_failed_status(input.update_type, ctx.rollback),
                        precise_status: PreciseLinkStatus::IntermediaryResourceUpdateFailed,
                        failure_reasons: vec![reason],
                        current_stage_attempt: retry.attempt,
                        can_retry_current_stage: !next.exceeded_max_retries,
                        update_timestamp: now_timestamp(),
                        durations: Some(accumulated),
                    });
                    if next.exceeded_max_retries {
                        return Ok(());
                    }
                    let wait = calculate_retry_wait(&next.policy, next.attempt);
                    sleep_or_cancel(&ctx.cancel, wait).await?;
                    retry = next;
                }
                Err(ProviderError::Terminal { failure_reasons }) => {
                    let mut accumulated = ctx.state.link_duration_info(&link.link_name);
                    accumulated.intermediary_resources = Some(component_finished_durations(
                        &retry,
                        attempt_start.elapsed(),
                    ));
                    ctx.state
                        .set_link_duration_info(&link.link_name, accumulated.clone());
                    ctx.channels.send_link_update(LinkUpdateMessage {
                        instance_id: instance_id.to_string(),
                        link_id: link.link_id.clone(),
                        link_name: link.link_name.clone(),
                        status: link_update_failed_status(input.update_type, ctx.rollback),
                        precise_status: PreciseLinkStatus::IntermediaryResourceUpdateFailed,
                        failure_reasons,
                        current_stage_attempt: retry.attempt,
                        can_retry_current_stage: false,
                        update_timestamp: now_timestamp(),
                        durations: Some(accumulated),
                    });
                    return Ok(());
                }
                Err(ProviderError::Fatal { message }) => {
                    return Err(EngineError::FatalProvider { message });
                }
            }
        }
    }

    /// Durations for a retry-failure message; carries the accumulated
    /// durations of earlier phases, not persisted until the phase
    /// finishes. Once the retry limit is exceeded the component carries
    /// its computed total.
    fn stage_retry_durations(
        &self,
        phase: ResourcePhase,
        link_name: &str,
        retry: &RetryInfo,
        ctx: &DeployContext,
    ) -> LinkCompletionDurations {
        let component = if retry.exceeded_max_retries {
            component_exceeded_durations(retry)
        } else {
            component_retry_durations(retry)
        };
        let mut accumulated = ctx.state.link_duration_info(link_name);
        match phase {
            ResourcePhase::A => accumulated.resource_a_update = Some(component),
            ResourcePhase::B => accumulated.resource_b_update = Some(component),
        }
        accumulated
    }

    fn stage_finished_durations(
        &self,
        phase: ResourcePhase,
        link_name: &str,
        retry: &RetryInfo,
        current_attempt: std::time::Duration,
        ctx: &DeployContext,
    ) -> LinkCompletionDurations {
        let component = component_finished_durations(retry, current_attempt);
        let mut accumulated = ctx.state.link_duration_info(link_name);
        match phase {
            ResourcePhase::A => accumulated.resource_a_update = Some(component),
            ResourcePhase::B => accumulated.resource_b_update = Some(component),
        }
        ctx.state.set_link_duration_info(link_name, accumulated.clone());
        accumulated
    }
}

fn total_from_components(durations: &LinkCompletionDurations) -> Option<f64> {
    let components = [
        durations.resource_a_update.as_ref(),
        durations.resource_b_update.as_ref(),
        durations.intermediary_resources.as_ref(),
    ];
    let mut total = 0.0;
    let mut any = false;
    for component in components.into_iter().flatten() {
        if let Some(component_total) = component.total_duration_ms {
            total += component_total;
            any = true;
        }
    }
    any.then_some(total)
}

fn create_link_deploy_result(
    resource_a_output: &LinkUpdateResourceOutput,
    resource_b_output: &LinkUpdateResourceOutput,
    intermediary_output: &LinkUpdateIntermediaryResourcesOutput,
) -> LinkDeployResult {
    LinkDeployResult {
        link_data: merge_link_data([
            resource_a_output.link_data.as_ref(),
            resource_b_output.link_data.as_ref(),
            intermediary_output.link_data.as_ref(),
        ]),
        intermediary_resource_states: intermediary_output.intermediary_resource_states.clone(),
    }
}

/// Merges link data objects from the three phases; later phases win on
/// conflicting keys. Non-object values replace wholesale.
fn merge_link_data<'a>(outputs: impl IntoIterator<Item = Option<&'a Value>>) -> Option<Value> {
    let mut merged: Option<Value> = None;
    for output in outputs.into_iter().flatten() {
        merged = Some(match (merged, output) {
            (Some(Value::Object(mut base)), Value::Object(additions)) => {
                for (key, value) in additions {
                    base.insert(key.clone(), value.clone());
                }
                Value::Object(base)
            }
            (_, value) => value.clone(),
        });
    }
    merged
}
