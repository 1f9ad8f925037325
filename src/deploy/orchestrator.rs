// ABOUTME: The deployment and destruction driver for blueprint instances.
// ABOUTME: Removal first, then grouped deployment behind a message barrier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::{
    ChainGraph, DeploymentNode, group_deployment_nodes, has_priority_over, order_for_deployment,
};
use crate::provider::{
    ChildBlueprintHandler, LinkImplementation, LinkUpdateType, ProviderRegistry, RetryPolicy,
};
use crate::staging::{LinkPendingCompletion, link_endpoints};
use crate::state::{
    InstanceCompletionDurations, InstanceState, InstanceStatusInfo, LinkState, LinkStatusInfo,
    ResourceCompletionDurations, ResourceState, ResourceStatusInfo, StateContainer,
};
use crate::types::{
    BlueprintChanges, ChildBlueprintIdInfo, Element, InstanceStatus, LinkIdInfo,
    NewBlueprintDefinition, PreciseLinkStatus, PreciseResourceStatus, ResourceIdInfo,
};

use super::cancel::CancelSignal;
use super::channels::{
    ChildUpdateMessage, DeployChannels, DeployEvents, DeploymentFinishedMessage,
    DeploymentUpdateMessage, LinkUpdateMessage, ResourceUpdateMessage, now_timestamp,
};
use super::child_deployer::ChildDeployer;
use super::context::{BlueprintGraph, DeployContext, DeployInput, DestroyInput};
use super::link_deployer::LinkDeployer;
use super::removal::{
    collect_elements_to_remove, group_elements_for_removal, order_elements_for_removal,
};
use super::resource_deployer::ResourceDeployer;
use super::retry::fractional_millis;
use super::state::DeploymentState;
use super::statuses::{
    child_deploy_failed_status, child_deployed_status, child_deploying_status,
    child_destroy_failed_status, child_destroyed_status, child_destroying_status,
    finished_failure_status, instance_deploy_failed_status, instance_deployed_status,
    instance_deploying_status, instance_destroy_failed_status, instance_destroyed_status,
    instance_destroying_status,
};

const EMPTY_CHANGES_DEPLOY_MESSAGE: &str =
    "an empty set of changes was provided for deployment";
const PREPARE_DEPLOY_FAILURE_MESSAGE: &str =
    "failed to load instance state while preparing to deploy";
const PREPARE_DESTROY_FAILURE_MESSAGE: &str =
    "failed to load instance state while preparing to destroy";

/// A terminal report for one element within a group.
struct FinishedElement {
    element_name: String,
    failed: bool,
    failure_reasons: Vec<String>,
}

/// Terminal outcome extracted from a status message by a barrier handler.
enum TerminalOutcome {
    Success { logical_name: String },
    Failure(FinishedElement),
}

/// Drives concurrent deployment and destruction of blueprint instances.
///
/// One orchestrator serves many invocations; each `deploy`/`destroy` call
/// owns its own ephemeral [`DeploymentState`] for the duration of that
/// call. Callers create a channel pair with [`DeployChannels::create`],
/// pass the sender half in, and consume events from the receiver half.
pub struct Orchestrator {
    state_container: Arc<dyn StateContainer>,
    providers: ProviderRegistry,
    child_handler: Arc<dyn ChildBlueprintHandler>,
    link_deployer: Arc<LinkDeployer>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        state_container: Arc<dyn StateContainer>,
        providers: ProviderRegistry,
        child_handler: Arc<dyn ChildBlueprintHandler>,
        config: EngineConfig,
    ) -> Self {
        Orchestrator {
            link_deployer: Arc::new(LinkDeployer::new(state_container.clone())),
            state_container,
            providers,
            child_handler,
            config,
        }
    }

    /// Executes the deploy/update portion of a diff: removals first, then
    /// grouped deployment of new and changed elements.
    ///
    /// Exactly one finish message is sent per invocation; fatal errors
    /// bypass it on the error channel.
    pub async fn deploy(&self, input: DeployInput, channels: DeployChannels, cancel: CancelSignal) {
        let instance_id = input.instance_id.clone();
        let tree_path = input.params.instance_tree_path(&instance_id);
        if exceeds_max_depth(&tree_path, self.config.max_blueprint_depth) {
            channels.send_finished(finished_message(
                &instance_id,
                instance_deploy_failed_status(input.rollback),
                vec![
                    EngineError::MaxDepthExceeded {
                        tree_path,
                        max_depth: self.config.max_blueprint_depth,
                    }
                    .to_string(),
                ],
                None,
                None,
            ));
            return;
        }

        let Some(changes) = input.changes.as_ref().filter(|changes| !changes.is_empty())
        else {
            channels.send_finished(finished_message(
                &instance_id,
                instance_deploy_failed_status(input.rollback),
                vec![EMPTY_CHANGES_DEPLOY_MESSAGE.to_string()],
                None,
                None,
            ));
            return;
        };

        let start_time = Instant::now();
        channels.send_deployment_update(DeploymentUpdateMessage {
            instance_id: instance_id.clone(),
            status: InstanceStatus::Preparing,
            update_timestamp: now_timestamp(),
        });

        // The same ordering behaviour as change staging, scoped to the
        // current diff: elements grouped for concurrent deployment, in
        // order based on links and references.
        let ordered = match order_for_deployment(
            &input.blueprint.graph,
            &input.blueprint.roots,
            &input.blueprint.refs,
        ) {
            Ok(ordered) => ordered,
            Err(err) => {
                channels.send_err(err.into());
                return;
            }
        };
        let mut deployment_nodes: Vec<DeploymentNode> = ordered
            .iter()
            .map(|id| DeploymentNode::Resource {
                node: *id,
                name: input.blueprint.graph.node(*id).resource_name.clone(),
            })
            .collect();
        deployment_nodes.extend(
            input
                .blueprint
                .children
                .iter()
                .map(|name| DeploymentNode::Child { name: name.clone() }),
        );

        let groups: Vec<Vec<DeploymentNode>> = group_deployment_nodes(
            &input.blueprint.graph,
            &deployment_nodes,
            &input.blueprint.refs,
        )
        .into_iter()
        .map(|group| {
            group
                .into_iter()
                .filter(|node| node_in_diff(node, changes))
                .collect::<Vec<_>>()
        })
        .filter(|group| !group.is_empty())
        .collect();
        let nodes_in_diff: Vec<DeploymentNode> = groups.iter().flatten().cloned().collect();

        let snapshot = match self.state_container.get_instance(&instance_id).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                channels.send_finished(finished_message(
                    &instance_id,
                    instance_deploy_failed_status(input.rollback),
                    vec![PREPARE_DEPLOY_FAILURE_MESSAGE.to_string()],
                    Some(start_time.elapsed()),
                    None,
                ));
                return;
            }
        };

        let ctx = DeployContext {
            start_time,
            rollback: input.rollback,
            destroying: false,
            state: Arc::new(DeploymentState::new()),
            channels: channels.clone(),
            instance_snapshot: Arc::new(snapshot),
            params: Arc::new(input.params),
            current_group: 0,
            cancel,
        };

        // Removal of existing elements is always processed first.
        match self
            .remove_elements(
                changes,
                &ctx,
                &nodes_in_diff,
                &instance_id,
                Some(&input.blueprint.graph),
            )
            .await
        {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => {
                channels.send_err(err);
                return;
            }
        }

        self.register_pending_links(changes, &nodes_in_diff, &ctx);

        match self
            .deploy_groups(changes, &ctx, &groups, &input.blueprint, &instance_id)
            .await
        {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!("deployment of instance {instance_id} aborted: {err}");
                channels.send_err(err);
                return;
            }
        }

        channels.send_finished(finished_message(
            &instance_id,
            instance_deployed_status(ctx.rollback),
            Vec::new(),
            Some(start_time.elapsed()),
            ctx.state.prepare_duration(),
        ));
    }

    /// Destroys the elements named by the diff and, when everything
    /// succeeded, removes the blueprint instance record itself.
    pub async fn destroy(
        &self,
        input: DestroyInput,
        channels: DeployChannels,
        cancel: CancelSignal,
    ) {
        let instance_id = input.instance_id.clone();
        let tree_path = input.params.instance_tree_path(&instance_id);
        if exceeds_max_depth(&tree_path, self.config.max_blueprint_depth) {
            channels.send_finished(finished_message(
                &instance_id,
                instance_destroy_failed_status(input.rollback),
                vec![
                    EngineError::MaxDepthExceeded {
                        tree_path,
                        max_depth: self.config.max_blueprint_depth,
                    }
                    .to_string(),
                ],
                None,
                None,
            ));
            return;
        }

        let Some(changes) = input.changes.as_ref().filter(|changes| !changes.is_empty())
        else {
            channels.send_finished(finished_message(
                &instance_id,
                instance_destroy_failed_status(input.rollback),
                vec![empty_changes_destroy_message(input.rollback).to_string()],
                None,
                None,
            ));
            return;
        };

        let start_time = Instant::now();
        channels.send_deployment_update(DeploymentUpdateMessage {
            instance_id: instance_id.clone(),
            status: instance_destroying_status(input.rollback),
            update_timestamp: now_timestamp(),
        });

        let snapshot = match self.state_container.get_instance(&instance_id).await {
            Ok(snapshot) => snapshot,
            Err(_) => {
                channels.send_finished(finished_message(
                    &instance_id,
                    instance_destroy_failed_status(input.rollback),
                    vec![PREPARE_DESTROY_FAILURE_MESSAGE.to_string()],
                    Some(start_time.elapsed()),
                    None,
                ));
                return;
            }
        };

        let ctx = DeployContext {
            start_time,
            rollback: input.rollback,
            destroying: true,
            state: Arc::new(DeploymentState::new()),
            channels: channels.clone(),
            instance_snapshot: Arc::new(snapshot),
            params: Arc::new(input.params),
            current_group: 0,
            cancel,
        };

        match self
            .remove_elements(changes, &ctx, &[], &instance_id, None)
            .await
        {
            Ok(true) => return,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!("destruction of instance {instance_id} aborted: {err}");
                channels.send_err(err);
                return;
            }
        }

        // A parent element is only fully removed once its record is gone.
        if let Err(err) = self.state_container.remove_instance(&instance_id).await {
            channels.send_finished(finished_message(
                &instance_id,
                instance_destroy_failed_status(ctx.rollback),
                vec![err.to_string()],
                Some(start_time.elapsed()),
                None,
            ));
            return;
        }

        channels.send_finished(finished_message(
            &instance_id,
            instance_destroyed_status(ctx.rollback),
            Vec::new(),
            Some(start_time.elapsed()),
            None,
        ));
    }

    /// Removes the elements the diff schedules for removal, group by
    /// group. Returns `Ok(true)` when a finish message was already sent
    /// and processing must stop.
    async fn remove_elements(
        &self,
        changes: &BlueprintChanges,
        ctx: &DeployContext,
        nodes_to_deploy: &[DeploymentNode],
        instance_id: &str,
        graph: Option<&ChainGraph>,
    ) -> Result<bool, EngineError> {
        let collected =
            match collect_elements_to_remove(changes, &ctx.instance_snapshot, nodes_to_deploy) {
                Ok(collected) => collected,
                Err(err @ EngineError::ElementHasDependents { .. }) => {
                    // Detected before any destructive action was taken.
                    ctx.channels.send_finished(finished_message(
                        instance_id,
                        finished_failure_status(ctx.destroying, ctx.rollback),
                        vec![err.to_string()],
                        Some(ctx.start_time.elapsed()),
                        None,
                    ));
                    return Ok(true);
                }
                Err(err) => return Err(err),
            };

        if !ctx.destroying {
            // Removal is always processed first, so the prepare phase is
            // complete once the elements to remove have been collected,
            // ordered and grouped.
            ctx.state.set_prepare_duration(ctx.start_time.elapsed());
            ctx.channels.send_deployment_update(DeploymentUpdateMessage {
                instance_id: instance_id.to_string(),
                status: instance_deploying_status(ctx.rollback),
                update_timestamp: now_timestamp(),
            });
        }

        if collected.is_empty() {
            return Ok(false);
        }

        let ordered = order_elements_for_removal(&collected, &ctx.instance_snapshot);
        let groups = group_elements_for_removal(&ordered, &ctx.instance_snapshot);
        tracing::debug!(
            "removing {} elements across {} groups for instance {instance_id}",
            ordered.len(),
            groups.len()
        );

        for (group_index, group) in groups.iter().enumerate() {
            let (internal_channels, internal_events) = DeployChannels::create();
            let group_ctx = ctx.with_channels(internal_channels).with_group(group_index);
            let handles = self.dispatch_removal_group(group, instance_id, graph, &group_ctx)?;
            let stop = self
                .listen_to_group_removals(group, instance_id, ctx, internal_events)
                .await?;
            futures::future::join_all(handles).await;
            if stop {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Spawns one independently scheduled task per element in the group.
    fn dispatch_removal_group(
        &self,
        group: &[Element],
        instance_id: &str,
        graph: Option<&ChainGraph>,
        group_ctx: &DeployContext,
    ) -> Result<Vec<JoinHandle<()>>, EngineError> {
        let mut handles = Vec::with_capacity(group.len());
        for element in group {
            match element {
                Element::Resource(info) => {
                    let previous = group_ctx
                        .instance_snapshot
                        .resource_by_name(&info.resource_name)
                        .cloned();
                    group_ctx
                        .state
                        .record_previous_resource_state(&info.resource_name, previous.clone());
                    let resource_type = previous
                        .map(|state| state.resource_type)
                        .ok_or_else(|| EngineError::ResourceNotFoundInState {
                            resource_name: info.resource_name.clone(),
                            instance_id: instance_id.to_string(),
                        })?;
                    let provider = self
                        .providers
                        .resource_provider(&resource_type)
                        .ok_or_else(|| EngineError::MissingResourceProvider {
                            resource_type: resource_type.clone(),
                        })?;
                    let retry_policy = provider
                        .retry_policy()
                        .unwrap_or_else(|| self.config.retry_policy.clone());
                    let info = info.clone();
                    let instance_id = instance_id.to_string();
                    let task_ctx = group_ctx.clone();
                    handles.push(tokio::spawn(async move {
                        if let Err(err) = ResourceDeployer::destroy(
                            &info,
                            &instance_id,
                            provider,
                            retry_policy,
                            &task_ctx,
                        )
                        .await
                        {
                            task_ctx.channels.send_err(err);
                        }
                    }));
                }
                Element::Child(info) => {
                    group_ctx.state.record_previous_child_state(
                        &info.child_name,
                        group_ctx
                            .instance_snapshot
                            .child_by_name(&info.child_name)
                            .cloned(),
                    );
                    let handler = self.child_handler.clone();
                    let retry_policy = handler
                        .retry_policy()
                        .unwrap_or_else(|| self.config.retry_policy.clone());
                    let info = info.clone();
                    let instance_id = instance_id.to_string();
                    let task_ctx = group_ctx.clone();
                    handles.push(tokio::spawn(async move {
                        if let Err(err) = ChildDeployer::destroy(
                            &info,
                            &instance_id,
                            handler,
                            retry_policy,
                            &task_ctx,
                        )
                        .await
                        {
                            task_ctx.channels.send_err(err);
                        }
                    }));
                }
                Element::Link(info) => {
                    group_ctx.state.record_previous_link_state(
                        &info.link_name,
                        group_ctx
                            .instance_snapshot
                            .link_by_name(&info.link_name)
                            .cloned(),
                    );
                    let link_implementation = self.link_implementation_for(
                        &info.link_name,
                        graph,
                        &group_ctx.instance_snapshot,
                        instance_id,
                    )?;
                    let retry_policy = self.link_retry_policy(
                        &info.link_name,
                        graph,
                        &group_ctx.instance_snapshot,
                    );
                    let deployer = self.link_deployer.clone();
                    let info = info.clone();
                    let instance_id = instance_id.to_string();
                    let task_ctx = group_ctx.clone();
                    handles.push(tokio::spawn(async move {
                        if let Err(err) = deployer
                            .deploy(
                                &info,
                                &instance_id,
                                LinkUpdateType::Destroy,
                                link_implementation,
                                retry_policy,
                                &task_ctx,
                            )
                            .await
                        {
                            task_ctx.channels.send_err(err);
                        }
                    }));
                }
            }
        }
        Ok(handles)
    }

    /// Blocks until every element in the group has reported a terminal
    /// message, applying each update to the state container in receipt
    /// order before forwarding it to the caller.
    async fn listen_to_group_removals(
        &self,
        group: &[Element],
        instance_id: &str,
        ctx: &DeployContext,
        mut events: DeployEvents,
    ) -> Result<bool, EngineError> {
        let mut finished: HashMap<String, FinishedElement> = HashMap::new();

        while finished.len() < group.len() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
                Some(message) = events.resource_updates.recv() => {
                    self.handle_resource_removal_message(instance_id, message, ctx, &mut finished)
                        .await?;
                }
                Some(message) = events.child_updates.recv() => {
                    self.handle_child_removal_message(instance_id, message, ctx, &mut finished)
                        .await?;
                }
                Some(message) = events.link_updates.recv() => {
                    self.handle_link_removal_message(instance_id, message, ctx, &mut finished)
                        .await?;
                }
                Some(err) = events.errors.recv() => return Err(err),
            }
        }

        let failed: Vec<&FinishedElement> =
            finished.values().filter(|element| element.failed).collect();
        if !failed.is_empty() {
            ctx.channels.send_finished(finished_message(
                instance_id,
                finished_failure_status(ctx.destroying, ctx.rollback),
                failure_messages(&failed),
                Some(ctx.start_time.elapsed()),
                ctx.state.prepare_duration(),
            ));
            return Ok(true);
        }

        Ok(false)
    }

    async fn handle_resource_removal_message(
        &self,
        instance_id: &str,
        message: ResourceUpdateMessage,
        ctx: &DeployContext,
        finished: &mut HashMap<String, FinishedElement>,
    ) -> Result<(), EngineError> {
        if message.precise_status == PreciseResourceStatus::Destroying {
            self.state_container
                .update_resource_status(
                    instance_id,
                    &message.resource_id,
                    ResourceStatusInfo {
                        status: message.status,
                        precise_status: message.precise_status,
                        failure_reasons: Vec::new(),
                        durations: None,
                    },
                )
                .await?;
        }

        let destroyed = message.precise_status == PreciseResourceStatus::Destroyed;
        let failed_permanently =
            message.precise_status == PreciseResourceStatus::DestroyFailed && !message.can_retry;
        if destroyed {
            // Removed entirely rather than status-marked: dependents are
            // checked for absence, not for a status field.
            self.state_container
                .remove_resource(instance_id, &message.resource_id)
                .await?;
        } else if failed_permanently {
            self.state_container
                .update_resource_status(
                    instance_id,
                    &message.resource_id,
                    ResourceStatusInfo {
                        status: message.status,
                        precise_status: message.precise_status,
                        failure_reasons: message.failure_reasons.clone(),
                        durations: message.durations.clone(),
                    },
                )
                .await?;
        }
        if destroyed || failed_permanently {
            finished.insert(
                format!("resources.{}", message.resource_name),
                FinishedElement {
                    element_name: format!("resources.{}", message.resource_name),
                    failed: failed_permanently,
                    failure_reasons: message.failure_reasons.clone(),
                },
            );
        }

        ctx.channels.send_resource_update(message);
        Ok(())
    }

    async fn handle_child_removal_message(
        &self,
        instance_id: &str,
        message: ChildUpdateMessage,
        ctx: &DeployContext,
        finished: &mut HashMap<String, FinishedElement>,
    ) -> Result<(), EngineError> {
        if message.status == child_destroying_status(ctx.rollback) {
            self.state_container
                .update_child_status(
                    instance_id,
                    &message.child_name,
                    &message.child_instance_id,
                    InstanceStatusInfo {
                        status: message.status,
                        durations: None,
                    },
                )
                .await?;
        }

        let destroyed = message.status == child_destroyed_status(ctx.rollback);
        let failed_permanently =
            message.status == child_destroy_failed_status(ctx.rollback) && !message.can_retry;
        if destroyed {
            self.state_container
                .remove_child(instance_id, &message.child_name)
                .await?;
        } else if failed_permanently {
            self.state_container
                .update_child_status(
                    instance_id,
                    &message.child_name,
                    &message.child_instance_id,
                    InstanceStatusInfo {
                        status: message.status,
                        durations: message.durations.clone(),
                    },
                )
                .await?;
        }
        if destroyed || failed_permanently {
            finished.insert(
                format!("children.{}", message.child_name),
                FinishedElement {
                    element_name: format!("children.{}", message.child_name),
                    failed: failed_permanently,
                    failure_reasons: message.failure_reasons.clone(),
                },
            );
        }

        ctx.channels.send_child_update(message);
        Ok(())
    }

    async fn handle_link_removal_message(
        &self,
        instance_id: &str,
        message: LinkUpdateMessage,
        ctx: &DeployContext,
        finished: &mut HashMap<String, FinishedElement>,
    ) -> Result<(), EngineError> {
        let destroyed = message.precise_status == PreciseLinkStatus::IntermediaryResourcesUpdated;
        let failed_permanently = matches!(
            message.precise_status,
            PreciseLinkStatus::ResourceAUpdateFailed
                | PreciseLinkStatus::ResourceBUpdateFailed
                | PreciseLinkStatus::IntermediaryResourceUpdateFailed
        ) && !message.can_retry_current_stage;

        if destroyed {
            self.state_container
                .remove_link(instance_id, &message.link_id)
                .await?;
        } else {
            // There are multiple stages to the destroy process; every
            // stage update carries duration information for the stages
            // before it.
            self.state_container
                .update_link_status(
                    instance_id,
                    &message.link_id,
                    LinkStatusInfo {
                        status: message.status,
                        precise_status: message.precise_status,
                        failure_reasons: message.failure_reasons.clone(),
                        durations: message.durations.clone(),
                    },
                )
                .await?;
        }
        if destroyed || failed_permanently {
            finished.insert(
                format!("links.{}", message.link_name),
                FinishedElement {
                    element_name: format!("links.{}", message.link_name),
                    failed: failed_permanently,
                    failure_reasons: message.failure_reasons.clone(),
                },
            );
        }

        ctx.channels.send_link_update(message);
        Ok(())
    }

    /// Registers pending-link records for every link in the diff between
    /// resources adjacent in the chain graph. Sides whose endpoint is not
    /// scheduled in this invocation start out complete.
    fn register_pending_links(
        &self,
        changes: &BlueprintChanges,
        nodes_in_diff: &[DeploymentNode],
        ctx: &DeployContext,
    ) {
        let scheduled = |name: &str| {
            nodes_in_diff.iter().any(|node| {
                matches!(node, DeploymentNode::Resource { name: n, .. } if n == name)
            })
        };

        for (resource_a_name, resource_changes) in changes
            .new_resources
            .iter()
            .chain(changes.resource_changes.iter())
        {
            let link_neighbours = resource_changes
                .new_outbound_links
                .keys()
                .chain(resource_changes.outbound_link_changes.keys());
            for resource_b_name in link_neighbours {
                ctx.state.register_pending_link(
                    resource_a_name,
                    resource_b_name,
                    scheduled(resource_a_name),
                    scheduled(resource_b_name),
                );
            }
        }
    }

    /// Deploys the grouped elements, dispatching links into the current
    /// group wave as soon as both of their endpoints have completed.
    async fn deploy_groups(
        &self,
        changes: &BlueprintChanges,
        ctx: &DeployContext,
        groups: &[Vec<DeploymentNode>],
        blueprint: &BlueprintGraph,
        instance_id: &str,
    ) -> Result<bool, EngineError> {
        for (group_index, group) in groups.iter().enumerate() {
            let (internal_channels, mut events) = DeployChannels::create();
            let group_ctx = ctx.with_channels(internal_channels).with_group(group_index);

            let mut handles = Vec::with_capacity(group.len());
            for node in group {
                handles.push(
                    self.dispatch_deploy_node(node, changes, blueprint, instance_id, &group_ctx)?,
                );
            }

            let mut expected = group.len();
            let mut done = 0usize;
            let mut failures: Vec<FinishedElement> = Vec::new();

            while done < expected {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
                    Some(message) = events.resource_updates.recv() => {
                        let outcome = self
                            .handle_resource_deploy_message(instance_id, message, ctx, blueprint)
                            .await?;
                        if let Some(outcome) = outcome {
                            done += 1;
                            match outcome {
                                TerminalOutcome::Success { logical_name } => {
                                    for ready in ctx.state.resource_completed(&logical_name) {
                                        handles.push(self.dispatch_link_deploy(
                                            &ready,
                                            changes,
                                            blueprint,
                                            instance_id,
                                            &group_ctx,
                                        )?);
                                        expected += 1;
                                    }
                                }
                                TerminalOutcome::Failure(failure) => failures.push(failure),
                            }
                        }
                    }
                    Some(message) = events.child_updates.recv() => {
                        let outcome = self
                            .handle_child_deploy_message(instance_id, message, ctx)
                            .await?;
                        if let Some(outcome) = outcome {
                            done += 1;
                            if let TerminalOutcome::Failure(failure) = outcome {
                                failures.push(failure);
                            }
                        }
                    }
                    Some(message) = events.link_updates.recv() => {
                        let outcome = self
                            .handle_link_deploy_message(instance_id, message, ctx)
                            .await?;
                        if let Some(outcome) = outcome {
                            done += 1;
                            if let TerminalOutcome::Failure(failure) = outcome {
                                failures.push(failure);
                            }
                        }
                    }
                    Some(err) = events.errors.recv() => return Err(err),
                }
            }

            futures::future::join_all(handles).await;

            if !failures.is_empty() {
                let failed: Vec<&FinishedElement> = failures.iter().collect();
                ctx.channels.send_finished(finished_message(
                    instance_id,
                    finished_failure_status(ctx.destroying, ctx.rollback),
                    failure_messages(&failed),
                    Some(ctx.start_time.elapsed()),
                    ctx.state.prepare_duration(),
                ));
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn dispatch_deploy_node(
        &self,
        node: &DeploymentNode,
        changes: &BlueprintChanges,
        blueprint: &BlueprintGraph,
        instance_id: &str,
        group_ctx: &DeployContext,
    ) -> Result<JoinHandle<()>, EngineError> {
        match node {
            DeploymentNode::Resource { node: node_id, name } => {
                let is_new = changes.new_resources.contains_key(name);
                let resource_changes = changes
                    .resource_changes_for(name)
                    .cloned()
                    .unwrap_or_default();
                let previous = group_ctx
                    .instance_snapshot
                    .resource_by_name(name)
                    .cloned();
                group_ctx
                    .state
                    .record_previous_resource_state(name, previous.clone());

                let resource_type = blueprint.graph.node(*node_id).resource_type.clone();
                let provider = self
                    .providers
                    .resource_provider(&resource_type)
                    .ok_or_else(|| EngineError::MissingResourceProvider {
                        resource_type: resource_type.clone(),
                    })?;
                let retry_policy = provider
                    .retry_policy()
                    .unwrap_or_else(|| self.config.retry_policy.clone());
                let info = ResourceIdInfo {
                    resource_id: previous
                        .map(|state| state.resource_id)
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    resource_name: name.clone(),
                };
                let instance_id = instance_id.to_string();
                let task_ctx = group_ctx.clone();
                Ok(tokio::spawn(async move {
                    if let Err(err) = ResourceDeployer::deploy(
                        &info,
                        &resource_type,
                        &instance_id,
                        is_new,
                        resource_changes,
                        provider,
                        retry_policy,
                        &task_ctx,
                    )
                    .await
                    {
                        task_ctx.channels.send_err(err);
                    }
                }))
            }
            DeploymentNode::Child { name } => {
                let previous = group_ctx.instance_snapshot.child_by_name(name).cloned();
                group_ctx
                    .state
                    .record_previous_child_state(name, previous.clone());
                let child_changes = changes
                    .child_changes
                    .get(name)
                    .cloned()
                    .or_else(|| {
                        changes
                            .new_children
                            .get(name)
                            .map(new_child_definition_changes)
                    })
                    .unwrap_or_default();
                let info = ChildBlueprintIdInfo {
                    child_instance_id: previous
                        .map(|state| state.instance_id)
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    child_name: name.clone(),
                };
                let handler = self.child_handler.clone();
                let retry_policy = handler
                    .retry_policy()
                    .unwrap_or_else(|| self.config.retry_policy.clone());
                let instance_id = instance_id.to_string();
                let task_ctx = group_ctx.clone();
                Ok(tokio::spawn(async move {
                    if let Err(err) = ChildDeployer::deploy(
                        &info,
                        &instance_id,
                        child_changes,
                        handler,
                        retry_policy,
                        &task_ctx,
                    )
                    .await
                    {
                        task_ctx.channels.send_err(err);
                    }
                }))
            }
        }
    }

    fn dispatch_link_deploy(
        &self,
        pending: &LinkPendingCompletion,
        changes: &BlueprintChanges,
        blueprint: &BlueprintGraph,
        instance_id: &str,
        group_ctx: &DeployContext,
    ) -> Result<JoinHandle<()>, EngineError> {
        let link_name = pending.link_name();
        let is_new = changes
            .resource_changes_for(&pending.resource_a_name)
            .is_some_and(|resource_changes| {
                resource_changes
                    .new_outbound_links
                    .contains_key(&pending.resource_b_name)
            });
        let update_type = if is_new {
            LinkUpdateType::Create
        } else {
            LinkUpdateType::Update
        };

        let previous = group_ctx.instance_snapshot.link_by_name(&link_name).cloned();
        group_ctx
            .state
            .record_previous_link_state(&link_name, previous.clone());

        let info = LinkIdInfo {
            link_id: previous
                .map(|state| state.link_id)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            link_name: link_name.clone(),
        };
        let link_implementation = self.link_implementation_for(
            &link_name,
            Some(&blueprint.graph),
            &group_ctx.instance_snapshot,
            instance_id,
        )?;
        let retry_policy = self.link_retry_policy(
            &link_name,
            Some(&blueprint.graph),
            &group_ctx.instance_snapshot,
        );

        let deployer = self.link_deployer.clone();
        let instance_id = instance_id.to_string();
        let task_ctx = group_ctx.clone();
        Ok(tokio::spawn(async move {
            if let Err(err) = deployer
                .deploy(
                    &info,
                    &instance_id,
                    update_type,
                    link_implementation,
                    retry_policy,
                    &task_ctx,
                )
                .await
            {
                task_ctx.channels.send_err(err);
            }
        }))
    }

    /// Applies a resource deploy message to the state container and
    /// extracts its terminal outcome, if any.
    async fn handle_resource_deploy_message(
        &self,
        instance_id: &str,
        message: ResourceUpdateMessage,
        ctx: &DeployContext,
        blueprint: &BlueprintGraph,
    ) -> Result<Option<TerminalOutcome>, EngineError> {
        let started = matches!(
            message.precise_status,
            PreciseResourceStatus::Creating | PreciseResourceStatus::Updating
        );
        let succeeded = matches!(
            message.precise_status,
            PreciseResourceStatus::Created | PreciseResourceStatus::Updated
        );
        let failed_permanently = matches!(
            message.precise_status,
            PreciseResourceStatus::CreateFailed | PreciseResourceStatus::UpdateFailed
        ) && !message.can_retry;

        if started {
            self.upsert_resource_status(instance_id, &message, blueprint, None)
                .await?;
        } else if succeeded {
            let output = ctx
                .state
                .resource_deploy_result(&message.resource_name)
                .unwrap_or_default();
            let (depends_on_resources, depends_on_children) = self
                .resource_dependency_ids(&message.resource_name, blueprint, instance_id)
                .await;
            let resource_type = resource_type_of(
                &message.resource_name,
                Some(&blueprint.graph),
                &ctx.instance_snapshot,
            )
            .unwrap_or_default();
            self.state_container
                .save_resource(
                    instance_id,
                    ResourceState {
                        resource_id: message.resource_id.clone(),
                        resource_name: message.resource_name.clone(),
                        resource_type,
                        status: message.status,
                        precise_status: message.precise_status,
                        spec_state: output.spec_state,
                        depends_on_resources,
                        depends_on_children,
                        failure_reasons: Vec::new(),
                        durations: message.durations.clone(),
                    },
                )
                .await?;
        } else if failed_permanently {
            self.upsert_resource_status(instance_id, &message, blueprint, message.durations.clone())
                .await?;
        }

        let outcome = if succeeded {
            Some(TerminalOutcome::Success {
                logical_name: message.resource_name.clone(),
            })
        } else if failed_permanently {
            Some(TerminalOutcome::Failure(FinishedElement {
                element_name: format!("resources.{}", message.resource_name),
                failed: true,
                failure_reasons: message.failure_reasons.clone(),
            }))
        } else {
            None
        };

        ctx.channels.send_resource_update(message);
        Ok(outcome)
    }

    /// Updates a resource's status, creating an initial record when the
    /// resource is new to the instance.
    async fn upsert_resource_status(
        &self,
        instance_id: &str,
        message: &ResourceUpdateMessage,
        blueprint: &BlueprintGraph,
        durations: Option<ResourceCompletionDurations>,
    ) -> Result<(), EngineError> {
        let update = self
            .state_container
            .update_resource_status(
                instance_id,
                &message.resource_id,
                ResourceStatusInfo {
                    status: message.status,
                    precise_status: message.precise_status,
                    failure_reasons: message.failure_reasons.clone(),
                    durations: durations.clone(),
                },
            )
            .await;
        match update {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                let resource_type = blueprint
                    .graph
                    .node_id(&message.resource_name)
                    .map(|id| blueprint.graph.node(id).resource_type.clone())
                    .unwrap_or_default();
                self.state_container
                    .save_resource(
                        instance_id,
                        ResourceState {
                            resource_id: message.resource_id.clone(),
                            resource_name: message.resource_name.clone(),
                            resource_type,
                            status: message.status,
                            precise_status: message.precise_status,
                            failure_reasons: message.failure_reasons.clone(),
                            durations,
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn handle_child_deploy_message(
        &self,
        instance_id: &str,
        message: ChildUpdateMessage,
        ctx: &DeployContext,
    ) -> Result<Option<TerminalOutcome>, EngineError> {
        let started = message.status == child_deploying_status(ctx.rollback);
        let succeeded = message.status == child_deployed_status(ctx.rollback);
        let failed_permanently =
            message.status == child_deploy_failed_status(ctx.rollback) && !message.can_retry;

        if started || succeeded || failed_permanently {
            self.state_container
                .update_child_status(
                    instance_id,
                    &message.child_name,
                    &message.child_instance_id,
                    InstanceStatusInfo {
                        status: message.status,
                        durations: message.durations.clone(),
                    },
                )
                .await?;
        }

        let outcome = if succeeded {
            Some(TerminalOutcome::Success {
                logical_name: message.child_name.clone(),
            })
        } else if failed_permanently {
            Some(TerminalOutcome::Failure(FinishedElement {
                element_name: format!("children.{}", message.child_name),
                failed: true,
                failure_reasons: message.failure_reasons.clone(),
            }))
        } else {
            None
        };

        ctx.channels.send_child_update(message);
        Ok(outcome)
    }

    async fn handle_link_deploy_message(
        &self,
        instance_id: &str,
        message: LinkUpdateMessage,
        ctx: &DeployContext,
    ) -> Result<Option<TerminalOutcome>, EngineError> {
        let succeeded = message.precise_status == PreciseLinkStatus::IntermediaryResourcesUpdated;
        let failed_permanently = matches!(
            message.precise_status,
            PreciseLinkStatus::ResourceAUpdateFailed
                | PreciseLinkStatus::ResourceBUpdateFailed
                | PreciseLinkStatus::IntermediaryResourceUpdateFailed
        ) && !message.can_retry_current_stage;

        if succeeded {
            // The deploy result was stashed in the ephemeral state before
            // this message was sent.
            let result = ctx
                .state
                .link_deploy_result(&message.link_name)
                .unwrap_or_default();
            let previous = ctx
                .instance_snapshot
                .link_by_name(&message.link_name)
                .cloned();
            self.state_container
                .save_link(
                    instance_id,
                    LinkState {
                        link_id: message.link_id.clone(),
                        link_name: message.link_name.clone(),
                        instance_id: instance_id.to_string(),
                        status: message.status,
                        precise_status: message.precise_status,
                        link_data: result.link_data.or(previous.and_then(|p| p.link_data)),
                        intermediary_resource_states: result.intermediary_resource_states,
                        failure_reasons: Vec::new(),
                        durations: message.durations.clone(),
                    },
                )
                .await?;
            ctx.state.mark_link_no_longer_pending(&message.link_name);
        } else {
            self.state_container
                .update_link_status(
                    instance_id,
                    &message.link_id,
                    LinkStatusInfo {
                        status: message.status,
                        precise_status: message.precise_status,
                        failure_reasons: message.failure_reasons.clone(),
                        durations: message.durations.clone(),
                    },
                )
                .await?;
        }

        let outcome = if succeeded {
            Some(TerminalOutcome::Success {
                logical_name: message.link_name.clone(),
            })
        } else if failed_permanently {
            Some(TerminalOutcome::Failure(FinishedElement {
                element_name: format!("links.{}", message.link_name),
                failed: true,
                failure_reasons: message.failure_reasons.clone(),
            }))
        } else {
            None
        };

        ctx.channels.send_link_update(message);
        Ok(outcome)
    }

    fn link_implementation_for(
        &self,
        link_name: &str,
        graph: Option<&ChainGraph>,
        snapshot: &InstanceState,
        instance_id: &str,
    ) -> Result<Arc<dyn LinkImplementation>, EngineError> {
        let Some((resource_a_name, resource_b_name)) = link_endpoints(link_name) else {
            return Err(EngineError::InvalidLinkName {
                link_name: link_name.to_string(),
            });
        };
        let resource_type_a = resource_type_of(resource_a_name, graph, snapshot).ok_or_else(
            || EngineError::ResourceNotFoundInState {
                resource_name: resource_a_name.to_string(),
                instance_id: instance_id.to_string(),
            },
        )?;
        let resource_type_b = resource_type_of(resource_b_name, graph, snapshot).ok_or_else(
            || EngineError::ResourceNotFoundInState {
                resource_name: resource_b_name.to_string(),
                instance_id: instance_id.to_string(),
            },
        )?;
        self.providers
            .link(&resource_type_a, &resource_type_b)
            .ok_or_else(|| EngineError::MissingLinkImplementation {
                resource_a: resource_a_name.to_string(),
                resource_b: resource_b_name.to_string(),
            })
    }

    /// The retry policy for a link comes from resource A's provider, the
    /// engine default otherwise.
    fn link_retry_policy(
        &self,
        link_name: &str,
        graph: Option<&ChainGraph>,
        snapshot: &InstanceState,
    ) -> RetryPolicy {
        link_endpoints(link_name)
            .and_then(|(resource_a_name, _)| resource_type_of(resource_a_name, graph, snapshot))
            .and_then(|resource_type| self.providers.resource_provider(&resource_type))
            .and_then(|provider| provider.retry_policy())
            .unwrap_or_else(|| self.config.retry_policy.clone())
    }

    /// Dependency IDs persisted with a resource: every element it
    /// explicitly references plus hard-link neighbours with priority over
    /// it.
    async fn resource_dependency_ids(
        &self,
        resource_name: &str,
        blueprint: &BlueprintGraph,
        instance_id: &str,
    ) -> (Vec<String>, Vec<String>) {
        let mut resource_names: Vec<String> = Vec::new();
        let mut child_names: Vec<String> = Vec::new();

        for referenced in blueprint.refs.direct_references(resource_name) {
            if let Some(child_name) = referenced.strip_prefix("children.") {
                child_names.push(child_name.to_string());
            } else {
                resource_names.push(referenced);
            }
        }

        if let Some(node_id) = blueprint.graph.node_id(resource_name) {
            let node = blueprint.graph.node(node_id);
            let neighbours = node.linked_from.iter().chain(node.links_to.iter());
            for &neighbour_id in neighbours {
                if has_priority_over(&blueprint.graph, neighbour_id, node_id) {
                    let neighbour_name =
                        blueprint.graph.node(neighbour_id).resource_name.clone();
                    if !resource_names.contains(&neighbour_name) {
                        resource_names.push(neighbour_name);
                    }
                }
            }
        }

        // Map names to the IDs of the current state records.
        let Ok(instance) = self.state_container.get_instance(instance_id).await else {
            return (Vec::new(), Vec::new());
        };
        let resource_ids = resource_names
            .iter()
            .filter_map(|name| {
                instance
                    .resource_by_name(name)
                    .map(|state| state.resource_id.clone())
            })
            .collect();
        let child_ids = child_names
            .iter()
            .filter_map(|name| {
                instance
                    .child_by_name(name)
                    .map(|child| child.instance_id.clone())
            })
            .collect();
        (resource_ids, child_ids)
    }
}

fn finished_message(
    instance_id: &str,
    status: InstanceStatus,
    failure_reasons: Vec<String>,
    total: Option<Duration>,
    prepare: Option<Duration>,
) -> DeploymentFinishedMessage {
    DeploymentFinishedMessage {
        instance_id: instance_id.to_string(),
        status,
        failure_reasons,
        finish_timestamp: now_timestamp(),
        durations: Some(InstanceCompletionDurations {
            prepare_duration_ms: prepare.map(fractional_millis),
            total_duration_ms: total.map(fractional_millis),
        }),
    }
}

fn empty_changes_destroy_message(rollback: bool) -> &'static str {
    if rollback {
        "an empty set of changes was provided to roll back the deployment"
    } else {
        "an empty set of changes was provided for destruction"
    }
}

fn failure_messages(failed: &[&FinishedElement]) -> Vec<String> {
    failed
        .iter()
        .map(|element| {
            if element.failure_reasons.is_empty() {
                format!("{} failed permanently", element.element_name)
            } else {
                format!(
                    "{}: {}",
                    element.element_name,
                    element.failure_reasons.join("; ")
                )
            }
        })
        .collect()
}

fn node_in_diff(node: &DeploymentNode, changes: &BlueprintChanges) -> bool {
    match node {
        DeploymentNode::Resource { name, .. } => {
            changes.new_resources.contains_key(name)
                || changes.resource_changes.contains_key(name)
        }
        DeploymentNode::Child { name } => {
            changes.new_children.contains_key(name)
                || changes.child_changes.contains_key(name)
                || changes.recreate_children.contains(name)
        }
    }
}

fn new_child_definition_changes(definition: &NewBlueprintDefinition) -> BlueprintChanges {
    BlueprintChanges {
        new_resources: definition.new_resources.clone(),
        new_children: definition.new_children.clone(),
        new_exports: definition.new_exports.clone(),
        ..Default::default()
    }
}

fn resource_type_of(
    resource_name: &str,
    graph: Option<&ChainGraph>,
    snapshot: &InstanceState,
) -> Option<String> {
    if let Some(graph) = graph
        && let Some(node_id) = graph.node_id(resource_name)
    {
        return Some(graph.node(node_id).resource_type.clone());
    }
    snapshot
        .resource_by_name(resource_name)
        .map(|state| state.resource_type.clone())
}

fn exceeds_max_depth(tree_path: &str, max_depth: usize) -> bool {
    tree_path.split('/').count() > max_depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_path_depth_counts_segments() {
        assert!(!exceeds_max_depth("inst-1", 1));
        assert!(exceeds_max_depth("root/child", 1));
        assert!(!exceeds_max_depth("root/child", 2));
    }

    #[test]
    fn unused_resource_changes_default_to_empty() {
        let changes = BlueprintChanges::default();
        let node = DeploymentNode::Child {
            name: "analytics".to_string(),
        };
        assert!(!node_in_diff(&node, &changes));
    }

    #[test]
    fn failure_messages_carry_reasons() {
        let element = FinishedElement {
            element_name: "resources.ordersTable".to_string(),
            failed: true,
            failure_reasons: vec!["access denied".to_string()],
        };
        let messages = failure_messages(&[&element]);
        assert_eq!(messages, vec!["resources.ordersTable: access denied"]);
    }
}
