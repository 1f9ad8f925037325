// ABOUTME: Ephemeral per-invocation deployment bookkeeping.
// ABOUTME: Pending link tracking and previous-state snapshots for rollback.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::provider::ResourceDeployOutput;
use crate::staging::{LinkPendingCompletion, logical_link_name};
use crate::state::{InstanceState, LinkCompletionDurations, LinkState, ResourceState};

use super::link_deployer::LinkDeployResult;

/// Previous-state snapshots captured during one invocation, handed to the
/// caller to derive the inverse diff for a rollback pass.
///
/// A `None` value means the element was not previously deployed.
#[derive(Clone, Debug, Default)]
pub struct RollbackSnapshot {
    pub resources: HashMap<String, Option<ResourceState>>,
    pub children: HashMap<String, Option<InstanceState>>,
    pub links: HashMap<String, Option<LinkState>>,
}

#[derive(Default)]
struct DeploymentStateInner {
    /// Logical link name to pending completion state for links that need
    /// to be deployed or updated. Link removals are not tracked here: they
    /// do not depend on resource state changes and are processed before
    /// the resources in the relationship.
    pending_links: HashMap<String, LinkPendingCompletion>,
    /// Resource name to the pending links that include the resource.
    resource_name_pending_link_map: HashMap<String, Vec<String>>,
    /// Previous element states, captured before each element is touched.
    previous_resource_state: HashMap<String, Option<ResourceState>>,
    previous_child_state: HashMap<String, Option<InstanceState>>,
    previous_link_state: HashMap<String, Option<LinkState>>,
    /// Accumulated per-stage durations for links currently being updated.
    link_durations: HashMap<String, LinkCompletionDurations>,
    /// Deploy results stashed before the final status message so the
    /// barrier handler persists them consistently with the reported
    /// status.
    link_deploy_results: HashMap<String, LinkDeployResult>,
    resource_deploy_results: HashMap<String, ResourceDeployOutput>,
    prepare_duration: Option<Duration>,
}

/// Ephemeral state for a single deploy or destroy invocation.
///
/// Created at the start of an invocation and discarded at the end; never
/// persisted and never shared across invocations. All instance state,
/// including element statuses, lives in the state container; this only
/// tracks link readiness and the previous state needed for rolling back.
#[derive(Default)]
pub struct DeploymentState {
    inner: Mutex<DeploymentStateInner>,
}

impl DeploymentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_prepare_duration(&self, duration: Duration) {
        self.inner.lock().prepare_duration = Some(duration);
    }

    pub fn prepare_duration(&self) -> Option<Duration> {
        self.inner.lock().prepare_duration
    }

    pub fn set_link_duration_info(&self, link_name: &str, durations: LinkCompletionDurations) {
        self.inner
            .lock()
            .link_durations
            .insert(link_name.to_string(), durations);
    }

    /// The durations accumulated for a link so far; empty when no stage
    /// has finished yet.
    pub fn link_duration_info(&self, link_name: &str) -> LinkCompletionDurations {
        self.inner
            .lock()
            .link_durations
            .get(link_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_link_deploy_result(&self, link_name: &str, result: LinkDeployResult) {
        self.inner
            .lock()
            .link_deploy_results
            .insert(link_name.to_string(), result);
    }

    pub fn link_deploy_result(&self, link_name: &str) -> Option<LinkDeployResult> {
        self.inner.lock().link_deploy_results.get(link_name).cloned()
    }

    pub fn set_resource_deploy_result(&self, resource_name: &str, output: ResourceDeployOutput) {
        self.inner
            .lock()
            .resource_deploy_results
            .insert(resource_name.to_string(), output);
    }

    pub fn resource_deploy_result(&self, resource_name: &str) -> Option<ResourceDeployOutput> {
        self.inner
            .lock()
            .resource_deploy_results
            .get(resource_name)
            .cloned()
    }

    /// Registers a pending link between two resources. Sides whose
    /// endpoint resource is not scheduled in the current invocation are
    /// registered as already complete.
    pub fn register_pending_link(
        &self,
        resource_a_name: &str,
        resource_b_name: &str,
        resource_a_pending: bool,
        resource_b_pending: bool,
    ) {
        let mut inner = self.inner.lock();
        let link_name = logical_link_name(resource_a_name, resource_b_name);
        if inner.pending_links.contains_key(&link_name) {
            return;
        }
        inner.pending_links.insert(
            link_name.clone(),
            LinkPendingCompletion {
                resource_a_name: resource_a_name.to_string(),
                resource_b_name: resource_b_name.to_string(),
                resource_a_pending,
                resource_b_pending,
                link_pending: true,
            },
        );
        for resource_name in [resource_a_name, resource_b_name] {
            let links = inner
                .resource_name_pending_link_map
                .entry(resource_name.to_string())
                .or_default();
            if !links.contains(&link_name) {
                links.push(link_name.clone());
            }
        }
    }

    /// Marks the resource complete on every pending link it participates
    /// in, returning the links whose both endpoints are now complete and
    /// whose own update is still pending. Each link is returned exactly
    /// once across the whole invocation.
    pub fn resource_completed(&self, resource_name: &str) -> Vec<LinkPendingCompletion> {
        let mut inner = self.inner.lock();
        let link_names = inner
            .resource_name_pending_link_map
            .get(resource_name)
            .cloned()
            .unwrap_or_default();

        let mut ready = Vec::new();
        for link_name in link_names {
            if let Some(completion) = inner.pending_links.get_mut(&link_name) {
                if completion.resource_a_name == resource_name {
                    completion.resource_a_pending = false;
                } else if completion.resource_b_name == resource_name {
                    completion.resource_b_pending = false;
                }
                if completion.endpoints_complete() && completion.link_pending {
                    ready.push(completion.clone());
                }
            }
        }
        ready
    }

    /// Clears the pending flag once the link's own update has completed.
    pub fn mark_link_no_longer_pending(&self, link_name: &str) {
        if let Some(pending) = self.inner.lock().pending_links.get_mut(link_name) {
            pending.link_pending = false;
        }
    }

    pub fn record_previous_resource_state(
        &self,
        resource_name: &str,
        state: Option<ResourceState>,
    ) {
        self.inner
            .lock()
            .previous_resource_state
            .insert(resource_name.to_string(), state);
    }

    pub fn record_previous_child_state(&self, child_name: &str, state: Option<InstanceState>) {
        self.inner
            .lock()
            .previous_child_state
            .insert(child_name.to_string(), state);
    }

    pub fn record_previous_link_state(&self, link_name: &str, state: Option<LinkState>) {
        self.inner
            .lock()
            .previous_link_state
            .insert(link_name.to_string(), state);
    }

    /// The previous-state snapshots captured so far, for deriving an
    /// inverse diff after a failure.
    pub fn rollback_snapshot(&self) -> RollbackSnapshot {
        let inner = self.inner.lock();
        RollbackSnapshot {
            resources: inner.previous_resource_state.clone(),
            children: inner.previous_child_state.clone(),
            links: inner.previous_link_state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_becomes_ready_exactly_once_regardless_of_completion_order() {
        let state = DeploymentState::new();
        state.register_pending_link("ordersTable", "ordersStream", true, true);

        assert!(state.resource_completed("ordersTable").is_empty());
        let ready = state.resource_completed("ordersStream");
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].link_name(), "ordersTable::ordersStream");

        // Completing either endpoint again yields nothing new once the
        // link's own update finished.
        state.mark_link_no_longer_pending("ordersTable::ordersStream");
        assert!(state.resource_completed("ordersTable").is_empty());
        assert!(state.resource_completed("ordersStream").is_empty());
    }

    #[test]
    fn unscheduled_endpoint_counts_as_complete() {
        let state = DeploymentState::new();
        state.register_pending_link("ordersTable", "ordersStream", false, true);

        let ready = state.resource_completed("ordersStream");
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn previous_state_snapshots_distinguish_never_deployed() {
        let state = DeploymentState::new();
        state.record_previous_resource_state("ordersTable", None);
        state.record_previous_resource_state(
            "ordersStream",
            Some(ResourceState {
                resource_id: "res-2".to_string(),
                resource_name: "ordersStream".to_string(),
                ..Default::default()
            }),
        );

        let snapshot = state.rollback_snapshot();
        assert!(snapshot.resources.get("ordersTable").unwrap().is_none());
        assert!(snapshot.resources.get("ordersStream").unwrap().is_some());
    }

    #[test]
    fn prepare_duration_round_trips() {
        let state = DeploymentState::new();
        assert!(state.prepare_duration().is_none());
        state.set_prepare_duration(Duration::from_millis(42));
        assert_eq!(state.prepare_duration(), Some(Duration::from_millis(42)));
    }
}
