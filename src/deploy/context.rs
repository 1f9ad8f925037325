// ABOUTME: Inputs and shared context for deploy and destroy invocations.
// ABOUTME: Context clones share channels, ephemeral state and the snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::graph::{ChainGraph, NodeId, ReferenceIndex};
use crate::state::InstanceState;
use crate::types::BlueprintChanges;

use super::cancel::CancelSignal;
use super::channels::DeployChannels;
use super::state::DeploymentState;

/// Parameters for one blueprint operation, including context variables
/// propagated from parent blueprints.
#[derive(Clone, Debug, Default)]
pub struct BlueprintParams {
    pub context: HashMap<String, String>,
}

impl BlueprintParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context_var(&self, name: &str) -> Option<&String> {
        self.context.get(name)
    }

    /// The instance tree path for the given instance, extending the parent
    /// path when one is present in the context.
    pub fn instance_tree_path(&self, instance_id: &str) -> String {
        match self.context_var("instanceTreePath") {
            Some(parent) if !parent.is_empty() => format!("{parent}/{instance_id}"),
            _ => instance_id.to_string(),
        }
    }
}

/// The prepared element graph of a blueprint, supplied by the loader.
pub struct BlueprintGraph {
    pub graph: ChainGraph,
    /// Roots of the independent chains in the graph.
    pub roots: Vec<NodeId>,
    pub refs: ReferenceIndex,
    /// Logical names of the child blueprints included in the blueprint.
    pub children: Vec<String>,
}

/// Input for a deploy invocation.
pub struct DeployInput {
    pub instance_id: String,
    /// The diff to execute. `None` or an empty diff is a hard failure:
    /// it indicates an upstream contract violation, not a no-op.
    pub changes: Option<BlueprintChanges>,
    pub blueprint: BlueprintGraph,
    /// True when this invocation re-drives the inverse diff of a failed
    /// destroy; statuses are reported as rollback variants.
    pub rollback: bool,
    pub params: BlueprintParams,
}

/// Input for a destroy invocation.
pub struct DestroyInput {
    pub instance_id: String,
    pub changes: Option<BlueprintChanges>,
    /// True when this invocation re-drives the inverse diff of a failed
    /// deploy.
    pub rollback: bool,
    pub params: BlueprintParams,
}

/// Shared context for the element deployers of one invocation.
#[derive(Clone)]
pub(crate) struct DeployContext {
    pub start_time: Instant,
    pub rollback: bool,
    pub destroying: bool,
    pub state: Arc<DeploymentState>,
    pub channels: DeployChannels,
    /// Snapshot of the instance state taken before any element was
    /// touched.
    pub instance_snapshot: Arc<InstanceState>,
    pub params: Arc<BlueprintParams>,
    pub current_group: usize,
    pub cancel: CancelSignal,
}

impl DeployContext {
    pub(crate) fn with_channels(&self, channels: DeployChannels) -> Self {
        DeployContext {
            channels,
            ..self.clone()
        }
    }

    pub(crate) fn with_group(&self, group: usize) -> Self {
        DeployContext {
            current_group: group,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_tree_path_extends_the_parent_path() {
        let mut params = BlueprintParams::new();
        assert_eq!(params.instance_tree_path("inst-1"), "inst-1");

        params
            .context
            .insert("instanceTreePath".to_string(), "root/parent".to_string());
        assert_eq!(params.instance_tree_path("inst-1"), "root/parent/inst-1");
    }
}
