// ABOUTME: End-to-end destruction flow tests with scripted providers.
// ABOUTME: Covers removal ordering, preconditions, cancellation and cleanup.

mod support;

use std::sync::Arc;
use std::time::Duration;

use support::{
    BlockingResourceProvider, NoopChildHandler, RecordingLink, ScriptedResourceProvider,
    resource_state, seeded_state_container,
};
use trellis::config::EngineConfig;
use trellis::deploy::{
    BlueprintGraph, BlueprintParams, CancelSignal, DeployChannels, DeployInput, DestroyInput,
    Orchestrator, cancellation, instance_removal_changes,
};
use trellis::error::EngineErrorKind;
use trellis::graph::{ChainGraph, ReferenceIndex};
use trellis::provider::ProviderRegistry;
use trellis::state::{LinkState, StateContainer};
use trellis::types::{BlueprintChanges, InstanceStatus, ResourceChanges};

const INSTANCE_ID: &str = "inst-1";

fn seeded_link() -> LinkState {
    LinkState {
        link_id: "link-1".to_string(),
        link_name: "vpc::subnet".to_string(),
        instance_id: INSTANCE_ID.to_string(),
        ..Default::default()
    }
}

fn vpc_and_dependent_subnet() -> Vec<trellis::state::ResourceState> {
    let vpc = resource_state("res-vpc", "vpc", "aws/ec2/vpc");
    let mut subnet = resource_state("res-subnet", "subnet", "aws/ec2/subnet");
    subnet.depends_on_resources = vec!["res-vpc".to_string()];
    vec![vpc, subnet]
}

#[tokio::test]
async fn destroy_removes_elements_in_reverse_dependency_order() {
    support::init_tracing();
    let container = seeded_state_container(
        INSTANCE_ID,
        vpc_and_dependent_subnet(),
        vec![seeded_link()],
    )
    .await;
    let provider = Arc::new(ScriptedResourceProvider::new());
    let link = RecordingLink::hard("aws/ec2/vpc");

    let mut registry = ProviderRegistry::new();
    registry.register_resource_provider("aws", provider.clone());
    registry.register_link("aws/ec2/vpc", "aws/ec2/subnet", link.clone());

    let orchestrator = Orchestrator::new(
        container.clone(),
        registry,
        Arc::new(NoopChildHandler),
        EngineConfig::default(),
    );
    let (channels, mut events) = DeployChannels::create();

    let instance = container.get_instance(INSTANCE_ID).await.unwrap();
    orchestrator
        .destroy(
            DestroyInput {
                instance_id: INSTANCE_ID.to_string(),
                changes: Some(instance_removal_changes(&instance)),
                rollback: false,
                params: BlueprintParams::new(),
            },
            channels,
            CancelSignal::never(),
        )
        .await;

    let finished = events.finished.recv().await.expect("finish message");
    assert_eq!(finished.status, InstanceStatus::Destroyed, "{finished:?}");

    // The dependent subnet is destroyed before the VPC it depends on.
    assert_eq!(provider.calls(), vec!["destroy:subnet", "destroy:vpc"]);
    // The link detached through all three phases.
    assert_eq!(link.phases(), vec!["resourceA", "resourceB", "intermediaries"]);

    // Destroy removes the blueprint instance record itself.
    let err = container.get_instance(INSTANCE_ID).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn live_dependent_blocks_removal_before_any_destructive_action() {
    let container =
        seeded_state_container(INSTANCE_ID, vpc_and_dependent_subnet(), vec![]).await;
    let provider = Arc::new(ScriptedResourceProvider::new());

    let mut registry = ProviderRegistry::new();
    registry.register_resource_provider("aws", provider.clone());

    let orchestrator = Orchestrator::new(
        container.clone(),
        registry,
        Arc::new(NoopChildHandler),
        EngineConfig::default(),
    );
    let (channels, mut events) = DeployChannels::create();

    // The diff removes the VPC while the subnet stays (changed, not
    // recreated) and still depends on it.
    let mut graph = ChainGraph::new();
    let subnet = graph.add_resource("subnet", "aws/ec2/subnet");
    let blueprint = BlueprintGraph {
        roots: vec![subnet],
        graph,
        refs: ReferenceIndex::new(),
        children: Vec::new(),
    };
    let mut changes = BlueprintChanges {
        removed_resources: vec!["vpc".to_string()],
        ..Default::default()
    };
    changes
        .resource_changes
        .insert("subnet".to_string(), ResourceChanges::default());

    orchestrator
        .deploy(
            DeployInput {
                instance_id: INSTANCE_ID.to_string(),
                changes: Some(changes),
                blueprint,
                rollback: false,
                params: BlueprintParams::new(),
            },
            channels,
            CancelSignal::never(),
        )
        .await;

    let finished = events.finished.recv().await.expect("finish message");
    assert_eq!(finished.status, InstanceStatus::DeployFailed);
    assert!(
        finished.failure_reasons[0].contains("still has dependents"),
        "got: {:?}",
        finished.failure_reasons
    );

    // No destructive action was taken; the state container is untouched.
    assert!(provider.calls().is_empty());
    let instance = container.get_instance(INSTANCE_ID).await.unwrap();
    assert!(instance.resource_by_name("vpc").is_some());
}

#[tokio::test]
async fn empty_destroy_diff_is_a_hard_failure() {
    let container = seeded_state_container(INSTANCE_ID, vec![], vec![]).await;
    let orchestrator = Orchestrator::new(
        container,
        ProviderRegistry::new(),
        Arc::new(NoopChildHandler),
        EngineConfig::default(),
    );
    let (channels, mut events) = DeployChannels::create();

    orchestrator
        .destroy(
            DestroyInput {
                instance_id: INSTANCE_ID.to_string(),
                changes: None,
                rollback: false,
                params: BlueprintParams::new(),
            },
            channels,
            CancelSignal::never(),
        )
        .await;

    let finished = events.finished.recv().await.expect("finish message");
    assert_eq!(finished.status, InstanceStatus::DestroyFailed);
    assert!(
        finished.failure_reasons[0].contains("empty set of changes"),
        "got: {:?}",
        finished.failure_reasons
    );
}

#[tokio::test]
async fn cancellation_at_the_barrier_aborts_the_operation() {
    let container = seeded_state_container(
        INSTANCE_ID,
        vec![resource_state("res-vpc", "vpc", "aws/ec2/vpc")],
        vec![],
    )
    .await;
    let mut registry = ProviderRegistry::new();
    registry.register_resource_provider("aws", Arc::new(BlockingResourceProvider));

    let orchestrator = Orchestrator::new(
        container,
        registry,
        Arc::new(NoopChildHandler),
        EngineConfig::default(),
    );
    let (channels, mut events) = DeployChannels::create();
    let (handle, signal) = cancellation();

    let destroy = orchestrator.destroy(
        DestroyInput {
            instance_id: INSTANCE_ID.to_string(),
            changes: Some(BlueprintChanges {
                removed_resources: vec!["vpc".to_string()],
                ..Default::default()
            }),
            rollback: false,
            params: BlueprintParams::new(),
        },
        channels,
        signal,
    );
    let cancel_soon = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    };
    tokio::join!(destroy, cancel_soon);

    let err = events.errors.recv().await.expect("cancellation error");
    assert_eq!(err.kind(), EngineErrorKind::Cancelled);
    assert!(events.finished.try_recv().is_err(), "no finish after abort");
}

#[tokio::test]
async fn exceeding_max_blueprint_depth_fails_before_touching_state() {
    let container = seeded_state_container(INSTANCE_ID, vec![], vec![]).await;
    let orchestrator = Orchestrator::new(
        container,
        ProviderRegistry::new(),
        Arc::new(NoopChildHandler),
        EngineConfig {
            max_blueprint_depth: 2,
            ..Default::default()
        },
    );
    let (channels, mut events) = DeployChannels::create();

    let mut params = BlueprintParams::new();
    params.context.insert(
        "instanceTreePath".to_string(),
        "root/child-a/child-b".to_string(),
    );

    orchestrator
        .destroy(
            DestroyInput {
                instance_id: INSTANCE_ID.to_string(),
                changes: Some(BlueprintChanges {
                    removed_resources: vec!["vpc".to_string()],
                    ..Default::default()
                }),
                rollback: false,
                params,
            },
            channels,
            CancelSignal::never(),
        )
        .await;

    let finished = events.finished.recv().await.expect("finish message");
    assert_eq!(finished.status, InstanceStatus::DestroyFailed);
    assert!(
        finished.failure_reasons[0].contains("max blueprint depth"),
        "got: {:?}",
        finished.failure_reasons
    );
}
