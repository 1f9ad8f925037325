// ABOUTME: Shared mocks and fixtures for the integration test suites.
// ABOUTME: Scripted providers, a recording link implementation and state setup.

// Each test binary only uses some of these helpers, so allow dead_code.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use trellis::provider::{
    ChildBlueprintHandler, ChildDeployInput, ChildDestroyInput, LinkImplementation, LinkKind,
    LinkUpdateIntermediaryResourcesInput, LinkUpdateIntermediaryResourcesOutput,
    LinkUpdateResourceInput, LinkUpdateResourceOutput, ProviderError, ResourceDeployInput,
    ResourceDeployOutput, ResourceDestroyInput, ResourceProvider,
};
use trellis::state::{InstanceState, LinkState, MemoryStateContainer, ResourceState, StateContainer};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("trellis=debug".parse().expect("valid directive"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

/// How a scripted provider behaves for one element.
#[derive(Clone, Debug)]
pub enum Script {
    Succeed,
    /// Fail with a retryable error this many times, then succeed.
    RetryableTimes(u32),
    /// Always fail with a retryable error.
    AlwaysRetryable,
    Terminal(Vec<String>),
    Fatal(String),
}

#[derive(Default)]
struct ProviderState {
    scripts: HashMap<String, Script>,
    attempts: HashMap<String, u32>,
    calls: Vec<String>,
}

/// Resource provider with per-resource scripted outcomes and a call log.
#[derive(Default)]
pub struct ScriptedResourceProvider {
    state: Mutex<ProviderState>,
}

impl ScriptedResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, resource_name: &str, script: Script) {
        self.state
            .lock()
            .scripts
            .insert(resource_name.to_string(), script);
    }

    /// Operations performed, in order, as `"deploy:{name}"` /
    /// `"destroy:{name}"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn attempts(&self, resource_name: &str) -> u32 {
        self.state
            .lock()
            .attempts
            .get(resource_name)
            .copied()
            .unwrap_or(0)
    }

    fn run(&self, operation: &str, resource_name: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.calls.push(format!("{operation}:{resource_name}"));
        let attempt = state
            .attempts
            .entry(resource_name.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
        let attempt = *attempt;
        match state.scripts.get(resource_name).cloned() {
            None | Some(Script::Succeed) => Ok(()),
            Some(Script::RetryableTimes(times)) => {
                if attempt <= times {
                    Err(ProviderError::retryable("transient failure"))
                } else {
                    Ok(())
                }
            }
            Some(Script::AlwaysRetryable) => Err(ProviderError::retryable("transient failure")),
            Some(Script::Terminal(reasons)) => Err(ProviderError::terminal(reasons)),
            Some(Script::Fatal(message)) => Err(ProviderError::fatal(message)),
        }
    }
}

#[async_trait]
impl ResourceProvider for ScriptedResourceProvider {
    async fn deploy(
        &self,
        input: &ResourceDeployInput,
    ) -> Result<ResourceDeployOutput, ProviderError> {
        self.run("deploy", &input.resource_name)?;
        Ok(ResourceDeployOutput {
            spec_state: Some(json!({"name": input.resource_name})),
        })
    }

    async fn destroy(&self, input: &ResourceDestroyInput) -> Result<(), ProviderError> {
        self.run("destroy", &input.resource_name)
    }
}

/// Resource provider whose operations block until cancelled, for
/// cancellation tests.
pub struct BlockingResourceProvider;

#[async_trait]
impl ResourceProvider for BlockingResourceProvider {
    async fn deploy(
        &self,
        _input: &ResourceDeployInput,
    ) -> Result<ResourceDeployOutput, ProviderError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(ResourceDeployOutput::default())
    }

    async fn destroy(&self, _input: &ResourceDestroyInput) -> Result<(), ProviderError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[derive(Default)]
struct LinkCalls {
    phases: Vec<String>,
}

/// Link implementation recording the phases invoked on it, with optional
/// scripted failures per phase.
pub struct RecordingLink {
    kind: LinkKind,
    priority: Option<String>,
    calls: Mutex<LinkCalls>,
    resource_b_failures: Mutex<Option<Script>>,
    resource_b_attempts: Mutex<u32>,
}

impl RecordingLink {
    pub fn hard(priority_resource_type: &str) -> Arc<Self> {
        Arc::new(RecordingLink {
            kind: LinkKind::Hard,
            priority: Some(priority_resource_type.to_string()),
            calls: Mutex::default(),
            resource_b_failures: Mutex::new(None),
            resource_b_attempts: Mutex::new(0),
        })
    }

    pub fn soft() -> Arc<Self> {
        Arc::new(RecordingLink {
            kind: LinkKind::Soft,
            priority: None,
            calls: Mutex::default(),
            resource_b_failures: Mutex::new(None),
            resource_b_attempts: Mutex::new(0),
        })
    }

    /// Scripts a failure for the resource B phase of the link.
    pub fn fail_resource_b(&self, script: Script) {
        *self.resource_b_failures.lock() = Some(script);
    }

    pub fn phases(&self) -> Vec<String> {
        self.calls.lock().phases.clone()
    }
}

#[async_trait]
impl LinkImplementation for RecordingLink {
    fn kind(&self) -> LinkKind {
        self.kind
    }

    fn priority_resource_type(&self) -> Option<&str> {
        self.priority.as_deref()
    }

    async fn update_resource_a(
        &self,
        _input: &LinkUpdateResourceInput,
    ) -> Result<LinkUpdateResourceOutput, ProviderError> {
        self.calls.lock().phases.push("resourceA".to_string());
        Ok(LinkUpdateResourceOutput {
            link_data: Some(json!({"resourceA": true})),
        })
    }

    async fn update_resource_b(
        &self,
        _input: &LinkUpdateResourceInput,
    ) -> Result<LinkUpdateResourceOutput, ProviderError> {
        self.calls.lock().phases.push("resourceB".to_string());
        let attempt = {
            let mut attempts = self.resource_b_attempts.lock();
            *attempts += 1;
            *attempts
        };
        match self.resource_b_failures.lock().clone() {
            Some(Script::Terminal(reasons)) => Err(ProviderError::terminal(reasons)),
            Some(Script::AlwaysRetryable) => Err(ProviderError::retryable("transient")),
            Some(Script::RetryableTimes(times)) if attempt <= times => {
                Err(ProviderError::retryable("transient"))
            }
            _ => Ok(LinkUpdateResourceOutput {
                link_data: Some(json!({"resourceB": true})),
            }),
        }
    }

    async fn update_intermediary_resources(
        &self,
        _input: &LinkUpdateIntermediaryResourcesInput,
    ) -> Result<LinkUpdateIntermediaryResourcesOutput, ProviderError> {
        self.calls.lock().phases.push("intermediaries".to_string());
        Ok(LinkUpdateIntermediaryResourcesOutput {
            link_data: Some(json!({"intermediaries": true})),
            intermediary_resource_states: Vec::new(),
        })
    }
}

/// Child handler that always succeeds.
pub struct NoopChildHandler;

#[async_trait]
impl ChildBlueprintHandler for NoopChildHandler {
    async fn deploy(&self, _input: &ChildDeployInput) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn destroy(&self, _input: &ChildDestroyInput) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Builds a resource state record with sensible defaults.
pub fn resource_state(id: &str, name: &str, resource_type: &str) -> ResourceState {
    ResourceState {
        resource_id: id.to_string(),
        resource_name: name.to_string(),
        resource_type: resource_type.to_string(),
        ..Default::default()
    }
}

/// Saves an instance with the given resources and links to a fresh
/// in-memory state container.
pub async fn seeded_state_container(
    instance_id: &str,
    resources: Vec<ResourceState>,
    links: Vec<LinkState>,
) -> Arc<MemoryStateContainer> {
    let container = Arc::new(MemoryStateContainer::new());
    let mut instance = InstanceState {
        instance_id: instance_id.to_string(),
        ..Default::default()
    };
    for resource in resources {
        instance
            .resource_ids
            .insert(resource.resource_name.clone(), resource.resource_id.clone());
        instance
            .resources
            .insert(resource.resource_id.clone(), resource);
    }
    for link in links {
        instance.links.insert(link.link_name.clone(), link);
    }
    container
        .save_instance(instance)
        .await
        .expect("seed instance");
    container
}
