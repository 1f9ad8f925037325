// ABOUTME: Registry resolving providers for resources and link type pairs.
// ABOUTME: Lookup is by provider namespace and symmetric resource type pair.

use std::collections::HashMap;
use std::sync::Arc;

use super::{LinkImplementation, ResourceProvider};

/// Registry of resource providers and link implementations.
///
/// Resource providers are registered per namespace (the segment before the
/// first `/` in a resource type, e.g. `aws` for `aws/dynamodb/table`);
/// link implementations per resource type pair, looked up symmetrically.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    resource_providers: HashMap<String, Arc<dyn ResourceProvider>>,
    links: HashMap<(String, String), Arc<dyn LinkImplementation>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource_provider(
        &mut self,
        namespace: impl Into<String>,
        provider: Arc<dyn ResourceProvider>,
    ) {
        self.resource_providers.insert(namespace.into(), provider);
    }

    pub fn register_link(
        &mut self,
        resource_type_a: impl Into<String>,
        resource_type_b: impl Into<String>,
        link: Arc<dyn LinkImplementation>,
    ) {
        self.links
            .insert((resource_type_a.into(), resource_type_b.into()), link);
    }

    /// Resolves the provider responsible for a resource type.
    pub fn resource_provider(&self, resource_type: &str) -> Option<Arc<dyn ResourceProvider>> {
        let namespace = resource_type.split('/').next().unwrap_or(resource_type);
        self.resource_providers.get(namespace).cloned()
    }

    /// Resolves the link implementation between two resource types.
    /// The relationship could be registered either way around.
    pub fn link(
        &self,
        resource_type_a: &str,
        resource_type_b: &str,
    ) -> Option<Arc<dyn LinkImplementation>> {
        self.links
            .get(&(resource_type_a.to_string(), resource_type_b.to_string()))
            .or_else(|| {
                self.links
                    .get(&(resource_type_b.to_string(), resource_type_a.to_string()))
            })
            .cloned()
    }
}
