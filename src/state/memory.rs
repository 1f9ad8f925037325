// ABOUTME: In-memory state container for tests and embedded use.
// ABOUTME: A single coarse lock; operations are short map updates.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    InstanceState, InstanceStatusInfo, LinkState, LinkStatusInfo, ResourceState,
    ResourceStatusInfo, StateContainer, StateError,
};

/// In-memory implementation of the state container contract.
///
/// Persistent backends are out of scope for the engine; this is the
/// reference implementation used by the test suites and for embedding.
#[derive(Default)]
pub struct MemoryStateContainer {
    instances: Mutex<HashMap<String, InstanceState>>,
}

impl MemoryStateContainer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateContainer for MemoryStateContainer {
    async fn get_instance(&self, instance_id: &str) -> Result<InstanceState, StateError> {
        self.instances
            .lock()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))
    }

    async fn save_instance(&self, instance: InstanceState) -> Result<(), StateError> {
        self.instances
            .lock()
            .insert(instance.instance_id.clone(), instance);
        Ok(())
    }

    async fn remove_instance(&self, instance_id: &str) -> Result<InstanceState, StateError> {
        self.instances
            .lock()
            .remove(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))
    }

    async fn update_instance_status(
        &self,
        instance_id: &str,
        info: InstanceStatusInfo,
    ) -> Result<(), StateError> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance.status = info.status;
        if info.durations.is_some() {
            instance.durations = info.durations;
        }
        Ok(())
    }

    async fn save_resource(
        &self,
        instance_id: &str,
        resource: ResourceState,
    ) -> Result<(), StateError> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance.resource_ids.insert(
            resource.resource_name.clone(),
            resource.resource_id.clone(),
        );
        instance
            .resources
            .insert(resource.resource_id.clone(), resource);
        Ok(())
    }

    async fn update_resource_status(
        &self,
        instance_id: &str,
        resource_id: &str,
        info: ResourceStatusInfo,
    ) -> Result<(), StateError> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        let resource = instance
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| StateError::ResourceNotFound(resource_id.to_string()))?;
        resource.status = info.status;
        resource.precise_status = info.precise_status;
        resource.failure_reasons = info.failure_reasons;
        if info.durations.is_some() {
            resource.durations = info.durations;
        }
        Ok(())
    }

    async fn remove_resource(
        &self,
        instance_id: &str,
        resource_id: &str,
    ) -> Result<ResourceState, StateError> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        let resource = instance
            .resources
            .remove(resource_id)
            .ok_or_else(|| StateError::ResourceNotFound(resource_id.to_string()))?;
        instance.resource_ids.remove(&resource.resource_name);
        Ok(resource)
    }

    async fn save_link(&self, instance_id: &str, link: LinkState) -> Result<(), StateError> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        instance.links.insert(link.link_name.clone(), link);
        Ok(())
    }

    async fn update_link_status(
        &self,
        instance_id: &str,
        link_id: &str,
        info: LinkStatusInfo,
    ) -> Result<(), StateError> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        let link = instance
            .links
            .values_mut()
            .find(|link| link.link_id == link_id)
            .ok_or_else(|| StateError::LinkNotFound(link_id.to_string()))?;
        link.status = info.status;
        link.precise_status = info.precise_status;
        link.failure_reasons = info.failure_reasons;
        if info.durations.is_some() {
            link.durations = info.durations;
        }
        Ok(())
    }

    async fn remove_link(
        &self,
        instance_id: &str,
        link_id: &str,
    ) -> Result<LinkState, StateError> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(instance_id.to_string()))?;
        let link_name = instance
            .links
            .values()
            .find(|link| link.link_id == link_id)
            .map(|link| link.link_name.clone())
            .ok_or_else(|| StateError::LinkNotFound(link_id.to_string()))?;
        Ok(instance
            .links
            .remove(&link_name)
            .expect("link existed under lock"))
    }

    async fn update_child_status(
        &self,
        parent_instance_id: &str,
        child_name: &str,
        child_instance_id: &str,
        info: InstanceStatusInfo,
    ) -> Result<(), StateError> {
        let mut instances = self.instances.lock();
        let parent = instances
            .get_mut(parent_instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(parent_instance_id.to_string()))?;
        let child = parent
            .child_blueprints
            .entry(child_name.to_string())
            .or_insert_with(|| InstanceState {
                instance_id: child_instance_id.to_string(),
                ..Default::default()
            });
        child.status = info.status;
        if info.durations.is_some() {
            child.durations = info.durations;
        }
        Ok(())
    }

    async fn remove_child(
        &self,
        parent_instance_id: &str,
        child_name: &str,
    ) -> Result<InstanceState, StateError> {
        let mut instances = self.instances.lock();
        let parent = instances
            .get_mut(parent_instance_id)
            .ok_or_else(|| StateError::InstanceNotFound(parent_instance_id.to_string()))?;
        parent
            .child_dependencies
            .remove(child_name);
        parent
            .child_blueprints
            .remove(child_name)
            .ok_or_else(|| StateError::ChildNotFound(child_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceStatus, ResourceStatus};

    fn instance_with_resource() -> InstanceState {
        let mut instance = InstanceState {
            instance_id: "inst-1".to_string(),
            ..Default::default()
        };
        instance
            .resource_ids
            .insert("ordersTable".to_string(), "res-1".to_string());
        instance.resources.insert(
            "res-1".to_string(),
            ResourceState {
                resource_id: "res-1".to_string(),
                resource_name: "ordersTable".to_string(),
                resource_type: "aws/dynamodb/table".to_string(),
                ..Default::default()
            },
        );
        instance
    }

    #[tokio::test]
    async fn missing_instance_is_a_not_found_error() {
        let container = MemoryStateContainer::new();
        let err = container.get_instance("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn remove_resource_clears_the_name_index() {
        let container = MemoryStateContainer::new();
        container
            .save_instance(instance_with_resource())
            .await
            .unwrap();

        let removed = container.remove_resource("inst-1", "res-1").await.unwrap();
        assert_eq!(removed.resource_name, "ordersTable");

        let instance = container.get_instance("inst-1").await.unwrap();
        assert!(instance.resource_by_name("ordersTable").is_none());
        assert!(instance.resource_ids.is_empty());
    }

    #[tokio::test]
    async fn status_updates_are_visible_to_subsequent_reads() {
        let container = MemoryStateContainer::new();
        container
            .save_instance(instance_with_resource())
            .await
            .unwrap();

        container
            .update_resource_status(
                "inst-1",
                "res-1",
                ResourceStatusInfo {
                    status: ResourceStatus::Destroying,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        container
            .update_instance_status(
                "inst-1",
                InstanceStatusInfo {
                    status: InstanceStatus::Destroying,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let instance = container.get_instance("inst-1").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Destroying);
        assert_eq!(
            instance.resource_by_name("ordersTable").unwrap().status,
            ResourceStatus::Destroying
        );
    }

    #[tokio::test]
    async fn update_child_status_creates_the_record_when_absent() {
        let container = MemoryStateContainer::new();
        container
            .save_instance(InstanceState {
                instance_id: "inst-1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        container
            .update_child_status(
                "inst-1",
                "networking",
                "inst-2",
                InstanceStatusInfo {
                    status: InstanceStatus::Deploying,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let instance = container.get_instance("inst-1").await.unwrap();
        let child = instance.child_by_name("networking").unwrap();
        assert_eq!(child.instance_id, "inst-2");
        assert_eq!(child.status, InstanceStatus::Deploying);
    }
}
