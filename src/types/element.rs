// ABOUTME: Element identity types for resources, links and child blueprints.
// ABOUTME: A closed union used for dispatch during removal and deployment.

use serde::{Deserialize, Serialize};

/// Identity of a resource within a blueprint instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdInfo {
    pub resource_id: String,
    pub resource_name: String,
}

/// Identity of a child blueprint within a parent instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildBlueprintIdInfo {
    pub child_instance_id: String,
    pub child_name: String,
}

/// Identity of a link between two resources.
/// The logical name is `"{resourceA}::{resourceB}"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkIdInfo {
    pub link_id: String,
    pub link_name: String,
}

/// The kind of a blueprint element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    Resource,
    Child,
    Link,
}

/// A blueprint element scheduled for deployment or removal.
///
/// The kind set is fixed, so dispatch is a closed enum with exhaustive
/// matches rather than open-ended trait objects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Element {
    Resource(ResourceIdInfo),
    Child(ChildBlueprintIdInfo),
    Link(LinkIdInfo),
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Resource(_) => ElementKind::Resource,
            Element::Child(_) => ElementKind::Child,
            Element::Link(_) => ElementKind::Link,
        }
    }

    /// The globally unique ID of the element.
    pub fn id(&self) -> &str {
        match self {
            Element::Resource(info) => &info.resource_id,
            Element::Child(info) => &info.child_instance_id,
            Element::Link(info) => &info.link_id,
        }
    }

    /// The logical name of the element as defined in the source blueprint.
    pub fn logical_name(&self) -> &str {
        match self {
            Element::Resource(info) => &info.resource_name,
            Element::Child(info) => &info.child_name,
            Element::Link(info) => &info.link_name,
        }
    }

    /// The logical name prefixed with the element namespace, unique across
    /// kinds within one blueprint.
    pub fn namespaced_logical_name(&self) -> String {
        match self {
            Element::Resource(info) => format!("resources.{}", info.resource_name),
            Element::Child(info) => format!("children.{}", info.child_name),
            Element::Link(info) => format!("links.{}", info.link_name),
        }
    }
}

/// A set of elements collected during staging or removal planning.
///
/// The total is a running count used as a fast non-empty check; the set
/// only ever grows during a single pass.
#[derive(Clone, Debug, Default)]
pub struct CollectedElements {
    pub resources: Vec<ResourceIdInfo>,
    pub children: Vec<ChildBlueprintIdInfo>,
    pub links: Vec<LinkIdInfo>,
    pub total: usize,
}

impl CollectedElements {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn has_resource(&self, resource_name: &str) -> bool {
        self.resources
            .iter()
            .any(|info| info.resource_name == resource_name)
    }

    pub fn has_child(&self, child_name: &str) -> bool {
        self.children
            .iter()
            .any(|info| info.child_name == child_name)
    }

    /// Logical names of every collected element, for failure messages.
    pub fn element_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.total);
        names.extend(self.resources.iter().map(|r| r.resource_name.clone()));
        names.extend(self.children.iter().map(|c| c.child_name.clone()));
        names.extend(self.links.iter().map(|l| l.link_name.clone()));
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_accessors_match_kind() {
        let element = Element::Resource(ResourceIdInfo {
            resource_id: "res-1".to_string(),
            resource_name: "ordersTable".to_string(),
        });
        assert_eq!(element.kind(), ElementKind::Resource);
        assert_eq!(element.id(), "res-1");
        assert_eq!(element.logical_name(), "ordersTable");
        assert_eq!(element.namespaced_logical_name(), "resources.ordersTable");
    }

    #[test]
    fn collected_elements_fast_empty_check() {
        let mut collected = CollectedElements::default();
        assert!(collected.is_empty());

        collected.resources.push(ResourceIdInfo {
            resource_id: "res-1".to_string(),
            resource_name: "ordersTable".to_string(),
        });
        collected.total += 1;
        assert!(!collected.is_empty());
        assert!(collected.has_resource("ordersTable"));
        assert!(!collected.has_child("ordersTable"));
    }
}
