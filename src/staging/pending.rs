// ABOUTME: Pending link completion records shared by staging and deployment.
// ABOUTME: A link is ready only when both endpoint resources have completed.

/// The logical name of the link between two resources.
pub fn logical_link_name(resource_a_name: &str, resource_b_name: &str) -> String {
    format!("{resource_a_name}::{resource_b_name}")
}

/// Splits a logical link name into its two endpoint resource names.
/// Returns `None` when the name is not of the form `"{a}::{b}"`.
pub fn link_endpoints(link_name: &str) -> Option<(&str, &str)> {
    let (resource_a, resource_b) = link_name.split_once("::")?;
    if resource_a.is_empty() || resource_b.is_empty() || resource_b.contains("::") {
        return None;
    }
    Some((resource_a, resource_b))
}

/// Ephemeral record tracking when a link is ready to be processed.
///
/// Created when either endpoint is first processed; the link leaves the
/// pending set once both endpoint resources and the link's own update have
/// completed. This holds no link state, only readiness information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkPendingCompletion {
    pub resource_a_name: String,
    pub resource_b_name: String,
    pub resource_a_pending: bool,
    pub resource_b_pending: bool,
    pub link_pending: bool,
}

impl LinkPendingCompletion {
    pub fn link_name(&self) -> String {
        logical_link_name(&self.resource_a_name, &self.resource_b_name)
    }

    /// True once both endpoint resources have completed.
    pub fn endpoints_complete(&self) -> bool {
        !self.resource_a_pending && !self.resource_b_pending
    }
}
