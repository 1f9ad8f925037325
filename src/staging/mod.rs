// ABOUTME: Change-staging state tracking for the diff phase.
// ABOUTME: Shares the pending-link barrier concept with the deployment engine.

mod pending;
mod tracker;

pub use pending::{LinkPendingCompletion, link_endpoints, logical_link_name};
pub use tracker::{
    ChangeStagingState, ChildChangesMessage, ExportChangesUpdate, LinkChangesMessage,
    ResourceChangesMessage,
};
