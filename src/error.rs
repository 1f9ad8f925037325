// ABOUTME: Top-level engine error surfaced on the deployment error channel.
// ABOUTME: Uses SNAFU with an error kind accessor for programmatic handling.

use snafu::Snafu;

use crate::graph::OrderingError;
use crate::state::StateError;

/// Errors that abort a deploy or destroy operation outside the structured
/// status-message protocol.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("no link implementation registered between {resource_a} and {resource_b}"))]
    MissingLinkImplementation {
        resource_a: String,
        resource_b: String,
    },

    #[snafu(display("no provider registered for resource type {resource_type}"))]
    MissingResourceProvider { resource_type: String },

    #[snafu(display("link {link_name} was not found in state for instance {instance_id}"))]
    LinkNotFoundInState {
        link_name: String,
        instance_id: String,
    },

    #[snafu(display("resource {resource_name} was not found in state for instance {instance_id}"))]
    ResourceNotFoundInState {
        resource_name: String,
        instance_id: String,
    },

    #[snafu(display("{link_name} is not a valid logical link name"))]
    InvalidLinkName { link_name: String },

    #[snafu(display(
        "max blueprint depth of {max_depth} exceeded for instance tree path {tree_path}"
    ))]
    MaxDepthExceeded { tree_path: String, max_depth: usize },

    #[snafu(display(
        "{element_name} can not be removed because it still has dependents: {}",
        dependents.join(", ")
    ))]
    ElementHasDependents {
        element_name: String,
        dependents: Vec<String>,
    },

    #[snafu(display("the operation was cancelled"))]
    Cancelled,

    #[snafu(display("state container error: {source}"))]
    State { source: StateError },

    #[snafu(display("provider returned an unwrapped error: {message}"))]
    FatalProvider { message: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The link graph was built incorrectly upstream.
    InconsistentGraph,
    /// A provider or link implementation is missing from the registry.
    MissingProvider,
    /// An element the operation relies on is absent from persisted state.
    NotFoundInState,
    /// The supplied input violates a structural invariant.
    InvalidInput,
    /// A precondition failed before any destructive action was taken.
    PreconditionFailed,
    /// The operation observed a cancellation signal.
    Cancelled,
    /// The state container failed.
    State,
    /// A provider broke its error contract.
    FatalProvider,
}

impl EngineError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> EngineErrorKind {
        match self {
            EngineError::MissingLinkImplementation { .. } => EngineErrorKind::InconsistentGraph,
            EngineError::MissingResourceProvider { .. } => EngineErrorKind::MissingProvider,
            EngineError::LinkNotFoundInState { .. } | EngineError::ResourceNotFoundInState { .. } => {
                EngineErrorKind::NotFoundInState
            }
            EngineError::InvalidLinkName { .. } => EngineErrorKind::InvalidInput,
            EngineError::MaxDepthExceeded { .. } | EngineError::ElementHasDependents { .. } => {
                EngineErrorKind::PreconditionFailed
            }
            EngineError::Cancelled => EngineErrorKind::Cancelled,
            EngineError::State { .. } => EngineErrorKind::State,
            EngineError::FatalProvider { .. } => EngineErrorKind::FatalProvider,
        }
    }
}

impl From<StateError> for EngineError {
    fn from(source: StateError) -> Self {
        EngineError::State { source }
    }
}

impl From<OrderingError> for EngineError {
    fn from(err: OrderingError) -> Self {
        match err {
            OrderingError::MissingLinkImplementation {
                resource_a,
                resource_b,
            } => EngineError::MissingLinkImplementation {
                resource_a,
                resource_b,
            },
        }
    }
}
