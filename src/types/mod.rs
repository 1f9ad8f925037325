// ABOUTME: Core data model shared across staging, ordering and deployment.
// ABOUTME: Elements, status enums and the blueprint diff structure.

mod changes;
mod element;
mod status;

pub use changes::{
    BlueprintChanges, FieldChange, LinkChanges, NewBlueprintDefinition, ResourceChanges,
};
pub use element::{
    ChildBlueprintIdInfo, CollectedElements, Element, ElementKind, LinkIdInfo, ResourceIdInfo,
};
pub use status::{
    InstanceStatus, LinkStatus, PreciseLinkStatus, PreciseResourceStatus, ResourceStatus,
};
