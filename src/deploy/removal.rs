// ABOUTME: Collection, ordering and grouping of elements scheduled for removal.
// ABOUTME: Dependents are checked before any destructive action is taken.

use crate::error::EngineError;
use crate::graph::DeploymentNode;
use crate::staging::link_endpoints;
use crate::state::InstanceState;
use crate::types::{
    BlueprintChanges, ChildBlueprintIdInfo, CollectedElements, Element, ElementKind, LinkIdInfo,
    ResourceIdInfo,
};

/// Derives the diff that removes every element of a stored instance,
/// recursively for child blueprints. Used by callers to destroy an
/// instance wholesale.
pub fn instance_removal_changes(instance: &InstanceState) -> BlueprintChanges {
    let mut changes = BlueprintChanges {
        removed_resources: instance
            .resources
            .values()
            .map(|resource| resource.resource_name.clone())
            .collect(),
        removed_links: instance.links.keys().cloned().collect(),
        removed_exports: instance.exports.keys().cloned().collect(),
        ..Default::default()
    };
    for (child_name, child) in &instance.child_blueprints {
        changes.removed_children.push(child_name.clone());
        changes
            .child_changes
            .insert(child_name.clone(), instance_removal_changes(child));
    }
    changes
}

/// Collects the elements the diff schedules for removal, enforcing the
/// removal precondition: an element is legal to remove only once it has no
/// dependents among elements scheduled to remain. Dependents already
/// marked for recreation are exempt, since they will no longer depend on
/// the removed element after recreation.
pub(crate) fn collect_elements_to_remove(
    changes: &BlueprintChanges,
    snapshot: &InstanceState,
    nodes_to_deploy: &[DeploymentNode],
) -> Result<CollectedElements, EngineError> {
    let mut collected = CollectedElements::default();
    if changes.removed_resources.is_empty()
        && changes.removed_children.is_empty()
        && changes.recreate_children.is_empty()
        && changes.removed_links.is_empty()
    {
        return Ok(collected);
    }

    for link_name in &changes.removed_links {
        if let Some(link_state) = snapshot.link_by_name(link_name) {
            collected.links.push(LinkIdInfo {
                link_id: link_state.link_id.clone(),
                link_name: link_name.clone(),
            });
            collected.total += 1;
        }
    }

    for resource_name in &changes.removed_resources {
        let Some(resource_state) = snapshot.resource_by_name(resource_name) else {
            continue;
        };
        let element = Element::Resource(ResourceIdInfo {
            resource_id: resource_state.resource_id.clone(),
            resource_name: resource_name.clone(),
        });
        // Direct dependents suffice: a transitive dependent implies a
        // direct one, and the first live direct dependent already stops
        // the phase.
        let dependents =
            filter_out_recreated(&find_dependents(&element, nodes_to_deploy, snapshot), changes);
        if !dependents.is_empty() {
            return Err(EngineError::ElementHasDependents {
                element_name: resource_name.clone(),
                dependents: dependents.element_names(),
            });
        }
        collected.resources.push(ResourceIdInfo {
            resource_id: resource_state.resource_id.clone(),
            resource_name: resource_name.clone(),
        });
        collected.total += 1;
    }

    // Children marked for recreation are removed in addition to those
    // removed from the source blueprint.
    let combined_children = changes
        .removed_children
        .iter()
        .chain(changes.recreate_children.iter());
    for child_name in combined_children {
        let Some(child_state) = snapshot.child_by_name(child_name) else {
            continue;
        };
        let element = Element::Child(ChildBlueprintIdInfo {
            child_instance_id: child_state.instance_id.clone(),
            child_name: child_name.clone(),
        });
        let dependents =
            filter_out_recreated(&find_dependents(&element, nodes_to_deploy, snapshot), changes);
        if !dependents.is_empty() {
            return Err(EngineError::ElementHasDependents {
                element_name: child_name.clone(),
                dependents: dependents.element_names(),
            });
        }
        collected.children.push(ChildBlueprintIdInfo {
            child_instance_id: child_state.instance_id.clone(),
            child_name: child_name.clone(),
        });
        collected.total += 1;
    }

    Ok(collected)
}

/// Finds direct dependents of an element among the elements scheduled for
/// deployment, using the dependency information persisted in the instance
/// state.
pub(crate) fn find_dependents(
    dependee: &Element,
    nodes_to_deploy: &[DeploymentNode],
    snapshot: &InstanceState,
) -> CollectedElements {
    let mut dependents = CollectedElements::default();

    for node in nodes_to_deploy {
        match node {
            DeploymentNode::Resource { name, .. } => {
                let Some(resource_state) = snapshot.resource_by_name(name) else {
                    continue;
                };
                let dependencies = match dependee.kind() {
                    ElementKind::Resource => &resource_state.depends_on_resources,
                    ElementKind::Child => &resource_state.depends_on_children,
                    ElementKind::Link => continue,
                };
                if dependencies.iter().any(|id| id == dependee.id()) {
                    dependents.resources.push(ResourceIdInfo {
                        resource_id: resource_state.resource_id.clone(),
                        resource_name: name.clone(),
                    });
                    dependents.total += 1;
                }
            }
            DeploymentNode::Child { name } => {
                let Some(child_state) = snapshot.child_by_name(name) else {
                    continue;
                };
                let Some(child_dependencies) = snapshot.child_dependencies.get(name) else {
                    continue;
                };
                let dependencies = match dependee.kind() {
                    ElementKind::Resource => &child_dependencies.depends_on_resources,
                    ElementKind::Child => &child_dependencies.depends_on_children,
                    ElementKind::Link => continue,
                };
                if dependencies.iter().any(|id| id == dependee.id()) {
                    dependents.children.push(ChildBlueprintIdInfo {
                        child_instance_id: child_state.instance_id.clone(),
                        child_name: name.clone(),
                    });
                    dependents.total += 1;
                }
            }
        }
    }

    dependents
}

/// Drops dependents that are scheduled to be recreated: they will no
/// longer depend on the removed element once recreated.
pub(crate) fn filter_out_recreated(
    found: &CollectedElements,
    changes: &BlueprintChanges,
) -> CollectedElements {
    let mut filtered = CollectedElements::default();

    for resource in &found.resources {
        if let Some(planned) = changes.resource_changes.get(&resource.resource_name)
            && !planned.must_recreate
        {
            filtered.resources.push(resource.clone());
            filtered.total += 1;
        }
    }

    for child in &found.children {
        if !changes.recreate_children.contains(&child.child_name) {
            filtered.children.push(child.clone());
            filtered.total += 1;
        }
    }

    filtered
}

/// Orders collected elements for removal: dependency order reversed, with
/// links detached before either of their endpoint resources is touched.
pub(crate) fn order_elements_for_removal(
    elements: &CollectedElements,
    snapshot: &InstanceState,
) -> Vec<Element> {
    let mut flat: Vec<Element> = Vec::with_capacity(elements.total);
    flat.extend(elements.links.iter().cloned().map(Element::Link));
    flat.extend(elements.children.iter().cloned().map(Element::Child));
    flat.extend(elements.resources.iter().cloned().map(Element::Resource));

    removal_layers(&flat, snapshot).concat()
}

/// Partitions removal-ordered elements into groups safe for concurrent
/// removal, preserving the barrier between an element and everything that
/// must be removed before it.
pub(crate) fn group_elements_for_removal(
    ordered: &[Element],
    snapshot: &InstanceState,
) -> Vec<Vec<Element>> {
    removal_layers(ordered, snapshot)
}

/// Layers elements by the longest chain of removal constraints leading to
/// them: an element lands one layer after the deepest element that must be
/// removed before it. Transitive chains are respected through the layer
/// structure itself.
fn removal_layers(elements: &[Element], snapshot: &InstanceState) -> Vec<Vec<Element>> {
    let predecessors: Vec<Vec<usize>> = elements
        .iter()
        .enumerate()
        .map(|(element_index, element)| {
            elements
                .iter()
                .enumerate()
                .filter(|(other_index, other)| {
                    *other_index != element_index
                        && removal_must_precede(other, element, snapshot)
                })
                .map(|(other_index, _)| other_index)
                .collect()
        })
        .collect();

    let mut memo: Vec<Option<usize>> = vec![None; elements.len()];
    let mut visiting = vec![false; elements.len()];
    let mut layers: Vec<Vec<Element>> = Vec::new();
    for index in 0..elements.len() {
        let layer = layer_index(index, &predecessors, &mut memo, &mut visiting);
        while layers.len() <= layer {
            layers.push(Vec::new());
        }
        layers[layer].push(elements[index].clone());
    }
    layers
}

fn layer_index(
    index: usize,
    predecessors: &[Vec<usize>],
    memo: &mut Vec<Option<usize>>,
    visiting: &mut Vec<bool>,
) -> usize {
    if let Some(layer) = memo[index] {
        return layer;
    }
    if visiting[index] {
        // Dependency cycles are validated out upstream; a back-edge
        // contributes no constraint rather than recursing forever.
        return 0;
    }
    visiting[index] = true;
    let mut layer = 0;
    for &pred in &predecessors[index] {
        layer = layer.max(layer_index(pred, predecessors, memo, visiting) + 1);
    }
    visiting[index] = false;
    memo[index] = Some(layer);
    layer
}

/// Whether `a` must be removed before `b`: dependents are removed before
/// the elements they depend on, and links before their endpoint
/// resources.
fn removal_must_precede(a: &Element, b: &Element, snapshot: &InstanceState) -> bool {
    match (a, b) {
        (Element::Link(link), Element::Resource(resource)) => link_endpoints(&link.link_name)
            .is_some_and(|(resource_a, resource_b)| {
                resource.resource_name == resource_a || resource.resource_name == resource_b
            }),
        (Element::Resource(resource_a), Element::Resource(resource_b)) => snapshot
            .resource_by_name(&resource_a.resource_name)
            .is_some_and(|state| {
                state
                    .depends_on_resources
                    .iter()
                    .any(|id| *id == resource_b.resource_id)
            }),
        (Element::Resource(resource), Element::Child(child)) => snapshot
            .resource_by_name(&resource.resource_name)
            .is_some_and(|state| {
                state
                    .depends_on_children
                    .iter()
                    .any(|id| *id == child.child_instance_id)
            }),
        (Element::Child(child), Element::Resource(resource)) => snapshot
            .child_dependencies
            .get(&child.child_name)
            .is_some_and(|deps| {
                deps.depends_on_resources
                    .iter()
                    .any(|id| *id == resource.resource_id)
            }),
        (Element::Child(child_a), Element::Child(child_b)) => snapshot
            .child_dependencies
            .get(&child_a.child_name)
            .is_some_and(|deps| {
                deps.depends_on_children
                    .iter()
                    .any(|id| *id == child_b.child_instance_id)
            }),
        _ => false,
    }
}
