//! Mounted content bookkeeping.
//!
//! Nodes and components attached to an instance without a counterpart in
//! its template are listed in the owning root's override set, bucketed by
//! the address of the template object they hang under. Each mounted object
//! also points back at that root (`extras.mounted_root`), so moving it
//! across instance boundaries repoints a single record instead of
//! duplicating it.

use tracing::{debug, trace};

use prefab_scene::{Component, Scene};
use prefab_types::{ComponentId, LocalIdPath, NodeId, Target};

use crate::address::{
    address_of, component_address, is_template_child, nested_roots_between, outermost_instance_root,
    scope_root_of,
};
use crate::error::OverrideResult;
use crate::observer::{ChangeObserver, EditKind};
use crate::store::{edit, store};

/// Root under whose override set `target` (or the mounted subtree holding
/// it) is recorded.
pub fn mounted_owner(scene: &Scene, target: Target) -> Option<NodeId> {
    if let Target::Component(id) = target {
        if let Some(root) = scene.component(id)?.extras.mounted_root {
            return Some(root);
        }
    }
    let node = scene.node_of(target)?;
    std::iter::once(node)
        .chain(scene.ancestors(node))
        .find_map(|id| scene.node(id).and_then(|n| n.extras.mounted_root))
}

/// Whether a component belongs to its node's template.
pub fn is_template_component(component: &Component) -> bool {
    component.local_id.is_some() && !component.is_mounted()
}

// ---------------------------------------------------------------
// Registration
// ---------------------------------------------------------------

/// List `node` as mounted under `parent_address` of `owner`. Idempotent; a
/// node recorded elsewhere is moved rather than duplicated.
pub fn register_mounted_child(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    owner: NodeId,
    parent_address: &LocalIdPath,
    node: NodeId,
) -> OverrideResult<()> {
    let listed = store(scene, owner)?
        .mounted_children(parent_address)
        .is_some_and(|b| b.nodes.contains(&node));
    if listed {
        return Ok(());
    }
    unmount_node(scene, observer, node)?;
    edit(scene, owner, observer, EditKind::MountedChildren, |s| {
        s.get_or_create_mounted_children(parent_address).nodes.push(node);
    })?;
    if let Some(entry) = scene.node_mut(node) {
        entry.extras.mounted_root = Some(owner);
    }
    trace!(owner = %owner, address = %parent_address, node = %node, "registered mounted child");
    Ok(())
}

/// Component counterpart of [`register_mounted_child`].
pub fn register_mounted_component(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    owner: NodeId,
    node_address: &LocalIdPath,
    component: ComponentId,
) -> OverrideResult<()> {
    let listed = store(scene, owner)?
        .mounted_components(node_address)
        .is_some_and(|b| b.components.contains(&component));
    if listed {
        return Ok(());
    }
    unmount_component(scene, observer, component)?;
    edit(scene, owner, observer, EditKind::MountedComponents, |s| {
        s.get_or_create_mounted_components(node_address)
            .components
            .push(component);
    })?;
    if let Some(entry) = scene.component_mut(component) {
        entry.extras.mounted_root = Some(owner);
    }
    Ok(())
}

/// Forget `node` from its owner's buckets and clear its back-reference.
/// Returns the owner it was recorded under.
pub fn unmount_node(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    node: NodeId,
) -> OverrideResult<Option<NodeId>> {
    let Some(owner) = scene.node(node).and_then(|n| n.extras.mounted_root) else {
        return Ok(None);
    };
    if store(scene, owner).is_ok() {
        edit(scene, owner, observer, EditKind::MountedChildren, |s| s.forget_mounted_node(node))?;
    }
    if let Some(entry) = scene.node_mut(node) {
        entry.extras.mounted_root = None;
    }
    Ok(Some(owner))
}

/// Drop `component` from the mounted records of its owner.
pub fn unmount_component(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    component: ComponentId,
) -> OverrideResult<Option<NodeId>> {
    let Some(owner) = scene.component(component).and_then(|c| c.extras.mounted_root) else {
        return Ok(None);
    };
    if store(scene, owner).is_ok() {
        edit(scene, owner, observer, EditKind::MountedComponents, |s| {
            s.forget_mounted_component(component)
        })?;
    }
    if let Some(entry) = scene.component_mut(component) {
        entry.extras.mounted_root = None;
    }
    Ok(Some(owner))
}

// ---------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------

/// Recompute the mounted-children bucket for `parent` from its current
/// children. Parents outside any instance, or that are themselves mounted
/// content, have no bucket.
pub fn update_children_data(scene: &mut Scene, observer: &dyn ChangeObserver, parent: NodeId) -> OverrideResult<()> {
    let Some(owner) = outermost_instance_root(scene, parent) else {
        return Ok(());
    };
    let Some(address) = address_of(scene, owner, Target::Node(parent)) else {
        trace!(parent = %parent, "parent is not addressable, no bucket");
        return Ok(());
    };
    let Some(scope) = scope_root_of(scene, parent) else {
        return Ok(());
    };
    let nested = nested_roots_between(scene, owner, parent);
    let added: Vec<NodeId> = scene
        .node(parent)
        .map(|p| p.children.clone())
        .unwrap_or_default()
        .into_iter()
        .filter(|child| !is_template_child(scene, scope, *child))
        .filter(|child| !held_by_nested(&nested, scene.node(*child).and_then(|n| n.extras.mounted_root)))
        .collect();

    for node in &added {
        let elsewhere = scene
            .node(*node)
            .and_then(|n| n.extras.mounted_root)
            .is_some_and(|prev| prev != owner);
        if elsewhere {
            unmount_node(scene, observer, *node)?;
        } else {
            // A node moving between buckets of the same owner.
            let stale = store(scene, owner)?
                .mounted_children
                .iter()
                .any(|b| b.target_address != address && b.nodes.contains(node));
            if stale {
                edit(scene, owner, observer, EditKind::MountedChildren, |s| s.forget_mounted_node(*node))?;
            }
        }
    }

    let current = store(scene, owner)?.mounted_children(&address).map(|b| b.nodes.clone());
    if current.as_deref().unwrap_or_default() != added.as_slice() {
        edit(scene, owner, observer, EditKind::MountedChildren, |s| {
            if added.is_empty() {
                s.remove_mounted_children(&address);
            } else {
                s.get_or_create_mounted_children(&address).nodes = added.clone();
            }
        })?;
    }
    for node in &added {
        if let Some(entry) = scene.node_mut(*node) {
            entry.extras.mounted_root = Some(owner);
        }
    }
    debug!(owner = %owner, address = %address, mounted = added.len(), "updated mounted children");
    Ok(())
}

/// Recompute the mounted-components bucket for `node`.
pub fn update_components_data(scene: &mut Scene, observer: &dyn ChangeObserver, node: NodeId) -> OverrideResult<()> {
    let Some(owner) = outermost_instance_root(scene, node) else {
        return Ok(());
    };
    let Some(address) = address_of(scene, owner, Target::Node(node)) else {
        return Ok(());
    };
    let nested = nested_roots_between(scene, owner, node);
    let added: Vec<ComponentId> = scene
        .node(node)
        .map(|n| n.components.clone())
        .unwrap_or_default()
        .into_iter()
        .filter(|id| {
            scene.component(*id).is_some_and(|c| {
                (c.local_id.is_none() || c.is_mounted()) && !held_by_nested(&nested, c.extras.mounted_root)
            })
        })
        .collect();

    for component in &added {
        let elsewhere = scene
            .component(*component)
            .and_then(|c| c.extras.mounted_root)
            .is_some_and(|prev| prev != owner);
        if elsewhere {
            unmount_component(scene, observer, *component)?;
        }
    }

    let current = store(scene, owner)?
        .mounted_components(&address)
        .map(|b| b.components.clone());
    if current.as_deref().unwrap_or_default() != added.as_slice() {
        edit(scene, owner, observer, EditKind::MountedComponents, |s| {
            if added.is_empty() {
                s.remove_mounted_components(&address);
            } else {
                s.get_or_create_mounted_components(&address).components = added.clone();
            }
        })?;
    }
    for component in &added {
        if let Some(entry) = scene.component_mut(*component) {
            entry.extras.mounted_root = Some(owner);
        }
    }
    debug!(owner = %owner, address = %address, mounted = added.len(), "updated mounted components");
    Ok(())
}

/// Content a nested instance's own record lists as mounted is part of the
/// enclosing template, not a divergence of the outer instance.
fn held_by_nested(nested: &[NodeId], mounted_root: Option<NodeId>) -> bool {
    mounted_root.is_some_and(|root| nested.contains(&root))
}

/// A child left `parent`: drop its mounted record, then reconcile the
/// parent's bucket.
pub fn on_child_removed(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    parent: NodeId,
    child: NodeId,
) -> OverrideResult<()> {
    unmount_node(scene, observer, child)?;
    update_children_data(scene, observer, parent)
}

/// A component was attached to `node`. A template component coming back
/// cancels its removal record.
pub fn on_component_added(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    node: NodeId,
    component: ComponentId,
) -> OverrideResult<()> {
    let local = scene
        .component(component)
        .filter(|c| is_template_component(c))
        .and_then(|c| c.local_id.clone());
    if let Some(local) = local {
        if let Some(owner) = outermost_instance_root(scene, node) {
            if let Some(node_address) = address_of(scene, owner, Target::Node(node)) {
                let address = component_address(&node_address, &local);
                let recorded = store(scene, owner)?
                    .removed_components
                    .iter()
                    .any(|r| r.target_address == address);
                if recorded {
                    edit(scene, owner, observer, EditKind::RemovedComponents, |s| {
                        s.remove_removed_component(&address)
                    })?;
                }
            }
        }
    }
    update_components_data(scene, observer, node)
}

/// `component` was detached from `node`. Removing template content records
/// a removed component and drops the overrides that addressed it.
pub fn on_component_removed(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    node: NodeId,
    component: &Component,
) -> OverrideResult<()> {
    if let Some(owner) = component.extras.mounted_root {
        if store(scene, owner).is_ok() {
            edit(scene, owner, observer, EditKind::MountedComponents, |s| {
                s.forget_mounted_component(component.id)
            })?;
        }
        return Ok(());
    }
    let Some(local) = component.local_id.as_ref() else {
        return update_components_data(scene, observer, node);
    };
    let Some(owner) = outermost_instance_root(scene, node) else {
        return Ok(());
    };
    let Some(node_address) = address_of(scene, owner, Target::Node(node)) else {
        return Ok(());
    };
    let address = component_address(&node_address, local);
    edit(scene, owner, observer, EditKind::RemovedComponents, |s| {
        s.add_removed_component(address.clone())
    })?;
    let stale_overrides = store(scene, owner)?
        .property_overrides
        .iter()
        .any(|o| o.target_path == address);
    if stale_overrides {
        edit(scene, owner, observer, EditKind::PropertyOverrides, |s| {
            s.property_overrides.retain(|o| o.target_path != address)
        })?;
    }
    let stale_targets = store(scene, owner)?
        .target_overrides
        .iter()
        .any(|o| o.source_address.as_ref() == Some(&address));
    if stale_targets {
        edit(scene, owner, observer, EditKind::TargetOverrides, |s| {
            s.target_overrides
                .retain(|o| o.source_address.as_ref() != Some(&address))
        })?;
    }
    debug!(owner = %owner, address = %address, "recorded removed component");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::observer::NoopObserver;
    use crate::store::set_property_override;
    use prefab_scene::{Fields, SceneEvent, Value};
    use prefab_types::AssetId;

    fn bucket(scene: &Scene, owner: NodeId, address: &LocalIdPath) -> Vec<NodeId> {
        store(scene, owner)
            .unwrap()
            .mounted_children(address)
            .map(|b| b.nodes.clone())
            .unwrap_or_default()
    }

    #[test]
    fn added_child_is_bucketed_under_parent_address() {
        let mut f = nested_fixture();
        let extra = f.scene.create_node("extra");
        f.scene.add_child(f.a_child, extra).unwrap();
        update_children_data(&mut f.scene, &NoopObserver, f.a_child).unwrap();

        assert_eq!(bucket(&f.scene, f.a, &path(&["a-child"])), vec![extra]);
        assert_eq!(f.scene.node(extra).unwrap().extras.mounted_root, Some(f.a));
        // The nested instance root under the same parent is template content.
        assert_eq!(store(&f.scene, f.a).unwrap().all_mounted_nodes(), vec![extra]);
    }

    #[test]
    fn child_added_inside_nested_instance_is_owned_by_outermost_root() {
        let mut f = nested_fixture();
        let extra = f.scene.create_node("extra");
        f.scene.add_child(f.b_child, extra).unwrap();
        update_children_data(&mut f.scene, &NoopObserver, f.b_child).unwrap();
        assert_eq!(bucket(&f.scene, f.a, &path(&["b-inst", "b-child"])), vec![extra]);
        assert!(store(&f.scene, f.b).unwrap().mounted_children.is_empty());
    }

    #[test]
    fn moving_mounted_child_repoints_single_record() {
        let mut f = nested_fixture();
        let extra = f.scene.create_node("extra");
        f.scene.add_child(f.a, extra).unwrap();
        update_children_data(&mut f.scene, &NoopObserver, f.a).unwrap();
        f.scene.drain_events();

        f.scene.add_child(f.a_child, extra).unwrap();
        for event in f.scene.drain_events() {
            match event {
                SceneEvent::ChildRemoved { parent, child } => {
                    on_child_removed(&mut f.scene, &NoopObserver, parent, child).unwrap()
                }
                SceneEvent::ChildAdded { parent, .. } => {
                    update_children_data(&mut f.scene, &NoopObserver, parent).unwrap()
                }
                _ => {}
            }
        }
        let s = store(&f.scene, f.a).unwrap();
        assert_eq!(s.mounted_children.len(), 1);
        assert_eq!(bucket(&f.scene, f.a, &path(&["a-child"])), vec![extra]);
    }

    #[test]
    fn mounted_child_moved_to_other_instance_changes_owner() {
        let mut f = nested_fixture();
        let other = instance_root(&mut f.scene, None, "O", AssetId::new(), "o-root", "o-inst", None);
        let extra = f.scene.create_node("extra");
        f.scene.add_child(f.a, extra).unwrap();
        update_children_data(&mut f.scene, &NoopObserver, f.a).unwrap();

        f.scene.add_child(other, extra).unwrap();
        update_children_data(&mut f.scene, &NoopObserver, other).unwrap();
        assert!(store(&f.scene, f.a).unwrap().mounted_children.is_empty());
        assert_eq!(bucket(&f.scene, other, &path(&["o-root"])), vec![extra]);
        assert_eq!(f.scene.node(extra).unwrap().extras.mounted_root, Some(other));
    }

    #[test]
    fn removing_last_mounted_child_drops_bucket() {
        let mut f = nested_fixture();
        let extra = f.scene.create_node("extra");
        f.scene.add_child(f.a, extra).unwrap();
        update_children_data(&mut f.scene, &NoopObserver, f.a).unwrap();
        f.scene.detach(extra).unwrap();
        on_child_removed(&mut f.scene, &NoopObserver, f.a, extra).unwrap();
        assert!(store(&f.scene, f.a).unwrap().mounted_children.is_empty());
        assert!(!f.scene.node(extra).unwrap().is_mounted());
    }

    #[test]
    fn children_of_mounted_content_are_not_bucketed() {
        let mut f = nested_fixture();
        let extra = f.scene.create_node("extra");
        f.scene.add_child(f.a, extra).unwrap();
        update_children_data(&mut f.scene, &NoopObserver, f.a).unwrap();
        let inner = f.scene.create_node("inner");
        f.scene.add_child(extra, inner).unwrap();
        update_children_data(&mut f.scene, &NoopObserver, extra).unwrap();
        assert_eq!(store(&f.scene, f.a).unwrap().all_mounted_nodes(), vec![extra]);
        assert_eq!(mounted_owner(&f.scene, Target::Node(inner)), Some(f.a));
    }

    #[test]
    fn added_component_is_mounted_and_removal_forgets_it() {
        let mut f = nested_fixture();
        let comp = f.scene.add_component(f.a_child, "Extra", Fields::new()).unwrap();
        on_component_added(&mut f.scene, &NoopObserver, f.a_child, comp).unwrap();
        let s = store(&f.scene, f.a).unwrap();
        assert_eq!(s.all_mounted_components(), vec![comp]);
        assert_eq!(s.mounted_components[0].target_address, path(&["a-child"]));

        let removed = f.scene.remove_component(comp).unwrap();
        on_component_removed(&mut f.scene, &NoopObserver, f.a_child, &removed).unwrap();
        let s = store(&f.scene, f.a).unwrap();
        assert!(s.mounted_components.is_empty());
        assert!(s.removed_components.is_empty());
    }

    #[test]
    fn removing_template_component_is_recorded_and_undone() {
        let mut f = nested_fixture();
        let address = path(&["b-inst", "b-comp"]);
        set_property_override(&mut f.scene, f.a, &NoopObserver, &address, &prop("power"), Value::Int(1)).unwrap();

        let removed = f.scene.remove_component(f.b_comp).unwrap();
        on_component_removed(&mut f.scene, &NoopObserver, f.b_child, &removed).unwrap();
        let s = store(&f.scene, f.a).unwrap();
        assert_eq!(s.removed_components.len(), 1);
        assert_eq!(s.removed_components[0].target_address, address);
        assert!(s.property_overrides.is_empty());

        let restored = f.scene.attach_component(removed).unwrap();
        on_component_added(&mut f.scene, &NoopObserver, f.b_child, restored).unwrap();
        let s = store(&f.scene, f.a).unwrap();
        assert!(s.removed_components.is_empty());
        assert!(s.mounted_components.is_empty());
    }

    #[test]
    fn explicit_registration_is_idempotent() {
        let mut f = nested_fixture();
        let extra = f.scene.create_node("extra");
        f.scene.add_child(f.b_child, extra).unwrap();
        let address = path(&["b-child"]);
        register_mounted_child(&mut f.scene, &NoopObserver, f.b, &address, extra).unwrap();
        register_mounted_child(&mut f.scene, &NoopObserver, f.b, &address, extra).unwrap();
        assert_eq!(bucket(&f.scene, f.b, &address), vec![extra]);

        assert_eq!(unmount_node(&mut f.scene, &NoopObserver, extra).unwrap(), Some(f.b));
        assert!(store(&f.scene, f.b).unwrap().mounted_children.is_empty());
        assert_eq!(unmount_node(&mut f.scene, &NoopObserver, extra).unwrap(), None);
    }

    #[test]
    fn content_mounted_on_nested_record_stays_there() {
        let mut f = nested_fixture();
        let extra = f.scene.create_node("extra");
        f.scene.add_child(f.b_child, extra).unwrap();
        register_mounted_child(&mut f.scene, &NoopObserver, f.b, &path(&["b-child"]), extra).unwrap();

        update_children_data(&mut f.scene, &NoopObserver, f.b_child).unwrap();
        assert!(store(&f.scene, f.a).unwrap().mounted_children.is_empty());
        assert_eq!(bucket(&f.scene, f.b, &path(&["b-child"])), vec![extra]);
    }
}
