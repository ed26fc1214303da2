//! Membership walks over one template scope and the marker rewrites built
//! on them.

use std::collections::HashSet;

use tracing::warn;

use prefab_overrides::{address_of, TargetMap};
use prefab_scene::{InstanceMarker, Scene, Value};
use prefab_types::{AssetId, LocalId, NodeId, Target};

/// Nodes of one scope, in pre-order.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ScopeWalk {
    /// Members, starting with the walk's top node.
    pub members: Vec<NodeId>,
    /// Instance roots nested directly in the scope.
    pub nested: Vec<NodeId>,
}

/// Walk the scope starting at `top`, stopping at nested instance roots.
/// Mounted content is skipped unless `include_mounted` is set.
pub(crate) fn walk_scope(scene: &Scene, top: NodeId, include_mounted: bool) -> ScopeWalk {
    let mut walk = ScopeWalk::default();
    if scene.node(top).is_none() {
        return walk;
    }
    let mut stack = vec![top];
    while let Some(id) = stack.pop() {
        let Some(node) = scene.node(id) else {
            continue;
        };
        if id != top {
            if node.is_mounted() && !include_mounted {
                continue;
            }
            if node.is_instance_root() {
                walk.nested.push(id);
                continue;
            }
        }
        walk.members.push(id);
        stack.extend(node.children.iter().rev().copied());
    }
    walk
}

/// Make every node of the walk a member of `scope_root`, keeping existing
/// local ids and generating missing ones. Nested instance roots are
/// re-pointed at `scope_root`. Returns the members and components touched.
pub(crate) fn claim_scope(
    scene: &mut Scene,
    scope_root: NodeId,
    template: Option<AssetId>,
    walk: &ScopeWalk,
) -> HashSet<Target> {
    let mut claimed = HashSet::new();
    for id in &walk.members {
        let components = match scene.node_mut(*id) {
            Some(node) => {
                let local = node
                    .marker
                    .as_ref()
                    .map(|m| m.local_id.clone())
                    .unwrap_or_else(LocalId::generate);
                let instance = if *id == scope_root {
                    node.marker.as_mut().and_then(|m| m.instance.take())
                } else {
                    None
                };
                let mut marker = InstanceMarker::member_of(scope_root, template, local);
                marker.instance = instance;
                node.marker = Some(marker);
                node.extras.mounted_root = None;
                node.components.clone()
            }
            None => continue,
        };
        claimed.insert(Target::Node(*id));
        for component_id in components {
            if let Some(component) = scene.component_mut(component_id) {
                if component.local_id.is_none() {
                    component.local_id = Some(LocalId::generate());
                }
                component.extras.mounted_root = None;
                claimed.insert(Target::Component(component_id));
            }
        }
    }
    for id in &walk.nested {
        if let Some(marker) = scene.node_mut(*id).and_then(|n| {
            n.extras.mounted_root = None;
            n.marker.as_mut()
        }) {
            marker.root = Some(scope_root);
            claimed.insert(Target::Node(*id));
        }
    }
    claimed
}

/// Fill in markers and local ids for content of a freshly materialized
/// instance that lacks them.
pub(crate) fn adopt_members(scene: &mut Scene, root: NodeId, template: AssetId) {
    let walk = walk_scope(scene, root, false);
    for id in walk.members.iter().filter(|id| **id != root) {
        let components = match scene.node_mut(*id) {
            Some(node) => {
                match node.marker.as_mut() {
                    Some(marker) => {
                        marker.template.get_or_insert(template);
                    }
                    None => {
                        node.marker = Some(InstanceMarker::member_of(root, Some(template), LocalId::generate()))
                    }
                }
                node.components.clone()
            }
            None => continue,
        };
        for component_id in components {
            if let Some(component) = scene.component_mut(component_id) {
                if component.local_id.is_none() && !component.is_mounted() {
                    component.local_id = Some(LocalId::generate());
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum KeyOwner {
    Member(NodeId),
    Component(prefab_types::ComponentId),
    Nested(NodeId),
}

impl KeyOwner {
    fn target(self) -> Target {
        match self {
            Self::Member(id) | Self::Nested(id) => Target::Node(id),
            Self::Component(id) => Target::Component(id),
        }
    }
}

fn scope_keys(scene: &Scene, scope_root: NodeId) -> Vec<(KeyOwner, LocalId)> {
    let walk = walk_scope(scene, scope_root, false);
    let mut keys = Vec::new();
    for id in &walk.members {
        let Some(node) = scene.node(*id) else {
            continue;
        };
        if let Some(local) = node.local_id() {
            keys.push((KeyOwner::Member(*id), local.clone()));
        }
        for component_id in &node.components {
            if let Some(component) = scene.component(*component_id) {
                if let (Some(local), false) = (&component.local_id, component.is_mounted()) {
                    keys.push((KeyOwner::Component(*component_id), local.clone()));
                }
            }
        }
    }
    for id in &walk.nested {
        let instance_key = scene
            .node(*id)
            .and_then(|n| n.marker.as_ref())
            .and_then(|m| m.instance.as_ref())
            .map(|i| i.local_id.clone());
        if let Some(key) = instance_key {
            keys.push((KeyOwner::Nested(*id), key));
        }
    }
    keys
}

/// Re-key members of `scope_root` whose local id collides with another
/// member. Objects in `fresh` yield to existing members; otherwise the
/// later one in walk order is re-keyed. Returns `(old, new)` pairs.
pub(crate) fn repair_local_ids(
    scene: &mut Scene,
    scope_root: NodeId,
    fresh: &HashSet<Target>,
) -> Vec<(LocalId, LocalId)> {
    let keys = scope_keys(scene, scope_root);
    let mut taken = HashSet::new();
    let mut deferred = Vec::new();
    for (owner, key) in keys {
        if fresh.contains(&owner.target()) || !taken.insert(key.clone()) {
            deferred.push((owner, key));
        }
    }

    let mut rekeyed = Vec::new();
    for (owner, key) in deferred {
        if taken.insert(key.clone()) {
            continue;
        }
        let mut salt = 0u32;
        let replacement = loop {
            let candidate = LocalId::derive(&key, salt);
            if taken.insert(candidate.clone()) {
                break candidate;
            }
            salt += 1;
        };
        match owner {
            KeyOwner::Member(id) => {
                if let Some(marker) = scene.node_mut(id).and_then(|n| n.marker.as_mut()) {
                    marker.local_id = replacement.clone();
                }
            }
            KeyOwner::Component(id) => {
                if let Some(component) = scene.component_mut(id) {
                    component.local_id = Some(replacement.clone());
                }
            }
            KeyOwner::Nested(id) => {
                if let Some(instance) = scene
                    .node_mut(id)
                    .and_then(|n| n.marker.as_mut())
                    .and_then(|m| m.instance.as_mut())
                {
                    instance.local_id = replacement.clone();
                }
            }
        }
        warn!(
            scope = %scope_root,
            object = %owner.target(),
            from = %key,
            to = %replacement,
            "duplicate local id in template scope, re-keyed"
        );
        rekeyed.push((key, replacement));
    }
    rekeyed
}

/// Rewrite references held by a template value so they point at the live
/// objects with the same addresses. References without a live counterpart
/// become null.
pub(crate) fn remap_template_refs(value: &mut Value, template: &Scene, template_root: NodeId, live: &TargetMap) {
    value.map_refs(&mut |referenced| {
        address_of(template, template_root, referenced)
            .and_then(|address| live.resolve(&address))
            .map(Value::from_target)
            .unwrap_or(Value::Null)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefab_scene::{Fields, InstanceRecord};

    fn lid(s: &str) -> LocalId {
        LocalId::new(s).unwrap()
    }

    fn instance(scene: &mut Scene, parent: Option<NodeId>, local: &str, instance_local: &str) -> NodeId {
        let id = scene.create_node(local);
        let mut marker = InstanceMarker::member_of(id, Some(AssetId::new()), lid(local));
        marker.instance = Some(InstanceRecord::new(lid(instance_local)));
        scene.node_mut(id).unwrap().marker = Some(marker);
        match parent {
            Some(parent) => scene.add_child(parent, id).unwrap(),
            None => scene.add_root(id).unwrap(),
        }
        id
    }

    #[test]
    fn walk_stops_at_nested_roots_and_mounted_content() {
        let mut scene = Scene::default();
        let root = instance(&mut scene, None, "root", "i-root");
        let child = scene.create_node("child");
        scene.add_child(root, child).unwrap();
        let nested = instance(&mut scene, Some(child), "nested", "i-nested");
        let inside = scene.create_node("inside");
        scene.add_child(nested, inside).unwrap();
        let mounted = scene.create_node("mounted");
        scene.add_child(root, mounted).unwrap();
        scene.node_mut(mounted).unwrap().extras.mounted_root = Some(root);

        let walk = walk_scope(&scene, root, false);
        assert_eq!(walk.members, vec![root, child]);
        assert_eq!(walk.nested, vec![nested]);
        assert_eq!(walk_scope(&scene, root, true).members, vec![root, child, mounted]);
    }

    #[test]
    fn claim_assigns_ids_and_clears_mounts() {
        let mut scene = Scene::default();
        let root = instance(&mut scene, None, "root", "i-root");
        let extra = scene.create_node("extra");
        scene.add_child(root, extra).unwrap();
        scene.node_mut(extra).unwrap().extras.mounted_root = Some(root);
        let comp = scene.add_component(extra, "Sprite", Fields::new()).unwrap();

        let walk = walk_scope(&scene, extra, true);
        let claimed = claim_scope(&mut scene, root, None, &walk);
        assert!(claimed.contains(&Target::Node(extra)));
        assert!(claimed.contains(&Target::Component(comp)));
        let node = scene.node(extra).unwrap();
        assert_eq!(node.instance_scope(), Some(root));
        assert!(!node.is_mounted());
        assert!(scene.component(comp).unwrap().local_id.is_some());
        assert_eq!(address_of(&scene, root, Target::Node(extra)).map(|a| a.len()), Some(1));
    }

    #[test]
    fn fresh_duplicates_yield_to_existing_members() {
        let mut scene = Scene::default();
        let root = instance(&mut scene, None, "root", "i-root");
        let old = scene.create_node("old");
        scene.add_child(root, old).unwrap();
        scene.node_mut(old).unwrap().marker = Some(InstanceMarker::member_of(root, None, lid("same")));
        let new = scene.create_node("new");
        scene.insert_child(root, new, 0).unwrap();
        scene.node_mut(new).unwrap().marker = Some(InstanceMarker::member_of(root, None, lid("same")));

        let fresh = HashSet::from([Target::Node(new)]);
        let rekeyed = repair_local_ids(&mut scene, root, &fresh);
        assert_eq!(rekeyed, vec![(lid("same"), LocalId::derive(&lid("same"), 0))]);
        assert_eq!(scene.node(old).unwrap().local_id(), Some(&lid("same")));
        assert_eq!(scene.node(new).unwrap().local_id(), Some(&LocalId::derive(&lid("same"), 0)));
        assert!(repair_local_ids(&mut scene, root, &HashSet::new()).is_empty());
    }
}
