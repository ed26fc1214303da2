//! Local-ID addressing relative to instance roots.
//!
//! An object inside an instance is addressed by a [`LocalIdPath`]: one
//! segment per nested instance crossed on the way down (the nested
//! instance's record id), followed by the object's own local id. A
//! [`TargetMap`] is the same space indexed top-down, built once per root
//! and consulted for many lookups.
//!
//! Mounted content is never part of an address space: it has no
//! counterpart in the template.

use std::collections::HashMap;

use tracing::debug;

use prefab_diff::RefResolver;
use prefab_scene::{Node, Scene};
use prefab_types::{ComponentId, LocalId, LocalIdPath, NodeId, Target};

/// One entry of a [`TargetMap`].
#[derive(Clone, Debug, PartialEq)]
pub enum TargetSlot {
    Node(NodeId),
    Component(ComponentId),
    /// A nested instance, keyed by its instance record id.
    Nested(TargetMap),
}

/// Addressable objects below an instance root, keyed by local id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetMap {
    slots: HashMap<LocalId, TargetSlot>,
}

impl TargetMap {
    /// Index every addressable node and component under `root`.
    pub fn build(scene: &Scene, root: NodeId) -> Self {
        let mut map = Self::default();
        if let Some(node) = scene.node(root) {
            fill_scope(scene, node, &mut map);
        }
        map
    }

    /// Number of addressable objects.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the root addresses nothing.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn insert(&mut self, key: LocalId, slot: TargetSlot) {
        if self.slots.contains_key(&key) {
            debug!(local_id = %key, "duplicate local id in scope, keeping the first");
            return;
        }
        self.slots.insert(key, slot);
    }

    /// Walk `path` through nested scopes. `None` means a broken address.
    pub fn resolve(&self, path: &LocalIdPath) -> Option<Target> {
        let (last, parents) = path.segments().split_last()?;
        let mut scope = self;
        for segment in parents {
            match scope.slots.get(segment)? {
                TargetSlot::Nested(inner) => scope = inner,
                _ => return None,
            }
        }
        match scope.slots.get(last)? {
            TargetSlot::Node(id) => Some(Target::Node(*id)),
            TargetSlot::Component(id) => Some(Target::Component(*id)),
            TargetSlot::Nested(_) => None,
        }
    }

    /// Every addressable object with its address.
    pub fn entries(&self) -> Vec<(LocalIdPath, Target)> {
        let mut out = Vec::new();
        self.collect_entries(&LocalIdPath::new(), &mut out);
        out
    }

    fn collect_entries(&self, prefix: &LocalIdPath, out: &mut Vec<(LocalIdPath, Target)>) {
        for (key, slot) in &self.slots {
            let path = prefix.child(key.clone());
            match slot {
                TargetSlot::Node(id) => out.push((path, Target::Node(*id))),
                TargetSlot::Component(id) => out.push((path, Target::Component(*id))),
                TargetSlot::Nested(inner) => inner.collect_entries(&path, out),
            }
        }
    }
}

fn fill_scope(scene: &Scene, node: &Node, map: &mut TargetMap) {
    let Some(marker) = node.marker.as_ref() else {
        return;
    };
    map.insert(marker.local_id.clone(), TargetSlot::Node(node.id));
    for component_id in &node.components {
        let Some(component) = scene.component(*component_id) else {
            continue;
        };
        if component.is_mounted() {
            continue;
        }
        if let Some(local_id) = &component.local_id {
            map.insert(local_id.clone(), TargetSlot::Component(component.id));
        }
    }
    for child_id in &node.children {
        let Some(child) = scene.node(*child_id) else {
            continue;
        };
        if child.is_mounted() {
            continue;
        }
        match child.marker.as_ref().and_then(|m| m.instance.as_ref()) {
            Some(instance) => {
                let mut nested = TargetMap::default();
                fill_scope(scene, child, &mut nested);
                map.insert(instance.local_id.clone(), TargetSlot::Nested(nested));
            }
            None => fill_scope(scene, child, map),
        }
    }
}

/// Address of `target` relative to `scope_root`.
///
/// Returns `None` when the target is not template content below the root:
/// it lies elsewhere, is mounted, or hangs under a node without a marker.
pub fn address_of(scene: &Scene, scope_root: NodeId, target: Target) -> Option<LocalIdPath> {
    let node_id = scene.node_of(target)?;
    let own = match target {
        Target::Node(id) => scene.node(id)?.local_id()?.clone(),
        Target::Component(id) => {
            let component = scene.component(id)?;
            if component.is_mounted() {
                return None;
            }
            component.local_id.clone()?
        }
    };

    let mut path = LocalIdPath::single(own);
    let mut current = node_id;
    while current != scope_root {
        let node = scene.node(current)?;
        if node.is_mounted() {
            return None;
        }
        let marker = node.marker.as_ref()?;
        if let Some(instance) = &marker.instance {
            path.push_front(instance.local_id.clone());
        }
        current = node.parent?;
    }
    Some(path)
}

/// Climb from `node` to the outermost enclosing instance root.
///
/// The climb stops at mounted content: an instance that was mounted under
/// another instance owns its own overrides.
pub fn outermost_instance_root(scene: &Scene, node: NodeId) -> Option<NodeId> {
    let mut outermost = None;
    let mut current = Some(node);
    while let Some(id) = current {
        let Some(entry) = scene.node(id) else {
            break;
        };
        if entry.is_instance_root() {
            outermost = Some(id);
        }
        if entry.is_mounted() {
            break;
        }
        current = entry.parent;
    }
    outermost
}

/// The outermost instance root of `node` and the node's address relative
/// to it. `None` if the node is not template content of any instance.
pub fn find_outermost_instance_root(scene: &Scene, node: NodeId) -> Option<(NodeId, LocalIdPath)> {
    let root = outermost_instance_root(scene, node)?;
    let path = address_of(scene, root, Target::Node(node))?;
    Some((root, path))
}

/// Outermost root and address of any target (node or component).
pub fn locate(scene: &Scene, target: Target) -> Option<(NodeId, LocalIdPath)> {
    let node = scene.node_of(target)?;
    let root = outermost_instance_root(scene, node)?;
    let path = address_of(scene, root, target)?;
    Some((root, path))
}

/// Root of the scope the children of `parent` belong to.
pub fn scope_root_of(scene: &Scene, parent: NodeId) -> Option<NodeId> {
    let node = scene.node(parent)?;
    if node.is_instance_root() {
        return Some(parent);
    }
    node.instance_scope()
}

/// Whether `child` is template content of the scope rooted at `scope`.
pub fn is_template_child(scene: &Scene, scope: NodeId, child: NodeId) -> bool {
    scene
        .node(child)
        .is_some_and(|n| !n.is_mounted() && n.instance_scope() == Some(scope))
}

/// Instance roots on the chain from `node` (inclusive) up to `top`
/// (exclusive), outermost first.
pub fn nested_roots_between(scene: &Scene, top: NodeId, node: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        if id == top {
            break;
        }
        let Some(entry) = scene.node(id) else {
            break;
        };
        if entry.is_instance_root() {
            out.push(id);
        }
        current = entry.parent;
    }
    out.reverse();
    out
}

/// Split `address` (relative to `root`) into the innermost nested instance
/// root whose scope holds the addressed object and the address relative to
/// that root. Addresses of top-scope objects return `root` unchanged.
pub fn innermost_scope_of(scene: &Scene, root: NodeId, address: &LocalIdPath) -> Option<(NodeId, LocalIdPath)> {
    let segments = address.segments();
    let mut current = root;
    let mut depth = 0;
    while depth + 1 < segments.len() {
        current = nested_roots_in_scope(scene, current)
            .into_iter()
            .find(|r| instance_local_id(scene, *r) == Some(&segments[depth]))?;
        depth += 1;
    }
    Some((current, segments[depth..].iter().cloned().collect()))
}

/// Nested instance roots directly inside the scope of `root`.
pub fn nested_roots_in_scope(scene: &Scene, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = scene.node(root).map(|n| n.children.clone()).unwrap_or_default();
    stack.reverse();
    while let Some(id) = stack.pop() {
        let Some(node) = scene.node(id) else {
            continue;
        };
        if node.is_mounted() {
            continue;
        }
        if node.is_instance_root() {
            out.push(id);
            continue;
        }
        stack.extend(node.children.iter().rev().copied());
    }
    out
}

fn instance_local_id(scene: &Scene, node: NodeId) -> Option<&LocalId> {
    scene
        .node(node)?
        .marker
        .as_ref()?
        .instance
        .as_ref()
        .map(|i| &i.local_id)
}

/// Address of a component given the address of its node.
pub fn component_address(node_address: &LocalIdPath, component_local: &LocalId) -> LocalIdPath {
    node_address
        .parent()
        .unwrap_or_default()
        .child(component_local.clone())
}

/// Resolves references against the address space of one root.
pub struct ScopeRefs<'a> {
    pub scene: &'a Scene,
    pub root: NodeId,
}

impl RefResolver for ScopeRefs<'_> {
    fn address_of(&self, target: Target) -> Option<LocalIdPath> {
        address_of(self.scene, self.root, target)
    }
}
