//! The scene arena.
//!
//! [`Scene`] owns every node and component in flat maps keyed by identity.
//! Parent/child and node/component links are identities resolved through
//! the arena, so ownership is strictly top-down and nothing holds a
//! pointer into another object.
//!
//! # Invariants
//!
//! - A node is listed in its parent's `children` iff its `parent` points at
//!   that parent.
//! - A component is listed in its node's `components` iff its `node` points
//!   at that node.
//! - Top-level scene nodes have no parent and are listed in `roots`.
//!   Detached nodes have no parent and are not listed anywhere.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use prefab_types::{ComponentId, NodeId, PropertyPath, Target};

use crate::error::{SceneError, SceneResult};
use crate::event::SceneEvent;
use crate::marker::TargetOverride;
use crate::node::{Component, Node};
use crate::schema::{TypeRegistry, NODE_TYPE};
use crate::value::{map_field_refs, read_field, write_field, Fields, Value};

/// A reference held by some object field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Referrer {
    pub owner: Target,
    pub path: PropertyPath,
    pub referenced: Target,
}

#[derive(Clone, Debug, Default)]
pub struct Scene {
    nodes: HashMap<NodeId, Node>,
    components: HashMap<ComponentId, Component>,
    roots: Vec<NodeId>,
    /// Target overrides whose source lives outside every instance.
    pub target_overrides: Vec<TargetOverride>,
    registry: TypeRegistry,
    events: Vec<SceneEvent>,
    events_muted: bool,
}

impl Scene {
    /// An empty scene using `registry` for type metadata.
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    /// Type metadata of the scene.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Mutable type metadata.
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Number of nodes in the arena, detached ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the scene holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level nodes in order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    /// Node with id `id`.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Mutable node with id `id`.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Node with id `id`, or an error if it is not in the scene.
    pub fn try_node(&self, id: NodeId) -> SceneResult<&Node> {
        self.nodes.get(&id).ok_or(SceneError::NodeNotFound(id))
    }

    /// Mutable node with id `id`, or an error if it is not in the scene.
    pub fn try_node_mut(&mut self, id: NodeId) -> SceneResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(SceneError::NodeNotFound(id))
    }

    /// Component with id `id`.
    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(&id)
    }

    /// Mutable component with id `id`.
    pub fn component_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.get_mut(&id)
    }

    /// Component with id `id`, or an error if it is not in the scene.
    pub fn try_component(&self, id: ComponentId) -> SceneResult<&Component> {
        self.components
            .get(&id)
            .ok_or(SceneError::ComponentNotFound(id))
    }

    /// Whether the node or component exists.
    pub fn contains(&self, target: Target) -> bool {
        match target {
            Target::Node(id) => self.nodes.contains_key(&id),
            Target::Component(id) => self.components.contains_key(&id),
        }
    }

    /// The node a target is, or is attached to.
    pub fn node_of(&self, target: Target) -> Option<NodeId> {
        match target {
            Target::Node(id) => self.nodes.contains_key(&id).then_some(id),
            Target::Component(id) => self.components.get(&id).map(|c| c.node),
        }
    }

    /// Fields of a node or component.
    pub fn fields_of(&self, target: Target) -> Option<&Fields> {
        match target {
            Target::Node(id) => self.nodes.get(&id).map(|n| &n.fields),
            Target::Component(id) => self.components.get(&id).map(|c| &c.fields),
        }
    }

    /// Mutable fields of a node or component.
    pub fn fields_of_mut(&mut self, target: Target) -> Option<&mut Fields> {
        match target {
            Target::Node(id) => self.nodes.get_mut(&id).map(|n| &mut n.fields),
            Target::Component(id) => self.components.get_mut(&id).map(|c| &mut c.fields),
        }
    }

    /// Type name of a node or component.
    pub fn type_name_of(&self, target: Target) -> Option<&str> {
        match target {
            Target::Node(id) => self.nodes.get(&id).map(|_| NODE_TYPE),
            Target::Component(id) => self.components.get(&id).map(|c| c.type_name.as_str()),
        }
    }

    /// Position of a component in its node's component list.
    pub fn component_index(&self, id: ComponentId) -> Option<usize> {
        let component = self.components.get(&id)?;
        self.nodes
            .get(&component.node)?
            .components
            .iter()
            .position(|c| *c == id)
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(parent) = current {
            out.push(parent);
            current = self.nodes.get(&parent).and_then(|n| n.parent);
        }
        out
    }

    /// Returns `true` if `node` is `ancestor` or lies below it.
    pub fn is_in_subtree(&self, node: NodeId, ancestor: NodeId) -> bool {
        node == ancestor || self.ancestors(node).contains(&ancestor)
    }

    /// `id` and every node below it, parents before children.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Every component attached to `id` or one of its descendants.
    pub fn subtree_components(&self, id: NodeId) -> Vec<ComponentId> {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.nodes.get(&n))
            .flat_map(|n| n.components.iter().copied())
            .collect()
    }

    // ---------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------

    /// Insert a node into the arena without attaching it anywhere.
    ///
    /// Any parent/children/component links on `node` are reset.
    pub fn insert_node(&mut self, mut node: Node) -> NodeId {
        node.parent = None;
        node.children.clear();
        node.components.clear();
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Insert a node keeping its links as they are. Used when materializing
    /// a whole subtree at once.
    pub(crate) fn insert_raw_node(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn insert_raw_component(&mut self, component: Component) {
        self.components.insert(component.id, component);
    }

    /// Create a detached node with default fields.
    pub fn create_node(&mut self, name: impl Into<String>) -> NodeId {
        self.insert_node(Node::new(name))
    }

    /// Attach a detached node at the top level of the scene.
    pub fn add_root(&mut self, id: NodeId) -> SceneResult<()> {
        self.detach(id)?;
        self.roots.push(id);
        Ok(())
    }

    /// Append `child` under `parent`, detaching it from its previous parent.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> SceneResult<()> {
        let index = self.try_node(parent)?.children.len();
        self.insert_child(parent, child, index)
    }

    /// Insert `child` under `parent` at `index` (clamped to the child count).
    pub fn insert_child(&mut self, parent: NodeId, child: NodeId, index: usize) -> SceneResult<()> {
        self.try_node(child)?;
        self.try_node(parent)?;
        if self.is_in_subtree(parent, child) {
            return Err(SceneError::CycleDetected {
                node: child,
                parent,
            });
        }
        self.detach(child)?;

        let parent_node = self.try_node_mut(parent)?;
        let index = index.min(parent_node.children.len());
        parent_node.children.insert(index, child);
        self.try_node_mut(child)?.parent = Some(parent);

        trace!(parent = %parent, child = %child, "attached child");
        self.emit(SceneEvent::ChildAdded { parent, child });
        Ok(())
    }

    /// Detach a node from its parent (or the scene top level). The node and
    /// its subtree stay in the arena.
    pub fn detach(&mut self, id: NodeId) -> SceneResult<()> {
        let parent = self.try_node(id)?.parent;
        match parent {
            Some(parent) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent) {
                    parent_node.children.retain(|c| *c != id);
                }
                self.try_node_mut(id)?.parent = None;
                trace!(parent = %parent, child = %id, "detached child");
                self.emit(SceneEvent::ChildRemoved { parent, child: id });
            }
            None => self.roots.retain(|r| *r != id),
        }
        Ok(())
    }

    /// Detach a node and destroy it together with its subtree and every
    /// attached component.
    pub fn remove_node(&mut self, id: NodeId) -> SceneResult<Node> {
        self.detach(id)?;
        let subtree = self.descendants(id);
        let mut removed_root = None;
        for node_id in subtree {
            if let Some(node) = self.nodes.remove(&node_id) {
                for component in &node.components {
                    self.components.remove(component);
                }
                if node_id == id {
                    removed_root = Some(node);
                }
            }
        }
        debug!(node = %id, "removed node subtree");
        removed_root.ok_or(SceneError::NodeNotFound(id))
    }

    /// Create a component from a type name and initial fields.
    pub fn add_component(
        &mut self,
        node: NodeId,
        type_name: impl Into<String>,
        fields: Fields,
    ) -> SceneResult<ComponentId> {
        self.attach_component(Component::new(node, type_name, fields))
    }

    /// Attach a fully built component to the node named by `component.node`.
    pub fn attach_component(&mut self, component: Component) -> SceneResult<ComponentId> {
        let node = component.node;
        let id = component.id;
        self.try_node_mut(node)?.components.push(id);
        self.components.insert(id, component);
        self.emit(SceneEvent::ComponentAdded {
            node,
            component: id,
        });
        Ok(id)
    }

    /// Remove a component from its node and the arena.
    pub fn remove_component(&mut self, id: ComponentId) -> SceneResult<Component> {
        let component = self
            .components
            .remove(&id)
            .ok_or(SceneError::ComponentNotFound(id))?;
        if let Some(node) = self.nodes.get_mut(&component.node) {
            node.components.retain(|c| *c != id);
        }
        self.emit(SceneEvent::ComponentRemoved {
            node: component.node,
            component: component.clone(),
        });
        Ok(component)
    }

    // ---------------------------------------------------------------
    // Properties
    // ---------------------------------------------------------------

    /// Read a field of a node or component.
    pub fn read_property(&self, target: Target, path: &PropertyPath) -> Option<Value> {
        read_field(self.fields_of(target)?, path)
    }

    /// Write a field without reporting a change.
    pub fn write_property(&mut self, target: Target, path: &PropertyPath, value: Value) -> SceneResult<()> {
        let written = self
            .fields_of_mut(target)
            .is_some_and(|fields| write_field(fields, path, value));
        if written {
            Ok(())
        } else {
            Err(SceneError::InvalidProperty {
                object: target.to_string(),
                path: path.clone(),
            })
        }
    }

    /// Write a node field and report the change.
    pub fn set_property(&mut self, node: NodeId, path: &PropertyPath, value: Value) -> SceneResult<()> {
        self.write_property(Target::Node(node), path, value)?;
        self.emit(SceneEvent::PropertyChanged {
            node,
            path: path.clone(),
        });
        Ok(())
    }

    /// Write a component field and report the change on its node.
    pub fn set_component_property(
        &mut self,
        component: ComponentId,
        path: &PropertyPath,
        value: Value,
    ) -> SceneResult<()> {
        self.write_property(Target::Component(component), path, value)?;
        let node = self.try_component(component)?.node;
        let index = self
            .component_index(component)
            .ok_or(SceneError::ComponentNotFound(component))?;
        self.emit(SceneEvent::PropertyChanged {
            node,
            path: PropertyPath::component_field(index, path),
        });
        Ok(())
    }

    /// Replace every field of a component and report a change of the whole
    /// component on its node.
    pub fn set_component_fields(&mut self, component: ComponentId, fields: Fields) -> SceneResult<()> {
        let entry = self
            .components
            .get_mut(&component)
            .ok_or(SceneError::ComponentNotFound(component))?;
        entry.fields = fields;
        let node = entry.node;
        let index = self
            .component_index(component)
            .ok_or(SceneError::ComponentNotFound(component))?;
        self.emit(SceneEvent::PropertyChanged {
            node,
            path: PropertyPath::component_field(index, &PropertyPath::new()),
        });
        Ok(())
    }

    /// Every reference held by any node or component field.
    pub fn referrers(&self) -> Vec<Referrer> {
        let mut out = Vec::new();
        let owners = self
            .nodes
            .values()
            .map(|n| (Target::Node(n.id), &n.fields))
            .chain(
                self.components
                    .values()
                    .map(|c| (Target::Component(c.id), &c.fields)),
            );
        for (owner, fields) in owners {
            for (name, value) in fields {
                value.visit_refs(&PropertyPath::from_segments([name.as_str()]), &mut |path, referenced| {
                    out.push(Referrer {
                        owner,
                        path: path.clone(),
                        referenced,
                    });
                });
            }
        }
        out
    }

    /// Rewrite references held by objects outside `skip`.
    pub fn remap_refs_outside(&mut self, skip: &HashSet<Target>, f: &mut dyn FnMut(Target) -> Value) {
        for node in self.nodes.values_mut() {
            if !skip.contains(&Target::Node(node.id)) {
                map_field_refs(&mut node.fields, f);
            }
        }
        for component in self.components.values_mut() {
            if !skip.contains(&Target::Component(component.id)) {
                map_field_refs(&mut component.fields, f);
            }
        }
    }

    // ---------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------

    fn emit(&mut self, event: SceneEvent) {
        if !self.events_muted {
            self.events.push(event);
        }
    }

    /// Take every queued event in emission order.
    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }

    /// Whether events are waiting to be drained.
    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Suppress (or resume) event reporting. Returns the previous setting.
    pub fn set_events_muted(&mut self, muted: bool) -> bool {
        std::mem::replace(&mut self.events_muted, muted)
    }

    /// Whether event reporting is suppressed.
    pub fn events_muted(&self) -> bool {
        self.events_muted
    }
}
