//! Template documents: serialized node subtrees.
//!
//! A [`TemplateDocument`] is produced from a live subtree by
//! [`Scene::serialize_subtree`] and materialized again by
//! [`Scene::instantiate`], which assigns fresh identities to every node and
//! component and remaps every reference between them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use prefab_types::{ComponentId, NodeId, PropertyPath, Target};

use crate::error::{SceneError, SceneResult};
use crate::marker::{OverrideStore, TargetOverride};
use crate::node::{Component, Node};
use crate::scene::Scene;
use crate::value::{map_field_refs, Value};

/// A persisted node subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateDocument {
    pub root: NodeId,
    /// Nodes in parent-before-child order; `nodes[0]` is the root.
    pub nodes: Vec<Node>,
    pub components: Vec<Component>,
    /// Cross-boundary references between members of the template.
    #[serde(default)]
    pub target_overrides: Vec<TargetOverride>,
}

impl TemplateDocument {
    /// Node of the document with id `id`.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Mutable node of the document with id `id`.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// The document's root node.
    pub fn root_node(&self) -> Option<&Node> {
        self.node(self.root)
    }

    /// Mutable root node.
    pub fn root_node_mut(&mut self) -> Option<&mut Node> {
        let root = self.root;
        self.node_mut(root)
    }

    /// Component of the document with id `id`.
    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> SceneResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document from JSON.
    pub fn from_json(json: &str) -> SceneResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// BLAKE3 hash of the canonical JSON encoding, hex encoded.
    pub fn content_hash(&self) -> SceneResult<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
    }
}

/// A reference that pointed outside a serialized subtree and was nulled.
#[derive(Clone, Debug, PartialEq)]
pub struct ClearedRef {
    pub owner: Target,
    pub path: PropertyPath,
    pub value: Value,
}

/// Old-to-new identity mapping produced by instantiation.
#[derive(Clone, Debug, Default)]
pub struct IdRemap {
    pub nodes: HashMap<NodeId, NodeId>,
    pub components: HashMap<ComponentId, ComponentId>,
}

impl IdRemap {
    /// Live id created for document node `id`.
    pub fn node(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).copied()
    }

    /// Live id created for document component `id`.
    pub fn component(&self, id: ComponentId) -> Option<ComponentId> {
        self.components.get(&id).copied()
    }

    /// Live counterpart of a document target.
    pub fn target(&self, target: Target) -> Option<Target> {
        match target {
            Target::Node(id) => self.node(id).map(Target::Node),
            Target::Component(id) => self.component(id).map(Target::Component),
        }
    }

    /// Map a target, leaving identities outside the mapping untouched.
    pub fn target_or_keep(&self, target: Target) -> Target {
        self.target(target).unwrap_or(target)
    }

    /// Rewrite document references in `value` to live ones.
    pub fn remap_value(&self, value: &mut Value) {
        value.map_refs(&mut |target| Value::from_target(self.target_or_keep(target)));
    }

    /// Rewrite the source and target of `entry` to live ids.
    pub fn remap_target_override(&self, entry: &mut TargetOverride) {
        entry.source = self.target_or_keep(entry.source);
        entry.target = entry.target.map(|t| self.node(t).unwrap_or(t));
    }

    /// Rewrite every live id held by `store`.
    pub fn remap_store(&self, store: &mut OverrideStore) {
        for entry in &mut store.property_overrides {
            self.remap_value(&mut entry.value);
        }
        for entry in &mut store.target_overrides {
            self.remap_target_override(entry);
        }
        for bucket in &mut store.mounted_children {
            for node in &mut bucket.nodes {
                *node = self.node(*node).unwrap_or(*node);
            }
        }
        for bucket in &mut store.mounted_components {
            for component in &mut bucket.components {
                *component = self.component(*component).unwrap_or(*component);
            }
        }
    }
}

/// Result of materializing a template document.
#[derive(Clone, Debug)]
pub struct Instantiated {
    pub root: NodeId,
    pub remap: IdRemap,
    /// The document's target overrides, expressed with the new identities.
    pub target_overrides: Vec<TargetOverride>,
}

impl Scene {
    /// Snapshot the subtree under `root` as a template document.
    ///
    /// References to objects outside the subtree are replaced with
    /// [`Value::Null`] and reported as [`ClearedRef`]s so the caller can
    /// restore them. The document root is detached in the snapshot.
    pub fn serialize_subtree(&self, root: NodeId) -> SceneResult<(TemplateDocument, Vec<ClearedRef>)> {
        self.try_node(root)?;
        let node_ids = self.descendants(root);
        let inside_nodes: HashSet<NodeId> = node_ids.iter().copied().collect();
        let component_ids = self.subtree_components(root);
        let inside_components: HashSet<ComponentId> = component_ids.iter().copied().collect();

        let is_inside = |target: Target| match target {
            Target::Node(id) => inside_nodes.contains(&id),
            Target::Component(id) => inside_components.contains(&id),
        };

        let mut cleared = Vec::new();
        let mut clear_outside = |owner: Target, fields: &mut crate::value::Fields| {
            let mut outside = Vec::new();
            for (name, value) in fields.iter() {
                value.visit_refs(&PropertyPath::from_segments([name.as_str()]), &mut |path, referenced| {
                    if !is_inside(referenced) {
                        outside.push((path.clone(), referenced));
                    }
                });
            }
            for (path, referenced) in outside {
                crate::value::write_field(fields, &path, Value::Null);
                cleared.push(ClearedRef {
                    owner,
                    path,
                    value: Value::from_target(referenced),
                });
            }
        };

        let mut nodes = Vec::with_capacity(node_ids.len());
        for id in &node_ids {
            let mut node = self.try_node(*id)?.clone();
            if *id == root {
                node.parent = None;
            }
            clear_outside(Target::Node(*id), &mut node.fields);
            nodes.push(node);
        }

        let mut components = Vec::with_capacity(component_ids.len());
        for id in &component_ids {
            let mut component = self.try_component(*id)?.clone();
            clear_outside(Target::Component(*id), &mut component.fields);
            components.push(component);
        }

        debug!(
            root = %root,
            nodes = nodes.len(),
            components = components.len(),
            cleared = cleared.len(),
            "serialized subtree"
        );

        Ok((
            TemplateDocument {
                root,
                nodes,
                components,
                target_overrides: Vec::new(),
            },
            cleared,
        ))
    }

    /// Materialize a document as a detached subtree with fresh identities.
    ///
    /// No change events are reported; the caller decides where the new root
    /// goes.
    pub fn instantiate(&mut self, doc: &TemplateDocument) -> SceneResult<Instantiated> {
        if doc.root_node().is_none() {
            return Err(SceneError::MissingRoot(doc.root));
        }

        let mut remap = IdRemap::default();
        for node in &doc.nodes {
            remap.nodes.insert(node.id, NodeId::new());
        }
        for component in &doc.components {
            remap.components.insert(component.id, ComponentId::new());
        }

        let mut map_refs = |target: Target| Value::from_target(remap.target_or_keep(target));

        let mut nodes = Vec::with_capacity(doc.nodes.len());
        for source in &doc.nodes {
            let mut node = source.clone();
            node.id = remap.node(source.id).unwrap_or(source.id);
            node.parent = match source.parent {
                Some(parent) if source.id != doc.root => remap.node(parent),
                _ => None,
            };
            node.children = source.children.iter().filter_map(|c| remap.node(*c)).collect();
            node.components = source
                .components
                .iter()
                .filter_map(|c| remap.component(*c))
                .collect();
            map_field_refs(&mut node.fields, &mut map_refs);
            if let Some(marker) = node.marker.as_mut() {
                marker.root = marker.root.map(|r| remap.node(r).unwrap_or(r));
                if let Some(instance) = marker.instance.as_mut() {
                    remap.remap_store(&mut instance.overrides);
                }
            }
            node.extras.mounted_root = node
                .extras
                .mounted_root
                .map(|r| remap.node(r).unwrap_or(r));
            nodes.push(node);
        }

        let mut components = Vec::with_capacity(doc.components.len());
        for source in &doc.components {
            let mut component = source.clone();
            component.id = remap.component(source.id).unwrap_or(source.id);
            component.node = remap.node(source.node).unwrap_or(source.node);
            map_field_refs(&mut component.fields, &mut map_refs);
            component.extras.mounted_root = component
                .extras
                .mounted_root
                .map(|r| remap.node(r).unwrap_or(r));
            components.push(component);
        }

        for node in nodes {
            self.insert_raw_node(node);
        }
        for component in components {
            self.insert_raw_component(component);
        }

        let mut target_overrides = doc.target_overrides.clone();
        for entry in &mut target_overrides {
            remap.remap_target_override(entry);
        }

        let root = remap.node(doc.root).ok_or(SceneError::MissingRoot(doc.root))?;
        debug!(root = %root, nodes = remap.nodes.len(), "instantiated template document");
        Ok(Instantiated {
            root,
            remap,
            target_overrides,
        })
    }
}
