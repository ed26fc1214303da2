//! Instance markers and the override records they carry.
//!
//! A node that originated from a template carries an [`InstanceMarker`].
//! Instance roots additionally carry an [`InstanceRecord`] whose
//! [`OverrideStore`] holds every divergence of the instance from its
//! template, keyed by [`LocalIdPath`].

use serde::{Deserialize, Serialize};

use prefab_types::{AssetId, ComponentId, LocalId, LocalIdPath, NodeId, PropertyPath, Target};

use crate::value::Value;

/// Template membership of a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceMarker {
    /// Template this node was instantiated from.
    pub template: Option<AssetId>,
    /// Root of the instantiation this node is a member of. Outermost roots
    /// point at themselves; nested instance roots point at the enclosing
    /// root.
    pub root: Option<NodeId>,
    /// Identity of this node inside its template.
    pub local_id: LocalId,
    /// Present only on instance roots.
    pub instance: Option<InstanceRecord>,
}

impl InstanceMarker {
    /// A marker with no template and no root.
    pub fn new(local_id: LocalId) -> Self {
        Self {
            template: None,
            root: None,
            local_id,
            instance: None,
        }
    }

    /// Marker of a member of the instance rooted at `root`.
    pub fn member_of(root: NodeId, template: Option<AssetId>, local_id: LocalId) -> Self {
        Self {
            template,
            root: Some(root),
            local_id,
            instance: None,
        }
    }

    /// Whether the marker carries an override record.
    pub fn is_instance_root(&self) -> bool {
        self.instance.is_some()
    }
}

/// Per-instance record attached to an instance root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Address segment of this instance when it is nested in another
    /// template.
    pub local_id: LocalId,
    pub overrides: OverrideStore,
}

impl InstanceRecord {
    /// A record with no overrides.
    pub fn new(local_id: LocalId) -> Self {
        Self {
            local_id,
            overrides: OverrideStore::default(),
        }
    }
}

/// Editor-only bookkeeping carried by every node and component.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorExtras {
    /// Instance root under whose override set this object is recorded as
    /// mounted content.
    pub mounted_root: Option<NodeId>,
}

/// A recorded field-level divergence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyOverride {
    pub target_path: LocalIdPath,
    pub property_path: PropertyPath,
    pub value: Value,
}

/// A cross-boundary reference, re-expressed relative to the instance that
/// contains the referenced object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetOverride {
    /// Object holding the reference.
    pub source: Target,
    /// Address of `source` relative to the owning root, when the source is
    /// template content.
    pub source_address: Option<LocalIdPath>,
    /// Instance root containing the referenced object.
    pub target: Option<NodeId>,
    /// Address of the referenced object relative to `target`.
    pub target_address: LocalIdPath,
    pub property_path: PropertyPath,
}

impl TargetOverride {
    /// Whether this entry describes the reference held at `property_path` of
    /// the given source.
    pub fn matches_source(
        &self,
        source: Target,
        source_address: Option<&LocalIdPath>,
        property_path: &PropertyPath,
    ) -> bool {
        if self.property_path != *property_path {
            return false;
        }
        match (self.source_address.as_ref(), source_address) {
            (Some(a), Some(b)) => a == b,
            _ => self.source == source,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedComponent {
    pub target_address: LocalIdPath,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedChildren {
    /// Address of the template parent the nodes are attached under.
    pub target_address: LocalIdPath,
    pub nodes: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedComponents {
    /// Address of the template node the components are attached to.
    pub target_address: LocalIdPath,
    pub components: Vec<ComponentId>,
}

/// Every divergence of one instance from its template.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideStore {
    pub property_overrides: Vec<PropertyOverride>,
    pub target_overrides: Vec<TargetOverride>,
    pub removed_components: Vec<RemovedComponent>,
    pub mounted_children: Vec<MountedChildren>,
    pub mounted_components: Vec<MountedComponents>,
}

impl OverrideStore {
    /// Whether nothing diverges from the template.
    pub fn is_empty(&self) -> bool {
        self.property_overrides.is_empty()
            && self.target_overrides.is_empty()
            && self.removed_components.is_empty()
            && self.mounted_children.is_empty()
            && self.mounted_components.is_empty()
    }

    // ---------------------------------------------------------------
    // Property overrides
    // ---------------------------------------------------------------

    /// Property override for the pair, if any.
    pub fn property_override(
        &self,
        target_path: &LocalIdPath,
        property_path: &PropertyPath,
    ) -> Option<&PropertyOverride> {
        self.property_overrides
            .iter()
            .find(|o| o.target_path == *target_path && o.property_path == *property_path)
    }

    /// Existing entry for the pair, or a new one holding [`Value::Null`].
    pub fn get_or_create_property_override(
        &mut self,
        target_path: &LocalIdPath,
        property_path: &PropertyPath,
    ) -> &mut PropertyOverride {
        let index = match self
            .property_overrides
            .iter()
            .position(|o| o.target_path == *target_path && o.property_path == *property_path)
        {
            Some(index) => index,
            None => {
                self.property_overrides.push(PropertyOverride {
                    target_path: target_path.clone(),
                    property_path: property_path.clone(),
                    value: Value::Null,
                });
                self.property_overrides.len() - 1
            }
        };
        &mut self.property_overrides[index]
    }

    /// Remove and return the property override for the pair.
    pub fn remove_property_override(
        &mut self,
        target_path: &LocalIdPath,
        property_path: &PropertyPath,
    ) -> Option<PropertyOverride> {
        let index = self
            .property_overrides
            .iter()
            .position(|o| o.target_path == *target_path && o.property_path == *property_path)?;
        Some(self.property_overrides.remove(index))
    }

    /// Whether a property override already exists for exactly this pair.
    pub fn is_path_overridden(&self, target_path: &LocalIdPath, property_path: &PropertyPath) -> bool {
        self.property_override(target_path, property_path).is_some()
    }

    /// Remove overrides on `target_path` whose property path starts with
    /// `prefix` and satisfies `stale`. Returns how many were removed.
    pub fn prune_property_overrides(
        &mut self,
        target_path: &LocalIdPath,
        prefix: &PropertyPath,
        mut stale: impl FnMut(&PropertyPath) -> bool,
    ) -> usize {
        let before = self.property_overrides.len();
        self.property_overrides.retain(|o| {
            !(o.target_path == *target_path
                && o.property_path.starts_with(prefix)
                && stale(&o.property_path))
        });
        before - self.property_overrides.len()
    }

    // ---------------------------------------------------------------
    // Target overrides
    // ---------------------------------------------------------------

    /// Target override for the source field, if any.
    pub fn target_override(
        &self,
        source: Target,
        source_address: Option<&LocalIdPath>,
        property_path: &PropertyPath,
    ) -> Option<&TargetOverride> {
        self.target_overrides
            .iter()
            .find(|o| o.matches_source(source, source_address, property_path))
    }

    /// Existing entry for the source/property pair, or a new unresolved one.
    pub fn get_or_create_target_override(
        &mut self,
        source: Target,
        source_address: Option<&LocalIdPath>,
        property_path: &PropertyPath,
    ) -> &mut TargetOverride {
        let index = match self
            .target_overrides
            .iter()
            .position(|o| o.matches_source(source, source_address, property_path))
        {
            Some(index) => index,
            None => {
                self.target_overrides.push(TargetOverride {
                    source,
                    source_address: source_address.cloned(),
                    target: None,
                    target_address: LocalIdPath::new(),
                    property_path: property_path.clone(),
                });
                self.target_overrides.len() - 1
            }
        };
        &mut self.target_overrides[index]
    }

    /// Remove and return the target override for the source field.
    pub fn remove_target_override(
        &mut self,
        source: Target,
        source_address: Option<&LocalIdPath>,
        property_path: &PropertyPath,
    ) -> Option<TargetOverride> {
        let index = self
            .target_overrides
            .iter()
            .position(|o| o.matches_source(source, source_address, property_path))?;
        Some(self.target_overrides.remove(index))
    }

    /// Remove every target override whose source is addressed by
    /// `source_address` and whose property path equals `property_path`.
    pub fn remove_target_overrides_at(
        &mut self,
        source_address: &LocalIdPath,
        property_path: &PropertyPath,
    ) -> usize {
        let before = self.target_overrides.len();
        self.target_overrides.retain(|o| {
            !(o.source_address.as_ref() == Some(source_address) && o.property_path == *property_path)
        });
        before - self.target_overrides.len()
    }

    /// Whether a target override exists for the source field.
    pub fn is_path_in_target_overrides(
        &self,
        source: Target,
        source_address: Option<&LocalIdPath>,
        property_path: &PropertyPath,
    ) -> bool {
        self.target_override(source, source_address, property_path).is_some()
    }

    // ---------------------------------------------------------------
    // Removed components
    // ---------------------------------------------------------------

    /// Record a removed component. Returns `false` if already recorded.
    pub fn add_removed_component(&mut self, target_address: LocalIdPath) -> bool {
        if self.removed_components.iter().any(|r| r.target_address == target_address) {
            return false;
        }
        self.removed_components.push(RemovedComponent { target_address });
        true
    }

    /// Forget a removed component. Returns whether it was recorded.
    pub fn remove_removed_component(&mut self, target_address: &LocalIdPath) -> bool {
        let before = self.removed_components.len();
        self.removed_components.retain(|r| r.target_address != *target_address);
        before != self.removed_components.len()
    }

    // ---------------------------------------------------------------
    // Mounted content
    // ---------------------------------------------------------------

    /// Mounted children under the node at `target_address`.
    pub fn mounted_children(&self, target_address: &LocalIdPath) -> Option<&MountedChildren> {
        self.mounted_children
            .iter()
            .find(|m| m.target_address == *target_address)
    }

    /// Mounted children bucket for `target_address`, created if missing.
    pub fn get_or_create_mounted_children(&mut self, target_address: &LocalIdPath) -> &mut MountedChildren {
        let index = match self
            .mounted_children
            .iter()
            .position(|m| m.target_address == *target_address)
        {
            Some(index) => index,
            None => {
                self.mounted_children.push(MountedChildren {
                    target_address: target_address.clone(),
                    nodes: Vec::new(),
                });
                self.mounted_children.len() - 1
            }
        };
        &mut self.mounted_children[index]
    }

    /// Remove the mounted children bucket for `target_address`.
    pub fn remove_mounted_children(&mut self, target_address: &LocalIdPath) -> Option<MountedChildren> {
        let index = self
            .mounted_children
            .iter()
            .position(|m| m.target_address == *target_address)?;
        Some(self.mounted_children.remove(index))
    }

    /// Mounted components on the node at `target_address`.
    pub fn mounted_components(&self, target_address: &LocalIdPath) -> Option<&MountedComponents> {
        self.mounted_components
            .iter()
            .find(|m| m.target_address == *target_address)
    }

    /// Mounted components bucket for `target_address`, created if missing.
    pub fn get_or_create_mounted_components(
        &mut self,
        target_address: &LocalIdPath,
    ) -> &mut MountedComponents {
        let index = match self
            .mounted_components
            .iter()
            .position(|m| m.target_address == *target_address)
        {
            Some(index) => index,
            None => {
                self.mounted_components.push(MountedComponents {
                    target_address: target_address.clone(),
                    components: Vec::new(),
                });
                self.mounted_components.len() - 1
            }
        };
        &mut self.mounted_components[index]
    }

    /// Remove the mounted components bucket for `target_address`.
    pub fn remove_mounted_components(&mut self, target_address: &LocalIdPath) -> Option<MountedComponents> {
        let index = self
            .mounted_components
            .iter()
            .position(|m| m.target_address == *target_address)?;
        Some(self.mounted_components.remove(index))
    }

    /// Every mounted node across all buckets.
    pub fn all_mounted_nodes(&self) -> Vec<NodeId> {
        self.mounted_children
            .iter()
            .flat_map(|m| m.nodes.iter().copied())
            .collect()
    }

    /// Every mounted component across all buckets.
    pub fn all_mounted_components(&self) -> Vec<ComponentId> {
        self.mounted_components
            .iter()
            .flat_map(|m| m.components.iter().copied())
            .collect()
    }

    /// Drop `node` from whichever bucket lists it, removing the bucket if it
    /// becomes empty. Returns the bucket address it was found under.
    pub fn forget_mounted_node(&mut self, node: NodeId) -> Option<LocalIdPath> {
        let index = self.mounted_children.iter().position(|m| m.nodes.contains(&node))?;
        let bucket = &mut self.mounted_children[index];
        bucket.nodes.retain(|n| *n != node);
        let address = bucket.target_address.clone();
        if bucket.nodes.is_empty() {
            self.mounted_children.remove(index);
        }
        Some(address)
    }

    /// Component counterpart of [`forget_mounted_node`](Self::forget_mounted_node).
    pub fn forget_mounted_component(&mut self, component: ComponentId) -> Option<LocalIdPath> {
        let index = self
            .mounted_components
            .iter()
            .position(|m| m.components.contains(&component))?;
        let bucket = &mut self.mounted_components[index];
        bucket.components.retain(|c| *c != component);
        let address = bucket.target_address.clone();
        if bucket.components.is_empty() {
            self.mounted_components.remove(index);
        }
        Some(address)
    }
}
