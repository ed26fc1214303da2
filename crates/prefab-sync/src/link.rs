//! Linking live nodes to templates and unlinking instances.

use std::collections::HashSet;

use tracing::info;

use prefab_overrides::{unmount_node, update_children_data, update_components_data, ChangeObserver, EditKind};
use prefab_scene::{InstanceMarker, InstanceRecord, OverrideStore, Scene};
use prefab_types::{AssetId, LocalId, LocalIdPath, NodeId};

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::PrefabSync;
use crate::scope::repair_local_ids;
use crate::templates::not_cached;

impl PrefabSync {
    /// Make `node` an instance of `template`, matching its children and
    /// components to the template's by position. Live content without a
    /// template counterpart becomes mounted.
    pub async fn link_to_template(&mut self, node: NodeId, template: AssetId) -> bool {
        match self.try_link(node, template).await {
            Ok(()) => true,
            Err(e) => {
                e.log("link_to_template");
                false
            }
        }
    }

    async fn try_link(&mut self, node: NodeId, template: AssetId) -> SyncResult<()> {
        self.scene.try_node(node)?;
        self.invalidate_template(template);
        self.ensure_template(template, Some(node)).await?;
        self.process_events();

        let muted = self.scene.set_events_muted(true);
        let outcome = self.link_locked(node, template);
        self.scene.set_events_muted(muted);
        let rekeyed = outcome?;

        self.unindex_instance(node);
        self.index_instance(template, node);
        self.seed_reserved_overrides(node)?;
        info!(node = %node, template = %template, rekeyed, "linked node to template");
        Ok(())
    }

    fn link_locked(&mut self, node: NodeId, template: AssetId) -> SyncResult<usize> {
        let cached = self
            .templates
            .get(&template)
            .ok_or_else(|| not_cached(template, Some(node)))?;
        let template_local = cached
            .scene
            .node(cached.root)
            .and_then(|n| n.local_id())
            .cloned()
            .unwrap_or_else(LocalId::generate);

        self.notices.before_change(Some(node), EditKind::Marker);
        let entry = self.scene.try_node_mut(node)?;
        let previous = entry.marker.take();
        let scope = previous
            .as_ref()
            .and_then(|m| m.root)
            .filter(|r| *r != node)
            .unwrap_or(node);
        let mut record = previous
            .and_then(|m| m.instance)
            .unwrap_or_else(|| InstanceRecord::new(LocalId::generate()));
        let address = LocalIdPath::single(template_local.clone());
        record.overrides.property_overrides = std::mem::take(&mut record.overrides)
            .property_overrides
            .into_iter()
            .filter(|o| {
                o.target_path.len() == 1
                    && o.property_path.len() == 1
                    && o.property_path.first().is_some_and(|f| self.config.is_reserved(f))
            })
            .map(|mut o| {
                o.target_path = address.clone();
                o
            })
            .collect();

        let mut marker = InstanceMarker::member_of(scope, Some(template), template_local);
        marker.instance = Some(record);
        entry.marker = Some(marker);
        sync_prefab_info(&mut self.scene, &cached.scene, node, cached.root, node, template);
        self.notices.changed(Some(node), EditKind::Marker);

        let rekeyed = repair_local_ids(&mut self.scene, node, &HashSet::new()).len();
        for id in self.scene.descendants(node) {
            update_children_data(&mut self.scene, &self.notices, id)?;
            update_components_data(&mut self.scene, &self.notices, id)?;
        }
        Ok(rekeyed)
    }

    /// Strip the instance markers from the subtree of `node`. Nested
    /// instances are kept as independent instances unless `recursive` is
    /// set. Only instance roots (or markers without a template) can be
    /// unlinked.
    pub fn unlink_from_template(&mut self, node: NodeId, recursive: bool) -> bool {
        match self.try_unlink(node, recursive) {
            Ok(stripped) => {
                info!(node = %node, recursive, stripped, "unlinked instance");
                true
            }
            Err(e) => {
                e.log("unlink_from_template");
                false
            }
        }
    }

    fn try_unlink(&mut self, node: NodeId, recursive: bool) -> SyncResult<usize> {
        let unlinkable = self
            .scene
            .try_node(node)?
            .marker
            .as_ref()
            .is_some_and(|m| m.is_instance_root() || m.template.is_none());
        if !unlinkable {
            return Err(SyncError::NotAnInstance(node));
        }
        self.process_events();
        self.cancel_pending_under(node);

        let muted = self.scene.set_events_muted(true);
        let outcome = self.unlink_locked(node, recursive);
        self.scene.set_events_muted(muted);
        let (stripped, released) = outcome?;

        for root in released {
            self.unindex_instance(root);
        }
        Ok(stripped)
    }

    /// Returns how many nodes lost their marker and the instance roots that
    /// stopped being instances.
    fn unlink_locked(&mut self, node: NodeId, recursive: bool) -> SyncResult<(usize, Vec<NodeId>)> {
        unmount_node(&mut self.scene, &self.notices, node)?;
        self.notices.before_change(Some(node), EditKind::Marker);

        let mut stripped = 0;
        let mut released = vec![node];
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.scene.node_mut(id) else {
                continue;
            };
            if id != node && entry.is_instance_root() && !recursive {
                if let Some(marker) = entry.marker.as_mut() {
                    marker.root = Some(id);
                }
                entry.extras.mounted_root = None;
                continue;
            }
            if entry.is_instance_root() && id != node {
                released.push(id);
            }
            if entry.marker.take().is_some() {
                stripped += 1;
            }
            entry.extras.mounted_root = None;
            let components = entry.components.clone();
            stack.extend(entry.children.iter().copied());
            for component in components {
                if let Some(c) = self.scene.component_mut(component) {
                    c.local_id = None;
                    c.extras.mounted_root = None;
                }
            }
        }
        self.notices.changed(Some(node), EditKind::Marker);

        if let Some(parent) = self.scene.node(node).and_then(|n| n.parent) {
            update_children_data(&mut self.scene, &self.notices, parent)?;
        }
        Ok((stripped, released))
    }
}

/// Copy local ids from the template subtree at `template_node` onto the
/// live subtree at `live`, matching children and components by position.
/// Nested template instances become nested instances of `scope`.
fn sync_prefab_info(
    scene: &mut Scene,
    template_scene: &Scene,
    live: NodeId,
    template_node: NodeId,
    scope: NodeId,
    template: AssetId,
) {
    let Some(source) = template_scene.node(template_node) else {
        return;
    };
    let live_components = scene.node(live).map(|n| n.components.clone()).unwrap_or_default();
    for (source_id, live_id) in source.components.iter().zip(live_components) {
        let Some(source_component) = template_scene.component(*source_id) else {
            continue;
        };
        if let Some(component) = scene.component_mut(live_id) {
            if component.type_name == source_component.type_name {
                component.local_id = source_component.local_id.clone();
                component.extras.mounted_root = None;
            }
        }
    }

    let live_children = scene.node(live).map(|n| n.children.clone()).unwrap_or_default();
    for (source_child, live_child) in source.children.iter().zip(live_children) {
        let Some(source_marker) = template_scene.node(*source_child).and_then(|n| n.marker.as_ref()) else {
            continue;
        };
        let (marker, child_scope, child_template) = match source_marker.instance.as_ref() {
            Some(instance) => {
                let mut marker = source_marker.clone();
                marker.root = Some(scope);
                marker.instance = Some(InstanceRecord {
                    local_id: instance.local_id.clone(),
                    overrides: OverrideStore {
                        property_overrides: instance.overrides.property_overrides.clone(),
                        removed_components: instance.overrides.removed_components.clone(),
                        ..OverrideStore::default()
                    },
                });
                let nested_template = marker.template.unwrap_or(template);
                (marker, live_child, nested_template)
            }
            None => (
                InstanceMarker::member_of(scope, Some(template), source_marker.local_id.clone()),
                scope,
                template,
            ),
        };
        if let Some(entry) = scene.node_mut(live_child) {
            entry.marker = Some(marker);
            entry.extras.mounted_root = None;
        }
        sync_prefab_info(scene, template_scene, live_child, *source_child, child_scope, child_template);
    }
}
