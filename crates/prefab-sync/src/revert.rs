//! Template to instance: discard an instance's divergences.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use prefab_overrides::{address_of, apply_target_overrides, edit, EditKind, TargetMap};
use prefab_scene::{Component, PropertyOverride, Scene};
use prefab_types::{AssetId, LocalIdPath, NodeId, PropertyPath, Target};

use crate::error::SyncResult;
use crate::host::reload_scene;
use crate::orchestrator::{is_reserved_override, PrefabSync};
use crate::scope::remap_template_refs;
use crate::templates::{not_cached, CachedTemplate};

impl PrefabSync {
    /// Copy template values over every overridden field of the instance
    /// rooted at `root`, drop its mounted content and restore its removed
    /// components. Reserved root overrides are kept and re-applied.
    pub async fn revert_to_template(&mut self, root: NodeId) -> bool {
        match self.try_revert(root).await {
            Ok(()) => true,
            Err(e) => {
                e.log("revert_to_template");
                false
            }
        }
    }

    async fn try_revert(&mut self, root: NodeId) -> SyncResult<()> {
        self.flush().await;
        let template = self.template_of(root)?;
        self.cancel_pending_under(root);
        self.templates.remove(&template);
        self.ensure_template(template, Some(root)).await?;

        let muted = self.scene.set_events_muted(true);
        let outcome = self.revert_locked(root, template);
        self.scene.set_events_muted(muted);
        let restored = outcome?;

        if self.config.reload_after_revert {
            reload_scene(self.host.as_ref(), self.config.reload_timeout()).await;
        }
        info!(root = %root, template = %template, fields = restored, "reverted instance to template");
        Ok(())
    }

    /// Returns how many fields were rewritten.
    fn revert_locked(&mut self, root: NodeId, template: AssetId) -> SyncResult<usize> {
        let cached = self
            .templates
            .get(&template)
            .ok_or_else(|| not_cached(template, Some(root)))?;
        let root_local = self.root_local_id(root)?;
        let live = TargetMap::build(&self.scene, root);
        let overrides = prefab_overrides::store(&self.scene, root)?.clone();

        let mut written = 0;
        let (reserved, divergent): (Vec<PropertyOverride>, Vec<PropertyOverride>) = overrides
            .property_overrides
            .iter()
            .cloned()
            .partition(|o| is_reserved_override(&self.config, &root_local, o));
        for entry in &reserved {
            match self
                .scene
                .write_property(Target::Node(root), &entry.property_path, entry.value.clone())
            {
                Ok(()) => written += 1,
                Err(e) => warn!(path = %entry.property_path, error = %e, "could not restore reserved field"),
            }
        }

        let fields: BTreeSet<(LocalIdPath, String)> = divergent
            .iter()
            .filter_map(|o| Some((o.target_path.clone(), o.property_path.first()?.to_string())))
            .chain(
                overrides
                    .target_overrides
                    .iter()
                    .filter_map(|o| Some((o.source_address.clone()?, o.property_path.first()?.to_string()))),
            )
            .collect();
        for (address, field) in fields {
            if copy_template_field(&mut self.scene, cached, &live, &address, &field) {
                written += 1;
            }
        }

        for node in overrides.all_mounted_nodes() {
            if self.scene.contains(Target::Node(node)) {
                self.scene.remove_node(node)?;
            }
        }
        for component in overrides.all_mounted_components() {
            if self.scene.component(component).is_some() {
                self.scene.remove_component(component)?;
            }
        }
        for entry in &overrides.removed_components {
            restore_component(&mut self.scene, cached, &live, &entry.target_address);
        }

        let template_targets: Vec<_> = cached
            .target_overrides
            .iter()
            .filter_map(|o| cached.remap_target_override(o, &live))
            .collect();
        self.clear_divergences(root)?;
        edit(&mut self.scene, root, &self.notices, EditKind::TargetOverrides, |s| {
            s.target_overrides = template_targets
        })?;
        written += apply_target_overrides(&mut self.scene, Some(root))?;
        Ok(written)
    }
}

/// Overwrite the top-level `field` of the object at `address` with the
/// template's value. Array fields are replaced whole.
fn copy_template_field(
    scene: &mut Scene,
    cached: &CachedTemplate,
    live: &TargetMap,
    address: &LocalIdPath,
    field: &str,
) -> bool {
    let (Some(target), Some(counterpart)) = (live.resolve(address), cached.view().counterpart(address)) else {
        debug!(address = %address, "override address no longer resolves");
        return false;
    };
    let path = PropertyPath::from_segments([field]);
    let Some(mut value) = cached.scene.read_property(counterpart, &path) else {
        return false;
    };
    remap_template_refs(&mut value, &cached.scene, cached.root, live);
    match scene.write_property(target, &path, value) {
        Ok(()) => true,
        Err(e) => {
            warn!(object = %target, field, error = %e, "could not revert field");
            false
        }
    }
}

/// Clone the template component at `address` back onto its live node, at
/// its template position.
fn restore_component(scene: &mut Scene, cached: &CachedTemplate, live: &TargetMap, address: &LocalIdPath) {
    let Some(Target::Component(source_id)) = cached.view().counterpart(address) else {
        debug!(address = %address, "removed component is gone from the template");
        return;
    };
    let Some(source) = cached.scene.component(source_id) else {
        return;
    };
    let node = address_of(&cached.scene, cached.root, Target::Node(source.node))
        .and_then(|a| live.resolve(&a))
        .and_then(|t| t.as_node());
    let Some(node) = node else {
        debug!(address = %address, "owner of removed component does not resolve");
        return;
    };
    let index = cached
        .scene
        .node(source.node)
        .and_then(|n| n.components.iter().position(|c| *c == source_id))
        .unwrap_or(usize::MAX);

    let mut fields = source.fields.clone();
    for value in fields.values_mut() {
        remap_template_refs(value, &cached.scene, cached.root, live);
    }
    let mut component = Component::new(node, source.type_name.clone(), fields);
    component.local_id = source.local_id.clone();
    let id = match scene.attach_component(component) {
        Ok(id) => id,
        Err(e) => {
            warn!(address = %address, error = %e, "could not restore removed component");
            return;
        }
    };
    if let Some(entry) = scene.node_mut(node) {
        entry.components.retain(|c| *c != id);
        let at = index.min(entry.components.len());
        entry.components.insert(at, id);
    }
}

#[cfg(test)]
mod tests {
    use prefab_overrides::{is_path_overridden, store};
    use prefab_scene::Value;
    use prefab_types::{LocalIdPath, Target};

    use crate::fixtures::*;

    #[tokio::test]
    async fn revert_restores_fields_and_drops_mounted_content() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);
        let twig = h.sync.scene_mut().create_node("Twig");
        h.sync.scene_mut().add_child(branch, twig).unwrap();
        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Bough"))
            .unwrap();
        h.sync.flush().await;

        assert!(h.sync.revert_to_template(root).await);
        assert_eq!(h.name(branch), Some(Value::str("Branch")));
        assert!(!h.sync.scene().contains(Target::Node(twig)));
        let overrides = store(h.sync.scene(), root).unwrap();
        assert!(overrides.mounted_children.is_empty());
        assert_eq!(overrides.property_overrides.len(), 4);
    }

    #[tokio::test]
    async fn unflushed_edit_is_reverted_too() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);
        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Bough"))
            .unwrap();

        assert!(h.sync.revert_to_template(root).await);
        assert_eq!(h.name(branch), Some(Value::str("Branch")));
        assert_eq!(h.sync.pending_changes(), 0);
        h.sync.flush().await;
        assert_eq!(store(h.sync.scene(), root).unwrap().property_overrides.len(), 4);
    }

    #[tokio::test]
    async fn reserved_root_fields_survive() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        h.sync
            .scene_mut()
            .set_property(root, &prop("name"), Value::str("Oak"))
            .unwrap();
        h.sync.flush().await;

        assert!(h.sync.revert_to_template(root).await);
        assert_eq!(h.name(root), Some(Value::str("Oak")));
        let address = LocalIdPath::single(lid("tree-root"));
        assert!(is_path_overridden(h.sync.scene(), root, &address, &prop("name")));
    }

    #[tokio::test]
    async fn removed_component_comes_back() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);
        let leaf = h.sync.scene().node(branch).unwrap().components[0];
        h.sync.scene_mut().remove_component(leaf).unwrap();
        h.sync.process_events();
        assert_eq!(store(h.sync.scene(), root).unwrap().removed_components.len(), 1);

        assert!(h.sync.revert_to_template(root).await);
        let restored = h.sync.scene().node(branch).unwrap().components[0];
        let component = h.sync.scene().component(restored).unwrap();
        assert_eq!(component.local_id, Some(lid("leaf")));
        assert_eq!(
            h.sync.scene().read_property(Target::Component(restored), &prop("size")),
            Some(Value::Int(1))
        );
        assert!(store(h.sync.scene(), root).unwrap().removed_components.is_empty());
    }

    #[tokio::test]
    async fn apply_then_revert_keeps_applied_values() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);
        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Bough"))
            .unwrap();
        h.sync.apply_to_template(root).await.unwrap();

        assert!(h.sync.revert_to_template(root).await);
        assert_eq!(h.name(branch), Some(Value::str("Bough")));
    }

    #[tokio::test]
    async fn plain_node_cannot_be_reverted() {
        let mut h = Harness::new().await;
        let loose = h.sync.scene_mut().create_node("Loose");
        h.sync.scene_mut().add_root(loose).unwrap();
        assert!(!h.sync.revert_to_template(loose).await);
    }
}
