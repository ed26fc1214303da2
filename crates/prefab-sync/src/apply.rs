//! Instance to template: fold an instance's divergences into its template.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use prefab_overrides::{
    address_of, edit, edit_target_overrides, innermost_scope_of, nested_roots_between, register_mounted_child,
    register_mounted_component, set_target_override, store, unmount_component, unmount_node, ChangeObserver,
    EditKind, OverrideError,
};
use prefab_scene::{EditorExtras, PropertyOverride, RemovedComponent, TargetOverride, TemplateDocument};
use prefab_store::AssetInfo;
use prefab_types::{AssetId, ComponentId, LocalId, LocalIdPath, NodeId, Target};

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{is_reserved_override, PrefabSync};
use crate::result::{
    ApplyResult, InstanceSnapshot, MovedOverride, MovedRemoval, RemountedComponent, RemountedNode,
};
use crate::scope::{claim_scope, repair_local_ids, walk_scope, ScopeWalk};

/// What folding moved where; becomes the body of an [`ApplyResult`].
#[derive(Default)]
struct Fold {
    folded_nodes: Vec<NodeId>,
    remounted_nodes: Vec<RemountedNode>,
    folded_components: Vec<ComponentId>,
    remounted_components: Vec<RemountedComponent>,
    applied_overrides: Vec<PropertyOverride>,
    moved_overrides: Vec<MovedOverride>,
    applied_removals: Vec<RemovedComponent>,
    moved_removals: Vec<MovedRemoval>,
    adopted_target_overrides: Vec<TargetOverride>,
    rekeyed: Vec<(LocalId, LocalId)>,
    fresh: HashSet<Target>,
}

impl PrefabSync {
    /// Write the divergences of the instance rooted at `root` into its
    /// template and clear them from the instance. Reserved root overrides
    /// stay.
    pub async fn apply_to_template(&mut self, root: NodeId) -> Option<ApplyResult> {
        match self.try_apply(root).await {
            Ok(result) => Some(result),
            Err(e) => {
                e.log("apply_to_template");
                None
            }
        }
    }

    async fn try_apply(&mut self, root: NodeId) -> SyncResult<ApplyResult> {
        self.flush().await;
        let template = self.template_of(root)?;
        let loaded = self.client.load(template).await.map_err(|e| SyncError::MissingTemplate {
            asset: template,
            node: Some(root),
            reason: e.to_string(),
        })?;
        if loaded.info.is_sub_asset() {
            return Err(SyncError::SubAssetViolation(loaded.info.source.clone()));
        }

        let snapshot = InstanceSnapshot::capture(&self.scene, root);
        let muted = self.scene.set_events_muted(true);
        let outcome = self.fold_and_write(root, template, &loaded.info).await;
        if outcome.is_err() {
            snapshot.restore(&mut self.scene);
        }
        self.scene.set_events_muted(muted);
        let (fold, written) = outcome?;

        self.cache_template(loaded.info.clone(), written.clone())?;
        self.refresh_instances_except(template, Some(root));
        info!(
            root = %root,
            template = %template,
            folded_nodes = fold.folded_nodes.len(),
            remounted_nodes = fold.remounted_nodes.len(),
            applied_overrides = fold.applied_overrides.len(),
            "applied instance to template"
        );
        Ok(ApplyResult {
            root,
            template,
            previous: loaded.document,
            written,
            folded_nodes: fold.folded_nodes,
            remounted_nodes: fold.remounted_nodes,
            folded_components: fold.folded_components,
            remounted_components: fold.remounted_components,
            applied_overrides: fold.applied_overrides,
            moved_overrides: fold.moved_overrides,
            applied_removals: fold.applied_removals,
            moved_removals: fold.moved_removals,
            adopted_target_overrides: fold.adopted_target_overrides,
            rekeyed: fold.rekeyed,
            snapshot,
        })
    }

    async fn fold_and_write(
        &mut self,
        root: NodeId,
        template: AssetId,
        info: &AssetInfo,
    ) -> SyncResult<(Fold, TemplateDocument)> {
        let mut fold = Fold::default();
        self.fold_mounted_children(root, template, &mut fold)?;
        self.fold_mounted_components(root, &mut fold)?;
        fold.rekeyed = repair_local_ids(&mut self.scene, root, &fold.fresh);
        self.fold_property_overrides(root, &mut fold)?;
        self.fold_removed_components(root, &mut fold)?;
        self.adopt_target_overrides(root, &mut fold)?;

        let document = self.template_document(root, template)?;
        self.client.save(info, &document).await.map_err(|e| match e {
            prefab_store::StoreError::SubAsset(source) => SyncError::SubAssetViolation(source),
            other => other.into(),
        })?;
        self.clear_divergences(root)?;
        Ok((fold, document))
    }

    /// Top-level mounted nodes become template members; nodes mounted
    /// inside a nested instance move to that instance's own record.
    fn fold_mounted_children(&mut self, root: NodeId, template: AssetId, fold: &mut Fold) -> SyncResult<()> {
        let buckets = store(&self.scene, root)?.mounted_children.clone();
        for bucket in buckets {
            for node in bucket.nodes {
                let Some(parent) = self.scene.node(node).and_then(|n| n.parent) else {
                    debug!(node = %node, "mounted node is gone, skipping");
                    continue;
                };
                match nested_roots_between(&self.scene, root, parent).last().copied() {
                    Some(owner) => {
                        let parent_address = address_of(&self.scene, owner, Target::Node(parent))
                            .ok_or(OverrideError::NotTemplateContent(Target::Node(parent)))?;
                        register_mounted_child(&mut self.scene, &self.notices, owner, &parent_address, node)?;
                        fold.remounted_nodes.push(RemountedNode {
                            node,
                            owner,
                            parent_address,
                        });
                    }
                    None => {
                        unmount_node(&mut self.scene, &self.notices, node)?;
                        let walk = if self.scene.node(node).is_some_and(|n| n.is_instance_root()) {
                            ScopeWalk {
                                members: Vec::new(),
                                nested: vec![node],
                            }
                        } else {
                            walk_scope(&self.scene, node, true)
                        };
                        self.notices.before_change(Some(root), EditKind::Marker);
                        fold.fresh.extend(claim_scope(&mut self.scene, root, Some(template), &walk));
                        self.notices.changed(Some(root), EditKind::Marker);
                        fold.folded_nodes.push(node);
                    }
                }
            }
        }
        Ok(())
    }

    fn fold_mounted_components(&mut self, root: NodeId, fold: &mut Fold) -> SyncResult<()> {
        let buckets = store(&self.scene, root)?.mounted_components.clone();
        for bucket in buckets {
            for component in bucket.components {
                let Some(node) = self.scene.component(component).map(|c| c.node) else {
                    continue;
                };
                match nested_roots_between(&self.scene, root, node).last().copied() {
                    Some(owner) => {
                        let node_address = address_of(&self.scene, owner, Target::Node(node))
                            .ok_or(OverrideError::NotTemplateContent(Target::Node(node)))?;
                        register_mounted_component(&mut self.scene, &self.notices, owner, &node_address, component)?;
                        fold.remounted_components.push(RemountedComponent {
                            component,
                            owner,
                            node_address,
                        });
                    }
                    None => {
                        unmount_component(&mut self.scene, &self.notices, component)?;
                        if let Some(entry) = self.scene.component_mut(component) {
                            entry.local_id.get_or_insert_with(LocalId::generate);
                        }
                        fold.fresh.insert(Target::Component(component));
                        fold.folded_components.push(component);
                    }
                }
            }
        }
        Ok(())
    }

    /// Top-scope overrides are already the live values and get serialized
    /// with the instance; overrides addressing nested content move to the
    /// nested root. Overrides shadowed by a target override are dropped.
    fn fold_property_overrides(&mut self, root: NodeId, fold: &mut Fold) -> SyncResult<()> {
        let root_local = self.root_local_id(root)?;
        let (overrides, targets) = {
            let s = store(&self.scene, root)?;
            (s.property_overrides.clone(), s.target_overrides.clone())
        };
        for entry in overrides {
            if is_reserved_override(&self.config, &root_local, &entry) {
                continue;
            }
            let shadowed = targets.iter().any(|t| {
                t.source_address.as_ref() == Some(&entry.target_path) && t.property_path == entry.property_path
            });
            if shadowed {
                debug!(address = %entry.target_path, path = %entry.property_path, "override shadowed by target override");
                continue;
            }
            if !entry.target_path.is_nested() {
                fold.applied_overrides.push(entry);
                continue;
            }
            let Some((owner, relative)) = innermost_scope_of(&self.scene, root, &entry.target_path) else {
                debug!(address = %entry.target_path, "nested override does not resolve, dropped");
                continue;
            };
            edit(&mut self.scene, owner, &self.notices, EditKind::PropertyOverrides, |s| {
                s.get_or_create_property_override(&relative, &entry.property_path).value = entry.value.clone();
            })?;
            fold.moved_overrides.push(MovedOverride {
                owner,
                entry: PropertyOverride {
                    target_path: relative,
                    ..entry
                },
            });
        }
        Ok(())
    }

    fn fold_removed_components(&mut self, root: NodeId, fold: &mut Fold) -> SyncResult<()> {
        let removed = store(&self.scene, root)?.removed_components.clone();
        for entry in removed {
            if !entry.target_address.is_nested() {
                fold.applied_removals.push(entry);
                continue;
            }
            let Some((owner, relative)) = innermost_scope_of(&self.scene, root, &entry.target_address) else {
                debug!(address = %entry.target_address, "nested removal does not resolve, dropped");
                continue;
            };
            edit(&mut self.scene, owner, &self.notices, EditKind::RemovedComponents, |s| {
                s.add_removed_component(relative.clone())
            })?;
            fold.moved_removals.push(MovedRemoval {
                owner,
                entry: RemovedComponent {
                    target_address: relative,
                },
            });
        }
        Ok(())
    }

    /// Scene-level target overrides whose source and target both lie in the
    /// instance move onto it. Entries owned by the root whose source was
    /// mounted get the address the fold gave it.
    fn adopt_target_overrides(&mut self, root: NodeId, fold: &mut Fold) -> SyncResult<()> {
        let inside = |sync: &Self, target: Target| {
            sync.scene
                .node_of(target)
                .is_some_and(|n| sync.scene.is_in_subtree(n, root))
        };
        let candidates: Vec<(TargetOverride, LocalIdPath)> = self
            .scene
            .target_overrides
            .iter()
            .filter(|o| inside(self, o.source) && o.target.is_some_and(|t| inside(self, Target::Node(t))))
            .filter_map(|o| Some((o.clone(), address_of(&self.scene, root, o.source)?)))
            .collect();
        for (entry, address) in candidates {
            edit_target_overrides(&mut self.scene, None, &self.notices, |list| list.retain(|o| *o != entry))?;
            set_target_override(
                &mut self.scene,
                Some(root),
                &self.notices,
                TargetOverride {
                    source_address: Some(address),
                    ..entry.clone()
                },
            )?;
            fold.adopted_target_overrides.push(entry);
        }

        let addressed: Vec<(usize, LocalIdPath)> = store(&self.scene, root)?
            .target_overrides
            .iter()
            .enumerate()
            .filter(|(_, o)| o.source_address.is_none())
            .filter_map(|(i, o)| Some((i, address_of(&self.scene, root, o.source)?)))
            .collect();
        if !addressed.is_empty() {
            edit(&mut self.scene, root, &self.notices, EditKind::TargetOverrides, |s| {
                for (index, address) in addressed {
                    s.target_overrides[index].source_address = Some(address);
                }
            })?;
        }
        Ok(())
    }

    /// Serialize the folded instance as the new template document.
    fn template_document(&self, root: NodeId, template: AssetId) -> SyncResult<TemplateDocument> {
        let (mut document, cleared) = self.scene.serialize_subtree(root)?;
        if !cleared.is_empty() {
            warn!(root = %root, cleared = cleared.len(), "references leaving the instance are not part of the template");
        }
        document.target_overrides = store(&self.scene, root)?.target_overrides.clone();
        let document_root = document.root;
        if let Some(node) = document.root_node_mut() {
            node.extras = EditorExtras::default();
            if let Some(marker) = node.marker.as_mut() {
                marker.instance = None;
                marker.root = Some(document_root);
                marker.template = Some(template);
            }
        }
        Ok(document)
    }

    /// Empty every divergence bucket of `root`. Reserved root overrides and
    /// target overrides stay.
    pub(crate) fn clear_divergences(&mut self, root: NodeId) -> SyncResult<()> {
        let root_local = self.root_local_id(root)?;
        let config = &self.config;
        edit(&mut self.scene, root, &self.notices, EditKind::PropertyOverrides, |s| {
            s.property_overrides
                .retain(|o| is_reserved_override(config, &root_local, o))
        })?;
        edit(&mut self.scene, root, &self.notices, EditKind::RemovedComponents, |s| {
            s.removed_components.clear()
        })?;
        edit(&mut self.scene, root, &self.notices, EditKind::MountedChildren, |s| {
            s.mounted_children.clear()
        })?;
        edit(&mut self.scene, root, &self.notices, EditKind::MountedComponents, |s| {
            s.mounted_components.clear()
        })?;
        Ok(())
    }

    /// Restore the template document and instance records captured by
    /// `result`.
    pub async fn undo_apply(&mut self, result: &ApplyResult) -> bool {
        match self.try_undo_apply(result).await {
            Ok(()) => true,
            Err(e) => {
                e.log("undo_apply");
                false
            }
        }
    }

    async fn try_undo_apply(&mut self, result: &ApplyResult) -> SyncResult<()> {
        self.flush().await;
        let info = self.client.info(result.template).await.map_err(|e| SyncError::MissingTemplate {
            asset: result.template,
            node: Some(result.root),
            reason: e.to_string(),
        })?;
        self.client.save(&info, &result.previous).await?;

        let muted = self.scene.set_events_muted(true);
        result.snapshot.restore(&mut self.scene);
        self.scene.set_events_muted(muted);

        self.cache_template(info, result.previous.clone())?;
        self.refresh_instances_except(result.template, Some(result.root));
        info!(root = %result.root, template = %result.template, "undid apply");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use prefab_overrides::is_path_overridden;
    use prefab_scene::Value;
    use prefab_types::LocalIdPath;

    use crate::fixtures::*;

    #[tokio::test]
    async fn property_override_moves_into_template() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);
        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Bough"))
            .unwrap();
        h.sync.flush().await;
        let address = LocalIdPath::single(lid("branch"));
        assert!(is_path_overridden(h.sync.scene(), root, &address, &prop("name")));

        let result = h.sync.apply_to_template(root).await.unwrap();
        assert_eq!(result.applied_overrides.len(), 1);
        assert_eq!(document_names(&h.stored(h.tree).await), vec!["Tree", "Bough"]);
        assert!(!is_path_overridden(h.sync.scene(), root, &address, &prop("name")));
        // Reserved root overrides survive.
        let left = &prefab_overrides::store(h.sync.scene(), root).unwrap().property_overrides;
        assert_eq!(left.len(), 4);
        assert!(left.iter().all(|o| o.target_path == LocalIdPath::single(lid("tree-root"))));
    }

    #[tokio::test]
    async fn mounted_child_becomes_member() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);
        let twig = h.sync.scene_mut().create_node("Twig");
        h.sync.scene_mut().add_child(branch, twig).unwrap();
        h.sync.process_events();
        assert!(h.sync.scene().node(twig).unwrap().is_mounted());

        let result = h.sync.apply_to_template(root).await.unwrap();
        assert_eq!(result.folded_nodes, vec![twig]);
        assert_eq!(result.mounted_nodes(), vec![twig]);
        let node = h.sync.scene().node(twig).unwrap();
        assert!(!node.is_mounted());
        assert_eq!(node.instance_scope(), Some(root));
        assert!(node.local_id().is_some());
        assert_eq!(document_names(&h.stored(h.tree).await), vec!["Tree", "Branch", "Twig"]);
        assert!(prefab_overrides::store(h.sync.scene(), root)
            .unwrap()
            .mounted_children
            .is_empty());
    }

    #[tokio::test]
    async fn content_mounted_in_nested_instance_moves_to_it() {
        let mut h = Harness::new().await;
        let forest = h.sync.scene_mut().create_node("Forest");
        h.sync.scene_mut().add_root(forest).unwrap();
        h.sync.instantiate(h.tree, Some(forest)).await.unwrap();
        let root = h.sync.create_template_from_node(forest, "forest.prefab").await.unwrap();
        let nested = h.child(root);
        let nested_branch = h.child(nested);
        let twig = h.sync.scene_mut().create_node("Twig");
        h.sync.scene_mut().add_child(nested_branch, twig).unwrap();
        h.sync.process_events();
        assert_eq!(h.sync.scene().node(twig).unwrap().extras.mounted_root, Some(root));

        let result = h.sync.apply_to_template(root).await.unwrap();
        assert!(result.folded_nodes.is_empty());
        assert_eq!(result.mounted_nodes(), vec![twig]);
        assert_eq!(result.remounted_nodes[0].owner, nested);
        assert_eq!(result.remounted_nodes[0].parent_address, LocalIdPath::single(lid("branch")));
        assert_eq!(h.sync.scene().node(twig).unwrap().extras.mounted_root, Some(nested));
        let nested_store = prefab_overrides::store(h.sync.scene(), nested).unwrap();
        assert_eq!(nested_store.all_mounted_nodes(), vec![twig]);
        assert!(prefab_overrides::store(h.sync.scene(), root)
            .unwrap()
            .mounted_children
            .is_empty());
        assert!(document_names(&result.written).contains(&"Twig".to_string()));
    }

    #[tokio::test]
    async fn other_instances_pick_up_applied_values() {
        let mut h = Harness::new().await;
        let edited = h.sync.instantiate(h.tree, None).await.unwrap();
        let other = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(edited);
        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Bough"))
            .unwrap();

        h.sync.apply_to_template(edited).await.unwrap();
        assert_eq!(h.name(h.child(other)), Some(Value::str("Bough")));
    }

    #[tokio::test]
    async fn undo_restores_document_and_records() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let before = h.stored(h.tree).await;
        let branch = h.child(root);
        let twig = h.sync.scene_mut().create_node("Twig");
        h.sync.scene_mut().add_child(branch, twig).unwrap();
        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Bough"))
            .unwrap();

        let result = h.sync.apply_to_template(root).await.unwrap();
        assert!(h.sync.undo_apply(&result).await);

        assert_eq!(h.stored(h.tree).await, before);
        let address = LocalIdPath::single(lid("branch"));
        assert!(is_path_overridden(h.sync.scene(), root, &address, &prop("name")));
        assert_eq!(h.sync.scene().node(twig).unwrap().extras.mounted_root, Some(root));
    }

    #[tokio::test]
    async fn sub_asset_template_is_left_alone() {
        let mut h = Harness::new().await;
        let json = tree_document().to_json().unwrap();
        let embedded = h.store.insert_sub_asset("level.scene@tree", json.clone());
        let root = h.sync.instantiate(embedded, None).await.unwrap();
        let branch = h.child(root);
        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Bough"))
            .unwrap();

        assert!(h.sync.apply_to_template(root).await.is_none());
        assert_eq!(h.store.content_of(embedded), Some(json));
        let address = LocalIdPath::single(lid("branch"));
        assert!(is_path_overridden(h.sync.scene(), root, &address, &prop("name")));
    }

    #[tokio::test]
    async fn plain_node_cannot_be_applied() {
        let mut h = Harness::new().await;
        let loose = h.sync.scene_mut().create_node("Loose");
        h.sync.scene_mut().add_root(loose).unwrap();
        assert!(h.sync.apply_to_template(loose).await.is_none());
    }
}
