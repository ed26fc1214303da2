//! Turning a live subtree into a new template and an instance of it.

use std::collections::HashSet;

use tracing::{debug, info};

use prefab_scene::{EditorExtras, Value};
use prefab_types::{NodeId, Target};

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::PrefabSync;
use crate::result::InstanceSnapshot;
use crate::scope::{claim_scope, repair_local_ids, walk_scope};

impl PrefabSync {
    /// Save the subtree at `node` as a new template at `target` and put an
    /// instance of it in the subtree's place. Returns the new instance
    /// root.
    ///
    /// References from the rest of the scene into the subtree are
    /// repointed at the new instance; references from the subtree to the
    /// outside are cleared for the document and restored on the instance.
    pub async fn create_template_from_node(&mut self, node: NodeId, target: &str) -> Option<NodeId> {
        match self.try_create(node, target).await {
            Ok(root) => Some(root),
            Err(e) => {
                e.log("create_template_from_node");
                None
            }
        }
    }

    async fn try_create(&mut self, node: NodeId, target: &str) -> SyncResult<NodeId> {
        self.scene.try_node(node)?;
        self.flush().await;
        self.check_templatable(node)?;
        self.check_circular(node)?;

        let snapshot = InstanceSnapshot::capture(&self.scene, node);
        let muted = self.scene.set_events_muted(true);
        let walk = walk_scope(&self.scene, node, true);
        let mounted: HashSet<Target> = walk
            .members
            .iter()
            .filter(|id| self.scene.node(**id).is_some_and(|n| n.is_mounted() || n.marker.is_none()))
            .map(|id| Target::Node(*id))
            .collect();
        claim_scope(&mut self.scene, node, None, &walk);
        repair_local_ids(&mut self.scene, node, &mounted);
        let serialized = self.scene.serialize_subtree(node);
        snapshot.restore(&mut self.scene);
        self.scene.set_events_muted(muted);
        let (mut document, cleared) = serialized?;

        let document_root = document.root;
        if let Some(root) = document.root_node_mut() {
            root.extras = EditorExtras::default();
            if let Some(marker) = root.marker.as_mut() {
                marker.instance = None;
                marker.root = Some(document_root);
            }
        }

        let info = self.client.create(target, &document, false).await?;
        let template = info.id;
        self.cache_template(info, document)?;

        let parent = self.scene.node(node).and_then(|n| n.parent);
        let index = parent
            .and_then(|p| self.scene.node(p))
            .and_then(|p| p.children.iter().position(|c| *c == node));
        let (root, remap) = self.materialize_instance(template, parent, index)?;

        let created: HashSet<Target> = self
            .scene
            .descendants(root)
            .into_iter()
            .map(Target::Node)
            .chain(self.scene.subtree_components(root).into_iter().map(Target::Component))
            .collect();
        self.scene
            .remap_refs_outside(&created, &mut |t| Value::from_target(remap.target_or_keep(t)));
        for entry in &mut self.scene.target_overrides {
            remap.remap_target_override(entry);
        }

        self.cancel_pending_under(node);
        for replaced in self.scene.descendants(node) {
            self.unindex_instance(replaced);
        }
        self.scene.remove_node(node)?;

        let restored = cleared.len();
        for entry in cleared {
            let replayed = match remap.target_or_keep(entry.owner) {
                Target::Node(id) => self.scene.set_property(id, &entry.path, entry.value),
                Target::Component(id) => self.scene.set_component_property(id, &entry.path, entry.value),
            };
            if let Err(e) = replayed {
                debug!(owner = %entry.owner, path = %entry.path, error = %e, "could not restore cleared reference");
            }
        }
        self.process_events();
        info!(node = %node, root = %root, template = %template, path = target, restored, "created template from node");
        Ok(root)
    }

    fn check_templatable(&self, node: NodeId) -> SyncResult<()> {
        let registry = self.scene.registry();
        for id in self.scene.subtree_components(node) {
            let Some(component) = self.scene.component(id) else {
                continue;
            };
            if !registry.is_templatable(&component.type_name) {
                return Err(SyncError::NotTemplatable {
                    node: component.node,
                    type_name: component.type_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// An instance nested, at any depth, under another instance of the same
    /// template would contain itself.
    fn check_circular(&self, node: NodeId) -> SyncResult<()> {
        for id in self.scene.descendants(node) {
            let Some(template) = self.instance_template(id) else {
                continue;
            };
            let clash = self
                .scene
                .ancestors(id)
                .into_iter()
                .any(|a| self.instance_template(a) == Some(template));
            if clash {
                return Err(SyncError::CircularReference { node: id, template });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use prefab_scene::{Fields, Scene, TypeRegistry, TypeSchema, Value};
    use prefab_types::Target;

    use crate::fixtures::*;

    #[tokio::test]
    async fn subtree_is_replaced_by_an_instance() {
        let mut h = Harness::new().await;
        let scene = h.sync.scene_mut();
        let watcher = scene.create_node("Watcher");
        scene.add_root(watcher).unwrap();
        let chest = scene.create_node("Chest");
        scene.add_root(chest).unwrap();
        let lid_node = scene.create_node("Lid");
        scene.add_child(chest, lid_node).unwrap();
        scene.add_component(lid_node, "Hinge", Fields::new()).unwrap();
        scene
            .write_property(Target::Node(watcher), &prop("watch"), Value::NodeRef(lid_node))
            .unwrap();
        scene
            .write_property(Target::Node(lid_node), &prop("anchor"), Value::NodeRef(watcher))
            .unwrap();

        let root = h.sync.create_template_from_node(chest, "chest.prefab").await.unwrap();
        let scene = h.sync.scene();
        assert!(!scene.contains(Target::Node(chest)));
        assert!(scene.node(root).unwrap().is_instance_root());
        let new_lid = scene.node(root).unwrap().children[0];
        assert_eq!(
            scene.read_property(Target::Node(watcher), &prop("watch")),
            Some(Value::NodeRef(new_lid))
        );
        assert_eq!(
            scene.read_property(Target::Node(new_lid), &prop("anchor")),
            Some(Value::NodeRef(watcher))
        );

        let template = scene.node(root).unwrap().marker.as_ref().unwrap().template.unwrap();
        assert_eq!(h.sync.instances_of(template), vec![root]);
        let stored = h.stored(template).await;
        assert_eq!(document_names(&stored), vec!["Chest", "Lid"]);
        assert!(stored.nodes[0].marker.as_ref().unwrap().instance.is_none());
    }

    #[tokio::test]
    async fn position_under_parent_is_kept() {
        let mut h = Harness::new().await;
        let scene = h.sync.scene_mut();
        let parent = scene.create_node("Parent");
        scene.add_root(parent).unwrap();
        let first = scene.create_node("First");
        let second = scene.create_node("Second");
        scene.add_child(parent, first).unwrap();
        scene.add_child(parent, second).unwrap();

        let root = h.sync.create_template_from_node(first, "first.prefab").await.unwrap();
        assert_eq!(h.sync.scene().node(parent).unwrap().children, vec![root, second]);
    }

    #[tokio::test]
    async fn non_templatable_component_is_rejected() {
        let mut h = Harness::new().await;
        let mut registry = TypeRegistry::new();
        registry.register(TypeSchema::new("Camera").not_templatable());
        let mut scene = Scene::new(registry);
        let rig = scene.create_node("Rig");
        scene.add_root(rig).unwrap();
        scene.add_component(rig, "Camera", Fields::new()).unwrap();
        h.sync.open_scene(scene);

        assert!(h.sync.create_template_from_node(rig, "rig.prefab").await.is_none());
        assert_eq!(h.store.len(), 1);
        assert!(h.sync.scene().contains(Target::Node(rig)));
    }

    #[tokio::test]
    async fn nesting_a_template_in_itself_is_rejected() {
        let mut h = Harness::new().await;
        let outer = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(outer);
        h.sync.instantiate(h.tree, Some(branch)).await.unwrap();

        assert!(h.sync.create_template_from_node(branch, "loop.prefab").await.is_none());
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn existing_target_is_not_overwritten() {
        let mut h = Harness::new().await;
        let node = h.sync.scene_mut().create_node("Other");
        h.sync.scene_mut().add_root(node).unwrap();
        let before = h.stored(h.tree).await;

        assert!(h.sync.create_template_from_node(node, "tree.prefab").await.is_none());
        assert_eq!(h.stored(h.tree).await, before);
        assert!(h.sync.scene().contains(Target::Node(node)));
    }
}
