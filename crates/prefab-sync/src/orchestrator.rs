//! The synchronization orchestrator: owns the live scene, reacts to its
//! change events and runs the instance/template operations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use prefab_overrides::{
    is_path_overridden, locate, on_child_removed, on_component_added, on_component_removed, record_object_overrides,
    record_property_overrides, record_target_overrides, set_property_override, update_children_data,
};
use prefab_scene::{PropertyOverride, Scene, SceneEvent};
use prefab_store::TemplateClient;
use prefab_types::{AssetId, LocalId, LocalIdPath, NodeId, PropertyPath, Target};

use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::error::{SyncError, SyncResult};
use crate::host::SceneHost;
use crate::notice::{NoticeFilter, NoticeRouter, NoticeStream};
use crate::templates::{not_cached, CachedTemplate};

/// Key of a coalesced property change.
pub type PendingChange = (NodeId, PropertyPath);

/// Keeps prefab instances of one scene in sync with their templates.
///
/// Structural events are handled as soon as they are drained; property
/// changes are coalesced per `(node, path)` and diffed once the debounce
/// window passes, so the value recorded is the latest one.
pub struct PrefabSync {
    pub(crate) scene: Scene,
    pub(crate) client: TemplateClient,
    pub(crate) host: Arc<dyn SceneHost>,
    pub(crate) config: SyncConfig,
    pub(crate) notices: NoticeRouter,
    pub(crate) templates: HashMap<AssetId, CachedTemplate>,
    pub(crate) asset_to_nodes: HashMap<AssetId, Vec<NodeId>>,
    pub(crate) pending: Debouncer<PendingChange>,
}

impl PrefabSync {
    /// Wrap `scene` and index the instances it already holds.
    pub fn new(scene: Scene, client: TemplateClient, host: Arc<dyn SceneHost>, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let mut sync = Self {
            scene,
            client,
            host,
            notices: NoticeRouter::new(config.notice_capacity),
            pending: Debouncer::new(config.debounce()),
            config,
            templates: HashMap::new(),
            asset_to_nodes: HashMap::new(),
        };
        sync.reset();
        info!(instances = sync.asset_to_nodes.values().map(Vec::len).sum::<usize>(), "prefab sync started");
        Ok(sync)
    }

    /// The live scene.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Mutable access for the editor. Changes are picked up by the next
    /// [`process_events`](Self::process_events).
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// Active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Client of the template store.
    pub fn client(&self) -> &TemplateClient {
        &self.client
    }

    /// Receive before/after notices for override edits matching `filter`.
    pub fn subscribe(&self, filter: NoticeFilter) -> NoticeStream {
        self.notices.subscribe(filter)
    }

    /// Live instance roots of `template`.
    pub fn instances_of(&self, template: AssetId) -> Vec<NodeId> {
        self.asset_to_nodes
            .get(&template)
            .map(|nodes| {
                nodes
                    .iter()
                    .copied()
                    .filter(|n| self.scene.node(*n).is_some_and(|n| n.is_instance_root()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of property changes waiting for their debounce window.
    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    // ---- Lifecycle ----

    /// Forget pending work and cached templates and rebuild the template to
    /// instance index from the scene.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.templates.clear();
        self.asset_to_nodes.clear();
        self.scene.drain_events();
        let roots = self.scene.roots().to_vec();
        for top in roots {
            for id in self.scene.descendants(top) {
                if let Some(template) = self.instance_template(id) {
                    self.index_instance(template, id);
                }
            }
        }
        debug!(templates = self.asset_to_nodes.len(), "prefab sync state reset");
    }

    /// Swap in a newly opened scene. Returns the previous one.
    pub fn open_scene(&mut self, scene: Scene) -> Scene {
        let previous = std::mem::replace(&mut self.scene, scene);
        self.reset();
        info!(roots = self.scene.roots().len(), "scene opened");
        previous
    }

    // ---- Event processing ----

    /// Drain the scene's change events. Structural changes update the
    /// mounted-content records right away; property changes are scheduled.
    pub fn process_events(&mut self) -> usize {
        let events = self.scene.drain_events();
        let count = events.len();
        for event in events {
            if let Err(e) = self.handle_event(event) {
                e.log("scene event");
            }
        }
        count
    }

    fn handle_event(&mut self, event: SceneEvent) -> SyncResult<()> {
        match event {
            SceneEvent::ChildAdded { parent, child } => {
                update_children_data(&mut self.scene, &self.notices, parent)?;
                self.adopt_instance(child)?;
            }
            SceneEvent::ChildRemoved { parent, child } => {
                on_child_removed(&mut self.scene, &self.notices, parent, child)?;
            }
            SceneEvent::ComponentAdded { node, component } => {
                on_component_added(&mut self.scene, &self.notices, node, component)?;
            }
            SceneEvent::ComponentRemoved { node, component } => {
                on_component_removed(&mut self.scene, &self.notices, node, &component)?;
            }
            SceneEvent::PropertyChanged { node, path } => {
                trace!(node = %node, path = %path, "property change scheduled");
                self.pending.schedule((node, path));
            }
        }
        Ok(())
    }

    /// Record overrides for every change whose debounce window has passed.
    pub async fn flush_due(&mut self) -> usize {
        self.process_events();
        let due = self.pending.take_due(Instant::now());
        self.run_checks(due).await
    }

    /// Record overrides for every pending change without waiting.
    pub async fn flush(&mut self) -> usize {
        self.process_events();
        let all = self.pending.drain_all();
        self.run_checks(all).await
    }

    /// Wait out the debounce windows until nothing is pending.
    pub async fn settle(&mut self) {
        self.process_events();
        while let Some(deadline) = self.pending.next_deadline() {
            tokio::time::sleep_until(deadline).await;
            self.flush_due().await;
        }
    }

    async fn run_checks(&mut self, changes: Vec<PendingChange>) -> usize {
        let mut recorded = 0;
        for (node, path) in changes {
            match self.check_to_add_overrides(node, &path).await {
                Ok(count) => recorded += count,
                Err(e) => e.log("record overrides"),
            }
        }
        recorded
    }

    /// Turn one property change into override records. Returns how many
    /// paths were recorded.
    async fn check_to_add_overrides(&mut self, node: NodeId, path: &PropertyPath) -> SyncResult<usize> {
        let Some(entry) = self.scene.node(node) else {
            return Ok(0);
        };
        let (target, field) = match path.split_component() {
            Some((index, field)) => {
                let Some(component) = entry.components.get(index).copied() else {
                    debug!(node = %node, path = %path, "component index out of range");
                    return Ok(0);
                };
                (Target::Component(component), field)
            }
            None => (Target::Node(node), path.clone()),
        };

        let Some((root, _)) = locate(&self.scene, target) else {
            // Mounted or loose content: only cross-boundary references matter.
            return self.record_loose(target, &field);
        };
        let template = self.template_of(root)?;
        self.ensure_template(template, Some(root)).await?;
        let cached = self
            .templates
            .get(&template)
            .ok_or_else(|| not_cached(template, Some(root)))?;
        let view = cached.view();
        let recorded = if field.is_empty() {
            record_object_overrides(&mut self.scene, &self.notices, root, &view, target)?
        } else {
            let mut recorded = record_target_overrides(&mut self.scene, &self.notices, target, &field)?;
            recorded.extend(record_property_overrides(
                &mut self.scene,
                &self.notices,
                root,
                &view,
                target,
                &field,
            )?);
            recorded
        };
        debug!(root = %root, object = %target, path = %path, recorded = recorded.len(), "checked property change");
        Ok(recorded.len())
    }

    fn record_loose(&mut self, target: Target, field: &PropertyPath) -> SyncResult<usize> {
        if !field.is_empty() {
            return Ok(record_target_overrides(&mut self.scene, &self.notices, target, field)?.len());
        }
        let names = {
            let Some(type_name) = self.scene.type_name_of(target) else {
                return Ok(0);
            };
            let Some(fields) = self.scene.fields_of(target) else {
                return Ok(0);
            };
            self.scene.registry().visible_field_names(type_name, fields.keys())
        };
        let mut recorded = 0;
        for name in names {
            let path = PropertyPath::from_segments([name]);
            recorded += record_target_overrides(&mut self.scene, &self.notices, target, &path)?.len();
        }
        Ok(recorded)
    }

    // ---- Instance bookkeeping ----

    /// Template of an instance root.
    pub(crate) fn template_of(&self, root: NodeId) -> SyncResult<AssetId> {
        self.instance_template(root).ok_or(SyncError::NotAnInstance(root))
    }

    pub(crate) fn instance_template(&self, node: NodeId) -> Option<AssetId> {
        let marker = self.scene.node(node)?.marker.as_ref()?;
        if !marker.is_instance_root() {
            return None;
        }
        marker.template
    }

    pub(crate) fn root_local_id(&self, root: NodeId) -> SyncResult<LocalId> {
        self.scene
            .node(root)
            .and_then(|n| n.local_id())
            .cloned()
            .ok_or(SyncError::NotAnInstance(root))
    }

    pub(crate) fn index_instance(&mut self, template: AssetId, root: NodeId) {
        let nodes = self.asset_to_nodes.entry(template).or_default();
        if !nodes.contains(&root) {
            nodes.push(root);
        }
    }

    pub(crate) fn unindex_instance(&mut self, root: NodeId) {
        for nodes in self.asset_to_nodes.values_mut() {
            nodes.retain(|n| *n != root);
        }
        self.asset_to_nodes.retain(|_, nodes| !nodes.is_empty());
    }

    /// A node entering the scene that is an instance root gets indexed and
    /// its reserved root overrides seeded.
    fn adopt_instance(&mut self, node: NodeId) -> SyncResult<()> {
        let Some(template) = self.instance_template(node) else {
            return Ok(());
        };
        self.index_instance(template, node);
        self.seed_reserved_overrides(node)
    }

    /// Record the current value of every reserved root field that is not
    /// already overridden.
    pub(crate) fn seed_reserved_overrides(&mut self, root: NodeId) -> SyncResult<()> {
        let address = LocalIdPath::single(self.root_local_id(root)?);
        for name in &self.config.reserved_root_properties {
            let path = PropertyPath::from_segments([name.as_str()]);
            if is_path_overridden(&self.scene, root, &address, &path) {
                continue;
            }
            let Some(value) = self.scene.read_property(Target::Node(root), &path) else {
                continue;
            };
            set_property_override(&mut self.scene, root, &self.notices, &address, &path, value)?;
        }
        Ok(())
    }

    /// Drop scheduled changes for nodes under `root`.
    pub(crate) fn cancel_pending_under(&mut self, root: NodeId) {
        let nodes: HashSet<NodeId> = self.scene.descendants(root).into_iter().collect();
        let dropped = self.pending.cancel_where(|(node, _)| nodes.contains(node));
        if dropped > 0 {
            debug!(root = %root, dropped, "dropped pending property changes");
        }
    }
}

/// Whether `entry` is one of the reserved root overrides every instance
/// keeps.
pub(crate) fn is_reserved_override(config: &SyncConfig, root_local: &LocalId, entry: &PropertyOverride) -> bool {
    entry.target_path.len() == 1
        && entry.target_path.first() == Some(root_local)
        && entry.property_path.len() == 1
        && entry.property_path.first().is_some_and(|field| config.is_reserved(field))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use prefab_overrides::{property_override, store};
    use prefab_scene::{Fields, Scene, Value};
    use prefab_types::{LocalIdPath, Target};

    use crate::fixtures::*;

    #[tokio::test(start_paused = true)]
    async fn changes_are_coalesced_and_the_latest_value_recorded() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);

        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Bough"))
            .unwrap();
        h.sync.process_events();
        tokio::time::advance(Duration::from_millis(30)).await;
        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Birch"))
            .unwrap();
        h.sync.process_events();
        assert_eq!(h.sync.pending_changes(), 1);

        // The second edit pushed the deadline back.
        tokio::time::advance(Duration::from_millis(30)).await;
        assert_eq!(h.sync.flush_due().await, 0);
        assert_eq!(h.sync.pending_changes(), 1);

        tokio::time::advance(Duration::from_millis(30)).await;
        assert_eq!(h.sync.flush_due().await, 1);
        let address = LocalIdPath::single(lid("branch"));
        let recorded = property_override(h.sync.scene(), root, &address, &prop("name")).unwrap();
        assert_eq!(recorded.value, Value::str("Birch"));
    }

    #[tokio::test(start_paused = true)]
    async fn settle_waits_out_the_window() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);
        h.sync
            .scene_mut()
            .set_property(branch, &prop("name"), Value::str("Bough"))
            .unwrap();

        h.sync.settle().await;
        assert_eq!(h.sync.pending_changes(), 0);
        let address = LocalIdPath::single(lid("branch"));
        assert!(property_override(h.sync.scene(), root, &address, &prop("name")).is_some());
    }

    #[tokio::test]
    async fn whole_component_change_records_each_field() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);
        let leaf = h.sync.scene().node(branch).unwrap().components[0];

        let mut fields = Fields::new();
        fields.insert("size".into(), Value::Int(5));
        h.sync.scene_mut().set_component_fields(leaf, fields).unwrap();
        assert!(h.sync.flush().await >= 1);

        let address = LocalIdPath::single(lid("leaf"));
        let recorded = property_override(h.sync.scene(), root, &address, &prop("size")).unwrap();
        assert_eq!(recorded.value, Value::Int(5));
    }

    #[tokio::test]
    async fn references_from_loose_and_mounted_content_become_target_overrides() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let branch = h.child(root);

        let loose = h.sync.scene_mut().create_node("Loose");
        h.sync.scene_mut().add_root(loose).unwrap();
        h.sync
            .scene_mut()
            .set_property(loose, &prop("watch"), Value::NodeRef(branch))
            .unwrap();
        let twig = h.sync.scene_mut().create_node("Twig");
        h.sync.scene_mut().add_child(branch, twig).unwrap();
        h.sync
            .scene_mut()
            .set_property(twig, &prop("anchor"), Value::NodeRef(branch))
            .unwrap();
        h.sync.flush().await;

        let scene = h.sync.scene();
        assert_eq!(scene.target_overrides.len(), 1);
        let entry = &scene.target_overrides[0];
        assert_eq!(entry.source, Target::Node(loose));
        assert_eq!(entry.target, Some(root));
        assert_eq!(entry.target_address, LocalIdPath::single(lid("branch")));

        let mounted = &store(scene, root).unwrap().target_overrides;
        assert_eq!(mounted.len(), 1);
        assert_eq!(mounted[0].source, Target::Node(twig));
        assert_eq!(mounted[0].source_address, None);
        assert_eq!(mounted[0].property_path, prop("anchor"));
    }

    #[tokio::test]
    async fn reference_into_nested_instance_is_recorded_relative_to_it() {
        let mut h = Harness::new().await;
        let forest = h.sync.scene_mut().create_node("Forest");
        h.sync.scene_mut().add_root(forest).unwrap();
        h.sync.scene_mut().add_component(forest, "Keeper", Fields::new()).unwrap();
        h.sync.instantiate(h.tree, Some(forest)).await.unwrap();
        let root = h.sync.create_template_from_node(forest, "forest.prefab").await.unwrap();

        let keeper = h.sync.scene().node(root).unwrap().components[0];
        let nested = h.child(root);
        let leaf = h.sync.scene().node(h.child(nested)).unwrap().components[0];
        h.sync
            .scene_mut()
            .set_component_property(keeper, &prop("link"), Value::ComponentRef(leaf))
            .unwrap();
        h.sync.flush().await;

        let overrides = store(h.sync.scene(), root).unwrap();
        assert_eq!(overrides.target_overrides.len(), 1);
        let entry = &overrides.target_overrides[0];
        assert_eq!(entry.source, Target::Component(keeper));
        assert_eq!(entry.target, Some(nested));
        assert_eq!(entry.target_address, LocalIdPath::single(lid("leaf")));
        assert_eq!(entry.property_path, prop("link"));
        assert_eq!(overrides.property_overrides.len(), 4);
    }

    #[tokio::test]
    async fn open_scene_rebuilds_the_instance_index() {
        let mut h = Harness::new().await;
        let first = h.sync.instantiate(h.tree, None).await.unwrap();
        let second = h.sync.instantiate(h.tree, None).await.unwrap();
        let child = h.child(first);
        h.sync
            .scene_mut()
            .set_property(child, &prop("name"), Value::str("Bough"))
            .unwrap();
        h.sync.process_events();
        assert_eq!(h.sync.pending_changes(), 1);

        let previous = h.sync.open_scene(Scene::default());
        assert!(h.sync.instances_of(h.tree).is_empty());
        assert_eq!(h.sync.pending_changes(), 0);

        h.sync.open_scene(previous);
        let mut indexed = h.sync.instances_of(h.tree);
        indexed.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(indexed, expected);
    }

    #[tokio::test]
    async fn reset_forgets_pending_changes() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();
        let child = h.child(root);
        h.sync
            .scene_mut()
            .set_property(child, &prop("name"), Value::str("Bough"))
            .unwrap();
        h.sync.process_events();

        h.sync.reset();
        assert_eq!(h.sync.pending_changes(), 0);
        assert_eq!(h.sync.flush().await, 0);
        assert_eq!(h.sync.instances_of(h.tree), vec![root]);
    }
}
