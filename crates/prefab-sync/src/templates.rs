//! Template cache, instantiation and propagation of template edits to
//! other instances.

use tracing::{debug, info, warn};

use prefab_overrides::{
    address_of, apply_target_overrides, outermost_instance_root, store, TargetMap, TemplateView,
};
use prefab_scene::{
    IdRemap, InstanceMarker, InstanceRecord, OverrideStore, Scene, TargetOverride, TemplateDocument, TypeRegistry,
};
use prefab_store::AssetInfo;
use prefab_types::{AssetId, LocalId, LocalIdPath, NodeId, PropertyPath, Target};

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::PrefabSync;
use crate::scope::{adopt_members, remap_template_refs};

/// A template document together with a materialized copy used as the
/// diff baseline.
#[derive(Clone, Debug)]
pub(crate) struct CachedTemplate {
    pub info: AssetInfo,
    pub document: TemplateDocument,
    pub scene: Scene,
    pub root: NodeId,
    /// Template-level target overrides, in the identities of `scene`.
    pub target_overrides: Vec<TargetOverride>,
}

impl CachedTemplate {
    pub(crate) fn materialize(info: AssetInfo, document: TemplateDocument, registry: TypeRegistry) -> SyncResult<Self> {
        let mut scene = Scene::new(registry);
        let instantiated = scene.instantiate(&document)?;
        scene.drain_events();
        Ok(Self {
            info,
            document,
            scene,
            root: instantiated.root,
            target_overrides: instantiated.target_overrides,
        })
    }

    pub(crate) fn view(&self) -> TemplateView<'_> {
        TemplateView::new(&self.scene, self.root)
    }

    /// Express a template-level target override in the identities of the
    /// live instance whose address space is `live`.
    pub(crate) fn remap_target_override(&self, entry: &TargetOverride, live: &TargetMap) -> Option<TargetOverride> {
        let address_in_live = |target: Target| {
            address_of(&self.scene, self.root, target).and_then(|a| live.resolve(&a))
        };
        let source = address_in_live(entry.source)?;
        let target = entry
            .target
            .and_then(|t| address_in_live(Target::Node(t)))
            .and_then(|t| t.as_node());
        Some(TargetOverride {
            source,
            target,
            ..entry.clone()
        })
    }
}

pub(crate) fn not_cached(template: AssetId, node: Option<NodeId>) -> SyncError {
    SyncError::MissingTemplate {
        asset: template,
        node,
        reason: "template is not loaded".into(),
    }
}

impl PrefabSync {
    // ---- Template cache ----

    /// Load `template` into the cache unless it is already there.
    pub(crate) async fn ensure_template(&mut self, template: AssetId, node: Option<NodeId>) -> SyncResult<()> {
        if self.templates.contains_key(&template) {
            return Ok(());
        }
        let loaded = self.client.load(template).await.map_err(|e| SyncError::MissingTemplate {
            asset: template,
            node,
            reason: e.to_string(),
        })?;
        let cached = CachedTemplate::materialize(loaded.info, loaded.document, self.scene.registry().clone())?;
        debug!(
            template = %template,
            source = %cached.info.source,
            nodes = cached.document.nodes.len(),
            "cached template"
        );
        self.templates.insert(template, cached);
        Ok(())
    }

    pub(crate) fn cache_template(&mut self, info: AssetInfo, document: TemplateDocument) -> SyncResult<()> {
        let template = info.id;
        let cached = CachedTemplate::materialize(info, document, self.scene.registry().clone())?;
        self.templates.insert(template, cached);
        Ok(())
    }

    /// Drop the cached copy of `template`; the next use reloads it.
    pub fn invalidate_template(&mut self, template: AssetId) -> bool {
        self.templates.remove(&template).is_some()
    }

    // ---- Instantiation ----

    /// Materialize `template` as a new instance under `parent` (or as a
    /// scene root). Returns the instance root.
    pub async fn instantiate(&mut self, template: AssetId, parent: Option<NodeId>) -> Option<NodeId> {
        match self.try_instantiate(template, parent).await {
            Ok(root) => Some(root),
            Err(e) => {
                e.log("instantiate");
                None
            }
        }
    }

    async fn try_instantiate(&mut self, template: AssetId, parent: Option<NodeId>) -> SyncResult<NodeId> {
        if let Some(parent) = parent {
            self.scene.try_node(parent)?;
        }
        self.ensure_template(template, parent).await?;
        self.process_events();
        let (root, _) = self.materialize_instance(template, parent, None)?;
        info!(template = %template, root = %root, "instantiated template");
        Ok(root)
    }

    /// Build an instance of a cached template and attach it at `parent`
    /// (at `index` when given). Returns the root and the identity mapping
    /// from document ids to live ids.
    pub(crate) fn materialize_instance(
        &mut self,
        template: AssetId,
        parent: Option<NodeId>,
        index: Option<usize>,
    ) -> SyncResult<(NodeId, IdRemap)> {
        let cached = self.templates.get(&template).ok_or_else(|| not_cached(template, parent))?;
        let muted = self.scene.set_events_muted(true);
        let built = build_instance(&mut self.scene, &cached.document, template);
        self.scene.set_events_muted(muted);
        let (root, remap) = built?;

        match (parent, index) {
            (Some(parent), Some(index)) => self.scene.insert_child(parent, root, index)?,
            (Some(parent), None) => self.scene.add_child(parent, root)?,
            (None, _) => self.scene.add_root(root)?,
        }
        self.index_instance(template, root);
        self.seed_reserved_overrides(root)?;
        self.process_events();
        Ok((root, remap))
    }

    // ---- Propagation ----

    /// Copy the current template values into every indexed instance of
    /// `template` for fields the instance does not override. Returns how
    /// many instances were touched.
    pub async fn refresh_instances(&mut self, template: AssetId) -> usize {
        if let Err(e) = self.ensure_template(template, None).await {
            e.log("refresh_instances");
            return 0;
        }
        self.refresh_instances_except(template, None)
    }

    /// Only outermost instances are refreshed: the overrides of content in
    /// a nested instance live on the enclosing root.
    pub(crate) fn refresh_instances_except(&mut self, template: AssetId, skip: Option<NodeId>) -> usize {
        let Some(cached) = self.templates.get(&template) else {
            return 0;
        };
        let instances: Vec<NodeId> = self
            .instances_of(template)
            .into_iter()
            .filter(|root| Some(*root) != skip)
            .filter(|root| outermost_instance_root(&self.scene, *root) == Some(*root))
            .collect();

        let source = cached.info.source.clone();
        let muted = self.scene.set_events_muted(true);
        let mut touched = 0;
        for root in instances {
            match refresh_instance(&mut self.scene, cached, root) {
                Ok(0) => {}
                Ok(written) => {
                    debug!(root = %root, fields = written, "refreshed instance from template");
                    touched += 1;
                }
                Err(e) => e.log("refresh instance"),
            }
        }
        self.scene.set_events_muted(muted);
        if touched > 0 {
            info!(template = %template, source = %source, instances = touched, "propagated template changes");
        }
        touched
    }
}

fn build_instance(scene: &mut Scene, document: &TemplateDocument, template: AssetId) -> SyncResult<(NodeId, IdRemap)> {
    let instantiated = scene.instantiate(document)?;
    let root = instantiated.root;
    adopt_members(scene, root, template);

    let node = scene.try_node_mut(root)?;
    let mut marker = node
        .marker
        .take()
        .unwrap_or_else(|| InstanceMarker::new(LocalId::generate()));
    marker.template = Some(template);
    marker.root = Some(root);
    marker.instance = Some(InstanceRecord {
        local_id: LocalId::generate(),
        overrides: OverrideStore {
            target_overrides: instantiated.target_overrides,
            ..OverrideStore::default()
        },
    });
    node.marker = Some(marker);
    node.extras.mounted_root = None;

    let applied = apply_target_overrides(scene, Some(root))?;
    if applied > 0 {
        debug!(root = %root, applied, "applied template target overrides");
    }
    Ok((root, instantiated.remap))
}

/// Write template values into one instance. Returns how many fields
/// changed.
fn refresh_instance(scene: &mut Scene, template: &CachedTemplate, root: NodeId) -> SyncResult<usize> {
    let live = TargetMap::build(scene, root);
    let (overridden, referenced): (Vec<(LocalIdPath, String)>, Vec<(LocalIdPath, String)>) = {
        let overrides = store(scene, root)?;
        (
            overrides
                .property_overrides
                .iter()
                .filter_map(|o| Some((o.target_path.clone(), o.property_path.first()?.to_string())))
                .collect(),
            overrides
                .target_overrides
                .iter()
                .filter_map(|o| Some((o.source_address.clone()?, o.property_path.first()?.to_string())))
                .collect(),
        )
    };
    let held = |address: &LocalIdPath, field: &str| {
        overridden
            .iter()
            .chain(referenced.iter())
            .any(|(a, f)| a == address && f == field)
    };

    let mut written = 0;
    for (address, counterpart) in template.view().targets().entries() {
        let Some(target) = live.resolve(&address) else {
            continue;
        };
        let (Some(type_name), Some(template_fields)) =
            (template.scene.type_name_of(counterpart), template.scene.fields_of(counterpart))
        else {
            continue;
        };
        let names = scene.registry().serializable_field_names(type_name, template_fields.keys());
        for name in names {
            if held(&address, &name) {
                continue;
            }
            let path = PropertyPath::from_segments([name.as_str()]);
            let Some(mut value) = template.scene.read_property(counterpart, &path) else {
                continue;
            };
            remap_template_refs(&mut value, &template.scene, template.root, &live);
            if scene.read_property(target, &path).as_ref() == Some(&value) {
                continue;
            }
            match scene.write_property(target, &path, value) {
                Ok(()) => written += 1,
                Err(e) => warn!(object = %target, path = %path, error = %e, "could not refresh field"),
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use prefab_overrides::store;
    use prefab_scene::{Fields, Value};
    use prefab_types::{AssetId, LocalIdPath, Target};

    use crate::fixtures::*;

    #[tokio::test]
    async fn instantiate_seeds_reserved_root_overrides() {
        let mut h = Harness::new().await;
        let root = h.sync.instantiate(h.tree, None).await.unwrap();

        let overrides = &store(h.sync.scene(), root).unwrap().property_overrides;
        assert_eq!(overrides.len(), 4);
        let address = LocalIdPath::single(lid("tree-root"));
        for entry in overrides {
            assert_eq!(entry.target_path, address);
            assert!(h.sync.config().is_reserved(entry.property_path.first().unwrap()));
        }
        let name = overrides.iter().find(|o| o.property_path == prop("name")).unwrap();
        assert_eq!(name.value, Value::str("Tree"));
        assert_eq!(h.sync.instances_of(h.tree), vec![root]);
    }

    #[tokio::test]
    async fn template_target_overrides_reach_new_instances() {
        let mut h = Harness::new().await;
        let forest = h.sync.scene_mut().create_node("Forest");
        h.sync.scene_mut().add_root(forest).unwrap();
        h.sync.scene_mut().add_component(forest, "Keeper", Fields::new()).unwrap();
        h.sync.instantiate(h.tree, Some(forest)).await.unwrap();
        let root = h.sync.create_template_from_node(forest, "forest.prefab").await.unwrap();
        let template = h.sync.instance_template(root).unwrap();

        let keeper = h.sync.scene().node(root).unwrap().components[0];
        let leaf = h.sync.scene().node(h.child(h.child(root))).unwrap().components[0];
        h.sync
            .scene_mut()
            .set_component_property(keeper, &prop("link"), Value::ComponentRef(leaf))
            .unwrap();
        h.sync.apply_to_template(root).await.unwrap();

        let copy = h.sync.instantiate(template, None).await.unwrap();
        let copy_keeper = h.sync.scene().node(copy).unwrap().components[0];
        let copy_leaf = h.sync.scene().node(h.child(h.child(copy))).unwrap().components[0];
        assert_ne!(copy_leaf, leaf);
        assert_eq!(
            h.sync.scene().read_property(Target::Component(copy_keeper), &prop("link")),
            Some(Value::ComponentRef(copy_leaf))
        );
    }

    #[tokio::test]
    async fn unknown_template_is_not_instantiated() {
        let mut h = Harness::new().await;
        assert!(h.sync.instantiate(AssetId::new(), None).await.is_none());
        assert!(h.sync.scene().roots().is_empty());
    }
}
