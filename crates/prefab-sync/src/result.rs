//! What an apply changed, and enough of the prior state to undo it.

use prefab_scene::{
    EditorExtras, InstanceMarker, PropertyOverride, RemovedComponent, Scene, TargetOverride, TemplateDocument,
};
use prefab_types::{AssetId, ComponentId, LocalId, LocalIdPath, NodeId};

/// A mounted node re-registered under a nested instance's own record.
#[derive(Clone, Debug, PartialEq)]
pub struct RemountedNode {
    pub node: NodeId,
    pub owner: NodeId,
    pub parent_address: LocalIdPath,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemountedComponent {
    pub component: ComponentId,
    pub owner: NodeId,
    pub node_address: LocalIdPath,
}

/// A property override moved onto a nested instance root.
#[derive(Clone, Debug, PartialEq)]
pub struct MovedOverride {
    pub owner: NodeId,
    pub entry: PropertyOverride,
}

/// A removed-component record moved onto a nested instance root.
#[derive(Clone, Debug, PartialEq)]
pub struct MovedRemoval {
    pub owner: NodeId,
    pub entry: RemovedComponent,
}

/// Outcome of [`PrefabSync::apply_to_template`](crate::PrefabSync::apply_to_template).
///
/// Pass it to [`PrefabSync::undo_apply`](crate::PrefabSync::undo_apply) to
/// restore the template document and every instance-side record exactly as
/// they were.
#[derive(Clone, Debug)]
pub struct ApplyResult {
    pub root: NodeId,
    pub template: AssetId,
    /// Template document before the apply.
    pub previous: TemplateDocument,
    /// Template document written by the apply.
    pub written: TemplateDocument,
    /// Mounted nodes that became template members.
    pub folded_nodes: Vec<NodeId>,
    pub remounted_nodes: Vec<RemountedNode>,
    pub folded_components: Vec<ComponentId>,
    pub remounted_components: Vec<RemountedComponent>,
    /// Top-scope overrides whose values now live in the template.
    pub applied_overrides: Vec<PropertyOverride>,
    pub moved_overrides: Vec<MovedOverride>,
    /// Removals of top-scope components, now absent from the template.
    pub applied_removals: Vec<RemovedComponent>,
    pub moved_removals: Vec<MovedRemoval>,
    /// Scene-level target overrides adopted by the instance.
    pub adopted_target_overrides: Vec<TargetOverride>,
    /// Members whose local ids were re-keyed to stay unique in their scope.
    pub rekeyed: Vec<(LocalId, LocalId)>,
    pub(crate) snapshot: InstanceSnapshot,
}

impl ApplyResult {
    /// Every mounted node the apply accounted for.
    pub fn mounted_nodes(&self) -> Vec<NodeId> {
        self.folded_nodes
            .iter()
            .copied()
            .chain(self.remounted_nodes.iter().map(|r| r.node))
            .collect()
    }
}

/// Markers and bookkeeping of an instance subtree plus the scene-level
/// target overrides. Field values are not captured; apply does not change
/// them.
#[derive(Clone, Debug, Default)]
pub(crate) struct InstanceSnapshot {
    nodes: Vec<(NodeId, Option<InstanceMarker>, EditorExtras)>,
    components: Vec<(ComponentId, Option<LocalId>, EditorExtras)>,
    scene_target_overrides: Vec<TargetOverride>,
}

impl InstanceSnapshot {
    pub(crate) fn capture(scene: &Scene, root: NodeId) -> Self {
        let nodes = scene
            .descendants(root)
            .into_iter()
            .filter_map(|id| scene.node(id))
            .map(|n| (n.id, n.marker.clone(), n.extras.clone()))
            .collect();
        let components = scene
            .subtree_components(root)
            .into_iter()
            .filter_map(|id| scene.component(id))
            .map(|c| (c.id, c.local_id.clone(), c.extras.clone()))
            .collect();
        Self {
            nodes,
            components,
            scene_target_overrides: scene.target_overrides.clone(),
        }
    }

    /// Write the captured state back onto whatever still exists.
    pub(crate) fn restore(&self, scene: &mut Scene) {
        for (id, marker, extras) in &self.nodes {
            if let Some(node) = scene.node_mut(*id) {
                node.marker = marker.clone();
                node.extras = extras.clone();
            }
        }
        for (id, local_id, extras) in &self.components {
            if let Some(component) = scene.component_mut(*id) {
                component.local_id = local_id.clone();
                component.extras = extras.clone();
            }
        }
        scene.target_overrides = self.scene_target_overrides.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefab_scene::{Fields, InstanceRecord};

    #[test]
    fn snapshot_restores_markers_and_extras() {
        let mut scene = Scene::default();
        let root = scene.create_node("root");
        scene.add_root(root).unwrap();
        let mut marker = InstanceMarker::member_of(root, Some(AssetId::new()), LocalId::generate());
        marker.instance = Some(InstanceRecord::new(LocalId::generate()));
        scene.node_mut(root).unwrap().marker = Some(marker.clone());
        let child = scene.create_node("child");
        scene.add_child(root, child).unwrap();
        scene.node_mut(child).unwrap().extras.mounted_root = Some(root);
        let comp = scene.add_component(child, "Sprite", Fields::new()).unwrap();

        let snapshot = InstanceSnapshot::capture(&scene, root);
        scene.node_mut(child).unwrap().extras.mounted_root = None;
        scene.node_mut(child).unwrap().marker = Some(InstanceMarker::member_of(root, None, LocalId::generate()));
        scene.component_mut(comp).unwrap().local_id = Some(LocalId::generate());
        scene.node_mut(root).unwrap().marker = None;

        snapshot.restore(&mut scene);
        assert_eq!(scene.node(root).unwrap().marker, Some(marker));
        assert_eq!(scene.node(child).unwrap().extras.mounted_root, Some(root));
        assert!(scene.node(child).unwrap().marker.is_none());
        assert!(scene.component(comp).unwrap().local_id.is_none());
    }
}
