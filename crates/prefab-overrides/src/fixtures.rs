//! Scene builders shared by the unit tests of this crate.

use prefab_scene::{Component, Fields, InstanceMarker, InstanceRecord, Scene};
use prefab_types::{AssetId, ComponentId, LocalId, LocalIdPath, NodeId, PropertyPath};

pub(crate) fn lid(s: &str) -> LocalId {
    LocalId::new(s).unwrap()
}

pub(crate) fn path(segments: &[&str]) -> LocalIdPath {
    segments.iter().map(|s| lid(s)).collect()
}

pub(crate) fn prop(raw: &str) -> PropertyPath {
    PropertyPath::parse(raw).unwrap()
}

/// Create an instance root under `parent` (or at the top level).
/// `enclosing` is the root of the instance it is nested in, if any.
pub(crate) fn instance_root(
    scene: &mut Scene,
    parent: Option<NodeId>,
    name: &str,
    template: AssetId,
    local: &str,
    instance_local: &str,
    enclosing: Option<NodeId>,
) -> NodeId {
    let id = scene.create_node(name);
    let mut marker = InstanceMarker::member_of(enclosing.unwrap_or(id), Some(template), lid(local));
    marker.instance = Some(InstanceRecord::new(lid(instance_local)));
    scene.node_mut(id).unwrap().marker = Some(marker);
    match parent {
        Some(parent) => scene.add_child(parent, id).unwrap(),
        None => scene.add_root(id).unwrap(),
    }
    id
}

/// Create a template member of the scope rooted at `root`.
pub(crate) fn member(scene: &mut Scene, parent: NodeId, name: &str, root: NodeId, local: &str) -> NodeId {
    let template = scene
        .node(root)
        .and_then(|n| n.marker.as_ref())
        .and_then(|m| m.template);
    let id = scene.create_node(name);
    scene.node_mut(id).unwrap().marker = Some(InstanceMarker::member_of(root, template, lid(local)));
    scene.add_child(parent, id).unwrap();
    id
}

/// Attach a template component to `node`.
pub(crate) fn member_component(scene: &mut Scene, node: NodeId, type_name: &str, local: &str) -> ComponentId {
    let mut component = Component::new(node, type_name, Fields::new());
    component.local_id = Some(lid(local));
    scene.attach_component(component).unwrap()
}

/// Template `A` with one child carrying a component, and a nested instance
/// of template `B` under that child.
///
/// ```text
/// A (a-root, instance a-inst)
/// └── child (a-child) [Link a-comp]
///     └── B (b-root, instance b-inst)
///         └── b-child (b-child) [Target b-comp]
/// ```
pub(crate) struct Nested {
    pub scene: Scene,
    pub a: NodeId,
    pub a_child: NodeId,
    pub a_comp: ComponentId,
    pub b: NodeId,
    pub b_child: NodeId,
    pub b_comp: ComponentId,
}

pub(crate) fn nested_fixture() -> Nested {
    let mut scene = Scene::default();
    let a = instance_root(&mut scene, None, "A", AssetId::new(), "a-root", "a-inst", None);
    let a_child = member(&mut scene, a, "child", a, "a-child");
    let a_comp = member_component(&mut scene, a_child, "Link", "a-comp");
    let b = instance_root(&mut scene, Some(a_child), "B", AssetId::new(), "b-root", "b-inst", Some(a));
    let b_child = member(&mut scene, b, "b-child", b, "b-child");
    let b_comp = member_component(&mut scene, b_child, "Target", "b-comp");
    scene.drain_events();
    Nested {
        scene,
        a,
        a_child,
        a_comp,
        b,
        b_child,
        b_comp,
    }
}
