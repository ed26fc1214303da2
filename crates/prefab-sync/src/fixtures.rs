//! Templates and a wired-up orchestrator shared by the unit tests.

use std::sync::Arc;

use prefab_scene::{Component, Fields, InstanceMarker, Scene, TemplateDocument, Value};
use prefab_store::{InMemoryTemplateStore, TemplateClient};
use prefab_types::{AssetId, LocalId, NodeId, PropertyPath};

use crate::config::SyncConfig;
use crate::host::ImmediateHost;
use crate::orchestrator::PrefabSync;

pub(crate) fn lid(s: &str) -> LocalId {
    LocalId::new(s).unwrap()
}

pub(crate) fn prop(raw: &str) -> PropertyPath {
    PropertyPath::parse(raw).unwrap()
}

/// ```text
/// Tree (tree-root)
/// └── Branch (branch) [Leaf leaf { size: 1 }]
/// ```
pub(crate) fn tree_document() -> TemplateDocument {
    let mut scene = Scene::default();
    let root = scene.create_node("Tree");
    let branch = scene.create_node("Branch");
    scene.add_child(root, branch).unwrap();
    let mut fields = Fields::new();
    fields.insert("size".into(), Value::Int(1));
    let mut leaf = Component::new(branch, "Leaf", fields);
    leaf.local_id = Some(lid("leaf"));
    scene.attach_component(leaf).unwrap();
    scene.node_mut(root).unwrap().marker = Some(InstanceMarker::member_of(root, None, lid("tree-root")));
    scene.node_mut(branch).unwrap().marker = Some(InstanceMarker::member_of(root, None, lid("branch")));
    scene.serialize_subtree(root).unwrap().0
}

pub(crate) struct Harness {
    pub sync: PrefabSync,
    pub store: Arc<InMemoryTemplateStore>,
    pub tree: AssetId,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        let store = Arc::new(InMemoryTemplateStore::new());
        let client = TemplateClient::new(store.clone());
        let info = client.create("tree.prefab", &tree_document(), false).await.unwrap();
        let sync = PrefabSync::new(Scene::default(), client, Arc::new(ImmediateHost), SyncConfig::default()).unwrap();
        Self {
            sync,
            store,
            tree: info.id,
        }
    }

    pub(crate) async fn stored(&self, id: AssetId) -> TemplateDocument {
        self.sync.client().load(id).await.unwrap().document
    }

    /// First child of `parent`.
    pub(crate) fn child(&self, parent: NodeId) -> NodeId {
        self.sync.scene().node(parent).unwrap().children[0]
    }

    pub(crate) fn name(&self, node: NodeId) -> Option<Value> {
        self.sync.scene().read_property(prefab_types::Target::Node(node), &prop("name"))
    }
}

/// Name of every node in `doc`, in document order.
pub(crate) fn document_names(doc: &TemplateDocument) -> Vec<String> {
    doc.nodes.iter().map(|n| n.name().to_string()).collect()
}
