use serde::{Deserialize, Serialize};

use prefab_types::{ComponentId, LocalId, NodeId};

use crate::marker::{EditorExtras, InstanceMarker};
use crate::schema::{NODE_ACTIVE, NODE_NAME, NODE_POSITION, NODE_ROTATION, NODE_SCALE};
use crate::value::{Fields, Value};

/// A node of the scene arena.
///
/// Parent and children are identities resolved through the owning
/// [`Scene`](crate::Scene); the node owns neither.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub components: Vec<ComponentId>,
    pub fields: Fields,
    pub marker: Option<InstanceMarker>,
    #[serde(default)]
    pub extras: EditorExtras,
}

impl Node {
    /// A detached node with default transform fields.
    pub fn new(name: impl Into<String>) -> Self {
        let mut fields = Fields::new();
        fields.insert(NODE_NAME.into(), Value::Str(name.into()));
        fields.insert(NODE_POSITION.into(), Value::vec3(0.0, 0.0, 0.0));
        fields.insert(NODE_ROTATION.into(), Value::quat(0.0, 0.0, 0.0, 1.0));
        fields.insert(NODE_SCALE.into(), Value::vec3(1.0, 1.0, 1.0));
        fields.insert(NODE_ACTIVE.into(), Value::Bool(true));
        Self {
            id: NodeId::new(),
            parent: None,
            children: Vec::new(),
            components: Vec::new(),
            fields,
            marker: None,
            extras: EditorExtras::default(),
        }
    }

    /// Display name, empty if unset.
    pub fn name(&self) -> &str {
        match self.fields.get(NODE_NAME) {
            Some(Value::Str(name)) => name,
            _ => "",
        }
    }

    /// Local id within the node's template scope.
    pub fn local_id(&self) -> Option<&LocalId> {
        self.marker.as_ref().map(|m| &m.local_id)
    }

    /// Returns `true` if this node carries an instance record.
    pub fn is_instance_root(&self) -> bool {
        self.marker.as_ref().is_some_and(InstanceMarker::is_instance_root)
    }

    /// Root of the instantiation this node belongs to.
    pub fn instance_scope(&self) -> Option<NodeId> {
        self.marker.as_ref().and_then(|m| m.root)
    }

    /// Whether the node is mounted content of an instance.
    pub fn is_mounted(&self) -> bool {
        self.extras.mounted_root.is_some()
    }
}

/// A component attached to exactly one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub node: NodeId,
    pub type_name: String,
    pub fields: Fields,
    /// Identity inside the template; `None` for components that were never
    /// part of one.
    pub local_id: Option<LocalId>,
    #[serde(default)]
    pub extras: EditorExtras,
}

impl Component {
    /// A component of `type_name` on `node` with a fresh id.
    pub fn new(node: NodeId, type_name: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: ComponentId::new(),
            node,
            type_name: type_name.into(),
            fields,
            local_id: None,
            extras: EditorExtras::default(),
        }
    }

    /// Whether the component is mounted content of an instance.
    pub fn is_mounted(&self) -> bool {
        self.extras.mounted_root.is_some()
    }
}
