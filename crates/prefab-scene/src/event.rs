use serde::{Deserialize, Serialize};

use prefab_types::{ComponentId, NodeId, PropertyPath};

use crate::node::Component;

/// Structural or property change reported by the scene.
///
/// Events are queued by the mutating [`Scene`](crate::Scene) methods and
/// drained by whoever keeps instance bookkeeping in sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SceneEvent {
    ChildAdded { parent: NodeId, child: NodeId },
    ChildRemoved { parent: NodeId, child: NodeId },
    ComponentAdded { node: NodeId, component: ComponentId },
    /// Carries the removed component since it no longer resolves.
    ComponentRemoved { node: NodeId, component: Component },
    /// `path` is relative to the node; component fields use the
    /// `__comps__.<index>` prefix.
    PropertyChanged { node: NodeId, path: PropertyPath },
}

impl SceneEvent {
    /// The node whose bookkeeping the event affects.
    pub fn node(&self) -> NodeId {
        match self {
            Self::ChildAdded { parent, .. } | Self::ChildRemoved { parent, .. } => *parent,
            Self::ComponentAdded { node, .. }
            | Self::ComponentRemoved { node, .. }
            | Self::PropertyChanged { node, .. } => *node,
        }
    }
}
