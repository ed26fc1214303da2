use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ComponentId, NodeId};

/// A live scene object: either a node or a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Target {
    Node(NodeId),
    Component(ComponentId),
}

impl Target {
    /// The node id, if this is a node.
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            Self::Component(_) => None,
        }
    }

    /// The component id, if this is a component.
    pub fn as_component(&self) -> Option<ComponentId> {
        match self {
            Self::Node(_) => None,
            Self::Component(id) => Some(*id),
        }
    }
}

impl From<NodeId> for Target {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<ComponentId> for Target {
    fn from(id: ComponentId) -> Self {
        Self::Component(id)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "{id}"),
            Self::Component(id) => write!(f, "{id}"),
        }
    }
}
