//! Error types for scene graph operations.

use prefab_types::{ComponentId, NodeId, PropertyPath};

/// Errors that can occur while manipulating the scene arena.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// A node id does not resolve in the arena.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A component id does not resolve in the arena.
    #[error("component not found: {0}")]
    ComponentNotFound(ComponentId),

    /// Reparenting would make a node its own ancestor.
    #[error("cannot parent {node} under its descendant {parent}")]
    CycleDetected {
        node: NodeId,
        parent: NodeId,
    },

    /// A property path could not be written on the object.
    #[error("cannot write {path} on {object}")]
    InvalidProperty { object: String, path: PropertyPath },

    /// A template document does not contain its declared root.
    #[error("template document is missing its root node {0}")]
    MissingRoot(NodeId),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for scene results.
pub type SceneResult<T> = Result<T, SceneError>;
