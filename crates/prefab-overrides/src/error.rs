//! Error types for override bookkeeping.

use prefab_diff::DiffError;
use prefab_scene::SceneError;
use prefab_types::{LocalIdPath, NodeId, PropertyPath, Target};

/// Errors that can occur while recording or resolving overrides.
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    /// The node does not carry an instance record.
    #[error("node is not an instance root: {0}")]
    NotAnInstanceRoot(NodeId),

    /// A local-ID path could not be walked to completion.
    #[error("address {path} does not resolve under {root}")]
    Unresolved { root: NodeId, path: LocalIdPath },

    /// The object has no counterpart in any template (mounted or loose).
    #[error("not template content: {0}")]
    NotTemplateContent(Target),

    /// A target override lost the instance root it points into.
    #[error("target override at {0} has no target root")]
    DanglingTarget(PropertyPath),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error(transparent)]
    Diff(#[from] DiffError),
}

/// Convenience alias for override results.
pub type OverrideResult<T> = Result<T, OverrideError>;
