//! Error types for the synchronization orchestrator.

use tracing::{debug, warn};

use prefab_overrides::OverrideError;
use prefab_scene::SceneError;
use prefab_store::StoreError;
use prefab_types::{AssetId, NodeId};

/// Errors raised inside orchestrator operations.
///
/// Public operations never return these; they log them through
/// [`SyncError::log`] and report `None`/`false` instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The node carries no instance record (or no template id).
    #[error("node is not a template instance: {0}")]
    NotAnInstance(NodeId),

    /// The template document is absent or unreadable. `node` is the
    /// instance (or parent) the template was needed for.
    #[error("template {asset} is unavailable for {}: {reason}", describe_node(.node))]
    MissingTemplate {
        asset: AssetId,
        node: Option<NodeId>,
        reason: String,
    },

    /// A template would end up containing an instance of itself.
    #[error("circular template reference: {node} is nested inside an instance of {template}")]
    CircularReference { node: NodeId, template: AssetId },

    /// The template is not an independently writable document.
    #[error("template {0} is a sub-asset and cannot be written")]
    SubAssetViolation(String),

    /// The subtree holds a component type that cannot be templated.
    #[error("component type {type_name} on {node} cannot be part of a template")]
    NotTemplatable { node: NodeId, type_name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Override(#[from] OverrideError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl SyncError {
    /// Whether this is an address resolution failure, which callers treat as
    /// a broken reference rather than a fault.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::Override(
                OverrideError::Unresolved { .. }
                    | OverrideError::NotTemplateContent(_)
                    | OverrideError::DanglingTarget(_)
            )
        )
    }

    /// Report a failed `operation` at the level its kind calls for.
    pub fn log(&self, operation: &str) {
        if self.is_resolution_failure() {
            debug!(operation, error = %self, "address did not resolve");
        } else {
            warn!(operation, error = %self, "prefab operation failed");
        }
    }
}

fn describe_node(node: &Option<NodeId>) -> String {
    match node {
        Some(node) => node.to_string(),
        None => "a scene root".to_string(),
    }
}

/// Convenience alias for orchestrator results.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use prefab_types::LocalIdPath;

    #[test]
    fn resolution_failures_are_classified() {
        let unresolved = SyncError::from(OverrideError::Unresolved {
            root: NodeId::new(),
            path: LocalIdPath::new(),
        });
        assert!(unresolved.is_resolution_failure());
        assert!(!SyncError::NotAnInstance(NodeId::new()).is_resolution_failure());
        assert!(!SyncError::SubAssetViolation("a.prefab/sub".into()).is_resolution_failure());
    }

    #[test]
    fn missing_template_names_the_node() {
        let node = NodeId::new();
        let err = SyncError::MissingTemplate {
            asset: AssetId::new(),
            node: Some(node),
            reason: "gone".into(),
        };
        assert!(err.to_string().contains(&node.to_string()));
    }
}
