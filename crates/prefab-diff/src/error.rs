//! Error types for the diff engine.

use prefab_types::Target;

/// Errors that can occur when diffing scene objects.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The live object to compare does not exist.
    #[error("current object not found: {0}")]
    CurrentNotFound(Target),

    /// The template counterpart does not exist.
    #[error("template object not found: {0}")]
    TemplateNotFound(Target),
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
