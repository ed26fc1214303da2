use prefab_scene::SceneError;
use prefab_types::AssetId;

/// Errors from template store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No asset is registered under this id.
    #[error("asset not found: {0}")]
    NotFound(AssetId),

    /// No asset lives at this source location.
    #[error("no asset at {0}")]
    SourceNotFound(String),

    /// An asset already exists at the target and overwriting was not asked for.
    #[error("asset already exists at {0}")]
    AlreadyExists(String),

    /// Sub-assets are only writable through the document that embeds them.
    #[error("{0} is a sub-asset and cannot be saved on its own")]
    SubAsset(String),

    /// The source location escapes the store or is empty.
    #[error("invalid asset source: {0}")]
    InvalidSource(String),

    /// Metadata sidecar could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored content is not a valid template document.
    #[error("template document error: {0}")]
    Document(#[from] SceneError),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
