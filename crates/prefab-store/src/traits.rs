use async_trait::async_trait;

use prefab_types::AssetId;

use crate::asset::{AssetInfo, CreateAssetRequest};
use crate::error::StoreResult;

/// Request/response access to persisted template documents.
///
/// Implementations must satisfy these invariants:
/// - An asset keeps its id for its whole lifetime, including overwrites.
/// - Content is opaque to the store; it is never parsed here.
/// - Sub-assets can be read but never saved.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Look up an asset by id. Returns `Ok(None)` if it does not exist.
    async fn query_asset_info(&self, id: AssetId) -> StoreResult<Option<AssetInfo>>;

    /// Read the content stored at `source`.
    async fn read_asset(&self, source: &str) -> StoreResult<String>;

    /// Replace the content stored at `source`.
    async fn save_asset(&self, source: &str, content: &str) -> StoreResult<()>;

    /// Create a new asset and return its info.
    async fn create_asset(&self, request: CreateAssetRequest) -> StoreResult<AssetInfo>;
}
