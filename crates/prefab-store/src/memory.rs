use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use prefab_types::AssetId;

use crate::asset::{AssetInfo, AssetMeta, CreateAssetRequest};
use crate::error::{StoreError, StoreResult};
use crate::traits::TemplateStore;

#[derive(Default)]
struct Assets {
    by_id: HashMap<AssetId, AssetInfo>,
    by_source: HashMap<String, (AssetId, String)>,
}

/// In-memory template store.
///
/// Intended for tests and embedding. Contents are held behind a `RwLock`
/// and cloned on read.
pub struct InMemoryTemplateStore {
    assets: RwLock<Assets>,
}

impl InMemoryTemplateStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            assets: RwLock::new(Assets::default()),
        }
    }

    /// Number of assets currently stored.
    pub fn len(&self) -> usize {
        self.assets.read().expect("lock poisoned").by_id.len()
    }

    /// Whether the store holds no assets.
    pub fn is_empty(&self) -> bool {
        self.assets.read().expect("lock poisoned").by_id.is_empty()
    }

    /// Register an asset that is embedded in another document.
    pub fn insert_sub_asset(&self, source: impl Into<String>, content: impl Into<String>) -> AssetId {
        self.insert(source.into(), content.into(), AssetMeta { sub_asset: true })
    }

    /// Content of an asset by id, if present.
    pub fn content_of(&self, id: AssetId) -> Option<String> {
        let assets = self.assets.read().expect("lock poisoned");
        let info = assets.by_id.get(&id)?;
        assets.by_source.get(&info.source).map(|(_, content)| content.clone())
    }

    fn insert(&self, source: String, content: String, meta: AssetMeta) -> AssetId {
        let mut assets = self.assets.write().expect("lock poisoned");
        let id = match assets.by_source.get(&source) {
            Some((id, _)) => *id,
            None => AssetId::new(),
        };
        assets.by_id.insert(
            id,
            AssetInfo {
                id,
                source: source.clone(),
                meta,
            },
        );
        assets.by_source.insert(source, (id, content));
        id
    }
}

impl Default for InMemoryTemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn query_asset_info(&self, id: AssetId) -> StoreResult<Option<AssetInfo>> {
        Ok(self.assets.read().expect("lock poisoned").by_id.get(&id).cloned())
    }

    async fn read_asset(&self, source: &str) -> StoreResult<String> {
        let assets = self.assets.read().expect("lock poisoned");
        assets
            .by_source
            .get(source)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| StoreError::SourceNotFound(source.to_string()))
    }

    async fn save_asset(&self, source: &str, content: &str) -> StoreResult<()> {
        let mut assets = self.assets.write().expect("lock poisoned");
        let id = match assets.by_source.get(source) {
            Some((id, _)) => *id,
            None => return Err(StoreError::SourceNotFound(source.to_string())),
        };
        if assets.by_id.get(&id).is_some_and(AssetInfo::is_sub_asset) {
            return Err(StoreError::SubAsset(source.to_string()));
        }
        assets.by_source.insert(source.to_string(), (id, content.to_string()));
        debug!(asset = %id, source, bytes = content.len(), "saved asset");
        Ok(())
    }

    async fn create_asset(&self, request: CreateAssetRequest) -> StoreResult<AssetInfo> {
        if request.target.is_empty() {
            return Err(StoreError::InvalidSource(request.target));
        }
        let exists = self
            .assets
            .read()
            .expect("lock poisoned")
            .by_source
            .contains_key(&request.target);
        if exists && !request.overwrite {
            return Err(StoreError::AlreadyExists(request.target));
        }
        let id = self.insert(request.target.clone(), request.content, AssetMeta::default());
        debug!(asset = %id, source = %request.target, overwrite = exists, "created asset");
        Ok(AssetInfo {
            id,
            source: request.target,
            meta: AssetMeta::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: &str, content: &str, overwrite: bool) -> CreateAssetRequest {
        CreateAssetRequest {
            target: target.to_string(),
            content: content.to_string(),
            overwrite,
        }
    }

    #[tokio::test]
    async fn create_then_query_and_read() {
        let store = InMemoryTemplateStore::new();
        let info = store.create_asset(request("a.prefab", "{}", false)).await.unwrap();
        assert_eq!(store.len(), 1);
        let queried = store.query_asset_info(info.id).await.unwrap().unwrap();
        assert_eq!(queried.source, "a.prefab");
        assert_eq!(store.read_asset("a.prefab").await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn create_refuses_existing_target_unless_overwriting() {
        let store = InMemoryTemplateStore::new();
        let first = store.create_asset(request("a.prefab", "1", false)).await.unwrap();
        let err = store.create_asset(request("a.prefab", "2", false)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let second = store.create_asset(request("a.prefab", "2", true)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.content_of(first.id).as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn sub_assets_cannot_be_saved() {
        let store = InMemoryTemplateStore::new();
        let id = store.insert_sub_asset("scene.scene@inner", "{}");
        assert!(store.query_asset_info(id).await.unwrap().unwrap().is_sub_asset());
        let err = store.save_asset("scene.scene@inner", "[]").await.unwrap_err();
        assert!(matches!(err, StoreError::SubAsset(_)));
    }

    #[tokio::test]
    async fn missing_assets() {
        let store = InMemoryTemplateStore::default();
        assert!(store.query_asset_info(AssetId::new()).await.unwrap().is_none());
        assert!(matches!(
            store.save_asset("nope", "").await.unwrap_err(),
            StoreError::SourceNotFound(_)
        ));
    }
}
