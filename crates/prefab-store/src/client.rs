use std::sync::Arc;

use tracing::{debug, warn};

use prefab_scene::TemplateDocument;
use prefab_types::AssetId;

use crate::asset::{AssetInfo, CreateAssetRequest};
use crate::error::{StoreError, StoreResult};
use crate::traits::TemplateStore;

/// A loaded template and where it came from.
#[derive(Clone, Debug)]
pub struct LoadedTemplate {
    pub info: AssetInfo,
    pub document: TemplateDocument,
}

/// Typed access to template documents on top of a [`TemplateStore`].
#[derive(Clone)]
pub struct TemplateClient {
    store: Arc<dyn TemplateStore>,
}

impl TemplateClient {
    /// Wrap a store.
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<dyn TemplateStore> {
        &self.store
    }

    /// Metadata of asset `id`.
    pub async fn info(&self, id: AssetId) -> StoreResult<AssetInfo> {
        self.store
            .query_asset_info(id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    /// Load and decode the template document of asset `id`.
    pub async fn load(&self, id: AssetId) -> StoreResult<LoadedTemplate> {
        let info = self.info(id).await?;
        let json = self.store.read_asset(&info.source).await?;
        let document = TemplateDocument::from_json(&json).inspect_err(|e| {
            warn!(asset = %id, source = %info.source, error = %e, "template document is unreadable");
        })?;
        debug!(asset = %id, nodes = document.nodes.len(), "loaded template");
        Ok(LoadedTemplate { info, document })
    }

    /// Encode and write `document` over the asset described by `info`.
    pub async fn save(&self, info: &AssetInfo, document: &TemplateDocument) -> StoreResult<()> {
        if info.is_sub_asset() {
            return Err(StoreError::SubAsset(info.source.clone()));
        }
        let json = document.to_json()?;
        self.store.save_asset(&info.source, &json).await
    }

    /// Create a new asset at `target` holding `document`.
    pub async fn create(&self, target: &str, document: &TemplateDocument, overwrite: bool) -> StoreResult<AssetInfo> {
        let content = document.to_json()?;
        self.store
            .create_asset(CreateAssetRequest {
                target: target.to_string(),
                content,
                overwrite,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTemplateStore;
    use prefab_scene::Scene;

    fn document() -> TemplateDocument {
        let mut scene = Scene::default();
        let root = scene.create_node("root");
        let child = scene.create_node("child");
        scene.add_child(root, child).unwrap();
        scene.serialize_subtree(root).unwrap().0
    }

    #[tokio::test]
    async fn create_load_save_round_trip() {
        let client = TemplateClient::new(Arc::new(InMemoryTemplateStore::new()));
        let doc = document();
        let info = client.create("tree.prefab", &doc, false).await.unwrap();

        let loaded = client.load(info.id).await.unwrap();
        assert_eq!(loaded.document.nodes.len(), 2);
        assert_eq!(loaded.info, info);

        let mut changed = loaded.document.clone();
        changed.nodes.truncate(1);
        client.save(&info, &changed).await.unwrap();
        assert_eq!(client.load(info.id).await.unwrap().document.nodes.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_document_is_an_error() {
        let store = Arc::new(InMemoryTemplateStore::new());
        let info = store
            .create_asset(CreateAssetRequest {
                target: "broken.prefab".into(),
                content: "not json".into(),
                overwrite: false,
            })
            .await
            .unwrap();
        let client = TemplateClient::new(store);
        assert!(matches!(client.load(info.id).await.unwrap_err(), StoreError::Document(_)));
        assert!(matches!(
            client.load(AssetId::new()).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn sub_assets_are_rejected_before_writing() {
        let store = Arc::new(InMemoryTemplateStore::new());
        let id = store.insert_sub_asset("level.scene@prop", "{}");
        let client = TemplateClient::new(store);
        let info = client.info(id).await.unwrap();
        assert!(matches!(
            client.save(&info, &document()).await.unwrap_err(),
            StoreError::SubAsset(_)
        ));
    }
}
