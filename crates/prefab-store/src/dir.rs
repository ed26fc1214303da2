//! Directory-backed template store.
//!
//! Each asset is a file under the store root. A `<file>.meta` JSON sidecar
//! next to it holds the asset id and metadata, so ids survive restarts. The
//! index of ids is rebuilt by scanning sidecars on [`DirTemplateStore::open`].

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use prefab_types::AssetId;

use crate::asset::{AssetInfo, AssetMeta, CreateAssetRequest};
use crate::error::{StoreError, StoreResult};
use crate::traits::TemplateStore;

const META_SUFFIX: &str = ".meta";

#[derive(Serialize, Deserialize)]
struct MetaFile {
    id: AssetId,
    #[serde(flatten)]
    meta: AssetMeta,
}

pub struct DirTemplateStore {
    root: PathBuf,
    index: RwLock<HashMap<AssetId, AssetInfo>>,
}

impl DirTemplateStore {
    /// Open (or create) a store rooted at `root` and index its assets.
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let mut index = HashMap::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(source) = source_of_meta(&root, &path) else {
                    continue;
                };
                let bytes = fs::read(&path).await?;
                match serde_json::from_slice::<MetaFile>(&bytes) {
                    Ok(meta) => {
                        index.insert(
                            meta.id,
                            AssetInfo {
                                id: meta.id,
                                source,
                                meta: meta.meta,
                            },
                        );
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable asset meta"),
                }
            }
        }

        debug!(root = %root.display(), assets = index.len(), "opened template directory");
        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    /// Directory holding the assets.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of indexed assets.
    pub fn len(&self) -> usize {
        self.index.read().expect("lock poisoned").len()
    }

    /// Whether no asset is indexed.
    pub fn is_empty(&self) -> bool {
        self.index.read().expect("lock poisoned").is_empty()
    }

    fn asset_path(&self, source: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(source);
        let valid = !source.is_empty()
            && !source.ends_with(META_SUFFIX)
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidSource(source.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn info_by_source(&self, source: &str) -> Option<AssetInfo> {
        self.index
            .read()
            .expect("lock poisoned")
            .values()
            .find(|info| info.source == source)
            .cloned()
    }
}

fn meta_path(asset: &Path) -> PathBuf {
    let mut name = asset.as_os_str().to_os_string();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

fn source_of_meta(root: &Path, meta: &Path) -> Option<String> {
    let relative = meta.strip_prefix(root).ok()?;
    let text = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?
        .join("/");
    text.strip_suffix(META_SUFFIX).map(str::to_string)
}

#[async_trait]
impl TemplateStore for DirTemplateStore {
    async fn query_asset_info(&self, id: AssetId) -> StoreResult<Option<AssetInfo>> {
        Ok(self.index.read().expect("lock poisoned").get(&id).cloned())
    }

    async fn read_asset(&self, source: &str) -> StoreResult<String> {
        let path = self.asset_path(source)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::SourceNotFound(source.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_asset(&self, source: &str, content: &str) -> StoreResult<()> {
        let path = self.asset_path(source)?;
        let info = self
            .info_by_source(source)
            .ok_or_else(|| StoreError::SourceNotFound(source.to_string()))?;
        if info.is_sub_asset() {
            return Err(StoreError::SubAsset(source.to_string()));
        }
        fs::write(&path, content).await?;
        debug!(asset = %info.id, source, bytes = content.len(), "saved asset");
        Ok(())
    }

    async fn create_asset(&self, request: CreateAssetRequest) -> StoreResult<AssetInfo> {
        let path = self.asset_path(&request.target)?;
        let existing = self.info_by_source(&request.target);
        if existing.is_some() && !request.overwrite {
            return Err(StoreError::AlreadyExists(request.target));
        }

        let info = existing.unwrap_or_else(|| AssetInfo {
            id: AssetId::new(),
            source: request.target.clone(),
            meta: AssetMeta::default(),
        });
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let meta = serde_json::to_vec_pretty(&MetaFile {
            id: info.id,
            meta: info.meta.clone(),
        })
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(&path, &request.content).await?;
        fs::write(meta_path(&path), meta).await?;

        self.index
            .write()
            .expect("lock poisoned")
            .insert(info.id, info.clone());
        debug!(asset = %info.id, source = %info.source, "created asset");
        Ok(info)
    }
}
