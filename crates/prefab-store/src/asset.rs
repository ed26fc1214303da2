use serde::{Deserialize, Serialize};

use prefab_types::AssetId;

/// What the store knows about one asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: AssetId,
    /// Location of the asset inside the store, e.g. `levels/tree.prefab`.
    pub source: String,
    #[serde(default)]
    pub meta: AssetMeta,
}

impl AssetInfo {
    /// Whether the asset is embedded in another document and cannot be
    /// written on its own.
    pub fn is_sub_asset(&self) -> bool {
        self.meta.sub_asset
    }
}

/// Sidecar metadata stored next to an asset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMeta {
    #[serde(default)]
    pub sub_asset: bool,
}

/// Request to create a new asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateAssetRequest {
    /// Source location of the new asset.
    pub target: String,
    pub content: String,
    /// Replace an existing asset at `target` (keeping its id).
    pub overwrite: bool,
}
