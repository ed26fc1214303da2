//! Template persistence for prefab synchronization.
//!
//! Template documents are read and written through the [`TemplateStore`]
//! trait, a request/response interface that treats content as opaque text.
//! [`TemplateClient`] layers typed [`TemplateDocument`](prefab_scene::TemplateDocument)
//! access on top.
//!
//! # Storage Backends
//!
//! - [`InMemoryTemplateStore`] -- `HashMap`-based store for tests and embedding
//! - [`DirTemplateStore`] -- files under a directory with `.meta` sidecars
//!
//! # Design Rules
//!
//! 1. An asset keeps its id across overwrites and restarts.
//! 2. Sub-assets are readable but never written on their own.
//! 3. All I/O errors are propagated, never silently ignored.

pub mod asset;
pub mod client;
pub mod dir;
pub mod error;
pub mod memory;
pub mod traits;

pub use asset::{AssetInfo, AssetMeta, CreateAssetRequest};
pub use client::{LoadedTemplate, TemplateClient};
pub use dir::DirTemplateStore;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryTemplateStore;
pub use traits::TemplateStore;
