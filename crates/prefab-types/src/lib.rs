//! Foundation types for prefab instance synchronization.
//!
//! This crate provides the identity and addressing types shared by every
//! other crate in the workspace.
//!
//! # Key Types
//!
//! - [`NodeId`] / [`ComponentId`] -- Runtime identities of live scene objects (UUID v7)
//! - [`AssetId`] -- Identifier of a persisted asset (templates included)
//! - [`LocalId`] -- Stable identifier of a node/component within one template scope
//! - [`LocalIdPath`] -- Address of an object relative to an instance root
//! - [`PropertyPath`] -- Path of a (possibly nested) field inside an object
//! - [`Target`] -- Either a node or a component

pub mod error;
pub mod ids;
pub mod local_id;
pub mod property_path;
pub mod target;

pub use error::TypeError;
pub use ids::{AssetId, ComponentId, NodeId};
pub use local_id::{LocalId, LocalIdPath};
pub use property_path::{PropertyPath, COMPONENTS_SEGMENT};
pub use target::Target;
