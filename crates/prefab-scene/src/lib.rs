//! Scene graph collaborator for prefab instance synchronization.
//!
//! Nodes and components live in a flat arena ([`Scene`]) keyed by identity.
//! Nodes that originated from a template carry an [`InstanceMarker`];
//! instance roots carry the [`OverrideStore`] recording every divergence
//! from the template.
//!
//! # Key Types
//!
//! - [`Scene`] -- The arena: structure, properties, change events
//! - [`Node`] / [`Component`] -- Arena entries
//! - [`Value`] -- Closed set of serializable field values
//! - [`TypeRegistry`] -- Field metadata (serializable, visible) and the templatable capability
//! - [`InstanceMarker`] / [`OverrideStore`] -- Template membership and override records
//! - [`SceneEvent`] -- Structural and property change notifications
//! - [`TemplateDocument`] -- A serialized subtree; see [`Scene::serialize_subtree`] and [`Scene::instantiate`]

pub mod document;
pub mod error;
pub mod event;
pub mod marker;
pub mod node;
pub mod scene;
pub mod schema;
pub mod value;

pub use document::{ClearedRef, IdRemap, Instantiated, TemplateDocument};
pub use error::{SceneError, SceneResult};
pub use event::SceneEvent;
pub use marker::{
    EditorExtras, InstanceMarker, InstanceRecord, MountedChildren, MountedComponents,
    OverrideStore, PropertyOverride, RemovedComponent, TargetOverride,
};
pub use node::{Component, Node};
pub use scene::{Referrer, Scene};
pub use schema::{
    FieldMeta, TypeRegistry, TypeSchema, NODE_ACTIVE, NODE_NAME, NODE_POSITION, NODE_ROTATION,
    NODE_SCALE, NODE_TYPE,
};
pub use value::{read_field, write_field, Fields, MathValue, Record, Value, LENGTH_SEGMENT, MAX_ARRAY_LEN};
