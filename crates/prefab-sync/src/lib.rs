//! Prefab instance synchronization.
//!
//! [`PrefabSync`] owns a live [`Scene`](prefab_scene::Scene), watches its
//! change events and keeps every prefab instance in it consistent with its
//! template: property edits become overrides after a short debounce,
//! structural edits become mounted content, and the instance lifecycle
//! operations move divergences between instance and template.
//!
//! | Operation | Direction |
//! |-----------|-----------|
//! | [`apply_to_template`](PrefabSync::apply_to_template) | instance to template |
//! | [`revert_to_template`](PrefabSync::revert_to_template) | template to instance |
//! | [`link_to_template`](PrefabSync::link_to_template) | plain subtree to instance |
//! | [`unlink_from_template`](PrefabSync::unlink_from_template) | instance to plain subtree |
//! | [`create_template_from_node`](PrefabSync::create_template_from_node) | plain subtree to new template |
//!
//! Operations never abort the editor session: failures are logged and
//! reported as `None`/`false`.
//!
//! # Key Types
//!
//! - [`PrefabSync`] -- The orchestrator
//! - [`SyncConfig`] -- Debounce window, reload timeout, reserved root fields
//! - [`ApplyResult`] -- What an apply changed; input to [`PrefabSync::undo_apply`]
//! - [`SceneHost`] -- Full scene reload capability of the embedding editor
//! - [`NoticeRouter`] / [`EditNotice`] -- Before/after notices for override edits

pub mod apply;
pub mod config;
pub mod create;
pub mod debounce;
pub mod error;
pub mod host;
pub mod link;
pub mod notice;
pub mod orchestrator;
pub mod result;
pub mod revert;
mod scope;
pub mod templates;

#[cfg(test)]
mod fixtures;

pub use config::SyncConfig;
pub use debounce::Debouncer;
pub use error::{SyncError, SyncResult};
pub use host::{reload_scene, ImmediateHost, ReloadSignal, SceneHost};
pub use notice::{EditNotice, EditPhase, NoticeFilter, NoticeRouter, NoticeStream};
pub use orchestrator::{PendingChange, PrefabSync};
pub use result::{ApplyResult, MovedOverride, MovedRemoval, RemountedComponent, RemountedNode};
