//! Override bookkeeping for prefab instances.
//!
//! Everything an instance records about its divergence from the template
//! goes through this crate: local-ID addressing across nested instance
//! boundaries, property and target override recording, and the
//! mounted-content buckets. Every mutation of an override set is reported
//! to a [`ChangeObserver`] before and after it happens.
//!
//! # Key Types
//!
//! - [`TargetMap`] -- Address space of one instance root, indexed top-down
//! - [`TemplateView`] -- A materialized template used as the diff baseline
//! - [`ChangeObserver`] / [`EditKind`] -- Before/after notifications around edits
//! - [`OverrideError`] -- Resolution and bookkeeping failures

pub mod address;
pub mod error;
pub mod mounted;
pub mod observer;
pub mod record;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use address::{
    address_of, component_address, find_outermost_instance_root, innermost_scope_of, is_template_child,
    locate, nested_roots_between, nested_roots_in_scope, outermost_instance_root, scope_root_of, ScopeRefs,
    TargetMap, TargetSlot,
};
pub use error::{OverrideError, OverrideResult};
pub use mounted::{
    is_template_component, mounted_owner, on_child_removed, on_component_added, on_component_removed,
    register_mounted_child, register_mounted_component, unmount_component, unmount_node,
    update_children_data, update_components_data,
};
pub use observer::{ChangeObserver, EditKind, NoopObserver};
pub use record::{
    apply_target_override, apply_target_overrides, record_object_overrides, record_property_overrides,
    record_target_overrides, resolve_target_override, retarget, source_owner, TemplateView,
};
pub use store::{
    edit, edit_target_overrides, is_path_in_target_overrides, is_path_overridden, property_override,
    remove_property_override, remove_target_overrides_under, set_property_override, set_target_override,
    store, store_mut, target_overrides,
};
