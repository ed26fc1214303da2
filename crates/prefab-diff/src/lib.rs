//! Diff engine for prefab instance synchronization.
//!
//! Compares a live object with its template counterpart and produces a flat
//! list of `(property path, current value)` differences. A caller-supplied
//! predicate forces paths that already carry a recorded override into the
//! result, so the same engine answers both "what changed relative to the
//! template" and "what changed relative to what is already recorded".
//!
//! # Key Types
//!
//! - [`DiffContext`] -- Registry, reference resolvers and the override predicate
//! - [`ObjectDiff`] / [`DiffEntry`] -- Differences between two objects
//! - [`RefResolver`] -- Template-relative addressing of referenced objects

pub mod error;
pub mod object_diff;
pub mod resolver;

pub use error::{DiffError, DiffResult};
pub use object_diff::{diff_fields, diff_objects, diff_property, diff_values, DiffContext, DiffEntry, ObjectDiff};
pub use resolver::{IdentityOnly, RefResolver};
