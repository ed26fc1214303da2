//! Field-level diff between a live object and its template counterpart.
//!
//! Only serializable fields are compared. Values are compared according to
//! their [`Value`] tag:
//!
//! 1. Null against present records the current value.
//! 2. Arrays record a synthetic `length` entry when lengths differ, then
//!    compare index by index. There is no positional alignment, so an
//!    insertion shifts every later index.
//! 3. Node and component references are equal when they are the same
//!    object or resolve to the same template-relative address.
//! 4. Math values use their approximate equality.
//! 5. Asset references compare by asset id.
//! 6. Records of the same type are recursed into; a type change records the
//!    whole record.
//! 7. Everything else compares strictly.
//!
//! Every comparison is OR-ed with the caller's "already overridden"
//! predicate, so paths that carry a recorded override are always reported.

use std::collections::BTreeSet;

use tracing::trace;

use prefab_scene::{Fields, Scene, TypeRegistry, Value, LENGTH_SEGMENT};
use prefab_types::{PropertyPath, Target};

use crate::error::{DiffError, DiffResult};
use crate::resolver::RefResolver;

/// A single differing path and the current value at it.
#[derive(Clone, Debug, PartialEq)]
pub struct DiffEntry {
    /// Path of the differing field, relative to the compared object.
    pub path: PropertyPath,
    /// Live value at `path`.
    pub value: Value,
}

/// The result of comparing two objects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectDiff {
    /// Differences in recording order.
    pub entries: Vec<DiffEntry>,
}

impl ObjectDiff {
    /// An empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no path differs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of differing paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Differing paths in recording order.
    pub fn paths(&self) -> Vec<&PropertyPath> {
        self.entries.iter().map(|e| &e.path).collect()
    }

    /// Live value recorded for `path`.
    pub fn get(&self, path: &PropertyPath) -> Option<&Value> {
        self.entries.iter().find(|e| e.path == *path).map(|e| &e.value)
    }

    fn push(&mut self, path: &PropertyPath, value: &Value) {
        self.entries.push(DiffEntry {
            path: path.clone(),
            value: value.clone(),
        });
    }
}

/// Everything a diff needs besides the two operands.
pub struct DiffContext<'a> {
    /// Field metadata deciding which fields are compared.
    pub registry: &'a TypeRegistry,
    /// Resolves references held by the live object.
    pub current_refs: &'a dyn RefResolver,
    /// Resolves references held by the template object.
    pub template_refs: &'a dyn RefResolver,
    is_overridden: Option<&'a dyn Fn(&PropertyPath) -> bool>,
}

impl<'a> DiffContext<'a> {
    /// A context that compares references through the two resolvers.
    pub fn new(
        registry: &'a TypeRegistry,
        current_refs: &'a dyn RefResolver,
        template_refs: &'a dyn RefResolver,
    ) -> Self {
        Self {
            registry,
            current_refs,
            template_refs,
            is_overridden: None,
        }
    }

    /// Report every path for which `predicate` holds, even when the values
    /// coincide.
    pub fn with_predicate(mut self, predicate: &'a dyn Fn(&PropertyPath) -> bool) -> Self {
        self.is_overridden = Some(predicate);
        self
    }

    fn overridden(&self, path: &PropertyPath) -> bool {
        self.is_overridden.is_some_and(|f| f(path))
    }

    fn same_ref(&self, current: Target, template: Target) -> bool {
        if current == template {
            return true;
        }
        match (
            self.current_refs.address_of(current),
            self.template_refs.address_of(template),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Compare two values at `path`, appending differences to `out`.
pub fn diff_values(ctx: &DiffContext<'_>, current: &Value, template: &Value, path: &PropertyPath, out: &mut ObjectDiff) {
    let forced = ctx.overridden(path);
    match (current, template) {
        (Value::Null, Value::Null) => {
            if forced {
                out.push(path, current);
            }
        }
        (Value::Null, _) | (_, Value::Null) => out.push(path, current),
        (Value::Array(cur), Value::Array(tmpl)) => {
            let length_path = path.child(LENGTH_SEGMENT);
            if cur.len() != tmpl.len() || ctx.overridden(&length_path) {
                out.push(&length_path, &Value::Int(cur.len() as i64));
            }
            for (index, item) in cur.iter().enumerate() {
                let item_path = path.child(index.to_string());
                match tmpl.get(index) {
                    Some(other) => diff_values(ctx, item, other, &item_path, out),
                    None => out.push(&item_path, item),
                }
            }
        }
        (Value::NodeRef(a), Value::NodeRef(b)) => {
            if forced || !ctx.same_ref(Target::Node(*a), Target::Node(*b)) {
                out.push(path, current);
            }
        }
        (Value::ComponentRef(a), Value::ComponentRef(b)) => {
            if forced || !ctx.same_ref(Target::Component(*a), Target::Component(*b)) {
                out.push(path, current);
            }
        }
        (Value::Math(a), Value::Math(b)) => {
            if forced || !a.approx_eq(b) {
                out.push(path, current);
            }
        }
        (Value::Asset(a), Value::Asset(b)) => {
            if forced || a != b {
                out.push(path, current);
            }
        }
        (Value::Record(a), Value::Record(b)) => {
            if a.type_name != b.type_name {
                out.push(path, current);
            } else {
                diff_fields(ctx, &a.type_name, &a.fields, &b.fields, path, out);
            }
        }
        (Value::Bool(_), Value::Bool(_))
        | (Value::Int(_), Value::Int(_))
        | (Value::Float(_), Value::Float(_))
        | (Value::Str(_), Value::Str(_)) => {
            if forced || current != template {
                out.push(path, current);
            }
        }
        // Differently tagged values never compare equal.
        _ => out.push(path, current),
    }
}

/// Compare the serializable fields of two objects of type `type_name`.
pub fn diff_fields(
    ctx: &DiffContext<'_>,
    type_name: &str,
    current: &Fields,
    template: &Fields,
    prefix: &PropertyPath,
    out: &mut ObjectDiff,
) {
    let present: BTreeSet<&String> = current.keys().chain(template.keys()).collect();
    static NULL: Value = Value::Null;

    let names = ctx.registry.serializable_field_names(type_name, present);
    for name in names {
        let cur = current.get(&name).unwrap_or(&NULL);
        let tmpl = template.get(&name).unwrap_or(&NULL);
        diff_values(ctx, cur, tmpl, &prefix.child(name.as_str()), out);
    }
}

/// Compare two whole objects. Returns `None` when their types differ and no
/// comparison is meaningful.
pub fn diff_objects(
    ctx: &DiffContext<'_>,
    current_type: &str,
    current: &Fields,
    template_type: &str,
    template: &Fields,
    prefix: &PropertyPath,
) -> Option<ObjectDiff> {
    if current_type != template_type {
        return None;
    }
    let mut out = ObjectDiff::new();
    diff_fields(ctx, current_type, current, template, prefix, &mut out);
    Some(out)
}

/// Compare a single property of a live object against the same property of
/// its template counterpart.
///
/// `path` addresses the field inside each object and is also the prefix of
/// every reported entry. Returns `Ok(None)` when the object types differ.
pub fn diff_property(
    ctx: &DiffContext<'_>,
    current_scene: &Scene,
    current: Target,
    template_scene: &Scene,
    template: Target,
    path: &PropertyPath,
) -> DiffResult<Option<ObjectDiff>> {
    let current_type = current_scene
        .type_name_of(current)
        .ok_or(DiffError::CurrentNotFound(current))?;
    let template_type = template_scene
        .type_name_of(template)
        .ok_or(DiffError::TemplateNotFound(template))?;
    if current_type != template_type {
        return Ok(None);
    }

    let current_value = current_scene.read_property(current, path).unwrap_or_default();
    let template_value = template_scene.read_property(template, path).unwrap_or_default();

    let mut out = ObjectDiff::new();
    diff_values(ctx, &current_value, &template_value, path, &mut out);
    trace!(object = %current, path = %path, entries = out.len(), "diffed property");
    Ok(Some(out))
}
