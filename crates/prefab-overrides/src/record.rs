//! Turning live edits into recorded overrides, and target overrides back
//! into live references.
//!
//! Property overrides come from diffing a live object against its
//! counterpart in a materialized copy of the template ([`TemplateView`]).
//! Target overrides come from scanning the references held at the edited
//! path: a reference that crosses an instance boundary is re-expressed
//! relative to the instance that contains the referenced object.

use tracing::{debug, trace};

use prefab_diff::{diff_property, DiffContext};
use prefab_scene::{Scene, TargetOverride, Value, LENGTH_SEGMENT};
use prefab_types::{LocalIdPath, NodeId, PropertyPath, Target};

use crate::address::{address_of, locate, nested_roots_between, ScopeRefs, TargetMap};
use crate::error::{OverrideError, OverrideResult};
use crate::mounted::mounted_owner;
use crate::observer::{ChangeObserver, EditKind};
use crate::store::{
    edit, is_path_in_target_overrides, remove_target_overrides_under, set_property_override,
    set_target_override, store, target_overrides,
};

/// A materialized template and its address space.
pub struct TemplateView<'a> {
    pub scene: &'a Scene,
    pub root: NodeId,
    targets: TargetMap,
}

impl<'a> TemplateView<'a> {
    /// View the template materialized in `scene` under `root`.
    pub fn new(scene: &'a Scene, root: NodeId) -> Self {
        Self {
            scene,
            root,
            targets: TargetMap::build(scene, root),
        }
    }

    /// Template object at `address`.
    pub fn counterpart(&self, address: &LocalIdPath) -> Option<Target> {
        self.targets.resolve(address)
    }

    /// Address space of the template.
    pub fn targets(&self) -> &TargetMap {
        &self.targets
    }

    fn refs(&self) -> ScopeRefs<'a> {
        ScopeRefs {
            scene: self.scene,
            root: self.root,
        }
    }
}

// ---------------------------------------------------------------
// Property overrides
// ---------------------------------------------------------------

/// Diff `path` of `target` against the template and record every differing
/// sub-path on `root`. Returns the recorded paths.
///
/// Paths already held by a target override are left alone. Recording a
/// shorter array length drops overrides on indices past the new end.
pub fn record_property_overrides(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    root: NodeId,
    template: &TemplateView<'_>,
    target: Target,
    path: &PropertyPath,
) -> OverrideResult<Vec<PropertyPath>> {
    let address = address_of(scene, root, target).ok_or(OverrideError::NotTemplateContent(target))?;
    let counterpart = template
        .counterpart(&address)
        .ok_or_else(|| OverrideError::Unresolved {
            root: template.root,
            path: address.clone(),
        })?;

    let diff = {
        let overrides = store(scene, root)?;
        let is_overridden = |p: &PropertyPath| overrides.is_path_overridden(&address, p);
        let current_refs = ScopeRefs { scene, root };
        let template_refs = template.refs();
        let ctx = DiffContext::new(scene.registry(), &current_refs, &template_refs).with_predicate(&is_overridden);
        diff_property(&ctx, scene, target, template.scene, counterpart, path)?
    };
    let Some(diff) = diff else {
        debug!(object = %target, path = %path, "type differs from template, nothing recorded");
        return Ok(Vec::new());
    };

    let mut recorded = Vec::with_capacity(diff.len());
    for entry in diff.entries {
        if is_path_in_target_overrides(scene, Some(root), target, Some(&address), &entry.path) {
            trace!(object = %target, path = %entry.path, "held by a target override");
            continue;
        }
        let new_length = match (&entry.value, entry.path.segments().split_last()) {
            (Value::Int(len), Some((last, array))) if last == LENGTH_SEGMENT => {
                Some((PropertyPath::from_segments(array), usize::try_from(*len).unwrap_or(0)))
            }
            _ => None,
        };
        set_property_override(scene, root, observer, &address, &entry.path, entry.value)?;
        if let Some((array, len)) = new_length {
            prune_stale_indices(scene, observer, root, &address, &array, len)?;
        }
        recorded.push(entry.path);
    }

    debug!(root = %root, address = %address, recorded = recorded.len(), "recorded property overrides");
    Ok(recorded)
}

/// Record every visible field of `target`, as when a whole component is
/// reported as changed.
pub fn record_object_overrides(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    root: NodeId,
    template: &TemplateView<'_>,
    target: Target,
) -> OverrideResult<Vec<PropertyPath>> {
    let names = {
        let type_name = scene
            .type_name_of(target)
            .ok_or(OverrideError::NotTemplateContent(target))?;
        let fields = scene
            .fields_of(target)
            .ok_or(OverrideError::NotTemplateContent(target))?;
        scene.registry().visible_field_names(type_name, fields.keys())
    };
    let mut recorded = Vec::new();
    for name in names {
        let path = PropertyPath::from_segments([name]);
        recorded.extend(record_target_overrides(scene, observer, target, &path)?);
        recorded.extend(record_property_overrides(scene, observer, root, template, target, &path)?);
    }
    Ok(recorded)
}

fn prune_stale_indices(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    root: NodeId,
    address: &LocalIdPath,
    array: &PropertyPath,
    len: usize,
) -> OverrideResult<usize> {
    let depth = array.len();
    let stale = move |p: &PropertyPath| {
        p.segments()
            .get(depth)
            .and_then(|s| s.parse::<usize>().ok())
            .is_some_and(|index| index >= len)
    };
    let any = store(scene, root)?
        .property_overrides
        .iter()
        .any(|o| o.target_path == *address && o.property_path.starts_with(array) && stale(&o.property_path));
    if !any {
        return Ok(0);
    }
    let pruned = edit(scene, root, observer, EditKind::PropertyOverrides, |s| {
        s.prune_property_overrides(address, array, stale)
    })?;
    debug!(address = %address, array = %array, pruned, "pruned overrides past array end");
    Ok(pruned)
}

// ---------------------------------------------------------------
// Target overrides
// ---------------------------------------------------------------

/// Instance root owning records about `source`, and the source's address
/// when it is template content.
pub fn source_owner(scene: &Scene, source: Target) -> (Option<NodeId>, Option<LocalIdPath>) {
    match locate(scene, source) {
        Some((root, address)) => (Some(root), Some(address)),
        None => (mounted_owner(scene, source), None),
    }
}

/// Where a reference held by a source owned by `owner` must be recorded:
/// the instance root containing `referenced` and its address there.
///
/// `None` when the reference needs no target override: the referenced
/// object is not template content, or it sits in the same scope as the
/// source.
pub fn retarget(
    scene: &Scene,
    owner: Option<NodeId>,
    source_address: Option<&LocalIdPath>,
    referenced: Target,
) -> Option<(NodeId, LocalIdPath)> {
    let (ref_root, ref_address) = locate(scene, referenced)?;
    let (Some(owner), Some(source_address)) = (owner, source_address) else {
        return Some((ref_root, ref_address));
    };
    if owner != ref_root {
        return Some((ref_root, ref_address));
    }

    let (_, source_scope) = source_address.segments().split_last()?;
    let (_, ref_scope) = ref_address.segments().split_last()?;
    if source_scope == ref_scope {
        return None;
    }
    let common = source_scope
        .iter()
        .zip(ref_scope)
        .take_while(|(a, b)| a == b)
        .count();
    if ref_scope.len() > common {
        let node = scene.node_of(referenced)?;
        let nested = *nested_roots_between(scene, owner, node).get(common)?;
        let address = LocalIdPath::from_segments(ref_address.segments()[common + 1..].to_vec());
        Some((nested, address))
    } else {
        Some((owner, ref_address))
    }
}

/// Re-derive the target overrides for every reference held at or below
/// `prefix` on `source`. Existing entries under the prefix are replaced.
/// Returns the recorded paths.
pub fn record_target_overrides(
    scene: &mut Scene,
    observer: &dyn ChangeObserver,
    source: Target,
    prefix: &PropertyPath,
) -> OverrideResult<Vec<PropertyPath>> {
    let (owner, source_address) = source_owner(scene, source);
    remove_target_overrides_under(scene, owner, observer, source, source_address.as_ref(), prefix)?;

    let value = scene.read_property(source, prefix).unwrap_or_default();
    let mut refs = Vec::new();
    value.visit_refs(prefix, &mut |path, referenced| refs.push((path.clone(), referenced)));

    let mut recorded = Vec::new();
    for (property_path, referenced) in refs {
        let Some((target, target_address)) = retarget(scene, owner, source_address.as_ref(), referenced) else {
            continue;
        };
        trace!(
            source = %source,
            path = %property_path,
            target = %target,
            address = %target_address,
            "cross-boundary reference"
        );
        set_target_override(
            scene,
            owner,
            observer,
            TargetOverride {
                source,
                source_address: source_address.clone(),
                target: Some(target),
                target_address,
                property_path: property_path.clone(),
            },
        )?;
        recorded.push(property_path);
    }
    Ok(recorded)
}

/// Resolve both ends of a target override under the current scene.
pub fn resolve_target_override(
    scene: &Scene,
    owner: Option<NodeId>,
    entry: &TargetOverride,
) -> OverrideResult<(Target, Target)> {
    let source = match (owner, entry.source_address.as_ref()) {
        (Some(owner), Some(address)) => {
            TargetMap::build(scene, owner)
                .resolve(address)
                .ok_or_else(|| OverrideError::Unresolved {
                    root: owner,
                    path: address.clone(),
                })?
        }
        _ if scene.contains(entry.source) => entry.source,
        _ => return Err(OverrideError::NotTemplateContent(entry.source)),
    };
    let target_root = entry
        .target
        .ok_or_else(|| OverrideError::DanglingTarget(entry.property_path.clone()))?;
    let referenced = TargetMap::build(scene, target_root)
        .resolve(&entry.target_address)
        .ok_or_else(|| OverrideError::Unresolved {
            root: target_root,
            path: entry.target_address.clone(),
        })?;
    Ok((source, referenced))
}

/// Write the reference a target override describes. No change event is
/// reported.
pub fn apply_target_override(scene: &mut Scene, owner: Option<NodeId>, entry: &TargetOverride) -> OverrideResult<()> {
    let (source, referenced) = resolve_target_override(scene, owner, entry)?;
    scene.write_property(source, &entry.property_path, Value::from_target(referenced))?;
    trace!(source = %source, path = %entry.property_path, referenced = %referenced, "applied target override");
    Ok(())
}

/// Apply every target override owned by `owner`. Broken entries are
/// skipped. Returns how many were applied.
pub fn apply_target_overrides(scene: &mut Scene, owner: Option<NodeId>) -> OverrideResult<usize> {
    let entries = target_overrides(scene, owner)?.to_vec();
    let mut applied = 0;
    for entry in &entries {
        match apply_target_override(scene, owner, entry) {
            Ok(()) => applied += 1,
            Err(e) => debug!(path = %entry.property_path, error = %e, "skipped target override"),
        }
    }
    Ok(applied)
}
