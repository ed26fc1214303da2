//! Override store operations keyed by instance root.
//!
//! Every mutation is bracketed by [`ChangeObserver`] notifications. Writing
//! a property override for a `(target path, property path)` pair drops the
//! target override for the same pair and vice versa, so the two lists never
//! describe the same field twice.

use prefab_scene::{OverrideStore, PropertyOverride, Scene, TargetOverride, Value};
use prefab_types::{LocalIdPath, NodeId, PropertyPath, Target};

use crate::error::{OverrideError, OverrideResult};
use crate::observer::{ChangeObserver, EditKind};

/// The override set of an instance root.
pub fn store(scene: &Scene, root: NodeId) -> OverrideResult<&OverrideStore> {
    scene
        .node(root)
        .and_then(|n| n.marker.as_ref())
        .and_then(|m| m.instance.as_ref())
        .map(|i| &i.overrides)
        .ok_or(OverrideError::NotAnInstanceRoot(root))
}

/// Mutable override set of an instance root.
pub fn store_mut(scene: &mut Scene, root: NodeId) -> OverrideResult<&mut OverrideStore> {
    scene
        .node_mut(root)
        .and_then(|n| n.marker.as_mut())
        .and_then(|m| m.instance.as_mut())
        .map(|i| &mut i.overrides)
        .ok_or(OverrideError::NotAnInstanceRoot(root))
}

/// Run `f` on the override set of `root`, notifying `observer` around it.
pub fn edit<R>(
    scene: &mut Scene,
    root: NodeId,
    observer: &dyn ChangeObserver,
    kind: EditKind,
    f: impl FnOnce(&mut OverrideStore) -> R,
) -> OverrideResult<R> {
    let store = store_mut(scene, root)?;
    observer.before_change(Some(root), kind);
    let result = f(store);
    observer.changed(Some(root), kind);
    Ok(result)
}

/// Run `f` on the target overrides owned by `owner` (`None` for the
/// scene-level list).
pub fn edit_target_overrides<R>(
    scene: &mut Scene,
    owner: Option<NodeId>,
    observer: &dyn ChangeObserver,
    f: impl FnOnce(&mut Vec<TargetOverride>) -> R,
) -> OverrideResult<R> {
    match owner {
        Some(root) => edit(scene, root, observer, EditKind::TargetOverrides, |s| {
            f(&mut s.target_overrides)
        }),
        None => {
            observer.before_change(None, EditKind::TargetOverrides);
            let result = f(&mut scene.target_overrides);
            observer.changed(None, EditKind::TargetOverrides);
            Ok(result)
        }
    }
}

/// Target overrides owned by `owner`.
pub fn target_overrides(scene: &Scene, owner: Option<NodeId>) -> OverrideResult<&[TargetOverride]> {
    match owner {
        Some(root) => Ok(&store(scene, root)?.target_overrides),
        None => Ok(&scene.target_overrides),
    }
}

// ---------------------------------------------------------------
// Property overrides
// ---------------------------------------------------------------

/// Property override recorded for the pair, if any.
pub fn property_override<'a>(
    scene: &'a Scene,
    root: NodeId,
    target_path: &LocalIdPath,
    property_path: &PropertyPath,
) -> Option<&'a PropertyOverride> {
    store(scene, root).ok()?.property_override(target_path, property_path)
}

/// Record `value` for the pair, updating an existing entry in place.
pub fn set_property_override(
    scene: &mut Scene,
    root: NodeId,
    observer: &dyn ChangeObserver,
    target_path: &LocalIdPath,
    property_path: &PropertyPath,
    value: Value,
) -> OverrideResult<()> {
    edit(scene, root, observer, EditKind::PropertyOverrides, |s| {
        s.get_or_create_property_override(target_path, property_path).value = value;
    })?;
    let superseded = store(scene, root)?
        .target_overrides
        .iter()
        .any(|o| o.source_address.as_ref() == Some(target_path) && o.property_path == *property_path);
    if superseded {
        edit(scene, root, observer, EditKind::TargetOverrides, |s| {
            s.remove_target_overrides_at(target_path, property_path)
        })?;
    }
    Ok(())
}

/// Remove the property override for the pair. Returns it if one existed.
pub fn remove_property_override(
    scene: &mut Scene,
    root: NodeId,
    observer: &dyn ChangeObserver,
    target_path: &LocalIdPath,
    property_path: &PropertyPath,
) -> OverrideResult<Option<PropertyOverride>> {
    if !is_path_overridden(scene, root, target_path, property_path) {
        return Ok(None);
    }
    edit(scene, root, observer, EditKind::PropertyOverrides, |s| {
        s.remove_property_override(target_path, property_path)
    })
}

/// Whether `root` holds a property override for the pair.
pub fn is_path_overridden(
    scene: &Scene,
    root: NodeId,
    target_path: &LocalIdPath,
    property_path: &PropertyPath,
) -> bool {
    store(scene, root).is_ok_and(|s| s.is_path_overridden(target_path, property_path))
}

// ---------------------------------------------------------------
// Target overrides
// ---------------------------------------------------------------

/// Record a target override, replacing any entry for the same source and
/// property. Drops a property override for the same pair.
pub fn set_target_override(
    scene: &mut Scene,
    owner: Option<NodeId>,
    observer: &dyn ChangeObserver,
    entry: TargetOverride,
) -> OverrideResult<()> {
    let pair = entry.source_address.clone().map(|a| (a, entry.property_path.clone()));
    match owner {
        Some(root) => {
            edit(scene, root, observer, EditKind::TargetOverrides, |s| {
                let slot = s.get_or_create_target_override(
                    entry.source,
                    entry.source_address.as_ref(),
                    &entry.property_path,
                );
                *slot = entry;
            })?;
            if let Some((address, property_path)) = pair {
                remove_property_override(scene, root, observer, &address, &property_path)?;
            }
        }
        None => {
            edit_target_overrides(scene, None, observer, |list| {
                let existing = list.iter_mut().find(|o| {
                    o.matches_source(entry.source, entry.source_address.as_ref(), &entry.property_path)
                });
                match existing {
                    Some(slot) => *slot = entry,
                    None => list.push(entry),
                }
            })?;
        }
    }
    Ok(())
}

/// Remove every target override of `source` whose property path starts
/// with `prefix`. Returns the removed entries.
pub fn remove_target_overrides_under(
    scene: &mut Scene,
    owner: Option<NodeId>,
    observer: &dyn ChangeObserver,
    source: Target,
    source_address: Option<&LocalIdPath>,
    prefix: &PropertyPath,
) -> OverrideResult<Vec<TargetOverride>> {
    let matches = |o: &TargetOverride| {
        o.property_path.starts_with(prefix)
            && o.matches_source(source, source_address, &o.property_path)
    };
    if !target_overrides(scene, owner)?.iter().any(matches) {
        return Ok(Vec::new());
    }
    edit_target_overrides(scene, owner, observer, |list| {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(list).into_iter().partition(matches);
        *list = kept;
        removed
    })
}

/// Whether `owner` holds a target override for the source field.
pub fn is_path_in_target_overrides(
    scene: &Scene,
    owner: Option<NodeId>,
    source: Target,
    source_address: Option<&LocalIdPath>,
    property_path: &PropertyPath,
) -> bool {
    target_overrides(scene, owner).is_ok_and(|list| {
        list.iter()
            .any(|o| o.matches_source(source, source_address, property_path))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::observer::recording::RecordingObserver;
    use crate::observer::NoopObserver;

    fn entry(source: Target, address: Option<LocalIdPath>, property: &str, target: NodeId) -> TargetOverride {
        TargetOverride {
            source,
            source_address: address,
            target: Some(target),
            target_address: path(&["b-comp"]),
            property_path: prop(property),
        }
    }

    #[test]
    fn property_override_notifies_around_mutation() {
        let mut f = nested_fixture();
        let observer = RecordingObserver::default();
        set_property_override(&mut f.scene, f.a, &observer, &path(&["a-child"]), &prop("name"), Value::str("x"))
            .unwrap();
        let events = observer.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                (false, Some(f.a), EditKind::PropertyOverrides),
                (true, Some(f.a), EditKind::PropertyOverrides),
            ]
        );
        assert!(is_path_overridden(&f.scene, f.a, &path(&["a-child"]), &prop("name")));
    }

    #[test]
    fn non_root_has_no_store() {
        let mut f = nested_fixture();
        let err = set_property_override(
            &mut f.scene,
            f.a_child,
            &NoopObserver,
            &path(&["a-child"]),
            &prop("name"),
            Value::Null,
        )
        .unwrap_err();
        assert!(matches!(err, OverrideError::NotAnInstanceRoot(_)));
    }

    #[test]
    fn property_and_target_overrides_are_exclusive() {
        let mut f = nested_fixture();
        let address = path(&["a-comp"]);
        let source = Target::Component(f.a_comp);

        set_property_override(&mut f.scene, f.a, &NoopObserver, &address, &prop("link"), Value::Null).unwrap();
        set_target_override(&mut f.scene, Some(f.a), &NoopObserver, entry(source, Some(address.clone()), "link", f.b))
            .unwrap();
        assert!(!is_path_overridden(&f.scene, f.a, &address, &prop("link")));
        assert!(is_path_in_target_overrides(&f.scene, Some(f.a), source, Some(&address), &prop("link")));

        set_property_override(&mut f.scene, f.a, &NoopObserver, &address, &prop("link"), Value::Null).unwrap();
        assert!(!is_path_in_target_overrides(&f.scene, Some(f.a), source, Some(&address), &prop("link")));
        assert_eq!(store(&f.scene, f.a).unwrap().property_overrides.len(), 1);
    }

    #[test]
    fn scene_level_target_overrides() {
        let mut f = nested_fixture();
        let loose = f.scene.create_node("loose");
        let source = Target::Node(loose);
        set_target_override(&mut f.scene, None, &NoopObserver, entry(source, None, "refs.0", f.b)).unwrap();
        set_target_override(&mut f.scene, None, &NoopObserver, entry(source, None, "refs.0", f.b)).unwrap();
        set_target_override(&mut f.scene, None, &NoopObserver, entry(source, None, "refs.1", f.b)).unwrap();
        set_target_override(&mut f.scene, None, &NoopObserver, entry(source, None, "other", f.b)).unwrap();
        assert_eq!(f.scene.target_overrides.len(), 3);

        let removed =
            remove_target_overrides_under(&mut f.scene, None, &NoopObserver, source, None, &prop("refs")).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(f.scene.target_overrides.len(), 1);
    }
}
