use serde::{Deserialize, Serialize};

use prefab_types::NodeId;

/// Which part of an override set an edit touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditKind {
    PropertyOverrides,
    TargetOverrides,
    RemovedComponents,
    MountedChildren,
    MountedComponents,
    /// Instance markers themselves (link, unlink, fold).
    Marker,
}

/// Receives before/after notifications around every override mutation.
///
/// `root` is the instance root owning the edited records, or `None` for the
/// scene-level target override list. Notifications are fire-and-forget.
pub trait ChangeObserver: Send + Sync {
    fn before_change(&self, root: Option<NodeId>, kind: EditKind);
    fn changed(&self, root: Option<NodeId>, kind: EditKind);
}

/// Observer that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ChangeObserver for NoopObserver {
    fn before_change(&self, _root: Option<NodeId>, _kind: EditKind) {}
    fn changed(&self, _root: Option<NodeId>, _kind: EditKind) {}
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Mutex;

    use super::*;

    /// Observer that keeps every notification for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub events: Mutex<Vec<(bool, Option<NodeId>, EditKind)>>,
    }

    impl ChangeObserver for RecordingObserver {
        fn before_change(&self, root: Option<NodeId>, kind: EditKind) {
            self.events.lock().unwrap().push((false, root, kind));
        }

        fn changed(&self, root: Option<NodeId>, kind: EditKind) {
            self.events.lock().unwrap().push((true, root, kind));
        }
    }
}
