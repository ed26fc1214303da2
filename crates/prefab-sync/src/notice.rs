//! Before/after edit notices fanned out to subscribers.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use prefab_overrides::{ChangeObserver, EditKind};
use prefab_types::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditPhase {
    Before,
    After,
}

/// One side of an override edit. `root` is `None` for the scene-level
/// target override list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditNotice {
    pub phase: EditPhase,
    pub root: Option<NodeId>,
    pub kind: EditKind,
}

/// Which notices a subscriber receives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum NoticeFilter {
    #[default]
    All,
    /// Edits of one instance root's records.
    Root(NodeId),
    Kinds(Vec<EditKind>),
}

impl NoticeFilter {
    /// Whether `notice` passes the filter.
    pub fn matches(&self, notice: &EditNotice) -> bool {
        match self {
            Self::All => true,
            Self::Root(root) => notice.root == Some(*root),
            Self::Kinds(kinds) => kinds.contains(&notice.kind),
        }
    }
}

pub type NoticeStream = broadcast::Receiver<EditNotice>;

struct Subscriber {
    filter: NoticeFilter,
    sender: broadcast::Sender<EditNotice>,
}

/// Routes edit notices to matching subscribers. Subscribers whose receivers
/// were dropped are pruned on the next delivery.
pub struct NoticeRouter {
    subscribers: RwLock<Vec<Subscriber>>,
    capacity: usize,
}

impl NoticeRouter {
    /// A router buffering up to `capacity` notices per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to notices matching `filter`.
    pub fn subscribe(&self, filter: NoticeFilter) -> NoticeStream {
        let (sender, rx) = broadcast::channel(self.capacity);
        self.subscribers
            .write()
            .expect("router lock poisoned")
            .push(Subscriber { filter, sender });
        rx
    }

    /// Publish `notice` to every subscriber.
    pub fn route(&self, notice: EditNotice) {
        let mut subs = self.subscribers.write().expect("router lock poisoned");
        subs.retain(|sub| {
            if sub.filter.matches(&notice) {
                sub.sender.send(notice).is_ok()
            } else {
                sub.sender.receiver_count() > 0
            }
        });
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("router lock poisoned").len()
    }
}

impl ChangeObserver for NoticeRouter {
    fn before_change(&self, root: Option<NodeId>, kind: EditKind) {
        self.route(EditNotice {
            phase: EditPhase::Before,
            root,
            kind,
        });
    }

    fn changed(&self, root: Option<NodeId>, kind: EditKind) {
        self.route(EditNotice {
            phase: EditPhase::After,
            root,
            kind,
        });
    }
}
