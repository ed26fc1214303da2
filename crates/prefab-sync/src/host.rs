//! The scene host seam: the editor that owns the live scene and can rebuild
//! it from scratch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{info, warn};

/// One-shot "reload completed" signal handed to the host with each request.
///
/// Firing before anyone waits is not lost.
#[derive(Clone, Debug, Default)]
pub struct ReloadSignal {
    notify: Arc<Notify>,
}

impl ReloadSignal {
    /// A signal nobody has fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the reload as finished.
    pub fn fire(&self) {
        self.notify.notify_one();
    }

    /// Wait for the signal, giving up after `limit`. Returns whether the
    /// reload completed in time.
    pub async fn wait(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.notify.notified()).await.is_ok()
    }
}

/// The editor hosting the scene.
#[async_trait]
pub trait SceneHost: Send + Sync {
    /// Rebuild the whole scene so private engine state that cannot be
    /// patched field by field is consistent again. Completion is reported
    /// through `done`.
    async fn request_full_reload(&self, done: ReloadSignal);
}

/// Host whose reloads complete immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateHost;

#[async_trait]
impl SceneHost for ImmediateHost {
    async fn request_full_reload(&self, done: ReloadSignal) {
        done.fire();
    }
}

/// Request a reload from `host` and wait for it, bounded by `limit`.
///
/// A timeout is soft: the caller carries on with what it already produced.
pub async fn reload_scene(host: &dyn SceneHost, limit: Duration) -> bool {
    let done = ReloadSignal::new();
    host.request_full_reload(done.clone()).await;
    let completed = done.wait(limit).await;
    if completed {
        info!("scene reload completed");
    } else {
        warn!(timeout_ms = limit.as_millis() as u64, "scene reload did not complete in time");
    }
    completed
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::StalledHost;
    use super::*;

    #[tokio::test]
    async fn immediate_host_completes() {
        assert!(reload_scene(&ImmediateHost, Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_reload_times_out_softly() {
        let host = StalledHost::default();
        assert!(!reload_scene(&host, Duration::from_secs(3)).await);
        assert_eq!(host.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn signal_fired_before_wait_is_kept() {
        let signal = ReloadSignal::new();
        signal.fire();
        assert!(signal.wait(Duration::from_millis(1)).await);
    }
}
