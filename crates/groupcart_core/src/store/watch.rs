//! Watch/notify plumbing for live subscriptions.
//!
//! # Responsibility
//! - Track which paths are being watched.
//! - Deliver full-state snapshots of the watched path after overlapping writes.
//!
//! # Invariants
//! - Every subscription receives exactly one `initial` snapshot, and it is the
//!   first one delivered.
//! - Dropping a [`Subscription`] unregisters it; no further snapshots are built
//!   for it.
//! - Watchers whose receiver is gone are pruned on the next notification.

use super::path::StorePath;
use super::StoreResult;
use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

pub type WatcherId = u64;

/// Full value of a watched path at one store revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: StorePath,
    /// `None` when nothing is stored at or below the path.
    pub value: Option<Value>,
    /// `true` only for the snapshot delivered on subscribe.
    pub initial: bool,
    pub revision: u64,
}

impl Snapshot {
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }
}

struct Watcher {
    id: WatcherId,
    path: StorePath,
    sender: Sender<Snapshot>,
}

/// Registry of active watchers, shared by a store and its subscriptions.
#[derive(Default)]
pub struct WatchRegistry {
    next_id: AtomicU64,
    watchers: Mutex<Vec<Watcher>>,
}

impl WatchRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a watcher and queues its initial snapshot.
    ///
    /// Callers must serialize this with writes so that no write can land
    /// between reading `value` and registering.
    pub fn subscribe(
        self: &Arc<Self>,
        path: StorePath,
        value: Option<Value>,
        revision: u64,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::channel();
        // The receiver is alive in this scope, so the send cannot fail.
        let _ = sender.send(Snapshot {
            path: path.clone(),
            value,
            initial: true,
            revision,
        });
        self.guard().push(Watcher {
            id,
            path: path.clone(),
            sender,
        });

        Subscription {
            id,
            path,
            receiver,
            registry: Arc::downgrade(self),
        }
    }

    /// Sends one fresh snapshot to every watcher overlapping any `written` path.
    ///
    /// `read` is called at most once per distinct watched path. Returns the
    /// number of snapshots delivered.
    pub fn notify(
        &self,
        written: &[StorePath],
        revision: u64,
        mut read: impl FnMut(&StorePath) -> StoreResult<Option<Value>>,
    ) -> usize {
        let mut watchers = self.guard();
        let mut cache: HashMap<StorePath, Option<Value>> = HashMap::new();
        let mut delivered = 0;

        watchers.retain(|watcher| {
            if !written.iter().any(|path| watcher.path.overlaps(path)) {
                return true;
            }
            let value = match cache.get(&watcher.path) {
                Some(value) => value.clone(),
                None => match read(&watcher.path) {
                    Ok(value) => {
                        cache.insert(watcher.path.clone(), value.clone());
                        value
                    }
                    Err(err) => {
                        warn!(
                            "event=watch_notify module=store status=error watcher={} path={} error={}",
                            watcher.id, watcher.path, err
                        );
                        return true;
                    }
                },
            };
            let sent = watcher.sender.send(Snapshot {
                path: watcher.path.clone(),
                value,
                initial: false,
                revision,
            });
            if sent.is_ok() {
                delivered += 1;
            }
            sent.is_ok()
        });

        delivered
    }

    pub fn watcher_count(&self) -> usize {
        self.guard().len()
    }

    fn unregister(&self, id: WatcherId) {
        self.guard().retain(|watcher| watcher.id != id);
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Watcher>> {
        // A panic mid-push/retain cannot leave the Vec half-updated.
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cancellable stream of snapshots for one watched path.
///
/// Dropping the subscription releases the underlying watcher.
pub struct Subscription {
    id: WatcherId,
    path: StorePath,
    receiver: Receiver<Snapshot>,
    registry: Weak<WatchRegistry>,
}

impl Subscription {
    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Next queued snapshot, without blocking.
    pub fn try_next(&self) -> Option<Snapshot> {
        self.receiver.try_recv().ok()
    }

    /// Waits up to `timeout` for the next snapshot.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Snapshot> {
        match self.receiver.recv_timeout(timeout) {
            Ok(snapshot) => Some(snapshot),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Collapses all queued snapshots into the newest one.
    ///
    /// Snapshots carry full state, so older ones are redundant. The `initial`
    /// flag survives the collapse when any drained snapshot carried it.
    pub fn drain_latest(&self) -> Option<Snapshot> {
        let mut latest: Option<Snapshot> = None;
        let mut saw_initial = false;
        while let Some(snapshot) = self.try_next() {
            saw_initial |= snapshot.initial;
            latest = Some(snapshot);
        }
        latest.map(|mut snapshot| {
            snapshot.initial = saw_initial;
            snapshot
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::WatchRegistry;
    use crate::store::path::StorePath;
    use serde_json::json;

    #[test]
    fn initial_snapshot_is_delivered_first_and_once() {
        let registry = WatchRegistry::new();
        let path = StorePath::parse("groups/g1").unwrap();
        let sub = registry.subscribe(path.clone(), Some(json!({"admin": "u1"})), 3);

        let first = sub.try_next().unwrap();
        assert!(first.initial);
        assert_eq!(first.revision, 3);
        assert!(sub.try_next().is_none());

        let written = StorePath::parse("groups/g1/members/u2").unwrap();
        assert_eq!(registry.notify(&[written], 4, |_| Ok(None)), 1);
        let second = sub.try_next().unwrap();
        assert!(!second.initial);
        assert!(!second.exists());
    }

    #[test]
    fn unrelated_writes_are_not_delivered() {
        let registry = WatchRegistry::new();
        let sub = registry.subscribe(StorePath::parse("groups/g1/shopping").unwrap(), None, 0);
        sub.try_next();

        let written = StorePath::parse("groups/g2/shopping/i1").unwrap();
        assert_eq!(registry.notify(&[written], 1, |_| Ok(None)), 0);
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn dropping_subscription_unregisters_watcher() {
        let registry = WatchRegistry::new();
        let sub = registry.subscribe(StorePath::parse("users/u1").unwrap(), None, 0);
        assert_eq!(registry.watcher_count(), 1);
        drop(sub);
        assert_eq!(registry.watcher_count(), 0);
    }

    #[test]
    fn drain_latest_keeps_initial_flag() {
        let registry = WatchRegistry::new();
        let path = StorePath::parse("users/u1").unwrap();
        let sub = registry.subscribe(path.clone(), None, 0);
        registry.notify(&[path], 1, |_| Ok(Some(serde_json::json!("x"))));

        let latest = sub.drain_latest().unwrap();
        assert!(latest.initial);
        assert_eq!(latest.revision, 1);
        assert!(sub.drain_latest().is_none());
    }
}
