//! Snapshot-polling watch support
//!
//! Neither plain filesystems nor the S3 API expose a portable push
//! notification stream, so both clients implement the watch capability by
//! re-listing the watched subtree on an interval and diffing successive
//! snapshots: new or changed keys become Created events, vanished keys
//! become Removed events.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use dm_core::{EventKind, Result, WatchEvent, WatchSubscription};

pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const CHANNEL_CAP: usize = 64;

/// Size and modification time of one key, as seen by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub size: u64,
    pub modified: Option<jiff::Timestamp>,
}

pub type Snapshot = BTreeMap<String, SnapshotEntry>;

/// Produces the current key snapshot of a watched subtree.
#[async_trait]
pub trait Snapshotter: Send + Sync + 'static {
    async fn snapshot(&self) -> Result<Snapshot>;
}

/// Spawn the polling task and hand back its subscription.
///
/// `base_url` is the client's bound URL; event paths are `base_url/key`.
pub(crate) fn spawn_poll_watcher(
    base_url: String,
    interval: Duration,
    snapshotter: Box<dyn Snapshotter>,
) -> WatchSubscription {
    let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAP);
    let (errors_tx, errors_rx) = mpsc::channel(CHANNEL_CAP);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut previous: Option<Snapshot> = None;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = tokio::time::sleep(if previous.is_none() {
                    Duration::ZERO
                } else {
                    interval
                }) => {}
            }

            let current = match snapshotter.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    if errors_tx.send(e).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            if let Some(previous) = &previous {
                for (key, entry) in &current {
                    if previous.get(key) != Some(entry) {
                        let event = WatchEvent {
                            path: dm_core::url::join_url(&base_url, key),
                            origin: base_url.clone(),
                            kind: EventKind::Created,
                        };
                        if events_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                for key in previous.keys() {
                    if !current.contains_key(key) {
                        let event = WatchEvent {
                            path: dm_core::url::join_url(&base_url, key),
                            origin: base_url.clone(),
                            kind: EventKind::Removed,
                        };
                        if events_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
            previous = Some(current);
        }
    });

    WatchSubscription::new(events_rx, errors_rx, shutdown_tx)
}
