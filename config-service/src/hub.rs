//! Long-poll coordination.
//!
//! A watch suspends its caller until a change event lands on one of its
//! channels or the timeout elapses. Watches are held as registrations in a
//! channel-indexed map plus a oneshot completion signal, so tens of thousands
//! of suspended calls cost no threads. Completion and timeout race; taking the
//! sender out of an `Option` guarantees exactly one of them wins.

use crate::bus::ChangeListener;
use crate::metrics_defs::{WATCHES_RESOLVED, WATCHES_TIMED_OUT};
use crate::store::{ChangeEvent, EventLog};
use parking_lot::Mutex;
use shared::channel::{NOTIFICATION_ID_NONE, namespace_from_channel};
use shared::counter;
use shared::protocol::Notification;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// The set of channels one long-poll request waits on.
///
/// Channel keys are built from normalized namespace names, but the response
/// has to echo the client's original spelling, so the key carries a reverse
/// mapping applied at delivery time.
#[derive(Debug, Default)]
pub struct WatchKey {
    // normalized channel -> last cursor the client has seen
    channels: HashMap<String, i64>,
    // normalized namespace -> spelling the client sent
    original_names: HashMap<String, String>,
}

impl WatchKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_channel(&mut self, channel: String, cursor: i64) {
        self.channels.insert(channel, cursor);
    }

    pub fn record_original_name(&mut self, normalized: &str, original: &str) {
        if normalized != original {
            self.original_names
                .insert(normalized.to_string(), original.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn restore_name(&self, normalized_namespace: &str) -> String {
        self.original_names
            .get(normalized_namespace)
            .cloned()
            .unwrap_or_else(|| normalized_namespace.to_string())
    }
}

#[derive(Debug, PartialEq)]
pub enum WatchOutcome {
    /// At least one watched channel advanced; carries the new cursors keyed by
    /// the client's original namespace spelling.
    Changed(Vec<Notification>),
    /// The timeout elapsed without a relevant change.
    Unchanged,
}

struct PendingWatch {
    id: u64,
    key: WatchKey,
    tx: Mutex<Option<oneshot::Sender<Vec<Notification>>>>,
}

impl PendingWatch {
    /// Single-assignment completion: returns false if the watch was already
    /// completed (or timed out) by someone else.
    fn complete(&self, notifications: Vec<Notification>) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(notifications).is_ok(),
            None => false,
        }
    }
}

pub struct NotificationHub {
    log: Arc<dyn EventLog>,
    watches: Mutex<HashMap<String, Vec<Arc<PendingWatch>>>>,
    next_watch_id: AtomicU64,
}

impl NotificationHub {
    pub fn new(log: Arc<dyn EventLog>) -> Arc<Self> {
        Arc::new(NotificationHub {
            log,
            watches: Mutex::new(HashMap::new()),
            next_watch_id: AtomicU64::new(0),
        })
    }

    /// Suspends until an event newer than the declared cursor lands on any
    /// watched channel, or `wait` elapses.
    pub async fn watch(&self, key: WatchKey, wait: Duration) -> WatchOutcome {
        let (tx, rx) = oneshot::channel();
        let watch = Arc::new(PendingWatch {
            id: self.next_watch_id.fetch_add(1, Ordering::Relaxed),
            key,
            tx: Mutex::new(Some(tx)),
        });

        {
            let mut watches = self.watches.lock();
            for channel in watch.key.channels.keys() {
                watches
                    .entry(channel.clone())
                    .or_default()
                    .push(watch.clone());
            }
        }

        // Registering first, then checking the log closes the race with a
        // publish that happened between the client's last poll and now.
        let stale = self.stale_notifications(&watch.key);
        if !stale.is_empty() {
            watch.complete(stale);
        }

        let outcome = match timeout(wait, rx).await {
            Ok(Ok(notifications)) => {
                counter!(WATCHES_RESOLVED).increment(1);
                WatchOutcome::Changed(notifications)
            }
            // Timeout, or the completing side dropped the channel
            _ => {
                counter!(WATCHES_TIMED_OUT).increment(1);
                WatchOutcome::Unchanged
            }
        };
        self.deregister(&watch);
        outcome
    }

    /// Channels whose latest logged event already passed the client's cursor.
    /// Deduplicated per namespace, keeping the highest cursor; every stale
    /// channel lands in the notification's messages so the client can forward
    /// the cursors on its next config query.
    fn stale_notifications(&self, key: &WatchKey) -> Vec<Notification> {
        let mut per_namespace: HashMap<String, Notification> = HashMap::new();
        for (channel, cursor) in &key.channels {
            let Some(latest) = self.log.latest_id_for(channel) else {
                continue;
            };
            if latest <= *cursor {
                continue;
            }
            let Some(namespace) = namespace_from_channel(channel) else {
                continue;
            };
            let name = key.restore_name(namespace);
            let entry = per_namespace
                .entry(name.clone())
                .or_insert_with(|| Notification::new(name, latest));
            if entry.notification_id < latest {
                entry.notification_id = latest;
            }
            entry.messages.put(channel, latest);
        }
        per_namespace.into_values().collect()
    }

    fn deregister(&self, watch: &Arc<PendingWatch>) {
        let mut watches = self.watches.lock();
        for channel in watch.key.channels.keys() {
            if let Some(pending) = watches.get_mut(channel) {
                pending.retain(|candidate| candidate.id != watch.id);
                if pending.is_empty() {
                    watches.remove(channel);
                }
            }
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.watches.lock().values().map(Vec::len).sum()
    }
}

impl ChangeListener for NotificationHub {
    fn handle_event(&self, event: &ChangeEvent) {
        let Some(namespace) = namespace_from_channel(&event.channel) else {
            tracing::warn!(channel = %event.channel, "event on malformed channel, ignoring");
            return;
        };

        let targets: Vec<Arc<PendingWatch>> = self
            .watches
            .lock()
            .get(&event.channel)
            .cloned()
            .unwrap_or_default();

        let mut resolved = 0;
        for watch in targets {
            let cursor = watch
                .key
                .channels
                .get(&event.channel)
                .copied()
                .unwrap_or(NOTIFICATION_ID_NONE);
            if event.id <= cursor {
                continue;
            }
            let name = watch.key.restore_name(namespace);
            let mut notification = Notification::new(name, event.id);
            notification.messages.put(&event.channel, event.id);
            if watch.complete(vec![notification]) {
                resolved += 1;
            }
        }
        if resolved > 0 {
            tracing::debug!(channel = %event.channel, resolved, "resolved pending watches");
        }
    }
}
