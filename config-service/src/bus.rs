//! Durable change-event bus.
//!
//! `publish` appends to the shared event log, which makes the event visible to
//! every service node. Each node runs a scanner task that tails the log and
//! fans events out to in-process listeners (the notification hub and the merge
//! cache). A compactor task deletes superseded events per channel so the log
//! does not grow without bound.

use crate::metrics_defs::{EVENTS_COMPACTED, EVENTS_PUBLISHED};
use crate::store::{ChangeEvent, EventLog};
use parking_lot::{Mutex, RwLock};
use shared::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};

/// Page size for compaction deletes; a short page means no older events remain.
const COMPACTION_BATCH: usize = 100;

/// Sleep applied when the compaction queue has been empty for a while.
const COMPACTOR_IDLE_SLEEP: Duration = Duration::from_secs(5);

const COMPACTOR_POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub trait ChangeListener: Send + Sync {
    /// Must not block; the scanner calls listeners inline.
    fn handle_event(&self, event: &ChangeEvent);
}

pub struct ChangeBus {
    log: Arc<dyn EventLog>,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    compact_tx: mpsc::Sender<i64>,
    // Taken once by the compactor task
    compact_rx: Mutex<Option<mpsc::Receiver<i64>>>,
    scan_cursor: AtomicI64,
}

impl ChangeBus {
    pub fn new(log: Arc<dyn EventLog>, compaction_queue_size: usize) -> Arc<Self> {
        let (compact_tx, compact_rx) = mpsc::channel(compaction_queue_size);
        // Start tailing at the current end of the log; older events were
        // handled by whoever was running before us.
        let scan_cursor = AtomicI64::new(log.latest_id());
        Arc::new(ChangeBus {
            log,
            listeners: RwLock::new(Vec::new()),
            compact_tx,
            compact_rx: Mutex::new(Some(compact_rx)),
            scan_cursor,
        })
    }

    pub fn register_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Appends a change event for `channel` to the shared log.
    ///
    /// Delivery to watchers happens through the scanner on every node,
    /// including this one, so there is a single dispatch path. The compaction
    /// hint is best effort: a full queue drops it rather than blocking the
    /// publishing request.
    pub fn publish(&self, channel: &str) -> ChangeEvent {
        let event = self.log.append(channel);
        tracing::info!(channel, id = event.id, "published change event");
        counter!(EVENTS_PUBLISHED).increment(1);

        if self.compact_tx.try_send(event.id).is_err() {
            tracing::debug!(id = event.id, "compaction queue full, dropping hint");
        }
        event
    }

    /// Events newer than `cursor` on a single channel, ascending.
    pub fn poll_since(&self, channel: &str, cursor: i64) -> Vec<ChangeEvent> {
        self.log
            .events_after(cursor, usize::MAX)
            .into_iter()
            .filter(|event| event.channel == channel)
            .collect()
    }

    /// Dispatches any events past the scan cursor to the registered listeners.
    /// Called periodically by the scanner task; exposed for tests.
    pub fn scan_once(&self) {
        loop {
            let cursor = self.scan_cursor.load(Ordering::Acquire);
            let events = self.log.events_after(cursor, 500);
            if events.is_empty() {
                return;
            }
            for event in &events {
                tracing::debug!(channel = %event.channel, id = event.id, "dispatching change event");
                for listener in self.listeners.read().iter() {
                    listener.handle_event(event);
                }
                self.scan_cursor.store(event.id, Ordering::Release);
            }
            if events.len() < 500 {
                return;
            }
        }
    }

    /// Tails the shared log at a fixed interval. One task per process.
    pub fn spawn_scanner(self: &Arc<Self>, scan_interval: Duration) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(scan_interval);
            loop {
                ticker.tick().await;
                bus.scan_once();
            }
        })
    }

    /// Drains the compaction queue. One task per process; panics if called twice.
    pub fn spawn_compactor(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = self.clone();
        let mut rx = self
            .compact_rx
            .lock()
            .take()
            .expect("compactor already started");
        tokio::spawn(async move {
            loop {
                match timeout(COMPACTOR_POLL_TIMEOUT, rx.recv()).await {
                    Ok(Some(id)) => bus.compact(id),
                    // Sender gone, the bus is shutting down
                    Ok(None) => return,
                    Err(_) => sleep(COMPACTOR_IDLE_SLEEP).await,
                }
            }
        })
    }

    /// Deletes events on the hinted event's channel that it supersedes.
    ///
    /// The event is re-read first: another node may have compacted it away
    /// already, in which case there is nothing to do. Concurrent compaction of
    /// the same channel is safe because deletes are idempotent.
    pub fn compact(&self, event_id: i64) {
        let Some(event) = self.log.find_by_id(event_id) else {
            return;
        };

        loop {
            let batch = self.log.older_than(&event.channel, event.id, COMPACTION_BATCH);
            if batch.is_empty() {
                return;
            }
            let ids: Vec<i64> = batch.iter().map(|old| old.id).collect();
            self.log.delete(&ids);
            counter!(EVENTS_COMPACTED).increment(ids.len() as u64);
            tracing::debug!(
                channel = %event.channel,
                removed = ids.len(),
                "compacted superseded change events"
            );
            if batch.len() < COMPACTION_BATCH {
                return;
            }
        }
    }
}
