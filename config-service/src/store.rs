//! Storage seams for the config service.
//!
//! The real deployment backs these traits with a durable shared database; the
//! in-memory implementation here is used by tests and the demo binary. All
//! server components talk to the store exclusively through the traits so the
//! backend can be swapped without touching the merge or notification logic.

use parking_lot::RwLock;
use shared::channel::CLUSTER_NAME_DEFAULT;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Immutable configuration snapshot for one namespace in one cluster.
///
/// A new configuration state is always a new release with a new release key;
/// rows are never updated in place.
#[derive(Clone, Debug, PartialEq)]
pub struct Release {
    pub id: i64,
    pub app_id: String,
    pub cluster_name: String,
    pub namespace_name: String,
    pub release_key: String,
    pub configurations: HashMap<String, String>,
    pub created_at: SystemTime,
}

/// Namespace registration. Public namespaces may be consumed by applications
/// other than their owner.
#[derive(Clone, Debug, PartialEq)]
pub struct AppNamespace {
    pub app_id: String,
    pub name: String,
    pub is_public: bool,
}

/// One row of the durable change-event log. `id` is monotonically increasing
/// across the whole log and doubles as the client-visible cursor.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub id: i64,
    pub channel: String,
    pub created_at: SystemTime,
}

pub trait ReleaseStore: Send + Sync {
    /// Resolves the active release for the coordinates, falling back
    /// cluster -> data center -> default cluster.
    fn find_active_release(
        &self,
        app_id: &str,
        cluster: &str,
        data_center: Option<&str>,
        namespace: &str,
    ) -> Option<Release>;
}

pub trait AppNamespaceRegistry: Send + Sync {
    /// Case-insensitive lookup of a namespace owned by the given application.
    fn find_by_app_id_and_namespace(&self, app_id: &str, namespace: &str) -> Option<AppNamespace>;

    /// Case-insensitive lookup of a public namespace by name, regardless of owner.
    fn find_public_namespace_by_name(&self, namespace: &str) -> Option<AppNamespace>;
}

/// Durable, append-only, ordered change-event log shared by all service nodes.
pub trait EventLog: Send + Sync {
    fn append(&self, channel: &str) -> ChangeEvent;

    fn find_by_id(&self, id: i64) -> Option<ChangeEvent>;

    /// Events with id greater than `cursor`, ascending, across all channels.
    fn events_after(&self, cursor: i64, limit: usize) -> Vec<ChangeEvent>;

    /// Highest event id recorded for a channel, if any.
    fn latest_id_for(&self, channel: &str) -> Option<i64>;

    /// Events on `channel` with id smaller than `id`, ascending, at most `limit`.
    fn older_than(&self, channel: &str, id: i64, limit: usize) -> Vec<ChangeEvent>;

    /// Deleting an id that is already gone is a no-op; compaction runs
    /// concurrently on multiple nodes.
    fn delete(&self, ids: &[i64]);

    fn latest_id(&self) -> i64;
}

#[derive(Default)]
struct StoreInner {
    // (app_id, cluster, namespace) -> latest active release
    releases: HashMap<(String, String, String), Release>,
    // (app_id, lowercased namespace) -> registration
    app_namespaces: HashMap<(String, String), AppNamespace>,
    // lowercased namespace -> public registration
    public_namespaces: HashMap<String, AppNamespace>,
    events: BTreeMap<i64, ChangeEvent>,
}

/// In-memory store implementing all three storage seams.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
    next_release_id: AtomicI64,
    next_event_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_app_namespace(&self, app_id: &str, name: &str, is_public: bool) {
        let namespace = AppNamespace {
            app_id: app_id.to_string(),
            name: name.to_string(),
            is_public,
        };
        let mut inner = self.inner.write();
        if is_public {
            inner
                .public_namespaces
                .insert(name.to_lowercase(), namespace.clone());
        }
        inner
            .app_namespaces
            .insert((app_id.to_string(), name.to_lowercase()), namespace);
    }

    /// Activates a new release for the coordinates, superseding any previous one.
    pub fn publish_release(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
        configurations: HashMap<String, String>,
    ) -> Release {
        let id = self.next_release_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = SystemTime::now();
        let millis = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let release = Release {
            id,
            app_id: app_id.to_string(),
            cluster_name: cluster.to_string(),
            namespace_name: namespace.to_string(),
            release_key: format!("{millis}-{id:04}"),
            configurations,
            created_at: now,
        };
        self.inner.write().releases.insert(
            (
                app_id.to_string(),
                cluster.to_string(),
                namespace.to_string(),
            ),
            release.clone(),
        );
        release
    }

    fn find_release(&self, app_id: &str, cluster: &str, namespace: &str) -> Option<Release> {
        self.inner
            .read()
            .releases
            .get(&(
                app_id.to_string(),
                cluster.to_string(),
                namespace.to_string(),
            ))
            .cloned()
    }
}

impl ReleaseStore for MemoryStore {
    fn find_active_release(
        &self,
        app_id: &str,
        cluster: &str,
        data_center: Option<&str>,
        namespace: &str,
    ) -> Option<Release> {
        if let Some(release) = self.find_release(app_id, cluster, namespace) {
            return Some(release);
        }

        if let Some(dc) = data_center
            && dc != cluster
            && let Some(release) = self.find_release(app_id, dc, namespace)
        {
            return Some(release);
        }

        if cluster != CLUSTER_NAME_DEFAULT {
            return self.find_release(app_id, CLUSTER_NAME_DEFAULT, namespace);
        }

        None
    }
}

impl AppNamespaceRegistry for MemoryStore {
    fn find_by_app_id_and_namespace(&self, app_id: &str, namespace: &str) -> Option<AppNamespace> {
        self.inner
            .read()
            .app_namespaces
            .get(&(app_id.to_string(), namespace.to_lowercase()))
            .cloned()
    }

    fn find_public_namespace_by_name(&self, namespace: &str) -> Option<AppNamespace> {
        self.inner
            .read()
            .public_namespaces
            .get(&namespace.to_lowercase())
            .cloned()
    }
}

impl EventLog for MemoryStore {
    fn append(&self, channel: &str) -> ChangeEvent {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1;
        let event = ChangeEvent {
            id,
            channel: channel.to_string(),
            created_at: SystemTime::now(),
        };
        self.inner.write().events.insert(id, event.clone());
        event
    }

    fn find_by_id(&self, id: i64) -> Option<ChangeEvent> {
        self.inner.read().events.get(&id).cloned()
    }

    fn events_after(&self, cursor: i64, limit: usize) -> Vec<ChangeEvent> {
        self.inner
            .read()
            .events
            .range(cursor + 1..)
            .take(limit)
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn latest_id_for(&self, channel: &str) -> Option<i64> {
        self.inner
            .read()
            .events
            .values()
            .rev()
            .find(|event| event.channel == channel)
            .map(|event| event.id)
    }

    fn older_than(&self, channel: &str, id: i64, limit: usize) -> Vec<ChangeEvent> {
        self.inner
            .read()
            .events
            .range(..id)
            .filter(|(_, event)| event.channel == channel)
            .take(limit)
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn delete(&self, ids: &[i64]) {
        let mut inner = self.inner.write();
        for id in ids {
            inner.events.remove(id);
        }
    }

    fn latest_id(&self) -> i64 {
        self.inner
            .read()
            .events
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_release_supersedes_previous() {
        let store = MemoryStore::new();
        let first = store.publish_release("app", "default", "application", configs(&[("x", "1")]));
        let second = store.publish_release("app", "default", "application", configs(&[("x", "2")]));

        assert_ne!(first.release_key, second.release_key);
        assert!(second.id > first.id);

        let active = store
            .find_active_release("app", "default", None, "application")
            .unwrap();
        assert_eq!(active.release_key, second.release_key);
        assert_eq!(active.configurations.get("x").unwrap(), "2");
    }

    #[test]
    fn test_cluster_fallback() {
        let store = MemoryStore::new();
        store.publish_release("app", "default", "application", configs(&[("where", "default")]));
        store.publish_release("app", "dc-east", "application", configs(&[("where", "dc")]));

        // Unknown cluster falls back to the data center release
        let release = store
            .find_active_release("app", "missing", Some("dc-east"), "application")
            .unwrap();
        assert_eq!(release.configurations.get("where").unwrap(), "dc");

        // No data center: falls through to the default cluster
        let release = store
            .find_active_release("app", "missing", None, "application")
            .unwrap();
        assert_eq!(release.configurations.get("where").unwrap(), "default");

        // Exact cluster match wins over everything
        store.publish_release("app", "pinned", "application", configs(&[("where", "pinned")]));
        let release = store
            .find_active_release("app", "pinned", Some("dc-east"), "application")
            .unwrap();
        assert_eq!(release.configurations.get("where").unwrap(), "pinned");
    }

    #[test]
    fn test_registry_is_case_insensitive() {
        let store = MemoryStore::new();
        store.add_app_namespace("infra", "TEAM.shared", true);

        let found = store
            .find_by_app_id_and_namespace("infra", "team.SHARED")
            .unwrap();
        assert_eq!(found.name, "TEAM.shared");

        let public = store.find_public_namespace_by_name("team.shared").unwrap();
        assert_eq!(public.app_id, "infra");
        assert!(public.is_public);
    }

    #[test]
    fn test_event_log_ordering_and_delete() {
        let store = MemoryStore::new();
        let a = store.append("chan-a");
        let b = store.append("chan-b");
        let c = store.append("chan-a");

        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(store.latest_id(), c.id);
        assert_eq!(store.latest_id_for("chan-a"), Some(c.id));

        let after = store.events_after(a.id, 10);
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].id, b.id);

        let older = store.older_than("chan-a", c.id, 100);
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, a.id);

        store.delete(&[a.id]);
        // Deleting again is a no-op
        store.delete(&[a.id]);
        assert!(store.older_than("chan-a", c.id, 100).is_empty());
    }
}
