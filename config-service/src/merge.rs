//! Effective-configuration resolution.
//!
//! Combines the application-private release with a public release when the
//! requested namespace is shared, computes the combined revalidation key, and
//! decides whether the client's cached copy is still current.

use crate::audit::{AuditEntry, InstanceAudit};
use crate::bus::ChangeListener;
use crate::metrics_defs::{CONFIG_FOUND, CONFIG_NOT_FOUND, CONFIG_NOT_MODIFIED};
use crate::store::{AppNamespaceRegistry, ChangeEvent, Release, ReleaseStore};
use moka::sync::Cache;
use shared::channel::{NAMESPACE_APPLICATION, NOTIFICATION_ID_NONE, assemble_channel, merged_release_key};
use shared::counter;
use shared::protocol::{FetchedConfig, NotificationMessages};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const PROPERTIES_SUFFIX: &str = ".properties";

// Bounds staleness of entries whose invalidation channel does not match their
// cache key (a lookup that fell back to another cluster).
const CACHE_TTL: Duration = Duration::from_secs(60);

/// One client revalidation request.
#[derive(Clone, Debug)]
pub struct ConfigQuery {
    pub app_id: String,
    pub cluster: String,
    pub namespace: String,
    pub data_center: Option<String>,
    pub client_ip: Option<String>,
    pub client_release_key: String,
    pub messages: Option<NotificationMessages>,
}

#[derive(Debug, PartialEq)]
pub enum QueryResult {
    Config(FetchedConfig),
    NotModified,
    NotFound,
}

#[derive(Clone)]
struct CacheEntry {
    // Highest client-reported cursor this entry is known to cover
    notification_id: i64,
    release: Option<Arc<Release>>,
}

pub struct ReleaseMergeEngine {
    releases: Arc<dyn ReleaseStore>,
    registry: Arc<dyn AppNamespaceRegistry>,
    audit: Arc<dyn InstanceAudit>,
    cache: Cache<String, CacheEntry>,
}

impl ReleaseMergeEngine {
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        registry: Arc<dyn AppNamespaceRegistry>,
        audit: Arc<dyn InstanceAudit>,
        cache_capacity: u64,
    ) -> Arc<Self> {
        let cache = Cache::builder()
            .max_capacity(cache_capacity)
            .time_to_live(CACHE_TTL)
            .build();
        Arc::new(ReleaseMergeEngine {
            releases,
            registry,
            audit,
            cache,
        })
    }

    /// Strips the well-known file suffix and corrects the namespace's case
    /// against the registry. Returns the name as-is when it is not registered,
    /// which later resolves to NotFound.
    pub fn normalize_namespace(&self, app_id: &str, namespace: &str) -> String {
        let trimmed = if namespace.to_lowercase().ends_with(PROPERTIES_SUFFIX) {
            &namespace[..namespace.len() - PROPERTIES_SUFFIX.len()]
        } else {
            namespace
        };

        if let Some(owned) = self.registry.find_by_app_id_and_namespace(app_id, trimmed) {
            return owned.name;
        }
        if let Some(public) = self.registry.find_public_namespace_by_name(trimmed) {
            return public.name;
        }
        trimmed.to_string()
    }

    pub fn query(&self, query: &ConfigQuery) -> QueryResult {
        let namespace = self.normalize_namespace(&query.app_id, &query.namespace);

        let mut releases: Vec<Arc<Release>> = Vec::new();
        let mut cluster_loaded = query.cluster.clone();

        if let Some(release) = self.load_release(&query.app_id, query, &namespace) {
            // Cluster search may have fallen back; report what was actually loaded
            cluster_loaded = release.cluster_name.clone();
            releases.push(release);
        }

        if !self.namespace_belongs_to(&query.app_id, &namespace)
            && let Some(owner) = self.registry.find_public_namespace_by_name(&namespace)
            && owner.app_id != query.app_id
            && let Some(public) = self.load_release(&owner.app_id, query, &namespace)
        {
            releases.push(public);
        }

        if releases.is_empty() {
            counter!(CONFIG_NOT_FOUND).increment(1);
            return QueryResult::NotFound;
        }

        self.audit_releases(query, &releases);

        let merged_key = merged_release_key(releases.iter().map(|r| r.release_key.as_str()));
        if merged_key == query.client_release_key {
            counter!(CONFIG_NOT_MODIFIED).increment(1);
            return QueryResult::NotModified;
        }

        // Overlay in increasing priority: public first, application-private
        // keys win over public ones.
        let mut configurations: HashMap<String, String> = HashMap::new();
        for release in releases.iter().rev() {
            configurations.extend(release.configurations.clone());
        }

        counter!(CONFIG_FOUND).increment(1);
        QueryResult::Config(FetchedConfig {
            app_id: query.app_id.clone(),
            cluster: cluster_loaded,
            // The namespace name is a key on the client side; echo the
            // original spelling
            namespace_name: query.namespace.clone(),
            release_key: merged_key,
            configurations,
        })
    }

    /// Cached release lookup. The client's change-event cursor, when newer
    /// than the cached entry, forces a reload so a client that was just
    /// notified never reads a pre-notification cache entry.
    fn load_release(
        &self,
        release_app_id: &str,
        query: &ConfigQuery,
        namespace: &str,
    ) -> Option<Arc<Release>> {
        let channel = assemble_channel(release_app_id, &query.cluster, namespace);
        let client_cursor = query
            .messages
            .as_ref()
            .and_then(|messages| messages.get(&channel))
            .unwrap_or(NOTIFICATION_ID_NONE);

        if let Some(entry) = self.cache.get(&channel) {
            if client_cursor <= entry.notification_id {
                return entry.release.clone();
            }
            self.cache.invalidate(&channel);
        }

        let release = self
            .releases
            .find_active_release(
                release_app_id,
                &query.cluster,
                query.data_center.as_deref(),
                namespace,
            )
            .map(Arc::new);
        self.cache.insert(
            channel,
            CacheEntry {
                notification_id: client_cursor,
                release: release.clone(),
            },
        );
        release
    }

    fn namespace_belongs_to(&self, app_id: &str, namespace: &str) -> bool {
        if namespace == NAMESPACE_APPLICATION {
            return true;
        }
        self.registry
            .find_by_app_id_and_namespace(app_id, namespace)
            .is_some()
    }

    fn audit_releases(&self, query: &ConfigQuery, releases: &[Arc<Release>]) {
        let Some(client_ip) = query.client_ip.as_deref().filter(|ip| !ip.is_empty()) else {
            return;
        };
        for release in releases {
            self.audit.record(AuditEntry {
                app_id: query.app_id.clone(),
                cluster: query.cluster.clone(),
                data_center: query.data_center.clone(),
                client_ip: client_ip.to_string(),
                release_app_id: release.app_id.clone(),
                release_cluster: release.cluster_name.clone(),
                release_namespace: release.namespace_name.clone(),
                release_key: release.release_key.clone(),
            });
        }
    }
}

impl ChangeListener for ReleaseMergeEngine {
    fn handle_event(&self, event: &ChangeEvent) {
        self.cache.invalidate(&event.channel);
    }
}
