//! Keeps one namespace's config in sync with the config services.
//!
//! The client holds an immutable in-memory snapshot and refreshes it three
//! ways: on first access, on a periodic timer, and immediately when the
//! long-poll service reports a change. Every refresh funnels through `sync`,
//! serialized by a lock so concurrent triggers collapse into one remote load.

use crate::config::ClientConfig;
use crate::errors::SyncError;
use crate::limiter::{Acquire, QpsLimiter};
use crate::repository::{CachedConfig, ConfigSourceType, LocalFileRepository};
use crate::schedule::{ExponentialSchedulePolicy, SchedulePolicy};
use crate::service_list::{ServerList, endpoint};
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use shared::channel::RELEASE_KEY_NONE;
use shared::protocol::{FetchedConfig, NotificationMessages};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

/// Budget for waiting on a load permit before degrading to a flat sleep.
const LOAD_PERMIT_WAIT: Duration = Duration::from_secs(5);
/// Per-request timeout for config loads.
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);
/// Inter-server pause when a forced refresh hits a bad server; the normal
/// backoff schedule would defeat the point of forcing.
const FORCED_RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Notified with the fresh snapshot whenever a sync changes the served config.
pub trait ConfigChangeListener: Send + Sync {
    fn on_change(&self, namespace: &str, config: &FetchedConfig);
}

pub struct ConfigSyncClient {
    config: Arc<ClientConfig>,
    namespace: String,
    http: reqwest::Client,
    servers: Arc<ServerList>,
    // One-shot hint naming the server that reported the last change for this
    // namespace; consumed by the next load.
    preferred: Mutex<Option<Url>>,
    limiter: Arc<QpsLimiter>,
    policy: ExponentialSchedulePolicy,
    cache: ArcSwapOption<CachedConfig>,
    sync_lock: tokio::sync::Mutex<()>,
    force_refresh: AtomicBool,
    remote_messages: Mutex<NotificationMessages>,
    local_repo: Option<LocalFileRepository>,
    listeners: RwLock<Vec<Arc<dyn ConfigChangeListener>>>,
}

impl ConfigSyncClient {
    pub fn new(
        config: Arc<ClientConfig>,
        namespace: impl Into<String>,
        http: reqwest::Client,
        servers: Arc<ServerList>,
        limiter: Arc<QpsLimiter>,
    ) -> Arc<Self> {
        let policy = ExponentialSchedulePolicy::new(
            config.on_error_retry_floor(),
            config.on_error_retry_ceiling(),
        );
        let local_repo = config
            .cache_dir
            .as_ref()
            .map(|dir| LocalFileRepository::new(dir.clone()));

        Arc::new(ConfigSyncClient {
            config,
            namespace: namespace.into(),
            http,
            servers,
            preferred: Mutex::new(None),
            limiter,
            policy,
            cache: ArcSwapOption::empty(),
            sync_lock: tokio::sync::Mutex::new(()),
            // The first load covers a server set we know nothing about yet
            force_refresh: AtomicBool::new(true),
            remote_messages: Mutex::new(NotificationMessages::new()),
            local_repo,
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn add_listener(&self, listener: Arc<dyn ConfigChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Returns the current snapshot, performing the initial load if needed.
    pub async fn get_config(&self) -> Result<Arc<CachedConfig>, SyncError> {
        if let Some(cached) = self.cache.load_full() {
            return Ok(cached);
        }
        self.sync().await?;
        self.cache
            .load_full()
            .ok_or_else(|| SyncError::AllServersFailed { tried: Vec::new() })
    }

    /// The long-poll service saw a change on this namespace: remember which
    /// server reported it, carry its cursors, and refresh right away.
    pub fn on_notified(
        self: &Arc<Self>,
        reporting_server: Url,
        messages: NotificationMessages,
    ) {
        *self.preferred.lock() = Some(reporting_server);
        self.remote_messages.lock().merge_from(&messages);
        self.force_refresh.store(true, Ordering::SeqCst);

        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = client.sync().await {
                tracing::warn!(namespace = %client.namespace, %err, "notified sync failed");
            }
        });
    }

    /// Safety-net refresh in case a notification was missed.
    pub fn spawn_periodic(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let period = Duration::from_secs(client.config.refresh_interval_secs);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = client.sync().await {
                    tracing::warn!(namespace = %client.namespace, %err, "periodic sync failed");
                }
            }
        })
    }

    pub async fn sync(&self) -> Result<(), SyncError> {
        let _guard = self.sync_lock.lock().await;

        match self.load_remote().await {
            Ok(Some(fetched)) => {
                self.accept(fetched);
                Ok(())
            }
            // Not modified: the snapshot we hold is still current
            Ok(None) => Ok(()),
            Err(err @ SyncError::NotFound { .. }) => Err(err),
            Err(err) => {
                if self.cache.load().is_some() {
                    // Keep serving the stale snapshot
                    return Err(err);
                }
                match self.load_local_fallback() {
                    Some(cached) => {
                        tracing::warn!(
                            namespace = %self.namespace, %err,
                            "serving locally cached config, remote unavailable"
                        );
                        self.cache.store(Some(Arc::new(cached)));
                        Ok(())
                    }
                    None => Err(err),
                }
            }
        }
    }

    fn accept(&self, fetched: FetchedConfig) {
        let previous_key = self
            .cache
            .load()
            .as_ref()
            .map(|cached| cached.config.release_key.clone());
        let changed = previous_key.as_deref() != Some(fetched.release_key.as_str());

        if let Some(repo) = &self.local_repo
            && let Err(err) = repo.save(&fetched)
        {
            tracing::warn!(namespace = %self.namespace, %err, "failed to persist local cache");
        }

        let cached = Arc::new(CachedConfig {
            config: fetched,
            source: ConfigSourceType::Remote,
        });
        self.cache.store(Some(cached.clone()));

        if changed {
            tracing::info!(
                namespace = %self.namespace,
                release_key = %cached.config.release_key,
                "config updated"
            );
            for listener in self.listeners.read().iter() {
                listener.on_change(&self.namespace, &cached.config);
            }
        }
    }

    fn load_local_fallback(&self) -> Option<CachedConfig> {
        let repo = self.local_repo.as_ref()?;
        let config = repo
            .load(&self.config.app_id, &self.config.cluster, &self.namespace)
            .ok()?;
        Some(CachedConfig {
            config,
            source: ConfigSourceType::LocalCached,
        })
    }

    /// Ok(Some) on a fresh config, Ok(None) on 304.
    async fn load_remote(&self) -> Result<Option<FetchedConfig>, SyncError> {
        match self.limiter.acquire_delay(LOAD_PERMIT_WAIT) {
            Acquire::Granted(wait) if wait.is_zero() => {}
            Acquire::Granted(wait) => tokio::time::sleep(wait).await,
            Acquire::Saturated => tokio::time::sleep(LOAD_PERMIT_WAIT).await,
        }

        // Cleared only once a load succeeds, so a fully failed forced refresh
        // stays forced for the next attempt.
        let force = self.force_refresh.load(Ordering::SeqCst);
        let passes = if force { 2 } else { 1 };
        let release_key = self
            .cache
            .load()
            .as_ref()
            .map(|cached| cached.config.release_key.clone())
            .unwrap_or_else(|| RELEASE_KEY_NONE.to_string());
        let messages = {
            let messages = self.remote_messages.lock();
            (!messages.is_empty()).then(|| serde_json::to_string(&*messages))
        }
        .transpose()?;

        let mut tried = Vec::new();
        for _ in 0..passes {
            for server in self.candidates() {
                match self.try_server(&server, &release_key, messages.as_deref()).await {
                    Ok(outcome) => {
                        self.force_refresh.store(false, Ordering::SeqCst);
                        self.policy.success();
                        return Ok(outcome);
                    }
                    Err(err @ SyncError::NotFound { .. }) => return Err(err),
                    Err(err) => {
                        tracing::warn!(%server, %err, "config load failed");
                        tried.push(server.to_string());
                        let pause = if force {
                            FORCED_RETRY_PAUSE
                        } else {
                            self.policy.fail()
                        };
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
        Err(SyncError::AllServersFailed { tried })
    }

    /// Shuffled server order, with the server that reported the last change
    /// (if any) tried first. The preference is consumed by the read.
    fn candidates(&self) -> Vec<Url> {
        let mut candidates = self.servers.shuffled();
        if let Some(preferred) = self.preferred.lock().take() {
            candidates.retain(|server| *server != preferred);
            candidates.insert(0, preferred);
        }
        candidates
    }

    async fn try_server(
        &self,
        server: &Url,
        release_key: &str,
        messages: Option<&str>,
    ) -> Result<Option<FetchedConfig>, SyncError> {
        let url = endpoint(
            server,
            &[
                "configs",
                &self.config.app_id,
                &self.config.cluster,
                &self.namespace,
            ],
        )?;

        let mut request = self
            .http
            .get(url)
            .timeout(LOAD_TIMEOUT)
            .query(&[("releaseKey", release_key)]);
        if let Some(data_center) = &self.config.data_center {
            request = request.query(&[("dataCenter", data_center.as_str())]);
        }
        if let Some(ip) = &self.config.local_ip {
            request = request.query(&[("ip", ip.as_str())]);
        }
        if let Some(messages) = messages {
            request = request.query(&[("messages", messages)]);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_MODIFIED => Ok(None),
            StatusCode::NOT_FOUND => Err(SyncError::NotFound {
                app_id: self.config.app_id.clone(),
                cluster: self.config.cluster.clone(),
                namespace: self.namespace.clone(),
            }),
            status => Err(SyncError::UnexpectedStatus {
                status,
                server: server.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_service::ServiceContext;
    use config_service::config::{Listener, ServiceConfig};
    use config_service::store::MemoryStore;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    fn client_config(servers: Vec<Url>) -> Arc<ClientConfig> {
        Arc::new(ClientConfig {
            app_id: "my-app".to_string(),
            cluster: "default".to_string(),
            data_center: None,
            config_services: servers,
            refresh_interval_secs: 300,
            load_config_qps: 100,
            on_error_retry_millis: 10,
            long_poll_timeout_secs: 30,
            cache_dir: None,
            local_ip: None,
        })
    }

    fn sync_client(servers: Vec<Url>) -> Arc<ConfigSyncClient> {
        let config = client_config(servers.clone());
        let limiter = Arc::new(QpsLimiter::new(config.load_config_qps));
        ConfigSyncClient::new(
            config,
            "application",
            reqwest::Client::new(),
            Arc::new(ServerList::new(servers)),
            limiter,
        )
    }

    async fn start_service(store: Arc<MemoryStore>) -> (Url, Arc<ServiceContext>) {
        let context = ServiceContext::with_memory_store(
            ServiceConfig {
                listener: Listener {
                    host: "127.0.0.1".to_string(),
                    port: 1,
                },
                long_poll_timeout_secs: 30,
                scan_interval_millis: 50,
                compaction_queue_size: 16,
                cache_capacity: 1024,
            },
            store,
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = config_service::api::router(context.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (Url::parse(&format!("http://{addr}")).unwrap(), context)
    }

    /// Answers every request with 500 and counts the hits.
    async fn start_failing_server(hits: Arc<AtomicUsize>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().fallback(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    async fn dead_server() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.publish_release(
            "my-app",
            "default",
            "application",
            HashMap::from([("timeout".to_string(), "30".to_string())]),
        );
        store
    }

    #[tokio::test]
    async fn test_force_flag_survives_total_failure() {
        let client = sync_client(vec![dead_server().await]);
        assert!(client.force_refresh.load(Ordering::SeqCst));

        assert!(client.sync().await.is_err());

        // Still forced, so the next sync keeps the two-pass behavior
        assert!(client.force_refresh.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_force_flag_cleared_on_success() {
        let (server, _context) = start_service(seeded_store()).await;
        let client = sync_client(vec![server]);

        client.sync().await.unwrap();
        assert!(!client.force_refresh.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_forced_refresh_makes_two_passes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let server = start_failing_server(hits.clone()).await;
        let client = sync_client(vec![server]);

        assert!(client.sync().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        client.force_refresh.store(false, Ordering::SeqCst);
        assert!(client.sync().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_preferred_server_tried_first_then_consumed() {
        let servers = vec![
            Url::parse("http://a:8080").unwrap(),
            Url::parse("http://b:8080").unwrap(),
        ];
        let client = sync_client(servers.clone());

        *client.preferred.lock() = Some(servers[1].clone());
        let candidates = client.candidates();
        assert_eq!(candidates[0], servers[1]);
        assert_eq!(candidates.len(), 2);

        // The preference is one-shot
        assert!(client.preferred.lock().is_none());
    }

    #[tokio::test]
    async fn test_preferred_server_is_per_namespace() {
        let servers = vec![
            Url::parse("http://a:8080").unwrap(),
            Url::parse("http://b:8080").unwrap(),
        ];
        let config = client_config(servers.clone());
        let limiter = Arc::new(QpsLimiter::new(config.load_config_qps));
        let list = Arc::new(ServerList::new(servers.clone()));
        let first = ConfigSyncClient::new(
            config.clone(),
            "application",
            reqwest::Client::new(),
            list.clone(),
            limiter.clone(),
        );
        let second =
            ConfigSyncClient::new(config, "other", reqwest::Client::new(), list, limiter);

        first.on_notified(servers[1].clone(), NotificationMessages::new());

        // The hint lands on the notified namespace only; the spawned sync has
        // not run yet on this single-threaded runtime
        assert_eq!(*first.preferred.lock(), Some(servers[1].clone()));
        assert!(second.preferred.lock().is_none());
    }

    #[tokio::test]
    async fn test_change_cursor_bypasses_stale_server_cache() {
        let store = seeded_store();
        let (server, context) = start_service(store.clone()).await;
        let client = sync_client(vec![server]);

        client.sync().await.unwrap();
        let first_key = client.cache.load_full().unwrap().config.release_key.clone();

        // New release, but the invalidation event is never scanned, so the
        // merge cache on the server stays stale
        store.publish_release(
            "my-app",
            "default",
            "application",
            HashMap::from([("timeout".to_string(), "60".to_string())]),
        );
        let event = context.bus.publish("my-app+default+application");

        client.sync().await.unwrap();
        let stale = client.cache.load_full().unwrap();
        assert_eq!(stale.config.release_key, first_key);

        // A notified client carries the event cursor and gets fresh data
        client
            .remote_messages
            .lock()
            .put("my-app+default+application", event.id);
        client.sync().await.unwrap();
        let fresh = client.cache.load_full().unwrap();
        assert_ne!(fresh.config.release_key, first_key);
        assert_eq!(fresh.config.configurations.get("timeout").unwrap(), "60");

        // The cursor is retained, so later syncs cannot regress to a stale
        // cache entry either
        client.sync().await.unwrap();
        assert_eq!(
            client.remote_messages.lock().get("my-app+default+application"),
            Some(event.id)
        );
        assert_eq!(
            client.cache.load_full().unwrap().config.release_key,
            fresh.config.release_key
        );
    }
}
