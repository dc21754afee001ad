pub mod config;
pub mod errors;
pub mod limiter;
pub mod long_poll;
pub mod repository;
pub mod schedule;
pub mod service_list;
pub mod sync;

pub use config::ClientConfig;
pub use errors::SyncError;
pub use repository::{CachedConfig, ConfigSourceType, LocalFileRepository};
pub use sync::{ConfigChangeListener, ConfigSyncClient};

use crate::limiter::QpsLimiter;
use crate::long_poll::LongPollService;
use crate::service_list::ServerList;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Entry point: one instance per application, handing out a sync client per
/// namespace. All namespaces share the server list, the load limiter, and a
/// single long-poll loop.
pub struct ConfigClient {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
    servers: Arc<ServerList>,
    limiter: Arc<QpsLimiter>,
    long_poll: Arc<LongPollService>,
    clients: RwLock<HashMap<String, Arc<ConfigSyncClient>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConfigClient {
    pub fn new(config: ClientConfig) -> Result<Arc<Self>, config::ValidationError> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Arc::new(ConfigClient {
            servers: Arc::new(ServerList::new(config.config_services.clone())),
            limiter: Arc::new(QpsLimiter::new(config.load_config_qps)),
            long_poll: LongPollService::new(config.clone()),
            config,
            http: reqwest::Client::new(),
            clients: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Starts the long-poll loop. Must be called on a Tokio runtime.
    pub fn start(&self) {
        self.tasks.lock().push(self.long_poll.spawn());
    }

    /// Returns the sync client for a namespace, creating it on first use.
    ///
    /// A new client is wired into the long-poll loop and gets its own
    /// periodic refresh; the first `get_config` on it performs the initial
    /// load.
    pub fn namespace(&self, name: &str) -> Arc<ConfigSyncClient> {
        if let Some(client) = self.clients.read().get(name) {
            return client.clone();
        }

        let mut clients = self.clients.write();
        clients
            .entry(name.to_string())
            .or_insert_with(|| {
                let client = ConfigSyncClient::new(
                    self.config.clone(),
                    name,
                    self.http.clone(),
                    self.servers.clone(),
                    self.limiter.clone(),
                );
                self.long_poll.register(client.clone());
                self.tasks.lock().push(client.spawn_periodic());
                client
            })
            .clone()
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for ConfigClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
