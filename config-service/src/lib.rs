pub mod api;
pub mod audit;
pub mod bus;
pub mod config;
pub mod hub;
pub mod merge;
pub mod metrics_defs;
pub mod store;
pub mod watch_keys;

use crate::audit::InstanceAudit;
use crate::bus::ChangeBus;
use crate::config::ServiceConfig;
use crate::hub::NotificationHub;
use crate::merge::ReleaseMergeEngine;
use crate::store::{AppNamespaceRegistry, EventLog, MemoryStore, ReleaseStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wires the bus, hub, and merge engine around a storage backend.
///
/// Owns no tasks by itself; callers spawn the background workers on their own
/// runtime so lifecycle stays explicit and test instances don't interfere.
pub struct ServiceContext {
    pub config: ServiceConfig,
    pub bus: Arc<ChangeBus>,
    pub hub: Arc<NotificationHub>,
    pub engine: Arc<ReleaseMergeEngine>,
    pub registry: Arc<dyn AppNamespaceRegistry>,
}

impl ServiceContext {
    pub fn new(
        config: ServiceConfig,
        log: Arc<dyn EventLog>,
        releases: Arc<dyn ReleaseStore>,
        registry: Arc<dyn AppNamespaceRegistry>,
        audit: Arc<dyn InstanceAudit>,
    ) -> Arc<Self> {
        let bus = ChangeBus::new(log.clone(), config.compaction_queue_size);
        let hub = NotificationHub::new(log);
        let engine =
            ReleaseMergeEngine::new(releases, registry.clone(), audit, config.cache_capacity);

        // Bus events wake pending watches and drop stale merge-cache entries
        bus.register_listener(hub.clone());
        bus.register_listener(engine.clone());

        Arc::new(ServiceContext {
            config,
            bus,
            hub,
            engine,
            registry,
        })
    }

    /// Convenience constructor for the demo binary and tests: one in-memory
    /// store serves as log, release store, and namespace registry.
    pub fn with_memory_store(config: ServiceConfig, store: Arc<MemoryStore>) -> Arc<Self> {
        ServiceContext::new(
            config,
            store.clone(),
            store.clone(),
            store,
            Arc::new(audit::LogAudit),
        )
    }

    /// Starts the log scanner and the compaction worker.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.bus
                .spawn_scanner(Duration::from_millis(self.config.scan_interval_millis)),
            self.bus.spawn_compactor(),
        ]
    }
}

/// Runs the config service until the process is stopped.
pub async fn run(context: Arc<ServiceContext>) -> Result<(), ServiceError> {
    let background = context.spawn_background();

    let addr = format!(
        "{}:{}",
        context.config.listener.host, context.config.listener.port
    );
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "config service listening");

    let result = axum::serve(listener, api::router(context)).await;

    for task in background {
        task.abort();
    }
    Ok(result?)
}
