//! Long polling against the notification endpoint.
//!
//! One poll covers every registered namespace. When the server reports
//! changes, the affected sync clients are woken with the reporting server as
//! their preferred endpoint and the advanced cursors as their merge hint.

use crate::config::ClientConfig;
use crate::errors::SyncError;
use crate::schedule::{ExponentialSchedulePolicy, SchedulePolicy};
use crate::service_list::endpoint;
use crate::sync::ConfigSyncClient;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use reqwest::StatusCode;
use shared::channel::NOTIFICATION_ID_NONE;
use shared::protocol::Notification;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Slack on top of the server-side hold so a poll that is about to resolve
/// does not get cut off by the client timeout.
const POLL_TIMEOUT_SLACK: Duration = Duration::from_secs(10);
/// Idle wait when no namespace is registered yet.
const NO_CLIENTS_SLEEP: Duration = Duration::from_secs(1);

pub struct LongPollService {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
    clients: RwLock<HashMap<String, Arc<ConfigSyncClient>>>,
    cursors: Mutex<HashMap<String, i64>>,
    policy: ExponentialSchedulePolicy,
}

impl LongPollService {
    pub fn new(config: Arc<ClientConfig>) -> Arc<Self> {
        let http = match reqwest::Client::builder()
            .timeout(Duration::from_secs(config.long_poll_timeout_secs) + POLL_TIMEOUT_SLACK)
            .build()
        {
            Ok(http) => http,
            Err(err) => {
                // The default client has no timeout; polls then rely on the
                // server closing the hold.
                tracing::warn!(%err, "failed to build long-poll http client, using default");
                reqwest::Client::new()
            }
        };
        let policy = ExponentialSchedulePolicy::new(
            config.on_error_retry_floor(),
            config.on_error_retry_ceiling(),
        );
        Arc::new(LongPollService {
            config,
            http,
            clients: RwLock::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            policy,
        })
    }

    pub fn register(&self, client: Arc<ConfigSyncClient>) {
        let namespace = client.namespace().to_string();
        self.cursors
            .lock()
            .entry(namespace.clone())
            .or_insert(NOTIFICATION_ID_NONE);
        self.clients.write().insert(namespace, client);
    }

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if service.cursors.lock().is_empty() {
                    tokio::time::sleep(NO_CLIENTS_SLEEP).await;
                    continue;
                }
                match service.poll_once().await {
                    Ok(_) => service.policy.success(),
                    Err(err) => {
                        let pause = service.policy.fail();
                        tracing::warn!(%err, ?pause, "notification poll failed");
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        })
    }

    /// One round trip to the notification endpoint. Returns the number of
    /// namespaces that changed (zero when the server held the poll open and
    /// answered 304).
    pub async fn poll_once(&self) -> Result<usize, SyncError> {
        let server = self.pick_server();
        let notifications: Vec<Notification> = self
            .cursors
            .lock()
            .iter()
            .map(|(namespace, id)| Notification::new(namespace.clone(), *id))
            .collect();
        let body = serde_json::to_string(&notifications)?;

        let url = endpoint(&server, &["notifications"])?;
        let mut request = self
            .http
            .get(url)
            .query(&[
                ("appId", self.config.app_id.as_str()),
                ("cluster", self.config.cluster.as_str()),
                ("notifications", body.as_str()),
            ]);
        if let Some(data_center) = &self.config.data_center {
            request = request.query(&[("dataCenter", data_center.as_str())]);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {
                let changed: Vec<Notification> = response.json().await?;
                self.dispatch(&server, &changed);
                Ok(changed.len())
            }
            StatusCode::NOT_MODIFIED => Ok(0),
            status => Err(SyncError::UnexpectedStatus {
                status,
                server: server.to_string(),
            }),
        }
    }

    fn pick_server(&self) -> Url {
        // Long polls spread across all servers on their own; each sync
        // client's preferred-server hint is reserved for config loads.
        self.config
            .config_services
            .choose(&mut rand::thread_rng())
            .cloned()
            .expect("validated config has at least one config service")
    }

    fn dispatch(&self, server: &Url, changed: &[Notification]) {
        let mut cursors = self.cursors.lock();
        for notification in changed {
            let Some(cursor) = cursors.get_mut(&notification.namespace_name) else {
                continue;
            };
            if *cursor >= notification.notification_id {
                continue;
            }
            *cursor = notification.notification_id;

            if let Some(client) = self.clients.read().get(&notification.namespace_name) {
                tracing::debug!(
                    namespace = %notification.namespace_name,
                    notification_id = notification.notification_id,
                    "change notified"
                );
                // The server names the channels that actually changed, which
                // may differ from this client's own app and cluster (public
                // namespaces, normalized spellings). Forward them untouched.
                client.on_notified(server.clone(), notification.messages.clone());
            }
        }
    }
}
