//! HTTP surface of the config service: the query endpoint clients revalidate
//! against, and the long-poll notification endpoint.

use crate::ServiceContext;
use crate::hub::{WatchKey, WatchOutcome};
use crate::merge::{ConfigQuery, QueryResult};
use crate::watch_keys::assemble_watch_keys;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use shared::channel::{CLUSTER_NAME_DEFAULT, RELEASE_KEY_NONE};
use shared::protocol::{Notification, NotificationMessages};
use std::sync::Arc;
use std::time::Duration;

pub fn router(context: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/configs/{app_id}/{cluster}/{*namespace}", get(query_config))
        .route("/notifications", get(poll_notifications))
        .with_state(context)
}

#[derive(Deserialize, Debug)]
struct ConfigParams {
    #[serde(rename = "releaseKey", default = "default_release_key")]
    release_key: String,
    #[serde(rename = "dataCenter")]
    data_center: Option<String>,
    ip: Option<String>,
    messages: Option<String>,
}

fn default_release_key() -> String {
    RELEASE_KEY_NONE.to_string()
}

async fn query_config(
    State(context): State<Arc<ServiceContext>>,
    Path((app_id, cluster, namespace)): Path<(String, String, String)>,
    Query(params): Query<ConfigParams>,
    headers: HeaderMap,
) -> Response {
    let client_ip = params
        .ip
        .clone()
        .filter(|ip| !ip.is_empty())
        .or_else(|| forwarded_client_ip(&headers));

    let query = ConfigQuery {
        app_id: app_id.clone(),
        cluster: cluster.clone(),
        namespace: namespace.clone(),
        data_center: params.data_center.clone(),
        client_ip,
        client_release_key: params.release_key.clone(),
        messages: parse_messages(params.messages.as_deref()),
    };

    match context.engine.query(&query) {
        QueryResult::Config(config) => (StatusCode::OK, Json(config)).into_response(),
        QueryResult::NotModified => StatusCode::NOT_MODIFIED.into_response(),
        QueryResult::NotFound => (
            StatusCode::NOT_FOUND,
            format!(
                "Could not load configurations with appId: {app_id}, clusterName: {cluster}, namespace: {namespace}"
            ),
        )
            .into_response(),
    }
}

/// The messages hint only saves merge work; a malformed one is dropped rather
/// than failing the query.
fn parse_messages(raw: Option<&str>) -> Option<NotificationMessages> {
    let raw = raw.filter(|raw| !raw.is_empty())?;
    match serde_json::from_str(raw) {
        Ok(messages) => Some(messages),
        Err(err) => {
            tracing::debug!(%err, "ignoring malformed messages parameter");
            None
        }
    }
}

fn forwarded_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers.get("x-forwarded-for")?.to_str().ok()?;
    forwarded
        .split(',')
        .map(str::trim)
        .find(|entry| !entry.is_empty())
        .map(str::to_string)
}

#[derive(Deserialize, Debug)]
struct NotificationParams {
    #[serde(rename = "appId")]
    app_id: String,
    #[serde(default = "default_cluster")]
    cluster: String,
    #[serde(rename = "dataCenter")]
    data_center: Option<String>,
    /// JSON-encoded list of { namespaceName, notificationId }
    notifications: String,
}

fn default_cluster() -> String {
    CLUSTER_NAME_DEFAULT.to_string()
}

async fn poll_notifications(
    State(context): State<Arc<ServiceContext>>,
    Query(params): Query<NotificationParams>,
) -> Response {
    let requested: Vec<Notification> = match serde_json::from_str(&params.notifications) {
        Ok(requested) => requested,
        Err(err) => {
            tracing::debug!(%err, "rejecting malformed notifications parameter");
            return (StatusCode::BAD_REQUEST, "invalid notifications parameter").into_response();
        }
    };
    if requested.is_empty() {
        return (StatusCode::BAD_REQUEST, "invalid notifications parameter").into_response();
    }

    let mut key = WatchKey::new();
    for notification in &requested {
        let original = &notification.namespace_name;
        let normalized = context
            .engine
            .normalize_namespace(&params.app_id, original);
        key.record_original_name(&normalized, original);

        for channel in assemble_watch_keys(
            context.registry.as_ref(),
            &params.app_id,
            &params.cluster,
            params.data_center.as_deref(),
            &normalized,
        ) {
            key.watch_channel(channel, notification.notification_id);
        }
    }

    let wait = Duration::from_secs(context.config.long_poll_timeout_secs);
    match context.hub.watch(key, wait).await {
        WatchOutcome::Changed(notifications) => (StatusCode::OK, Json(notifications)).into_response(),
        WatchOutcome::Unchanged => StatusCode::NOT_MODIFIED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Listener, ServiceConfig};
    use crate::store::MemoryStore;
    use shared::protocol::FetchedConfig;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    fn test_config(long_poll_timeout_secs: u64) -> ServiceConfig {
        ServiceConfig {
            listener: Listener {
                host: "127.0.0.1".to_string(),
                port: 1,
            },
            long_poll_timeout_secs,
            scan_interval_millis: 50,
            compaction_queue_size: 16,
            cache_capacity: 1024,
        }
    }

    async fn start_server(context: Arc<ServiceContext>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(context)).await.unwrap();
        });
        format!("http://{addr}")
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
    async fn test_query_endpoint_roundtrip() {
        let context = ServiceContext::with_memory_store(test_config(60), seeded_store());
        let base = start_server(context).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{base}/configs/my-app/default/application"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let config: FetchedConfig = response.json().await.unwrap();
        assert_eq!(config.configurations.get("timeout").unwrap(), "30");

        // Revalidating with the returned key yields 304 with an empty body
        let response = client
            .get(format!("{base}/configs/my-app/default/application"))
            .query(&[("releaseKey", config.release_key.as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_MODIFIED);
        assert!(response.bytes().await.unwrap().is_empty());

        let response = client
            .get(format!("{base}/configs/other-app/default/application"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_tolerates_malformed_messages() {
        let context = ServiceContext::with_memory_store(test_config(60), seeded_store());
        let base = start_server(context).await;

        let response = reqwest::Client::new()
            .get(format!("{base}/configs/my-app/default/application"))
            .query(&[("messages", "{not-json")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_notifications_rejects_malformed_parameter() {
        let context = ServiceContext::with_memory_store(test_config(60), seeded_store());
        let base = start_server(context).await;

        let response = reqwest::Client::new()
            .get(format!("{base}/notifications"))
            .query(&[("appId", "my-app"), ("notifications", "{not-json")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notifications_timeout_returns_304() {
        let context = ServiceContext::with_memory_store(test_config(1), seeded_store());
        let base = start_server(context).await;

        let response = reqwest::Client::new()
            .get(format!("{base}/notifications"))
            .query(&[
                ("appId", "my-app"),
                (
                    "notifications",
                    r#"[{"namespaceName":"application","notificationId":-1}]"#,
                ),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_notifications_resolved_by_publish() {
        let store = seeded_store();
        let context = ServiceContext::with_memory_store(test_config(30), store.clone());
        let base = start_server(context.clone()).await;

        let pending = tokio::spawn(async move {
            reqwest::Client::new()
                .get(format!("{base}/notifications"))
                .query(&[
                    ("appId", "my-app"),
                    (
                        "notifications",
                        r#"[{"namespaceName":"application","notificationId":-1}]"#,
                    ),
                ])
                .send()
                .await
                .unwrap()
        });
        // Let the watch register before publishing
        tokio::time::sleep(Duration::from_millis(100)).await;

        store.publish_release(
            "my-app",
            "default",
            "application",
            HashMap::from([("timeout".to_string(), "60".to_string())]),
        );
        let event = context.bus.publish("my-app+default+application");
        context.bus.scan_once();

        let response = pending.await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let notifications: Vec<Notification> = response.json().await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].namespace_name, "application");
        assert_eq!(notifications[0].notification_id, event.id);
        // The triggering channel's cursor rides along for the follow-up query
        assert_eq!(
            notifications[0].messages.get("my-app+default+application"),
            Some(event.id)
        );
    }
}
