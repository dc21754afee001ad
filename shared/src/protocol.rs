//! Wire types shared between the config service and the sync client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One effective configuration snapshot as served by the query endpoint.
///
/// `release_key` is the combined revalidation token; sending it back on the
/// next query lets the server answer 304 instead of a full body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedConfig {
    pub app_id: String,
    pub cluster: String,
    pub namespace_name: String,
    pub release_key: String,
    pub configurations: HashMap<String, String>,
}

/// One entry of the long-poll request and response: a namespace paired with
/// the last change-event id the client has seen for it.
///
/// In responses the server also attaches the watched channels behind the
/// change as `messages`; clients forward those cursors verbatim on the next
/// config query. Requests leave `messages` empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub namespace_name: String,
    pub notification_id: i64,
    #[serde(default, skip_serializing_if = "NotificationMessages::is_empty")]
    pub messages: NotificationMessages,
}

impl Notification {
    pub fn new(namespace_name: impl Into<String>, notification_id: i64) -> Self {
        Notification {
            namespace_name: namespace_name.into(),
            notification_id,
            messages: NotificationMessages::new(),
        }
    }
}

/// Per-channel cursors the client attaches to config queries so the server
/// can skip merge work when nothing relevant changed.
///
/// Cursors only ever move forward; `put` keeps the maximum seen per channel,
/// which makes redelivered notifications harmless.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessages {
    pub details: HashMap<String, i64>,
}

impl NotificationMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, channel: &str, notification_id: i64) {
        let entry = self.details.entry(channel.to_string()).or_insert(notification_id);
        if *entry < notification_id {
            *entry = notification_id;
        }
    }

    pub fn get(&self, channel: &str) -> Option<i64> {
        self.details.get(channel).copied()
    }

    pub fn merge_from(&mut self, other: &NotificationMessages) {
        for (channel, id) in &other.details {
            self.put(channel, *id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }
}
