//! Channel keys route change events from publishers to watchers.
//!
//! A channel is derived deterministically from the (appId, cluster, namespace)
//! triple. The same derivation runs on the server when a release is published
//! and on both sides when a watch is registered, so the strings must match
//! byte for byte.

/// Cluster assigned to releases that are not pinned to a specific cluster.
pub const CLUSTER_NAME_DEFAULT: &str = "default";

/// Namespace every application owns implicitly.
pub const NAMESPACE_APPLICATION: &str = "application";

/// Sentinel release key meaning "the client holds no configuration yet".
pub const RELEASE_KEY_NONE: &str = "-1";

/// Sentinel cursor meaning "the client has not seen any change event yet".
pub const NOTIFICATION_ID_NONE: i64 = -1;

const CHANNEL_SEPARATOR: &str = "+";

/// Derives the channel key for an (appId, cluster, namespace) triple.
pub fn assemble_channel(app_id: &str, cluster: &str, namespace: &str) -> String {
    [app_id, cluster, namespace].join(CHANNEL_SEPARATOR)
}

/// Extracts the namespace segment from a channel key.
///
/// Returns `None` when the key does not have the expected three segments.
/// App ids and cluster names never contain the separator, so the namespace is
/// always the last segment even though namespace names are client-supplied.
pub fn namespace_from_channel(channel: &str) -> Option<&str> {
    let mut parts = channel.splitn(3, CHANNEL_SEPARATOR);
    parts.next()?;
    parts.next()?;
    parts.next()
}

/// Joins the release keys of the contributing releases into the combined
/// revalidation key returned to clients.
pub fn merged_release_key<'a>(keys: impl IntoIterator<Item = &'a str>) -> String {
    keys.into_iter().collect::<Vec<_>>().join(CHANNEL_SEPARATOR)
}
