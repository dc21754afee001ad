//! Expands a watched namespace into the set of channels a client must observe.
//!
//! A release can land on the exact cluster, the client's data center, or the
//! default cluster, and a shared namespace is published under its owning
//! application, so one namespace maps to several channels.

use crate::store::AppNamespaceRegistry;
use shared::channel::{CLUSTER_NAME_DEFAULT, NAMESPACE_APPLICATION, assemble_channel};

pub fn assemble_watch_keys(
    registry: &dyn AppNamespaceRegistry,
    app_id: &str,
    cluster: &str,
    data_center: Option<&str>,
    namespace: &str,
) -> Vec<String> {
    let owns = namespace == NAMESPACE_APPLICATION
        || registry
            .find_by_app_id_and_namespace(app_id, namespace)
            .is_some();

    let watched_app_id = if owns {
        app_id.to_string()
    } else {
        match registry.find_public_namespace_by_name(namespace) {
            Some(owner) if owner.app_id != app_id => owner.app_id,
            // Not registered anywhere (yet): watch our own keys so a later
            // publish still wakes the client
            _ => app_id.to_string(),
        }
    };

    clusters_to_watch(cluster, data_center)
        .into_iter()
        .map(|cluster| assemble_channel(&watched_app_id, cluster, namespace))
        .collect()
}

fn clusters_to_watch<'a>(cluster: &'a str, data_center: Option<&'a str>) -> Vec<&'a str> {
    let mut clusters = vec![cluster];
    if let Some(dc) = data_center
        && dc != cluster
    {
        clusters.push(dc);
    }
    if cluster != CLUSTER_NAME_DEFAULT {
        clusters.push(CLUSTER_NAME_DEFAULT);
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_own_namespace_watches_cluster_variants() {
        let store = MemoryStore::new();
        let keys = assemble_watch_keys(&store, "app", "cluster-a", Some("dc-east"), "application");
        assert_eq!(
            keys,
            vec![
                "app+cluster-a+application",
                "app+dc-east+application",
                "app+default+application",
            ]
        );
    }

    #[test]
    fn test_default_cluster_yields_single_key() {
        let store = MemoryStore::new();
        let keys = assemble_watch_keys(&store, "app", "default", None, "application");
        assert_eq!(keys, vec!["app+default+application"]);
    }

    #[test]
    fn test_public_namespace_watches_owner() {
        let store = MemoryStore::new();
        store.add_app_namespace("infra", "shared.redis", true);

        let keys = assemble_watch_keys(&store, "app", "default", None, "shared.redis");
        assert_eq!(keys, vec!["infra+default+shared.redis"]);

        // The owner itself watches its own keys
        let keys = assemble_watch_keys(&store, "infra", "default", None, "shared.redis");
        assert_eq!(keys, vec!["infra+default+shared.redis"]);
    }
}
