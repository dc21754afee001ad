use crate::errors::SyncError;
use rand::seq::SliceRandom;
use url::Url;

/// The set of config service endpoints shared by every namespace client.
///
/// Ordering is a fresh shuffle per attempt so load spreads across the fleet;
/// per-namespace server preferences live with the sync client that owns them.
pub struct ServerList {
    servers: Vec<Url>,
}

impl ServerList {
    pub fn new(servers: Vec<Url>) -> Self {
        ServerList { servers }
    }

    pub fn shuffled(&self) -> Vec<Url> {
        let mut candidates = self.servers.clone();
        candidates.shuffle(&mut rand::thread_rng());
        candidates
    }
}

/// Appends percent-escaped path segments to a server endpoint. App ids,
/// clusters, and namespaces are client-supplied and may contain characters
/// that would otherwise break the request path.
pub(crate) fn endpoint(server: &Url, segments: &[&str]) -> Result<Url, SyncError> {
    let mut url = server.clone();
    url.path_segments_mut()
        .map_err(|_| SyncError::InvalidServerUrl {
            server: server.to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
