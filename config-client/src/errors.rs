use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The server answered 404: the namespace has no published release. This
    /// is authoritative and is not retried against other servers.
    #[error("no release published for appId: {app_id}, cluster: {cluster}, namespace: {namespace}")]
    NotFound {
        app_id: String,
        cluster: String,
        namespace: String,
    },

    #[error("all config services failed, tried: {tried:?}")]
    AllServersFailed { tried: Vec<String> },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} from {server}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        server: String,
    },

    #[error("server url cannot carry path segments: {server}")]
    InvalidServerUrl { server: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
