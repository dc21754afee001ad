//! Instance audit seam. Records which client instance consumed which release.
//! Implementations must not block the query path; the default one only logs.

#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub app_id: String,
    pub cluster: String,
    pub data_center: Option<String>,
    pub client_ip: String,
    pub release_app_id: String,
    pub release_cluster: String,
    pub release_namespace: String,
    pub release_key: String,
}

pub trait InstanceAudit: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

pub struct LogAudit;

impl InstanceAudit for LogAudit {
    fn record(&self, entry: AuditEntry) {
        tracing::debug!(
            app_id = %entry.app_id,
            client_ip = %entry.client_ip,
            release_key = %entry.release_key,
            namespace = %entry.release_namespace,
            "instance fetched release"
        );
    }
}
