use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("At least one config service URL is required")]
    NoConfigServices,

    #[error("App id cannot be empty")]
    EmptyAppId,

    #[error("Load config QPS cannot be 0")]
    InvalidLoadConfigQps,

    #[error("Error retry interval cannot be 0")]
    InvalidOnErrorRetry,

    #[error("Refresh interval cannot be 0")]
    InvalidRefreshInterval,
}

/// Client-side sync configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Application this client fetches configuration for
    #[serde(rename = "appId")]
    pub app_id: String,
    /// Cluster the client belongs to
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Data center, used as a fallback cluster on the server side
    #[serde(rename = "dataCenter", default)]
    pub data_center: Option<String>,
    /// Config service endpoints to load-balance across
    #[serde(rename = "configServices")]
    pub config_services: Vec<Url>,
    /// Periodic full-refresh interval, the safety net behind long polling
    #[serde(rename = "refreshIntervalSecs", default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Cap on remote loads per second, across forced and scheduled syncs
    #[serde(rename = "loadConfigQps", default = "default_load_config_qps")]
    pub load_config_qps: u32,
    /// Backoff floor after a failed remote load, doubles up to eight times this
    #[serde(rename = "onErrorRetryMillis", default = "default_on_error_retry_millis")]
    pub on_error_retry_millis: u64,
    /// How long the notification endpoint holds a poll open
    #[serde(rename = "longPollTimeoutSecs", default = "default_long_poll_timeout_secs")]
    pub long_poll_timeout_secs: u64,
    /// Where fetched configs are persisted for startup without a server
    #[serde(rename = "cacheDir", default)]
    pub cache_dir: Option<PathBuf>,
    /// Reported to the server for release targeting and audit
    #[serde(rename = "localIp", default)]
    pub local_ip: Option<String>,
}

fn default_cluster() -> String {
    shared::channel::CLUSTER_NAME_DEFAULT.to_string()
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_load_config_qps() -> u32 {
    2
}

fn default_on_error_retry_millis() -> u64 {
    1000
}

fn default_long_poll_timeout_secs() -> u64 {
    90
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.app_id.is_empty() {
            return Err(ValidationError::EmptyAppId);
        }
        if self.config_services.is_empty() {
            return Err(ValidationError::NoConfigServices);
        }
        if self.load_config_qps == 0 {
            return Err(ValidationError::InvalidLoadConfigQps);
        }
        if self.on_error_retry_millis == 0 {
            return Err(ValidationError::InvalidOnErrorRetry);
        }
        if self.refresh_interval_secs == 0 {
            return Err(ValidationError::InvalidRefreshInterval);
        }
        Ok(())
    }

    pub fn on_error_retry_floor(&self) -> Duration {
        Duration::from_millis(self.on_error_retry_millis)
    }

    pub fn on_error_retry_ceiling(&self) -> Duration {
        Duration::from_millis(self.on_error_retry_millis * 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_defaults() {
        let yaml = r#"
appId: "my-app"
configServices:
    - "http://localhost:8080"
"#;
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster, "default");
        assert_eq!(config.refresh_interval_secs, 300);
        assert_eq!(config.load_config_qps, 2);
        assert_eq!(config.on_error_retry_ceiling(), Duration::from_secs(8));
    }

    #[test]
    fn test_validation_errors() {
        let base = ClientConfig {
            app_id: "my-app".to_string(),
            cluster: "default".to_string(),
            data_center: None,
            config_services: vec![Url::parse("http://localhost:8080").unwrap()],
            refresh_interval_secs: 300,
            load_config_qps: 2,
            on_error_retry_millis: 1000,
            long_poll_timeout_secs: 90,
            cache_dir: None,
            local_ip: None,
        };

        let mut config = base.clone();
        config.config_services.clear();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::NoConfigServices
        ));

        let mut config = base.clone();
        config.load_config_qps = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidLoadConfigQps
        ));

        let mut config = base;
        config.app_id.clear();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::EmptyAppId
        ));
    }
}
