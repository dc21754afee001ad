use config_service::config::ServiceConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;

#[derive(Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

/// Initial store contents, loaded at startup. The in-memory backend has no
/// durable storage, so deployments describe their namespaces and current
/// releases here.
#[derive(Deserialize, Default)]
pub struct SeedConfig {
    #[serde(default)]
    pub app_namespaces: Vec<SeedAppNamespace>,
    #[serde(default)]
    pub releases: Vec<SeedRelease>,
}

#[derive(Deserialize)]
pub struct SeedAppNamespace {
    pub app_id: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Deserialize)]
pub struct SeedRelease {
    pub app_id: String,
    pub cluster: String,
    pub namespace: String,
    pub configurations: HashMap<String, String>,
}

#[derive(Deserialize)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    pub service: ServiceConfig,
    pub seed: Option<SeedConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.service.validate()?;

        Ok(config)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidError(#[from] config_service::config::ValidationError),
}
