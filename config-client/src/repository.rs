//! Durable cache of the last fetched config, for starting up while every
//! config service is unreachable.

use crate::errors::SyncError;
use shared::channel::assemble_channel;
use shared::protocol::FetchedConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Where the currently served snapshot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSourceType {
    Remote,
    LocalCached,
}

/// An immutable config snapshot plus its provenance.
#[derive(Clone, Debug)]
pub struct CachedConfig {
    pub config: FetchedConfig,
    pub source: ConfigSourceType,
}

/// One JSON file per namespace, named after its channel key.
pub struct LocalFileRepository {
    dir: PathBuf,
}

impl LocalFileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LocalFileRepository { dir: dir.into() }
    }

    fn path_for(&self, app_id: &str, cluster: &str, namespace: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", assemble_channel(app_id, cluster, namespace)))
    }

    pub fn save(&self, config: &FetchedConfig) -> Result<(), SyncError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&config.app_id, &config.cluster, &config.namespace_name);
        let body = serde_json::to_vec_pretty(config)?;
        write_atomically(&path, &body)
    }

    pub fn load(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
    ) -> Result<FetchedConfig, SyncError> {
        let body = fs::read(self.path_for(app_id, cluster, namespace))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Write-then-rename so a crash mid-write never leaves a truncated cache file.
fn write_atomically(path: &Path, body: &[u8]) -> Result<(), SyncError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
