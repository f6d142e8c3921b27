use crate::http::HttpTransport;
use crate::peer::PeerTransport;
use crate::transport::{SlowTransferPolicy, Transport};
use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloaderConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,
    #[serde(default)]
    pub peer: Option<PeerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub urls: Vec<String>,
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
}

fn default_concurrency() -> usize {
    2
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_update_interval() -> u64 {
    500
}

fn default_grace() -> u64 {
    10
}

fn default_min_bytes() -> u64 {
    64 * 1024
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            proxy: None,
            update_interval_ms: default_update_interval(),
            peer: None,
        }
    }
}

impl PeerConfig {
    pub fn policy(&self) -> SlowTransferPolicy {
        SlowTransferPolicy {
            grace: Duration::from_secs(self.grace_secs),
            min_bytes: self.min_bytes,
        }
    }
}

impl DownloaderConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Load config from `~/.config/hoist/downloader.json`, falling back to
    /// defaults when the file does not exist.
    pub fn load_default() -> Result<Self, RemoteError> {
        let path = default_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid downloader config: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The transport this configuration describes: peers with an HTTP
    /// fallback when a peer section is present, plain HTTP otherwise.
    pub fn build_transport(&self) -> Result<Arc<dyn Transport>, RemoteError> {
        let http = HttpTransport::from_config(self)?;
        match &self.peer {
            Some(peer) if !peer.urls.is_empty() => {
                let peers = HttpTransport::from_config(self)?;
                Ok(Arc::new(PeerTransport::new(
                    peer.urls.clone(),
                    peers,
                    http,
                    peer.policy(),
                )))
            }
            _ => Ok(Arc::new(http)),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/hoist/downloader.json"))
}
