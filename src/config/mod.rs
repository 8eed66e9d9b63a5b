mod backoff;
mod raw;

pub use self::backoff::BackoffConfig;
pub use self::raw::ConfigParseError;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::instrument;

use self::raw::RawConfig;
use crate::admission::AllowList;

#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: Option<String>,
    pub workers: u16,
    /// Successful passes requeue the group after this long.
    pub resync_interval: Duration,
    pub backoff: BackoffConfig,
    pub field_manager: String,
    /// `None` when the webhook is disabled.
    pub webhook: Option<WebhookConfig>,
    pub allow_list: AllowList,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub listen: SocketAddr,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
}

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Syntax(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] ConfigParseError),
}

impl Config {
    #[instrument]
    pub async fn new_from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigLoadError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigLoadError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        Ok(Config::try_from(raw)?)
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config::try_from(RawConfig::default()).unwrap()
    }
}
