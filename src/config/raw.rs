use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;
use thiserror::Error;

use super::backoff::BackoffConfig;
use super::{Config, WebhookConfig};
use crate::admission::{AllowList, PlacementField};

#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(super) struct RawConfig {
    /// Watch scope. All namespaces when unset.
    #[serde(default)]
    pub(super) namespace: Option<String>,

    #[serde(default = "default_workers")]
    pub(super) workers: u16,

    #[serde(
        deserialize_with = "deserialize_duration",
        default = "default_resync_interval"
    )]
    pub(super) resync_interval: Duration,

    #[serde(default)]
    pub(super) backoff: BackoffConfig,

    #[serde(default = "default_field_manager")]
    pub(super) field_manager: String,

    #[serde(default)]
    pub(super) webhook: RawWebhookConfig,

    /// Pod template fields that may change while a group is suspended.
    #[serde(default)]
    pub(super) placement_fields: Option<Vec<PlacementField>>,
}

#[cfg_attr(test, derive(PartialEq))]
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(super) struct RawWebhookConfig {
    #[serde(default)]
    pub(super) enabled: bool,

    /// Example: "0.0.0.0:9443"
    pub(super) listen: Option<String>,

    pub(super) tls_cert: Option<PathBuf>,

    pub(super) tls_key: Option<PathBuf>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: default_workers(),
            resync_interval: default_resync_interval(),
            backoff: BackoffConfig::default(),
            field_manager: default_field_manager(),
            webhook: RawWebhookConfig::default(),
            placement_fields: None,
        }
    }
}

const fn default_workers() -> u16 {
    4
}
const fn default_resync_interval() -> Duration {
    Duration::from_secs(300)
}
fn default_field_manager() -> String {
    "jobgroup-controller".to_string()
}

const DEFAULT_LISTEN: &str = "0.0.0.0:9443";
const DEFAULT_TLS_CERT: &str = "/etc/jobgroup/tls/tls.crt";
const DEFAULT_TLS_KEY: &str = "/etc/jobgroup/tls/tls.key";

#[derive(Error, Debug)]
pub enum ConfigParseError {
    #[error("workers must be at least 1")]
    NoWorkers,

    #[error("backoff.initial ({initial:?}) must be non-zero and not exceed backoff.max ({max:?})")]
    InvalidBackoff { initial: Duration, max: Duration },

    #[error("field_manager must not be empty")]
    EmptyFieldManager,

    #[error("webhook.listen '{value}' is not a socket address")]
    InvalidListenAddress { value: String },
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigParseError;
    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        if raw.workers == 0 {
            return Err(ConfigParseError::NoWorkers);
        }

        if raw.backoff.initial.is_zero() || raw.backoff.initial > raw.backoff.max {
            return Err(ConfigParseError::InvalidBackoff {
                initial: raw.backoff.initial,
                max: raw.backoff.max,
            });
        }

        if raw.field_manager.trim().is_empty() {
            return Err(ConfigParseError::EmptyFieldManager);
        }

        let webhook = if raw.webhook.enabled {
            let listen = raw
                .webhook
                .listen
                .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
            let listen: SocketAddr = listen
                .parse()
                .map_err(|_| ConfigParseError::InvalidListenAddress { value: listen })?;
            Some(WebhookConfig {
                listen,
                tls_cert: raw
                    .webhook
                    .tls_cert
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TLS_CERT)),
                tls_key: raw
                    .webhook
                    .tls_key
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_TLS_KEY)),
            })
        } else {
            None
        };

        let allow_list = raw
            .placement_fields
            .map(AllowList::new)
            .unwrap_or_default();

        Ok(Config {
            namespace: raw.namespace,
            workers: raw.workers,
            resync_interval: raw.resync_interval,
            backoff: raw.backoff,
            field_manager: raw.field_manager,
            webhook,
            allow_list,
        })
    }
}
