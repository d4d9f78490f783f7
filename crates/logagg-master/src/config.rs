//! master.toml configuration.
//!
//! Every section is optional; missing values fall back to the defaults
//! below. Command-line flags are applied on top by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use logagg_api::AdminCredentials;
use logagg_registry::{PollerConfig, RegistryError, TailConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub admin: Option<AdminConfig>,
    pub poller: PollerSection,
    pub tail: TailSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1088,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/logagg"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdminConfig {
    pub key: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerSection {
    pub reconcile_interval: String,
    pub retry_initial: String,
    pub retry_max: String,
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            reconcile_interval: "30s".to_string(),
            retry_initial: "1s".to_string(),
            retry_max: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TailSection {
    pub flush_window: String,
}

impl Default for TailSection {
    fn default() -> Self {
        Self {
            flush_window: "1s".to_string(),
        }
    }
}

impl MasterConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: MasterConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn poller_config(&self) -> anyhow::Result<PollerConfig> {
        Ok(PollerConfig {
            interval: duration_field("poller.reconcile_interval", &self.poller.reconcile_interval)?,
            retry_initial: duration_field("poller.retry_initial", &self.poller.retry_initial)?,
            retry_max: duration_field("poller.retry_max", &self.poller.retry_max)?,
        })
    }

    pub fn tail_config(&self) -> anyhow::Result<TailConfig> {
        Ok(TailConfig {
            flush_window: duration_field("tail.flush_window", &self.tail.flush_window)?,
            ..TailConfig::default()
        })
    }

    pub fn admin_credentials(&self) -> Option<AdminCredentials> {
        self.admin.as_ref().map(|a| AdminCredentials {
            key: a.key.clone(),
            secret: a.secret.clone(),
        })
    }
}

fn duration_field(name: &str, value: &str) -> anyhow::Result<Duration> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => anyhow::bail!("{name}: invalid duration {value:?}"),
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse `--auth key=<key>:secret=<secret>`.
pub fn parse_auth(s: &str) -> Result<AdminConfig, RegistryError> {
    let invalid = || RegistryError::InvalidArgument(format!(
        "expected key=<key>:secret=<secret>, got {s:?}"
    ));
    let rest = s.trim().strip_prefix("key=").ok_or_else(invalid)?;
    let (key, secret) = rest.split_once(":secret=").ok_or_else(invalid)?;
    if key.is_empty() || secret.is_empty() {
        return Err(invalid());
    }
    Ok(AdminConfig {
        key: key.to_string(),
        secret: secret.to_string(),
    })
}
