use crate::collector::SERVER_PING_SUBJECT;
use crate::sorter::SortKey;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file read when neither `--config` nor `CONFIG_FILE` is given (optional).
pub const DEFAULT_CONFIG_FILE: &str = "server-list.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Client name reported to the server; defaults to `server-list/<version>`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            name: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_url() -> String {
    "nats://127.0.0.1:4222".into()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_subject")]
    pub subject: String,
    /// How long to wait for replies after the ping is published.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound for flushing in-flight replies once collection stops.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            timeout_ms: default_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

fn default_subject() -> String {
    SERVER_PING_SUBJECT.into()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Sort key name (conns, subs, routes, gws, mem, cpu, slow, uptime, rtt); unknown names sort by rtt.
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub json: bool,
}

impl OutputConfig {
    pub fn sort_key(&self) -> SortKey {
        self.sort
            .as_deref()
            .map(SortKey::parse_or_default)
            .unwrap_or_default()
    }
}

impl AppConfig {
    /// Load from `explicit`, else `CONFIG_FILE`, else `server-list.toml` if it exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var("CONFIG_FILE")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                    default.exists().then_some(default)
                }),
        };
        match path {
            Some(path) => Self::load_file(&path),
            None => {
                tracing::debug!("no config file, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::load_from_str(&s)
            .with_context(|| format!("loading config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.connection.url.trim().is_empty(),
            "connection.url must be non-empty"
        );
        anyhow::ensure!(
            self.connection.connect_timeout_ms > 0,
            "connection.connect_timeout_ms must be > 0, got {}",
            self.connection.connect_timeout_ms
        );
        anyhow::ensure!(
            !self.collection.subject.trim().is_empty(),
            "collection.subject must be non-empty"
        );
        anyhow::ensure!(
            self.collection.timeout_ms > 0,
            "collection.timeout_ms must be > 0, got {}",
            self.collection.timeout_ms
        );
        anyhow::ensure!(
            self.collection.drain_timeout_ms > 0,
            "collection.drain_timeout_ms must be > 0, got {}",
            self.collection.drain_timeout_ms
        );
        Ok(())
    }
}
