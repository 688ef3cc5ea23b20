use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

use netzap_hub::{HubConfig, ReadSource};

/// Process configuration, read from `NETZAP_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub bridge_url: String,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    pub hub: HubConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = var("NETZAP_PORT", "3001")
            .parse::<u16>()
            .context("NETZAP_PORT must be a port number")?;
        let read_source = var("NETZAP_READ_SOURCE", "storage")
            .parse::<ReadSource>()
            .map_err(anyhow::Error::msg)
            .context("NETZAP_READ_SOURCE")?;
        let backfill_limit = var("NETZAP_BACKFILL_LIMIT", "5")
            .parse::<u32>()
            .context("NETZAP_BACKFILL_LIMIT must be a non-negative integer")?;
        let purge_on_logout = parse_bool(&var("NETZAP_PURGE_ON_LOGOUT", "true"))
            .context("NETZAP_PURGE_ON_LOGOUT must be true or false")?;

        let cors_origins: Vec<String> = lookup("NETZAP_CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: var("NETZAP_HOST", "0.0.0.0"),
            port,
            db_path: var("NETZAP_DB_PATH", "netzap.db").into(),
            bridge_url: var("NETZAP_BRIDGE_URL", "http://127.0.0.1:3100"),
            cors_origins,
            hub: HubConfig {
                read_source,
                backfill_limit,
                purge_on_logout,
                ..HubConfig::default()
            },
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("'{}' is not a boolean", other),
    }
}
