use std::str::FromStr;

/// Where read operations are served from. Fixed for the lifetime of a hub so
/// callers never mix sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadSource {
    /// Always-consistent reads straight from the database.
    #[default]
    Storage,
    /// Low-latency reads from the in-memory aggregate cache.
    Cache,
}

impl FromStr for ReadSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "storage" | "db" => Ok(Self::Storage),
            "cache" | "memory" => Ok(Self::Cache),
            other => Err(format!("unknown read source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub read_source: ReadSource,
    /// Messages fetched per chat when the session becomes ready.
    pub backfill_limit: u32,
    /// Page size for chat history served from storage.
    pub history_limit: u32,
    /// Messages per chat loaded into the cache on start.
    pub rebuild_window: u32,
    /// Wipe stored messages and chats on logout.
    pub purge_on_logout: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            read_source: ReadSource::Storage,
            backfill_limit: 5,
            history_limit: 50,
            rebuild_window: 50,
            purge_on_logout: true,
        }
    }
}
