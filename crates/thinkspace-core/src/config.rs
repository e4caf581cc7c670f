use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Client-side sync settings. Read from the environment by `from_env`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the row service, e.g. `http://127.0.0.1:3000`.
    pub api_url: String,
    /// Similarity search endpoint. Search is disabled without it.
    pub search_url: Option<String>,
    /// Quiet period before a local change is pushed.
    pub debounce: Duration,
    /// How long `loading` may stay set before it is cleared regardless.
    pub load_timeout: Duration,
    /// SQLite file for the offline cache. No cache without it.
    pub cache_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:3000".into(),
            search_url: None,
            debounce: Duration::from_millis(1500),
            load_timeout: Duration::from_millis(8000),
            cache_path: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let api_url = lookup("THINKSPACE_API_URL").unwrap_or(defaults.api_url);
        let search_url = lookup("THINKSPACE_SEARCH_URL").filter(|s| !s.is_empty());
        let debounce = millis_var(&lookup, "THINKSPACE_SYNC_DEBOUNCE_MS")?.unwrap_or(defaults.debounce);
        let load_timeout = millis_var(&lookup, "THINKSPACE_LOAD_TIMEOUT_MS")?.unwrap_or(defaults.load_timeout);
        let cache_path = lookup("THINKSPACE_CACHE_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            search_url,
            debounce,
            load_timeout,
            cache_path,
        })
    }

    /// WebSocket URL of the realtime feed for `owner_id`.
    pub fn realtime_url(&self, owner_id: uuid::Uuid) -> String {
        let base = self.api_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/realtime/{}", ws_base, owner_id)
    }
}

fn millis_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<Duration>> {
    match lookup(name) {
        Some(raw) => {
            let ms: u64 = raw.trim().parse().with_context(|| format!("{} must be milliseconds, got {:?}", name, raw))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        None => Ok(None),
    }
}
