use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

/// Tunables for a channel synchronizer and its typing channel.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Max distance between a pending message's local timestamp and a
    /// confirmed record's store timestamp for the two to be matched.
    pub match_window: Duration,
    /// How long an unmatched pending entry stays in the tracker.
    pub pending_ttl: Duration,
    pub typing_ttl: Duration,
    pub max_content_chars: usize,
    pub max_page_size: u32,
    /// Capacity of the per-channel event broadcast.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            match_window: Duration::from_secs(5),
            pending_ttl: Duration::from_secs(10),
            typing_ttl: Duration::from_secs(3),
            max_content_chars: 2000,
            max_page_size: 200,
            event_buffer: 1024,
        }
    }
}

impl SyncConfig {
    /// Read overrides from `HEARTH_*` environment variables (a `.env` file is
    /// loaded first if present). Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        // Load .env if present
        let _ = dotenvy::dotenv();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        info!(?config, "Sync config loaded");
        Ok(config)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "HEARTH_MATCH_WINDOW_MS")? {
            config.match_window = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "HEARTH_PENDING_TTL_MS")? {
            config.pending_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "HEARTH_TYPING_TTL_MS")? {
            config.typing_ttl = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "HEARTH_MAX_CONTENT_CHARS")? {
            config.max_content_chars = n;
        }
        if let Some(n) = parse_var(&lookup, "HEARTH_MAX_PAGE_SIZE")? {
            config.max_page_size = n;
        }
        if let Some(n) = parse_var(&lookup, "HEARTH_EVENT_BUFFER")? {
            config.event_buffer = n;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}
