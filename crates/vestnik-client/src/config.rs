//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a client can start against a local
//! reference server with zero configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vestnik_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_PENDING_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RECONCILE_WINDOW_SECS,
};

use crate::cache::CacheConfig;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST surface.
    /// Env: `VESTNIK_SERVER_URL`
    /// Default: `http://127.0.0.1:8080`
    pub server_url: String,

    /// Snapshot poll interval.
    /// Env: `VESTNIK_POLL_INTERVAL_MS`
    pub poll_interval: Duration,

    /// Per-request timeout.
    /// Env: `VESTNIK_REQUEST_TIMEOUT_MS`
    pub request_timeout: Duration,

    /// Age at which an unconfirmed optimistic message is marked failed.
    /// Env: `VESTNIK_PENDING_TIMEOUT_MS`
    pub pending_timeout: Duration,

    /// Timestamp tolerance for matching a server copy to an optimistic
    /// message whose server id is unknown.
    /// Env: `VESTNIK_RECONCILE_WINDOW_SECS`
    pub reconcile_window: Duration,

    /// Directory holding the local database. `None` uses the platform data
    /// directory.
    /// Env: `VESTNIK_DATA_DIR`
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            pending_timeout: Duration::from_millis(DEFAULT_PENDING_TIMEOUT_MS),
            reconcile_window: Duration::from_secs(DEFAULT_RECONCILE_WINDOW_SECS as u64),
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("VESTNIK_SERVER_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.is_empty() {
                tracing::warn!("Empty VESTNIK_SERVER_URL, using default");
            } else {
                config.server_url = url.to_string();
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "VESTNIK_POLL_INTERVAL_MS") {
            if ms == 0 {
                tracing::warn!("VESTNIK_POLL_INTERVAL_MS must be positive, using default");
            } else {
                config.poll_interval = Duration::from_millis(ms);
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "VESTNIK_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "VESTNIK_PENDING_TIMEOUT_MS") {
            config.pending_timeout = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "VESTNIK_RECONCILE_WINDOW_SECS") {
            config.reconcile_window = Duration::from_secs(secs);
        }

        if let Some(dir) = lookup("VESTNIK_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        config
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            pending_timeout: self.pending_timeout,
            reconcile_window: self.reconcile_window,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
