//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use vestnik_shared::constants::{
    ADMIN_MESSAGE_LIMIT, DEFAULT_HTTP_PORT, MESSAGE_HISTORY_LIMIT, USER_SEARCH_LIMIT,
};
use vestnik_shared::validation::normalize_handle;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Human-readable name for this instance, reported by `/health`.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Handles granted the privileged flag when they register.
    /// Env: `ADMIN_HANDLES` (comma-separated)
    pub admin_handles: Vec<String>,

    /// Messages returned per group snapshot.
    /// Env: `MESSAGE_HISTORY_LIMIT`
    pub message_history_limit: usize,

    /// Users returned per search.
    /// Env: `USER_SEARCH_LIMIT`
    pub user_search_limit: usize,

    /// Messages returned by the admin dump.
    /// Env: `ADMIN_MESSAGE_LIMIT`
    pub admin_message_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            instance_name: "Vestnik".to_string(),
            admin_handles: Vec::new(),
            message_history_limit: MESSAGE_HISTORY_LIMIT,
            user_search_limit: USER_SEARCH_LIMIT,
            admin_message_limit: ADMIN_MESSAGE_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(handles) = lookup("ADMIN_HANDLES") {
            config.admin_handles = handles
                .split(',')
                .map(normalize_handle)
                .filter(|h| !h.is_empty())
                .collect();
        }

        let limits = [
            ("MESSAGE_HISTORY_LIMIT", &mut config.message_history_limit),
            ("USER_SEARCH_LIMIT", &mut config.user_search_limit),
            ("ADMIN_MESSAGE_LIMIT", &mut config.admin_message_limit),
        ];
        for (key, slot) in limits {
            if let Some(val) = lookup(key) {
                match val.parse::<usize>() {
                    Ok(n) if n > 0 => *slot = n,
                    _ => tracing::warn!(key, value = %val, "Invalid limit, using default"),
                }
            }
        }

        config
    }

    pub fn is_admin_handle(&self, handle: &str) -> bool {
        self.admin_handles.iter().any(|h| h == handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.message_history_limit, 200);
        assert!(config.admin_handles.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(|key| match key {
            "HTTP_ADDR" => Some("127.0.0.1:9000".into()),
            "ADMIN_HANDLES" => Some(" Root, ops ,,".into()),
            "USER_SEARCH_LIMIT" => Some("5".into()),
            "ADMIN_MESSAGE_LIMIT" => Some("zero".into()),
            _ => None,
        });
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.admin_handles, vec!["root", "ops"]);
        assert!(config.is_admin_handle("root"));
        assert_eq!(config.user_search_limit, 5);
        assert_eq!(config.admin_message_limit, 100);
    }
}
