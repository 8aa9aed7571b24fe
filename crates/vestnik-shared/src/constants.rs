/// Application name
pub const APP_NAME: &str = "Vestnik";

/// Default snapshot poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

/// Default per-request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// How long an optimistic insert may stay pending before it is marked failed
pub const DEFAULT_PENDING_TIMEOUT_MS: u64 = 15_000;

/// Maximum distance between a provisional message's local timestamp and a
/// server copy's `created_at` for heuristic reconciliation
pub const DEFAULT_RECONCILE_WINDOW_SECS: i64 = 60;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Minimum handle length
pub const MIN_HANDLE_LEN: usize = 3;

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 4;

/// Messages returned per group snapshot
pub const MESSAGE_HISTORY_LIMIT: usize = 200;

/// Users returned per search
pub const USER_SEARCH_LIMIT: usize = 20;

/// Messages returned by the admin dump
pub const ADMIN_MESSAGE_LIMIT: usize = 100;

/// Local storage key holding the persisted identity
pub const SESSION_KEY: &str = "session.identity";
