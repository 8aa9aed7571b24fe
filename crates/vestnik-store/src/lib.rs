//! # vestnik-store
//!
//! Local storage for the Vestnik client, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` with a small key/value table, and the
//! [`SessionStore`] that keeps the authenticated identity across restarts.

pub mod database;
pub mod kv;
pub mod migrations;
pub mod session;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use session::SessionStore;
