//! # vestnik-server
//!
//! In-memory reference implementation of the Vestnik REST surface, used for
//! local development and end-to-end tests of the client.

pub mod api;
pub mod config;
pub mod error;
pub mod state;

pub use api::{build_router, serve, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
pub use state::Registry;
