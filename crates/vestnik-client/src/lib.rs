//! # vestnik-client
//!
//! Client core for Vestnik group chat: a conversation cache merged from
//! snapshot polls, a per-group poll scheduler, the membership directory and
//! the [`ChatClient`] facade that ties them to a transport and a persisted
//! session.

pub mod cache;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod scheduler;

pub use cache::{ConversationCache, DeliveryState, LogEntry, MergeResult};
pub use client::ChatClient;
pub use config::ClientConfig;
pub use directory::MembershipDirectory;
pub use error::ClientError;
pub use events::{ClientEvent, EventBus};
pub use scheduler::{MessageSource, PollScheduler, PollSession};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `fmt` subscriber. `RUST_LOG` overrides the default
/// crate-scoped filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("vestnik_client=debug,vestnik_net=debug,vestnik_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}
