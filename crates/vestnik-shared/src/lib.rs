//! # vestnik-shared
//!
//! Domain types, wire envelopes, error taxonomy and input rules shared by the
//! Vestnik client crates and the reference server.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;
pub mod validation;

pub use error::{ApiError, ApplicationError, TransportError};
pub use identity::Identity;
pub use types::{Group, GroupId, Member, Message, MessageId, UserId};
