use thiserror::Error;

use vestnik_shared::{ApiError, ApplicationError, MessageId, TransportError};
use vestnik_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Application(#[from] ApplicationError),

    #[error("Local storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("No failed message with id {0}")]
    UnknownMessage(MessageId),
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Transport(e) => ClientError::Transport(e),
            ApiError::Application(e) => ClientError::Application(e),
        }
    }
}

impl ClientError {
    /// `true` for connectivity failures the user may simply retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
