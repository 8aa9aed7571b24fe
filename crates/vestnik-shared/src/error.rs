use thiserror::Error;

/// Connectivity or infrastructure failure while talking to the server.
///
/// The transport never retries; pollers retry on their next tick and
/// user-initiated actions surface the error to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// The connection dropped after the request went out; the server may or
    /// may not have acted on it.
    #[error("Connection interrupted: {0}")]
    Interrupted(String),

    /// Non-2xx response. `message` carries the body's `error` field if any.
    #[error("Server responded with status {status}")]
    ServerError { status: u16, message: Option<String> },

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether the server may have applied the request despite the error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Interrupted(_))
    }
}

/// Business-rule rejection reported by the server (duplicate handle, wrong
/// password, missing fields).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ApplicationError(pub String);

impl ApplicationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Outcome of a typed API call: either layer can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Application(#[from] ApplicationError),
}

impl ApiError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ApiError::Transport(e) if e.is_ambiguous())
    }
}
