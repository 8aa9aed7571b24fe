use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use vestnik_shared::protocol::ErrorBody;
use vestnik_shared::ApplicationError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Business-rule rejection. Reported with a 2xx status and an `error`
    /// field so clients can tell it apart from transport failures.
    #[error("{0}")]
    Rejected(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found")]
    NotFound,
}

impl From<ApplicationError> for ServerError {
    fn from(err: ApplicationError) -> Self {
        ServerError::Rejected(err.0)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Rejected(_) => StatusCode::OK,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound => StatusCode::NOT_FOUND,
        };

        let body = ErrorBody {
            error: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
