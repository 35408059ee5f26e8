use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pinhole_shortener::ShortenerError;
use tracing::{debug, error};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    /// Request body could not be parsed.
    BadRequest(String),
    Unauthorized,
    Shortener(ShortenerError),
}

impl From<ShortenerError> for AppError {
    fn from(value: ShortenerError) -> Self {
        Self::Shortener(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => {
                debug!(%message, "bad request");
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
            }
            AppError::Shortener(err) => {
                let status = match &err {
                    ShortenerError::InvalidUrl(_)
                    | ShortenerError::InvalidShortKey(_)
                    | ShortenerError::CorrelationConflict(_)
                    | ShortenerError::NotFound(_)
                    | ShortenerError::Gone(_) => StatusCode::BAD_REQUEST,
                    // a taken custom key is reported without a body
                    ShortenerError::KeyConflict(_) => return StatusCode::CONFLICT.into_response(),
                    ShortenerError::NotOwner { .. } => StatusCode::FORBIDDEN,
                    ShortenerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };

                if status.is_server_error() {
                    error!(error = %err, "request failed");
                } else {
                    debug!(error = %err, %status, "request rejected");
                }

                (status, err.to_string()).into_response()
            }
        }
    }
}
