use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use nearcast_shared::error::RoomCodeError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid room code")]
    InvalidRoom(#[from] RoomCodeError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::InvalidRoom(_) => StatusCode::BAD_REQUEST,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
