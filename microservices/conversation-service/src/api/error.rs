//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use huddle_conversation::ConversationError;
use serde::Serialize;
use validator::ValidationErrors;

use super::rest::ApiResponse;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ValidationErrors),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Conversation(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::InvalidRequest(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Conversation(e) => e.error_code(),
            Self::InvalidRequest(_) | Self::BadRequest(_) => "VALIDATION_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body: Json<ApiResponse<()>> = ApiResponse::failure(ErrorBody {
            code: self.code(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}
