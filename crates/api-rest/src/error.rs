use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use ctmark_core::ResearchError;
use serde::Serialize;
use utoipa::ToSchema;

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Research(ResearchError),
    BadRequest(String),
    Unauthorized(&'static str),
    Internal(&'static str),
}

impl From<ResearchError> for ApiError {
    fn from(err: ResearchError) -> Self {
        ApiError::Research(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Research(err) => match err {
                ResearchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                ResearchError::NotFound(_) => StatusCode::NOT_FOUND,
                ResearchError::WrongFilesFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ResearchError::AccessDenied => StatusCode::FORBIDDEN,
                ResearchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            // Storage details stay in the logs.
            ApiError::Research(ResearchError::Storage(_)) => "Internal error".into(),
            ApiError::Research(err) => err.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Unauthorized(msg) | ApiError::Internal(msg) => (*msg).into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {:?}", self);
        }
        (status, Json(ErrorRes { error: self.message() })).into_response()
    }
}
