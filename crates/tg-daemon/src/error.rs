//! HTTP error mapping.
//!
//! Everything the handlers can fail with reduces to a status code plus a
//! stable `{ok:false,error}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: what.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "ok": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<tg_core::Error> for ApiError {
    fn from(e: tg_core::Error) -> Self {
        use tg_core::Error;
        match &e {
            Error::Auth(_) => Self {
                status: StatusCode::UNAUTHORIZED,
                message: e.to_string(),
            },
            Error::SessionNotFound(_) => Self {
                status: StatusCode::NOT_FOUND,
                message: e.to_string(),
            },
            Error::Config(_) | Error::InputInjection(_) | Error::Address(_)
            | Error::Protocol(_) => Self {
                status: StatusCode::BAD_REQUEST,
                message: e.to_string(),
            },
            _ => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: e.to_string(),
            },
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
