//! HTTP error mapping.
//!
//! Every failure leaves as `{ "error": { "kind", "message" } }` with a status
//! derived from the error kind. `context_required` may add a `fallback` URL.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use strata_core::{Error, ErrorKind};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{error}")]
    Strata {
        error: Error,
        /// Where the caller can retry with full context.
        fallback: Option<String>,
    },
}

impl ApiError {
    pub fn with_fallback(error: Error, fallback: Option<String>) -> Self {
        Self::Strata { error, fallback }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Strata { error, .. } => status_for(error.kind()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Strata { error, .. } => error.kind().as_str(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::Strata {
            error,
            fallback: None,
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ContextRequired => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::PartialCommit | ErrorKind::Conflict | ErrorKind::InvalidTransition => {
            StatusCode::CONFLICT
        }
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Cancelled => StatusCode::GONE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Unavailable | ErrorKind::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Corrupt | ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed ({}): {}", status, self);
        }
        let mut body = serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        });
        if let Self::Strata {
            error: Error::ContextRequired { execution_id, .. },
            fallback,
        } = &self
        {
            body["error"]["execution_id"] = serde_json::json!(execution_id);
            if let Some(url) = fallback {
                body["error"]["fallback"] = serde_json::json!(url);
            }
        }
        (status, Json(body)).into_response()
    }
}
