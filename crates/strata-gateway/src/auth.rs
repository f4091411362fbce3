//! Authentication handling

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use strata_core::{AuthConfig, AuthMode};

use crate::error::ApiError;
use crate::server::AppState;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone, Debug)]
pub struct ResolvedAuth {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl ResolvedAuth {
    pub fn from_config(config: &AuthConfig, env_token: Option<String>) -> Self {
        let token = config.token.clone().or(env_token);
        Self {
            mode: config.mode.clone(),
            token,
        }
    }

    pub fn verify_token(&self, provided: Option<&str>) -> Result<(), ApiError> {
        match self.mode {
            AuthMode::None => Ok(()),
            AuthMode::Token => {
                let expected = self
                    .token
                    .as_deref()
                    .ok_or_else(|| ApiError::Unauthorized("no token configured".into()))?;
                let provided =
                    provided.ok_or_else(|| ApiError::Unauthorized("token required".into()))?;
                if !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
                    return Err(ApiError::Unauthorized("invalid token".into()));
                }
                Ok(())
            }
        }
    }
}

/// `Authorization: Bearer <token>` on every `/api` route.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    state.auth.verify_token(provided)?;
    Ok(next.run(request).await)
}
