//! HTTP surface over the intent runtime

use crate::auth::{require_token, ResolvedAuth};
use crate::error::ApiError;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use strata_core::{Error, ExecutionId, GatewayConfig, Intent};
use strata_orchestrator::{IntentRuntime, ResolvedArtifact};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub const TOKEN_ENV: &str = "STRATA_GATEWAY_TOKEN";

pub struct AppState {
    pub runtime: Arc<IntentRuntime>,
    pub auth: ResolvedAuth,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(runtime: Arc<IntentRuntime>, auth: ResolvedAuth) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            auth,
            started_at: Instant::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub intent_name: String,
    pub tenant_id: String,
    pub session_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub execution_id: String,
    pub status_url: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/intents", get(list_intents).post(submit_intent))
        .route("/executions/:execution_id", get(get_execution))
        .route("/executions/:execution_id/cancel", post(cancel_execution))
        .route(
            "/executions/:execution_id/artifacts/:artifact_id",
            get(get_execution_artifact),
        )
        .route("/artifacts/:artifact_id", get(get_artifact))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    config: &GatewayConfig,
    runtime: Arc<IntentRuntime>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let auth = ResolvedAuth::from_config(&config.auth, std::env::var(TOKEN_ENV).ok());
    let intents = runtime.registry().intent_names();
    let app = router(AppState::new(runtime, auth));

    let bind_addr: SocketAddr = format!("{}:{}", config.bind.to_addr(), config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {}", e))?;

    info!("Strata gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  Intents:   {}", intents.join(", "));
    info!("  Auth mode: {:?}", config.auth.mode);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Gateway stopped");
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let foundation = state.runtime.foundation();
    let (status, adapters) = match foundation.health().await {
        Ok(report) if report.is_healthy() => (StatusCode::OK, serde_json::json!(report.adapters)),
        Ok(report) => (StatusCode::SERVICE_UNAVAILABLE, serde_json::json!(report.adapters)),
        Err(e) => return ApiError::from(e).into_response(),
    };
    let body = serde_json::json!({
        "status": if status == StatusCode::OK { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "adapters": adapters,
        "intents": state.runtime.registry().intent_names(),
    });
    (status, Json(body)).into_response()
}

async fn list_intents(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "intents": state.runtime.registry().intent_names() }))
}

async fn submit_intent(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(req) = body.map_err(|e| Error::InvalidInput(e.body_text()))?;
    let intent = Intent::new(req.intent_name, req.tenant_id, req.session_id, req.payload);
    let execution_id = state.runtime.submit(intent).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status_url: format!("/api/executions/{}", execution_id),
            execution_id: execution_id.to_string(),
        }),
    ))
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
) -> Result<Response, ApiError> {
    let status = state.runtime.status(&ExecutionId::from(execution_id)).await?;
    Ok(Json(status).into_response())
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cancelled = state.runtime.cancel(&ExecutionId::from(execution_id)).await?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

async fn get_execution_artifact(
    State(state): State<Arc<AppState>>,
    Path((execution_id, artifact_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let artifact = state
        .runtime
        .resolver()
        .resolve_in_execution(&ExecutionId::from(execution_id), &artifact_id)
        .await?;
    Ok(content_response(artifact))
}

async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path(artifact_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.runtime.resolver().resolve_direct(&artifact_id).await {
        Ok(artifact) => Ok(content_response(artifact)),
        Err(e) => {
            let fallback = match &e {
                Error::ContextRequired {
                    execution_id: Some(id),
                    ..
                } => Some(format!("/api/executions/{}/artifacts/{}", id, artifact_id)),
                _ => None,
            };
            Err(ApiError::with_fallback(e, fallback))
        }
    }
}

fn content_response(artifact: ResolvedArtifact) -> Response {
    let content_type = HeaderValue::from_str(&artifact.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let kind = HeaderValue::from_str(&artifact.kind.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("file"));
    let mut response = (StatusCode::OK, artifact.content).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert("x-strata-artifact-kind", kind);
    if let Ok(name) = HeaderValue::from_str(&artifact.name) {
        headers.insert("x-strata-artifact-name", name);
    }
    response
}
