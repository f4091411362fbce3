//! Route tests driven through the router with `oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use strata_adapters::{DocumentStoreAdapter, MemoryDocumentStore};
use strata_core::*;
use strata_foundation::{in_memory_config, FoundationService};
use strata_gateway::{router, AppState, ResolvedAuth, SubmitResponse};
use strata_orchestrator::{default_registry, IntentRuntime};
use tower::ServiceExt;

const TOKEN: &str = "test-token";

async fn runtime_with(foundation: Arc<FoundationService>) -> Arc<IntentRuntime> {
    let registry = default_registry(foundation.config()).unwrap();
    IntentRuntime::start(foundation, registry).await.unwrap()
}

async fn app() -> (Router, Arc<IntentRuntime>) {
    let rt = runtime_with(FoundationService::new(in_memory_config())).await;
    (app_for(rt.clone()), rt)
}

fn app_for(rt: Arc<IntentRuntime>) -> Router {
    router(AppState::new(
        rt,
        ResolvedAuth {
            mode: AuthMode::Token,
            token: Some(TOKEN.into()),
        },
    ))
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn submit(app: &Router, rt: &IntentRuntime, body: Value) -> ExecutionStatus {
    let (status, json) = send_json(app, post_json("/api/intents", body)).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", json);
    let accepted: SubmitResponse = serde_json::from_value(json).unwrap();
    assert_eq!(
        accepted.status_url,
        format!("/api/executions/{}", accepted.execution_id)
    );
    rt.wait_for(&ExecutionId::from(accepted.execution_id), Duration::from_secs(5))
        .await
        .unwrap()
}

fn ingest_body(text: &str) -> Value {
    json!({
        "intent_name": "ingest_file",
        "tenant_id": "acme",
        "session_id": "s-1",
        "payload": {"file_name": "a.txt", "content_type": "text/plain", "text": text},
    })
}

fn workflow_body() -> Value {
    json!({
        "intent_name": "create_workflow",
        "tenant_id": "acme",
        "session_id": "s-1",
        "payload": {"name": "review", "steps": ["draft", "approve"]},
    })
}

#[tokio::test]
async fn health_reports_adapters_and_version() {
    let (app, _) = app().await;
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, json) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["adapters"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let (app, _) = app().await;
    let request = Request::get("/api/intents").body(Body::empty()).unwrap();
    let (status, json) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["kind"], "unauthorized");

    let request = Request::get("/api/intents")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.0, StatusCode::UNAUTHORIZED);

    let (status, json) = send_json(&app, get("/api/intents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["intents"], json!(["create_workflow", "ingest_file"]));
}

#[tokio::test]
async fn submit_then_fetch_execution_and_artifact() {
    let (app, rt) = app().await;
    let done = submit(&app, &rt, ingest_body("over http")).await;
    assert_eq!(done.state, ExecutionState::Succeeded);

    let (status, json) = send_json(&app, get(&format!("/api/executions/{}", done.execution_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "succeeded");
    assert_eq!(json["artifacts"][0]["kind"], "file");
    assert_eq!(json["artifacts"][0]["materialization"], "reference");

    let artifact_id = &done.artifacts[0].artifact_id;
    let (status, headers, body) = send(
        &app,
        get(&format!("/api/executions/{}/artifacts/{}", done.execution_id, artifact_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(headers["x-strata-artifact-kind"], "file");
    assert_eq!(body, b"over http");

    let (status, _, body) = send(&app, get(&format!("/api/artifacts/{}", artifact_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"over http");
}

#[tokio::test]
async fn inline_artifact_direct_fetch_is_context_required_with_fallback() {
    let (app, rt) = app().await;
    let done = submit(&app, &rt, workflow_body()).await;
    assert_eq!(done.state, ExecutionState::Succeeded);
    let definition = &done.artifacts[0];

    let (status, json) = send_json(&app, get(&format!("/api/artifacts/{}", definition.artifact_id))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["kind"], "context_required");
    let fallback = json["error"]["fallback"].as_str().unwrap().to_string();
    assert_eq!(
        fallback,
        format!("/api/executions/{}/artifacts/{}", done.execution_id, definition.artifact_id)
    );

    let (status, _, body) = send(&app, get(&fallback)).await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["name"], "review");
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let (app, _) = app().await;
    let (status, json) = send_json(&app, get("/api/executions/exec-missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["kind"], "not_found");

    let (status, json) = send_json(&app, get("/api/artifacts/art-missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["kind"], "not_found");
}

#[tokio::test]
async fn partial_commit_surfaces_as_conflict() {
    let records = Arc::new(MemoryDocumentStore::new());
    let foundation = FoundationService::builder(in_memory_config())
        .with_metadata_store(records.clone())
        .build();
    let rt = runtime_with(foundation).await;
    let app = app_for(rt.clone());

    let done = submit(&app, &rt, ingest_body("half written")).await;
    let artifact = &done.artifacts[0];

    // Lose the metadata half so only the blob remains.
    let reference = artifact.file_reference.clone().unwrap();
    records.delete("file_records", &reference).await.unwrap();

    let (status, json) =
        send_json(&app, get(&format!("/api/artifacts/{}", artifact.artifact_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["kind"], "partial_commit");
}

#[tokio::test]
async fn malformed_submissions_are_bad_requests() {
    let (app, _) = app().await;

    let request = Request::post("/api/intents")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "invalid_input");

    let (status, json) = send_json(
        &app,
        post_json(
            "/api/intents",
            json!({"intent_name": "nope", "tenant_id": "acme", "session_id": "s-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "invalid_input");
}

#[tokio::test]
async fn cancel_after_completion_reports_false() {
    let (app, rt) = app().await;
    let done = submit(&app, &rt, ingest_body("quick")).await;
    let (status, json) = send_json(
        &app,
        post_json(&format!("/api/executions/{}/cancel", done.execution_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cancelled"], false);
}
