//! End-to-end scenarios: runtime, realms and foundation wired as the binary wires them.

use base64::Engine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strata_adapters::MemoryDocumentStore;
use strata_core::*;
use strata_foundation::testing::{Fault, FaultyDocumentStore};
use strata_foundation::{in_memory_config, FoundationService};
use strata_orchestrator::{default_registry, IntentRuntime};

const WAIT: Duration = Duration::from_secs(30);

fn local_config(dir: &std::path::Path) -> StrataConfig {
    let mut config = StrataConfig::default();
    config.foundation.data_dir = dir.to_path_buf();
    config
}

async fn start(foundation: Arc<FoundationService>) -> Arc<IntentRuntime> {
    let registry = default_registry(foundation.config()).unwrap();
    IntentRuntime::start(foundation, registry).await.unwrap()
}

async fn run(rt: &Arc<IntentRuntime>, intent: Intent) -> ExecutionStatus {
    let id = rt.submit(intent).await.unwrap();
    rt.wait_for(&id, WAIT).await.unwrap()
}

fn ten_megabytes() -> Vec<u8> {
    (0..10 * 1024 * 1024u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
        .collect()
}

fn ingest(tenant: &str, session: &str, data: &[u8]) -> Intent {
    Intent::new(
        "ingest_file",
        tenant,
        session,
        json!({
            "file_name": "dataset.bin",
            "content_base64": base64::engine::general_purpose::STANDARD.encode(data),
        }),
    )
}

fn workflow() -> Intent {
    Intent::new(
        "create_workflow",
        "acme",
        "planning",
        json!({
            "name": "quarterly close",
            "description": "month-end books",
            "steps": ["reconcile accounts", {"title": "review", "owner": "finance"}, "sign off"],
        }),
    )
}

#[tokio::test]
async fn ingest_ten_megabytes_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let rt = start(FoundationService::new(local_config(dir.path()))).await;
    let data = ten_megabytes();

    let status = run(&rt, ingest("acme", "upload-1", &data)).await;
    assert_eq!(status.state, ExecutionState::Succeeded);
    assert!(status.error.is_none());
    assert_eq!(status.artifacts.len(), 1);

    let artifact = &status.artifacts[0];
    assert_eq!(artifact.kind, ArtifactKind::File);
    assert_eq!(artifact.materialization, Materialization::Reference);
    assert_eq!(artifact.size_bytes, data.len() as u64);

    let reference = artifact.file_reference.as_deref().unwrap();
    let parts: Vec<&str> = reference.split(':').collect();
    assert_eq!(parts.len(), 4);
    assert_eq!(&parts[..3], &["file", "acme", "upload-1"]);
    assert!(!parts[3].is_empty());

    let in_context = rt
        .resolver()
        .resolve_in(&status, &artifact.artifact_id)
        .await
        .unwrap();
    assert!(in_context.content[..] == data[..]);

    let direct = rt.resolver().resolve_direct(&artifact.artifact_id).await.unwrap();
    assert!(direct.content[..] == data[..]);

    let files = rt.foundation().file_storage().unwrap();
    let by_id = files.resolve_by_id("acme", parts[3]).await.unwrap();
    assert!(by_id[..] == data[..]);
}

#[tokio::test]
async fn workflow_with_unreachable_visual_service_still_succeeds() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut config = in_memory_config();
    config.visual = VisualConfig {
        endpoint: Some(format!("http://127.0.0.1:{}/render", port)),
        timeout_ms: 2_000,
    };
    let rt = start(FoundationService::new(config)).await;

    let status = run(&rt, workflow()).await;
    assert_eq!(status.state, ExecutionState::Succeeded);
    assert!(status.is_incomplete());

    assert_eq!(status.artifacts.len(), 1);
    let definition = &status.artifacts[0];
    assert_eq!(definition.kind, ArtifactKind::Structured);
    assert_eq!(definition.materialization, Materialization::Inline);

    let notes = status.non_fatal();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].step, "visual_generation");

    let resolved = rt
        .resolver()
        .resolve_in(&status, &definition.artifact_id)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&resolved.content).unwrap();
    assert_eq!(value["steps"][1]["owner"], "finance");
}

#[tokio::test]
async fn direct_retrieval_without_a_file_reference_needs_context() {
    let rt = start(FoundationService::new(in_memory_config())).await;
    let status = run(&rt, workflow()).await;
    let definition = &status.artifacts[0];
    assert!(definition.file_reference.is_none());

    let err = rt
        .resolver()
        .resolve_direct(&definition.artifact_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContextRequired);
    match err {
        Error::ContextRequired { execution_id, .. } => {
            assert_eq!(execution_id.as_deref(), Some(status.execution_id.as_str()));
        }
        other => panic!("unexpected error {}", other),
    }
}

#[tokio::test]
async fn metadata_failure_after_blob_write_fails_as_partial_commit() {
    let records = Arc::new(FaultyDocumentStore::new(Arc::new(MemoryDocumentStore::new())));
    records.faults.inject("put", "file_records/", Fault::Unknown, None);
    let foundation = FoundationService::builder(in_memory_config())
        .with_metadata_store(records.clone())
        .build();
    let rt = start(foundation).await;

    let status = run(&rt, ingest("acme", "s-1", b"never indexed")).await;
    assert_eq!(status.state, ExecutionState::Failed);
    assert!(status.artifacts.is_empty());
    let fatal = status.error.unwrap().fatal.unwrap();
    assert_eq!(fatal.kind, ErrorKind::PartialCommit);
    assert_eq!(fatal.step, "store_file");
}

#[tokio::test]
async fn memory_and_local_fs_agree() {
    let dir = tempfile::tempdir().unwrap();
    let memory = start(FoundationService::new(in_memory_config())).await;
    let local = start(FoundationService::new(local_config(dir.path()))).await;

    let mut outcomes = Vec::new();
    for rt in [&memory, &local] {
        let file = run(rt, ingest("acme", "s-1", b"same bytes")).await;
        let flow = run(rt, workflow()).await;
        let summary: Vec<(ExecutionState, Vec<(ArtifactKind, Materialization, u64)>, usize)> =
            [&file, &flow]
                .iter()
                .map(|s| {
                    (
                        s.state,
                        s.artifacts
                            .iter()
                            .map(|a| (a.kind, a.materialization, a.size_bytes))
                            .collect(),
                        s.non_fatal().len(),
                    )
                })
                .collect();
        let content = rt
            .resolver()
            .resolve_direct(&file.artifacts[0].artifact_id)
            .await
            .unwrap()
            .content;
        outcomes.push((summary, content));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}
