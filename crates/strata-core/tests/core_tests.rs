//! Tests for strata-core: file references, execution state machine, artifacts, config, errors

use strata_core::*;

// ===========================================================================
// FileReference
// ===========================================================================

#[test]
fn file_reference_display_format() {
    let r = FileReference::new("acme", "s-1", "f123").unwrap();
    assert_eq!(r.to_string(), "file:acme:s-1:f123");
}

#[test]
fn file_reference_parse() {
    let r: FileReference = "file:acme:s-1:f123".parse().unwrap();
    assert_eq!(r.tenant_id(), "acme");
    assert_eq!(r.session_id(), "s-1");
    assert_eq!(r.file_id(), "f123");
}

#[test]
fn file_reference_rejects_wrong_shape() {
    assert!("file:acme:f123".parse::<FileReference>().is_err());
    assert!("blob:acme:s-1:f123".parse::<FileReference>().is_err());
    assert!("file:acme:s-1:f1:extra".parse::<FileReference>().is_err());
    assert!("file::s-1:f1".parse::<FileReference>().is_err());
}

#[test]
fn file_reference_rejects_separator_in_segment() {
    let err = FileReference::new("ac:me", "s", "f").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn file_reference_serializes_as_string() {
    let r = FileReference::new("acme", "s-1", "f123").unwrap();
    let json = serde_json::to_string(&r).unwrap();
    assert_eq!(json, r#""file:acme:s-1:f123""#);
    let back: FileReference = serde_json::from_str(&json).unwrap();
    assert_eq!(back, r);
}

#[test]
fn file_reference_deserialize_rejects_garbage() {
    assert!(serde_json::from_str::<FileReference>(r#""not-a-ref""#).is_err());
}

// ===========================================================================
// Intent
// ===========================================================================

#[test]
fn intent_validate() {
    let ok = Intent::new("ingest_file", "acme", "s-1", serde_json::json!({}));
    assert!(ok.validate().is_ok());

    let no_name = Intent::new("  ", "acme", "s-1", serde_json::Value::Null);
    assert_eq!(no_name.validate().unwrap_err().kind(), ErrorKind::InvalidInput);

    let bad_session = Intent::new("x", "acme", "a:b", serde_json::Value::Null);
    assert_eq!(bad_session.validate().unwrap_err().kind(), ErrorKind::InvalidInput);

    for dots in [".", ".."] {
        let intent = Intent::new("x", dots, "s-1", serde_json::Value::Null);
        assert_eq!(intent.validate().unwrap_err().kind(), ErrorKind::InvalidInput);
        assert!(format!("file:acme:s-1:{}", dots).parse::<FileReference>().is_err());
    }
    assert!(Intent::new("x", "a..b", ".s", serde_json::Value::Null).validate().is_ok());
}

#[test]
fn intent_deserializes_without_timestamp() {
    let json = r#"{"name":"create_workflow","tenant_id":"t","session_id":"s","payload":{"title":"x"}}"#;
    let intent: Intent = serde_json::from_str(json).unwrap();
    assert_eq!(intent.name, "create_workflow");
    assert_eq!(intent.payload["title"], "x");
}

// ===========================================================================
// ExecutionState / ExecutionStatus
// ===========================================================================

#[test]
fn execution_state_transitions() {
    use ExecutionState::*;
    assert!(Pending.can_transition_to(Running));
    assert!(Pending.can_transition_to(Failed));
    assert!(Running.can_transition_to(Succeeded));
    assert!(Running.can_transition_to(Failed));

    assert!(!Pending.can_transition_to(Succeeded));
    assert!(!Running.can_transition_to(Pending));
    assert!(!Succeeded.can_transition_to(Failed));
    assert!(!Failed.can_transition_to(Running));
    assert!(Succeeded.is_terminal());
    assert!(Failed.is_terminal());
    assert!(!Running.is_terminal());
}

fn sample_status() -> ExecutionStatus {
    let intent = Intent::new("ingest_file", "acme", "s-1", serde_json::Value::Null);
    ExecutionStatus::pending(ExecutionId::new("exec-1"), &intent)
}

fn sample_artifact(id: &str) -> ArtifactRef {
    ArtifactRef {
        artifact_id: id.into(),
        kind: ArtifactKind::Structured,
        name: "result".into(),
        content_type: "application/json".into(),
        size_bytes: 2,
        file_reference: None,
        inline_payload: Some(InlinePayload::Json(serde_json::json!({}))),
        materialization: Materialization::Inline,
        created_at: chrono::Utc::now(),
    }
}

#[test]
fn execution_status_lifecycle_timestamps() {
    let mut status = sample_status();
    assert_eq!(status.state, ExecutionState::Pending);
    assert!(status.started_at.is_none());

    status.transition(ExecutionState::Running).unwrap();
    assert!(status.started_at.is_some());
    assert!(status.finished_at.is_none());

    status.transition(ExecutionState::Succeeded).unwrap();
    assert!(status.finished_at.is_some());

    let err = status.transition(ExecutionState::Failed).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
}

#[test]
fn artifacts_only_append_while_running() {
    let mut status = sample_status();
    let err = status.push_artifact(sample_artifact("a1")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    status.transition(ExecutionState::Running).unwrap();
    status.push_artifact(sample_artifact("a1")).unwrap();
    status.push_artifact(sample_artifact("a2")).unwrap();
    assert_eq!(status.artifacts.len(), 2);
    assert_eq!(status.artifacts[0].artifact_id, "a1");

    let dup = status.push_artifact(sample_artifact("a1")).unwrap_err();
    assert_eq!(dup.kind(), ErrorKind::Conflict);
}

#[test]
fn non_fatal_notes_mark_incomplete_success() {
    let mut status = sample_status();
    status.transition(ExecutionState::Running).unwrap();
    status
        .push_non_fatal(StepFailure::new("visual_generation", ErrorKind::Unavailable, "down"))
        .unwrap();
    status.transition(ExecutionState::Succeeded).unwrap();
    assert!(status.is_incomplete());
    assert_eq!(status.non_fatal()[0].step, "visual_generation");
    assert!(status.error.as_ref().unwrap().fatal.is_none());
}

#[test]
fn fail_records_fatal_step() {
    let mut status = sample_status();
    status.transition(ExecutionState::Running).unwrap();
    status
        .fail(StepFailure::new("store", ErrorKind::PartialCommit, "metadata down"))
        .unwrap();
    assert_eq!(status.state, ExecutionState::Failed);
    let fatal = status.error.as_ref().unwrap().fatal.as_ref().unwrap();
    assert_eq!(fatal.kind, ErrorKind::PartialCommit);
}

#[test]
fn execution_status_serde_skips_version() {
    let mut status = sample_status();
    status.version = 7;
    let json = serde_json::to_value(&status).unwrap();
    assert!(json.get("version").is_none());
    assert_eq!(json["state"], "pending");
    assert!(json.get("error").is_none());
    let back: ExecutionStatus = serde_json::from_value(json).unwrap();
    assert_eq!(back.version, 0);
    assert_eq!(back.execution_id.as_str(), "exec-1");
}

// ===========================================================================
// Artifacts and materialization
// ===========================================================================

#[test]
fn inline_payload_bytes() {
    let p = InlinePayload::from_bytes(b"\x00\x01binary");
    assert_eq!(p.to_bytes().unwrap(), b"\x00\x01binary");

    let j = InlinePayload::Json(serde_json::json!({"a": 1}));
    assert_eq!(j.to_bytes().unwrap(), br#"{"a":1}"#);

    let bad = InlinePayload::Base64("***".into());
    assert_eq!(bad.to_bytes().unwrap_err().kind(), ErrorKind::Corrupt);
}

#[test]
fn inline_payload_tagged_encoding() {
    let json = serde_json::to_value(InlinePayload::Json(serde_json::json!([1]))).unwrap();
    assert_eq!(json["encoding"], "json");
    assert_eq!(json["data"], serde_json::json!([1]));
}

#[test]
fn materialization_policy_defaults() {
    let policy = MaterializationPolicy::default();
    assert_eq!(policy.decide(ArtifactKind::File, 10), Materialization::Reference);
    assert_eq!(policy.decide(ArtifactKind::Structured, 10), Materialization::Inline);
    assert_eq!(policy.decide(ArtifactKind::Visual, 10), Materialization::Reference);
}

#[test]
fn materialization_policy_threshold_forces_reference() {
    let policy = MaterializationPolicy::default();
    let big = policy.size_threshold + 1;
    assert_eq!(policy.decide(ArtifactKind::Structured, big), Materialization::Reference);
    assert_eq!(
        policy.decide(ArtifactKind::Structured, policy.size_threshold),
        Materialization::Inline
    );
}

#[test]
fn artifact_ref_parsed_reference() {
    let mut a = sample_artifact("a1");
    assert!(a.parsed_reference().is_none());
    a.file_reference = Some("file:t:s:f".into());
    let parsed = a.parsed_reference().unwrap().unwrap();
    assert_eq!(parsed.file_id(), "f");
}

// ===========================================================================
// Errors
// ===========================================================================

#[test]
fn error_kinds_and_retryability() {
    assert!(Error::unavailable("object_store", "down").is_retryable());
    assert!(Error::Conflict("v2".into()).is_retryable());
    assert!(!Error::NotFound("x".into()).is_retryable());
    assert!(!Error::context_required("art-1", None).is_retryable());
    let pc = Error::partial_commit("f1", "metadata down", Compensation::RolledBack);
    assert_eq!(pc.kind(), ErrorKind::PartialCommit);
    assert!(!pc.is_retryable());
    assert!(pc.to_string().contains("rolled back"));
}

#[test]
fn error_kind_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&ErrorKind::ContextRequired).unwrap(),
        r#""context_required""#
    );
    assert_eq!(ErrorKind::PartialCommit.as_str(), "partial_commit");
}

// ===========================================================================
// Protocol helpers
// ===========================================================================

#[test]
fn state_scopes_are_disjoint() {
    assert_ne!(StateScope::global("executions"), StateScope::session("executions", "x"));
    assert_eq!(StateScope::session("t", "s").as_str(), "session.t.s");
}

#[test]
fn node_ref_keys() {
    let r = FileReference::new("t", "s", "f").unwrap();
    assert_eq!(NodeRef::file(&r).key(), "file/file:t:s:f");
    assert_eq!(NodeRef::execution("exec-1").key(), "execution/exec-1");
}

// ===========================================================================
// Config
// ===========================================================================

#[test]
fn retry_policy_backoff_is_capped() {
    let p = RetryPolicy {
        max_attempts: 10,
        backoff_base_ms: 100,
        backoff_cap_ms: 500,
        timeout_ms: 0,
    };
    assert_eq!(p.backoff_for(1).as_millis(), 100);
    assert_eq!(p.backoff_for(2).as_millis(), 200);
    assert_eq!(p.backoff_for(3).as_millis(), 400);
    assert_eq!(p.backoff_for(4).as_millis(), 500);
    assert_eq!(p.backoff_for(40).as_millis(), 500);
    assert!(p.timeout().is_none());
}

#[test]
fn config_defaults() {
    let config = StrataConfig::default();
    assert_eq!(config.gateway.port, 18800);
    assert_eq!(config.gateway.bind, BindMode::Loopback);
    assert_eq!(config.gateway.auth.mode, AuthMode::None);
    assert_eq!(config.retry.file_storage.max_attempts, 3);
    assert!(config.indexes.file_id);
    assert!(config.indexes.artifact);
    assert!(config.visual.endpoint.is_none());
    assert_eq!(config.foundation.object_store, AdapterBackend::local_fs());
}

#[test]
fn config_partial_toml_keeps_defaults() {
    let toml_src = r#"
        [gateway]
        port = 9000

        [foundation.object_store]
        backend = "memory"

        [retry.file_storage]
        max_attempts = 5

        [indexes]
        artifact = false
    "#;
    let config: StrataConfig = toml::from_str(toml_src).unwrap();
    assert_eq!(config.gateway.port, 9000);
    assert_eq!(config.foundation.object_store, AdapterBackend::Memory);
    assert_eq!(config.foundation.metadata_store, AdapterBackend::local_fs());
    assert_eq!(config.retry.file_storage.max_attempts, 5);
    assert_eq!(config.retry.file_storage.backoff_base_ms, 50);
    assert!(!config.indexes.artifact);
    assert!(config.indexes.file_id);
}

#[test]
fn config_local_fs_root_is_honored() {
    let toml_src = r#"
        [foundation]
        data_dir = "/var/strata"
        object_store = { backend = "local_fs", root = "/srv/blobs" }
        metadata_store = { backend = "local_fs" }
    "#;
    let config: StrataConfig = toml::from_str(toml_src).unwrap();
    let foundation = &config.foundation;
    assert_eq!(foundation.object_store, AdapterBackend::local_fs_at("/srv/blobs"));
    assert_eq!(
        foundation.root_for(&foundation.object_store, "objects"),
        Some(std::path::PathBuf::from("/srv/blobs"))
    );
    assert_eq!(
        foundation.root_for(&foundation.metadata_store, "metadata"),
        Some(std::path::PathBuf::from("/var/strata").join("metadata"))
    );

    let rendered = config.to_toml();
    let reparsed: StrataConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(reparsed.foundation.object_store, foundation.object_store);
    assert_eq!(reparsed.foundation.metadata_store, AdapterBackend::local_fs());
}

#[test]
fn config_load_missing_file_uses_defaults() {
    let config = StrataConfig::load(std::path::Path::new("/nonexistent/strata.toml"));
    assert_eq!(config.gateway.port, 18800);
}

#[test]
fn config_try_load_rejects_unparseable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.toml");
    std::fs::write(&path, "[foundation]\nobject_store = { backend = \"s3\" }\n").unwrap();

    let err = StrataConfig::try_load(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(StrataConfig::load(&path).gateway.port, 18800);

    let missing = StrataConfig::try_load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(missing.foundation.object_store, AdapterBackend::local_fs());
}

#[test]
fn foundation_root_for_slots() {
    let config = FoundationConfig::default();
    assert_eq!(
        config.root_for(&AdapterBackend::local_fs(), "objects").unwrap(),
        std::path::PathBuf::from("strata-data").join("objects")
    );
    assert!(config.root_for(&AdapterBackend::Memory, "objects").is_none());
}
