//! Core types for Strata: intents, executions, artifacts and file addressing

use crate::error::{Error, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Tenant, session and file ids are embedded in `file:` references and in
/// adapter keys, so they must be non-empty, free of separators and never a
/// relative path component.
pub fn validate_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", field)));
    }
    if value == "." || value == ".." {
        return Err(Error::InvalidInput(format!(
            "{} '{}' is a reserved path component",
            field, value
        )));
    }
    if value.contains(':') || value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput(format!(
            "{} '{}' contains a reserved character",
            field, value
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sessions and intents
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub tenant_id: String,
    pub session_id: String,
    pub opened_at: DateTime<Utc>,
}

impl Session {
    pub fn new(tenant_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            opened_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.tenant_id, self.session_id)
    }
}

/// A named unit of work submitted within a tenant/session scope. Never mutated after submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub tenant_id: String,
    pub session_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

impl Intent {
    pub fn new(
        name: impl Into<String>,
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            payload,
            submitted_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("intent name must not be empty".into()));
        }
        validate_segment("tenant_id", &self.tenant_id)?;
        validate_segment("session_id", &self.session_id)?;
        Ok(())
    }

    pub fn session(&self) -> Session {
        Session::new(&self.tenant_id, &self.session_id)
    }
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn generate() -> Self {
        Self(format!("exec-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ExecutionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// `pending -> failed` covers cancellation before the orchestrator starts.
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One failed step, fatal or not.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepFailure {
    pub step: String,
    pub kind: crate::ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, kind: crate::ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn from_error(step: impl Into<String>, err: &Error) -> Self {
        Self::new(step, err.kind(), err.to_string())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    /// The failure that moved the execution to `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<StepFailure>,
    /// Optional steps that failed without failing the execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_fatal: Vec<StepFailure>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: ExecutionId,
    pub intent_name: String,
    pub tenant_id: String,
    pub session_id: String,
    pub state: ExecutionState,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Store version this record was read at. Not persisted in the document body.
    #[serde(skip)]
    pub version: u64,
}

impl ExecutionStatus {
    pub fn pending(execution_id: ExecutionId, intent: &Intent) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            intent_name: intent.name.clone(),
            tenant_id: intent.tenant_id.clone(),
            session_id: intent.session_id.clone(),
            state: ExecutionState::Pending,
            artifacts: Vec::new(),
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            version: 0,
        }
    }

    pub fn transition(&mut self, next: ExecutionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::invalid_transition(self.state, next));
        }
        let now = Utc::now();
        match next {
            ExecutionState::Running => self.started_at = Some(now),
            ExecutionState::Succeeded | ExecutionState::Failed => self.finished_at = Some(now),
            ExecutionState::Pending => {}
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn push_artifact(&mut self, artifact: ArtifactRef) -> Result<()> {
        if self.state != ExecutionState::Running {
            return Err(Error::invalid_transition(
                self.state,
                "artifact append (requires running)",
            ));
        }
        if self.artifact(&artifact.artifact_id).is_some() {
            return Err(Error::Conflict(format!(
                "artifact {} already recorded",
                artifact.artifact_id
            )));
        }
        self.artifacts.push(artifact);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn push_non_fatal(&mut self, failure: StepFailure) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::invalid_transition(self.state, "note (terminal)"));
        }
        self.error.get_or_insert_with(ErrorRecord::default).non_fatal.push(failure);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, failure: StepFailure) -> Result<()> {
        self.transition(ExecutionState::Failed)?;
        self.error.get_or_insert_with(ErrorRecord::default).fatal = Some(failure);
        Ok(())
    }

    pub fn artifact(&self, artifact_id: &str) -> Option<&ArtifactRef> {
        self.artifacts.iter().find(|a| a.artifact_id == artifact_id)
    }

    pub fn non_fatal(&self) -> &[StepFailure] {
        self.error.as_ref().map(|e| e.non_fatal.as_slice()).unwrap_or(&[])
    }

    /// Succeeded, yet at least one optional step was skipped.
    pub fn is_incomplete(&self) -> bool {
        self.state == ExecutionState::Succeeded && !self.non_fatal().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,
    Structured,
    Visual,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Structured => write!(f, "structured"),
            Self::Visual => write!(f, "visual"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialization {
    Inline,
    Reference,
}

/// Artifact content embedded directly in the execution record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "snake_case")]
pub enum InlinePayload {
    Json(serde_json::Value),
    Base64(String),
}

impl InlinePayload {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::Base64(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Json(v) => Ok(serde_json::to_vec(v)?),
            Self::Base64(s) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| Error::Corrupt(format!("inline payload is not valid base64: {}", e))),
        }
    }
}

/// Self-describing pointer to, or embedding of, one unit of execution output.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRef {
    pub artifact_id: String,
    pub kind: ArtifactKind,
    pub name: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_payload: Option<InlinePayload>,
    pub materialization: Materialization,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRef {
    pub fn generate_id() -> String {
        format!("art-{}", uuid::Uuid::new_v4().simple())
    }

    /// Parsed reference, for `reference`-materialized artifacts.
    pub fn parsed_reference(&self) -> Option<Result<FileReference>> {
        self.file_reference.as_deref().map(FileReference::from_str)
    }
}

/// Per-kind decision of whether content is embedded or stored by reference.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MaterializationPolicy {
    /// Content larger than this many bytes is always stored by reference.
    pub size_threshold: u64,
    pub kind_defaults: HashMap<ArtifactKind, Materialization>,
}

impl Default for MaterializationPolicy {
    fn default() -> Self {
        let mut kind_defaults = HashMap::new();
        kind_defaults.insert(ArtifactKind::File, Materialization::Reference);
        kind_defaults.insert(ArtifactKind::Structured, Materialization::Inline);
        kind_defaults.insert(ArtifactKind::Visual, Materialization::Reference);
        Self {
            size_threshold: 256 * 1024,
            kind_defaults,
        }
    }
}

impl MaterializationPolicy {
    pub fn decide(&self, kind: ArtifactKind, size_bytes: u64) -> Materialization {
        if size_bytes > self.size_threshold {
            return Materialization::Reference;
        }
        self.kind_defaults
            .get(&kind)
            .copied()
            .unwrap_or(Materialization::Reference)
    }
}

// ---------------------------------------------------------------------------
// File addressing
// ---------------------------------------------------------------------------

/// Stable composite address `file:{tenant_id}:{session_id}:{file_id}`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileReference {
    tenant_id: String,
    session_id: String,
    file_id: String,
}

impl FileReference {
    pub const SCHEME: &'static str = "file";

    pub fn new(
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
        file_id: impl Into<String>,
    ) -> Result<Self> {
        let r = Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            file_id: file_id.into(),
        };
        validate_segment("tenant_id", &r.tenant_id)?;
        validate_segment("session_id", &r.session_id)?;
        validate_segment("file_id", &r.file_id)?;
        Ok(r)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }
}

impl std::fmt::Display for FileReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            Self::SCHEME,
            self.tenant_id,
            self.session_id,
            self.file_id
        )
    }
}

impl FromStr for FileReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [scheme, tenant, session, file] if *scheme == Self::SCHEME => {
                Self::new(*tenant, *session, *file)
            }
            _ => Err(Error::InvalidInput(format!(
                "'{}' is not a file reference (expected file:{{tenant}}:{{session}}:{{file_id}})",
                s
            ))),
        }
    }
}

impl TryFrom<String> for FileReference {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FileReference> for String {
    fn from(r: FileReference) -> Self {
        r.to_string()
    }
}

/// Metadata-store half of a stored file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub file_reference: FileReference,
    pub blob_key: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the blob content.
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
