//! Technology-agnostic protocols.
//!
//! A protocol is the only surface orchestrators see. Abstractions implement
//! exactly one protocol each; which adapters sit underneath is decided when the
//! foundation is wired and is invisible from here.

use crate::error::Result;
use crate::types::{FileRecord, FileReference, Session};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    StateManagement,
    FileStorage,
    GraphStorage,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 3] = [
        ProtocolKind::StateManagement,
        ProtocolKind::FileStorage,
        ProtocolKind::GraphStorage,
    ];
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateManagement => write!(f, "state_management"),
            Self::FileStorage => write!(f, "file_storage"),
            Self::GraphStorage => write!(f, "graph_storage"),
        }
    }
}

// ===========================================================================
// State management
// ===========================================================================

/// Namespace for state keys. Session scopes keep tenants apart.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateScope(String);

impl StateScope {
    pub fn global(name: &str) -> Self {
        Self(format!("global.{}", name))
    }

    pub fn session(tenant_id: &str, session_id: &str) -> Self {
        Self(format!("session.{}.{}", tenant_id, session_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precondition {
    None,
    DoesNotExist,
    MatchesVersion(u64),
}

/// Acknowledgement of a committed state write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

#[async_trait::async_trait]
pub trait StateManagement: Send + Sync {
    /// Write `value` under `key`. A failed precondition is a `Conflict`.
    async fn put(
        &self,
        scope: &StateScope,
        key: &str,
        value: serde_json::Value,
        precondition: Precondition,
    ) -> Result<Receipt>;

    /// `NotFound` when the key has never been written or was deleted.
    async fn get(&self, scope: &StateScope, key: &str) -> Result<Versioned<serde_json::Value>>;

    /// Idempotent.
    async fn delete(&self, scope: &StateScope, key: &str) -> Result<()>;

    async fn keys(&self, scope: &StateScope, prefix: &str) -> Result<Vec<String>>;

    /// Register a session. Opening an existing session returns the original record.
    async fn open_session(&self, session: &Session) -> Result<Session>;

    async fn session(&self, tenant_id: &str, session_id: &str) -> Result<Session>;
}

// ===========================================================================
// File storage
// ===========================================================================

/// Outcome of a reconciliation sweep over orphaned blobs and index entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub orphans_removed: usize,
    pub markers_cleared: usize,
    pub index_entries_rebuilt: usize,
    pub failures: Vec<String>,
}

#[async_trait::async_trait]
pub trait FileStorage: Send + Sync {
    /// Blob first, then metadata. Never returns a reference for a half-written file.
    async fn store(
        &self,
        tenant_id: &str,
        session_id: &str,
        content: Bytes,
        content_type: &str,
    ) -> Result<FileReference>;

    async fn resolve(&self, reference: &FileReference) -> Result<Bytes>;

    /// Best-effort lookup without session context. `ContextRequired` unless indexed.
    async fn resolve_by_id(&self, tenant_id: &str, file_id: &str) -> Result<Bytes>;

    /// Full reference for a bare file id, through the file-id index.
    async fn locate(&self, tenant_id: &str, file_id: &str) -> Result<FileReference>;

    async fn describe(&self, reference: &FileReference) -> Result<FileRecord>;

    /// Tombstones the record and removes the blob. The reference is never reissued.
    async fn delete(&self, reference: &FileReference) -> Result<()>;

    async fn reconcile(&self) -> Result<ReconciliationReport>;
}

// ===========================================================================
// Graph storage
// ===========================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Session,
    Execution,
    Artifact,
    File,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Execution => write!(f, "execution"),
            Self::Artifact => write!(f, "artifact"),
            Self::File => write!(f, "file"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: String,
}

impl NodeRef {
    pub fn new(kind: NodeKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn execution(id: impl Into<String>) -> Self {
        Self::new(NodeKind::Execution, id)
    }

    pub fn artifact(id: impl Into<String>) -> Self {
        Self::new(NodeKind::Artifact, id)
    }

    pub fn file(reference: &FileReference) -> Self {
        Self::new(NodeKind::File, reference.to_string())
    }

    pub fn session(session: &Session) -> Self {
        Self::new(NodeKind::Session, session.key())
    }

    /// Graph-wide unique key.
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.id)
    }
}

/// Lineage relations recorded by the runtime.
pub mod relation {
    pub const PRODUCED: &str = "produced";
    pub const STORED_AS: &str = "stored_as";
    pub const RAN_IN: &str = "ran_in";
}

#[async_trait::async_trait]
pub trait GraphStorage: Send + Sync {
    /// Idempotent: linking the same pair twice records one edge.
    async fn link(&self, from: &NodeRef, relation: &str, to: &NodeRef) -> Result<()>;

    /// Targets of outgoing `relation` edges.
    async fn related(&self, node: &NodeRef, relation: &str) -> Result<Vec<NodeRef>>;

    /// Sources of incoming `relation` edges.
    async fn referrers(&self, node: &NodeRef, relation: &str) -> Result<Vec<NodeRef>>;

    /// Properties recorded for `node`. `NotFound` if it was never linked.
    async fn describe(&self, node: &NodeRef) -> Result<serde_json::Value>;
}
