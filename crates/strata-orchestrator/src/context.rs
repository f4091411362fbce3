//! Execution context handed to orchestrators.
//!
//! Everything an orchestrator may touch goes through here: protocol handles,
//! artifact emission and the bookkeeping for required and optional steps.

use crate::index::ArtifactIndex;
use crate::store::ExecutionStore;
use bytes::Bytes;
use chrono::Utc;
use std::future::Future;
use std::sync::{Arc, Mutex};
use strata_core::{
    relation, ArtifactKind, ArtifactRef, Error, ExecutionId, FileReference, FileStorage,
    GraphStorage, InlinePayload, Intent, Materialization, MaterializationPolicy, NodeRef, Result,
    StepFailure,
};
use tracing::{debug, warn};

/// Content of an artifact about to be emitted.
#[derive(Clone, Debug)]
pub enum ArtifactContent {
    Json(serde_json::Value),
    Bytes(Bytes),
}

impl ArtifactContent {
    fn size(&self) -> Result<u64> {
        Ok(match self {
            Self::Json(v) => serde_json::to_vec(v)?.len() as u64,
            Self::Bytes(b) => b.len() as u64,
        })
    }

    fn into_bytes(self) -> Result<Bytes> {
        Ok(match self {
            Self::Json(v) => Bytes::from(serde_json::to_vec(&v)?),
            Self::Bytes(b) => b,
        })
    }

    fn into_inline(self) -> InlinePayload {
        match self {
            Self::Json(v) => InlinePayload::Json(v),
            Self::Bytes(b) => InlinePayload::from_bytes(&b),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ArtifactDraft {
    pub kind: ArtifactKind,
    pub name: String,
    pub content_type: String,
    pub content: ArtifactContent,
}

impl ArtifactDraft {
    pub fn file(name: impl Into<String>, content_type: impl Into<String>, content: Bytes) -> Self {
        Self {
            kind: ArtifactKind::File,
            name: name.into(),
            content_type: content_type.into(),
            content: ArtifactContent::Bytes(content),
        }
    }

    pub fn structured(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            kind: ArtifactKind::Structured,
            name: name.into(),
            content_type: "application/json".into(),
            content: ArtifactContent::Json(value),
        }
    }

    pub fn visual(name: impl Into<String>, content_type: impl Into<String>, content: Bytes) -> Self {
        Self {
            kind: ArtifactKind::Visual,
            name: name.into(),
            content_type: content_type.into(),
            content: ArtifactContent::Bytes(content),
        }
    }
}

pub struct ExecutionContext {
    execution_id: ExecutionId,
    intent: Intent,
    files: Arc<dyn FileStorage>,
    graph: Arc<dyn GraphStorage>,
    store: Arc<ExecutionStore>,
    index: Arc<ArtifactIndex>,
    policy: MaterializationPolicy,
    failed_step: Mutex<Option<String>>,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        execution_id: ExecutionId,
        intent: Intent,
        files: Arc<dyn FileStorage>,
        graph: Arc<dyn GraphStorage>,
        store: Arc<ExecutionStore>,
        index: Arc<ArtifactIndex>,
        policy: MaterializationPolicy,
    ) -> Self {
        Self {
            execution_id,
            intent,
            files,
            graph,
            store,
            index,
            policy,
            failed_step: Mutex::new(None),
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn files(&self) -> &Arc<dyn FileStorage> {
        &self.files
    }

    pub fn graph(&self) -> &Arc<dyn GraphStorage> {
        &self.graph
    }

    /// Run a step whose failure fails the execution. The step name is kept
    /// for the fatal error record.
    pub async fn required<T, Fut>(&self, step: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let out = fut.await;
        if out.is_err() {
            *self.failed_step.lock().unwrap_or_else(|p| p.into_inner()) = Some(step.to_string());
        }
        out
    }

    /// Run a step whose failure is only noted. `Ok(None)` means it failed and
    /// the note was recorded.
    pub async fn optional<T, Fut>(&self, step: &str, fut: Fut) -> Result<Option<T>>
    where
        Fut: Future<Output = Result<T>>,
    {
        match fut.await {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.note(step, &e).await?;
                Ok(None)
            }
        }
    }

    /// Record a non-fatal failure on the execution.
    pub async fn note(&self, step: &str, err: &Error) -> Result<()> {
        warn!("Execution {} step {} skipped: {}", self.execution_id, step, err);
        let failure = StepFailure::from_error(step, err);
        self.store
            .update(&self.execution_id, |s| s.push_non_fatal(failure.clone()))
            .await?;
        Ok(())
    }

    pub(crate) fn failed_step(&self) -> Option<String> {
        self.failed_step.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Drop a stored file no execution record points at. Best effort.
    async fn discard(&self, reference: &FileReference) {
        match self.files.delete(reference).await {
            Ok(()) => debug!("Discarded unreferenced file {}", reference),
            Err(e) => warn!(
                "Execution {} left unreferenced file {}: {}",
                self.execution_id, reference, e
            ),
        }
    }

    /// Materialize, append to the execution, index and link lineage.
    ///
    /// Index and lineage writes are best effort and become non-fatal notes.
    pub async fn emit_artifact(&self, draft: ArtifactDraft) -> Result<ArtifactRef> {
        let size_bytes = draft.content.size()?;
        let materialization = self.policy.decide(draft.kind, size_bytes);

        let (file_reference, inline_payload) = match materialization {
            Materialization::Reference => {
                let reference = self
                    .files
                    .store(
                        &self.intent.tenant_id,
                        &self.intent.session_id,
                        draft.content.into_bytes()?,
                        &draft.content_type,
                    )
                    .await?;
                (Some(reference), None)
            }
            Materialization::Inline => (None, Some(draft.content.into_inline())),
        };

        let artifact = ArtifactRef {
            artifact_id: ArtifactRef::generate_id(),
            kind: draft.kind,
            name: draft.name,
            content_type: draft.content_type,
            size_bytes,
            file_reference: file_reference.as_ref().map(|r| r.to_string()),
            inline_payload,
            materialization,
            created_at: Utc::now(),
        };

        if let Err(e) = self
            .store
            .update(&self.execution_id, |s| s.push_artifact(artifact.clone()))
            .await
        {
            if let Some(reference) = &file_reference {
                self.discard(reference).await;
            }
            return Err(e);
        }
        debug!(
            "Execution {} emitted {} artifact {} ({:?}, {} bytes)",
            self.execution_id, artifact.kind, artifact.artifact_id, materialization, size_bytes
        );

        if let Err(e) = self
            .index
            .record(&self.execution_id, &self.intent.tenant_id, &artifact)
            .await
        {
            self.note("artifact_index", &e).await?;
        }

        let exec_node = NodeRef::execution(self.execution_id.as_str());
        let art_node = NodeRef::artifact(&artifact.artifact_id);
        let mut lineage = self.graph.link(&exec_node, relation::PRODUCED, &art_node).await;
        if let (true, Some(reference)) = (lineage.is_ok(), &file_reference) {
            lineage = self
                .graph
                .link(&art_node, relation::STORED_AS, &NodeRef::file(reference))
                .await;
        }
        if let Err(e) = lineage {
            self.note("lineage", &e).await?;
        }

        Ok(artifact)
    }
}
