//! Artifact retrieval.
//!
//! Two paths: with the owning execution in hand (always works for a
//! succeeded execution) and by artifact id alone (needs the reverse index
//! and a stored file behind the artifact).

use crate::index::ArtifactIndex;
use crate::store::ExecutionStore;
use bytes::Bytes;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use strata_core::{
    relation, ArtifactKind, ArtifactRef, Error, ExecutionId, ExecutionStatus, FileReference,
    FileStorage, GraphStorage, NodeKind, NodeRef, Result,
};
use tracing::debug;

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedArtifact {
    pub artifact_id: String,
    pub name: String,
    pub kind: ArtifactKind,
    pub content_type: String,
    #[serde(skip)]
    pub content: Bytes,
}

pub struct ArtifactResolver {
    files: Arc<dyn FileStorage>,
    graph: Arc<dyn GraphStorage>,
    index: Arc<ArtifactIndex>,
    store: Arc<ExecutionStore>,
}

impl ArtifactResolver {
    pub fn new(
        files: Arc<dyn FileStorage>,
        graph: Arc<dyn GraphStorage>,
        index: Arc<ArtifactIndex>,
        store: Arc<ExecutionStore>,
    ) -> Self {
        Self {
            files,
            graph,
            index,
            store,
        }
    }

    /// Full-context path over a status the caller already holds.
    pub async fn resolve_in(
        &self,
        status: &ExecutionStatus,
        artifact_id: &str,
    ) -> Result<ResolvedArtifact> {
        let artifact = status.artifact(artifact_id).ok_or_else(|| {
            Error::NotFound(format!(
                "artifact {} in execution {}",
                artifact_id, status.execution_id
            ))
        })?;
        let content = self.content_of(artifact).await?;
        Ok(resolved(artifact, content))
    }

    pub async fn resolve_in_execution(
        &self,
        execution_id: &ExecutionId,
        artifact_id: &str,
    ) -> Result<ResolvedArtifact> {
        let status = self.store.get(execution_id).await?;
        self.resolve_in(&status, artifact_id).await
    }

    /// Direct path: artifact id only.
    ///
    /// `ContextRequired` when the reverse index has no entry or the artifact
    /// was embedded inline. The error carries the owning execution when the
    /// index or the lineage graph knows it. Index failures surface as they are.
    pub async fn resolve_direct(&self, artifact_id: &str) -> Result<ResolvedArtifact> {
        let Some(entry) = self.index.lookup(artifact_id).await? else {
            let hint = self.owner_hint(artifact_id).await;
            if !self.index.enabled() || hint.is_some() {
                return Err(Error::context_required(
                    format!("artifact {}", artifact_id),
                    hint,
                ));
            }
            return Err(Error::NotFound(format!("artifact {}", artifact_id)));
        };

        let Some(file_reference) = entry.file_reference.as_deref() else {
            debug!("Artifact {} is inline; direct retrieval needs its execution", artifact_id);
            return Err(Error::context_required(
                format!("artifact {}", artifact_id),
                Some(entry.execution_id.to_string()),
            ));
        };

        let reference = FileReference::from_str(file_reference)?;
        let content = self.files.resolve(&reference).await?;
        Ok(ResolvedArtifact {
            artifact_id: artifact_id.to_string(),
            name: entry.name,
            kind: entry.kind,
            content_type: entry.content_type,
            content,
        })
    }

    async fn content_of(&self, artifact: &ArtifactRef) -> Result<Bytes> {
        if let Some(reference) = artifact.parsed_reference() {
            return self.files.resolve(&reference?).await;
        }
        match &artifact.inline_payload {
            Some(payload) => Ok(Bytes::from(payload.to_bytes()?)),
            None => Err(Error::Corrupt(format!(
                "artifact {} has neither a file reference nor an inline payload",
                artifact.artifact_id
            ))),
        }
    }

    /// Execution that produced the artifact, per lineage. Best effort.
    async fn owner_hint(&self, artifact_id: &str) -> Option<String> {
        match self
            .graph
            .referrers(&NodeRef::artifact(artifact_id), relation::PRODUCED)
            .await
        {
            Ok(nodes) => nodes
                .into_iter()
                .find(|n| n.kind == NodeKind::Execution)
                .map(|n| n.id),
            Err(e) => {
                debug!("No lineage hint for {}: {}", artifact_id, e);
                None
            }
        }
    }
}

fn resolved(artifact: &ArtifactRef, content: Bytes) -> ResolvedArtifact {
    ResolvedArtifact {
        artifact_id: artifact.artifact_id.clone(),
        name: artifact.name.clone(),
        kind: artifact.kind,
        content_type: artifact.content_type.clone(),
        content,
    }
}
