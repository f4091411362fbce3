//! Reverse index `artifact_id -> {execution_id, file_reference}`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::{
    ArtifactKind, ArtifactRef, ErrorKind, ExecutionId, Precondition, Result, StateManagement,
    StateScope,
};

const ARTIFACT_INDEX: &str = "artifact_index";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactIndexEntry {
    pub execution_id: ExecutionId,
    pub tenant_id: String,
    pub kind: ArtifactKind,
    pub name: String,
    pub content_type: String,
    /// Absent for inline artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_reference: Option<String>,
}

pub struct ArtifactIndex {
    state: Arc<dyn StateManagement>,
    scope: StateScope,
    enabled: bool,
}

impl ArtifactIndex {
    pub fn new(state: Arc<dyn StateManagement>, enabled: bool) -> Self {
        Self {
            state,
            scope: StateScope::global(ARTIFACT_INDEX),
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// No-op when the index is disabled.
    pub async fn record(
        &self,
        execution_id: &ExecutionId,
        tenant_id: &str,
        artifact: &ArtifactRef,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let entry = ArtifactIndexEntry {
            execution_id: execution_id.clone(),
            tenant_id: tenant_id.to_string(),
            kind: artifact.kind,
            name: artifact.name.clone(),
            content_type: artifact.content_type.clone(),
            file_reference: artifact.file_reference.clone(),
        };
        self.state
            .put(
                &self.scope,
                &artifact.artifact_id,
                serde_json::to_value(&entry)?,
                Precondition::None,
            )
            .await?;
        Ok(())
    }

    /// `Ok(None)` when the index is disabled or has no entry.
    pub async fn lookup(&self, artifact_id: &str) -> Result<Option<ArtifactIndexEntry>> {
        if !self.enabled {
            return Ok(None);
        }
        match self.state.get(&self.scope, artifact_id).await {
            Ok(doc) => Ok(Some(serde_json::from_value(doc.value)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
