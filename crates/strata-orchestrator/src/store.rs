//! Durable execution records, written whole with compare-and-swap.

use std::sync::Arc;
use strata_core::{
    Error, ErrorKind, ExecutionId, ExecutionStatus, Precondition, Result, RetryPolicy,
    StateManagement, StateScope,
};
use strata_foundation::Retrier;
use tracing::debug;

const EXECUTIONS: &str = "executions";

pub struct ExecutionStore {
    state: Arc<dyn StateManagement>,
    scope: StateScope,
    retrier: Retrier,
}

impl ExecutionStore {
    pub fn new(state: Arc<dyn StateManagement>, policy: RetryPolicy) -> Self {
        Self {
            state,
            scope: StateScope::global(EXECUTIONS),
            retrier: Retrier::new("execution_store", policy),
        }
    }

    /// Persist a new record. Fails with `Conflict` if the id is taken.
    pub async fn create(&self, status: &ExecutionStatus) -> Result<ExecutionStatus> {
        let receipt = self
            .state
            .put(
                &self.scope,
                status.execution_id.as_str(),
                serde_json::to_value(status)?,
                Precondition::DoesNotExist,
            )
            .await?;
        let mut created = status.clone();
        created.version = receipt.version;
        Ok(created)
    }

    pub async fn get(&self, id: &ExecutionId) -> Result<ExecutionStatus> {
        let doc = self.state.get(&self.scope, id.as_str()).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(format!("execution {}", id)),
            _ => e,
        })?;
        let mut status: ExecutionStatus = serde_json::from_value(doc.value)
            .map_err(|e| Error::Corrupt(format!("execution {}: {}", id, e)))?;
        status.version = doc.version;
        Ok(status)
    }

    /// Read, apply `mutate`, write back at the version read. A lost race
    /// re-reads and re-applies. Errors from `mutate` are returned unchanged.
    pub async fn update<F>(&self, id: &ExecutionId, mutate: F) -> Result<ExecutionStatus>
    where
        F: Fn(&mut ExecutionStatus) -> Result<()> + Send + Sync,
    {
        self.retrier
            .run_with("update", |e| e.kind() == ErrorKind::Conflict, || {
                self.update_once(id, &mutate)
            })
            .await?
    }

    /// Outer error: the write (retried on `Conflict`). Inner error: the mutation.
    async fn update_once<F>(&self, id: &ExecutionId, mutate: &F) -> Result<Result<ExecutionStatus>>
    where
        F: Fn(&mut ExecutionStatus) -> Result<()> + Send + Sync,
    {
        let mut status = self.get(id).await?;
        if let Err(e) = mutate(&mut status) {
            return Ok(Err(e));
        }
        let receipt = self
            .state
            .put(
                &self.scope,
                id.as_str(),
                serde_json::to_value(&status)?,
                Precondition::MatchesVersion(status.version),
            )
            .await?;
        debug!("execution {} now {} (v{})", id, status.state, receipt.version);
        status.version = receipt.version;
        Ok(Ok(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{ExecutionState, Intent, StepFailure};
    use strata_foundation::{in_memory_config, FoundationService};

    async fn store() -> ExecutionStore {
        let foundation = FoundationService::new(in_memory_config());
        foundation.initialize().await.unwrap();
        ExecutionStore::new(foundation.state().unwrap(), RetryPolicy::default())
    }

    fn pending() -> ExecutionStatus {
        let intent = Intent::new("ingest_file", "acme", "s-1", serde_json::json!({}));
        ExecutionStatus::pending(ExecutionId::generate(), &intent)
    }

    #[tokio::test]
    async fn create_get_update() {
        let store = store().await;
        let status = store.create(&pending()).await.unwrap();
        assert!(store.create(&status).await.is_err());

        let running = store
            .update(&status.execution_id, |s| s.transition(ExecutionState::Running))
            .await
            .unwrap();
        assert!(running.version > status.version);

        let back = store.get(&status.execution_id).await.unwrap();
        assert_eq!(back.state, ExecutionState::Running);
        assert_eq!(back.version, running.version);
    }

    #[tokio::test]
    async fn illegal_transition_is_reported() {
        let store = store().await;
        let status = store.create(&pending()).await.unwrap();
        let err = store
            .update(&status.execution_id, |s| s.transition(ExecutionState::Succeeded))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn concurrent_updates_all_land() {
        let store = Arc::new(store().await);
        let status = store.create(&pending()).await.unwrap();
        let id = status.execution_id.clone();
        store
            .update(&id, |s| s.transition(ExecutionState::Running))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(&id, move |s| {
                        s.push_non_fatal(StepFailure::new(
                            format!("step-{}", i),
                            ErrorKind::Unavailable,
                            "down",
                        ))
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get(&id).await.unwrap().non_fatal().len(), 8);
    }

    #[tokio::test]
    async fn missing_execution_is_not_found() {
        let err = store().await.get(&ExecutionId::new("exec-nope")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
