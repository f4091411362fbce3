//! State management over a document store adapter.

use crate::retry::{normalize, unavailable_only, Retrier};
use futures::TryFutureExt;
use std::sync::Arc;
use strata_adapters::{DocumentStoreAdapter, WritePrecondition};
use strata_core::{
    validate_segment, Error, ErrorKind, Precondition, Receipt, Result, Session, StateManagement,
    StateScope, Versioned,
};
use tracing::{debug, info};

const SESSIONS: &str = "sessions";

/// Each scope maps onto one document collection.
pub struct StateAbstraction {
    documents: Arc<dyn DocumentStoreAdapter>,
    retrier: Retrier,
}

impl StateAbstraction {
    pub fn new(documents: Arc<dyn DocumentStoreAdapter>, retrier: Retrier) -> Self {
        Self { documents, retrier }
    }
}

fn to_write_precondition(p: Precondition) -> WritePrecondition {
    match p {
        Precondition::None => WritePrecondition::None,
        Precondition::DoesNotExist => WritePrecondition::DoesNotExist,
        Precondition::MatchesVersion(v) => WritePrecondition::MatchesVersion(v),
    }
}

#[async_trait::async_trait]
impl StateManagement for StateAbstraction {
    async fn put(
        &self,
        scope: &StateScope,
        key: &str,
        value: serde_json::Value,
        precondition: Precondition,
    ) -> Result<Receipt> {
        if key.is_empty() {
            return Err(Error::InvalidInput("state key must not be empty".into()));
        }
        let collection = scope.as_str();
        let precondition = to_write_precondition(precondition);
        // A failed precondition is an answer for the caller, not a transient fault.
        let version = self
            .retrier
            .run_with("put", unavailable_only, || {
                self.documents
                    .put(collection, key, value.clone(), precondition)
                    .map_err(normalize)
            })
            .await?;
        debug!("state {}/{} -> v{}", collection, key, version);
        Ok(Receipt { version })
    }

    async fn get(&self, scope: &StateScope, key: &str) -> Result<Versioned<serde_json::Value>> {
        let collection = scope.as_str();
        let doc = self
            .retrier
            .run("get", || self.documents.get(collection, key).map_err(normalize))
            .await?;
        Ok(Versioned {
            value: doc.value,
            version: doc.version,
        })
    }

    async fn delete(&self, scope: &StateScope, key: &str) -> Result<()> {
        let collection = scope.as_str();
        self.retrier
            .run("delete", || self.documents.delete(collection, key).map_err(normalize))
            .await
    }

    async fn keys(&self, scope: &StateScope, prefix: &str) -> Result<Vec<String>> {
        let collection = scope.as_str();
        self.retrier
            .run("keys", || {
                self.documents.list_keys(collection, prefix).map_err(normalize)
            })
            .await
    }

    async fn open_session(&self, session: &Session) -> Result<Session> {
        validate_segment("tenant_id", &session.tenant_id)?;
        validate_segment("session_id", &session.session_id)?;

        let scope = StateScope::global(SESSIONS);
        let key = session.key();
        match self
            .put(&scope, &key, serde_json::to_value(session)?, Precondition::DoesNotExist)
            .await
        {
            Ok(_) => {
                info!("Session {} opened", key);
                Ok(session.clone())
            }
            Err(e) if e.kind() == ErrorKind::Conflict => {
                self.session(&session.tenant_id, &session.session_id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn session(&self, tenant_id: &str, session_id: &str) -> Result<Session> {
        let scope = StateScope::global(SESSIONS);
        let key = format!("{}:{}", tenant_id, session_id);
        match self.get(&scope, &key).await {
            Ok(doc) => Ok(serde_json::from_value(doc.value)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("session {}", key)))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_adapters::MemoryDocumentStore;
    use strata_core::RetryPolicy;

    fn state() -> StateAbstraction {
        StateAbstraction::new(
            Arc::new(MemoryDocumentStore::new()),
            Retrier::new("state", RetryPolicy::none()),
        )
    }

    #[tokio::test]
    async fn versioned_put_get() {
        let state = state();
        let scope = StateScope::session("acme", "s-1");
        let r1 = state.put(&scope, "k", json!(1), Precondition::None).await.unwrap();
        let r2 = state
            .put(&scope, "k", json!(2), Precondition::MatchesVersion(r1.version))
            .await
            .unwrap();
        assert_eq!(r2.version, r1.version + 1);

        let stale = state
            .put(&scope, "k", json!(3), Precondition::MatchesVersion(r1.version))
            .await
            .unwrap_err();
        assert_eq!(stale.kind(), ErrorKind::Conflict);

        let got = state.get(&scope, "k").await.unwrap();
        assert_eq!(got.value, json!(2));
        assert_eq!(got.version, r2.version);
    }

    #[tokio::test]
    async fn scopes_do_not_leak() {
        let state = state();
        let a = StateScope::session("acme", "s-1");
        let b = StateScope::session("other", "s-1");
        state.put(&a, "k", json!("a"), Precondition::None).await.unwrap();
        assert_eq!(state.get(&b, "k").await.unwrap_err().kind(), ErrorKind::NotFound);
        assert!(state.keys(&b, "").await.unwrap().is_empty());
        assert_eq!(state.keys(&a, "").await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn open_session_is_idempotent() {
        let state = state();
        let first = state.open_session(&Session::new("acme", "s-1")).await.unwrap();
        let again = state.open_session(&Session::new("acme", "s-1")).await.unwrap();
        assert_eq!(first.opened_at, again.opened_at);

        let found = state.session("acme", "s-1").await.unwrap();
        assert_eq!(found, first);
        assert_eq!(
            state.session("acme", "nope").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn open_session_rejects_bad_ids() {
        let err = state()
            .open_session(&Session::new("ac:me", "s-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
