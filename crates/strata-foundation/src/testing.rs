//! Fault-injecting adapter wrappers.
//!
//! Each wrapper delegates to an inner adapter until a rule matches, then fails
//! the call with the configured fault instead. Plug them in through the
//! [`FoundationBuilder`](crate::FoundationBuilder) overrides.

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use strata_adapters::{
    Adapter, AdapterError, AdapterResult, Direction, Document, DocumentStoreAdapter, GraphEdge,
    GraphNode, GraphStoreAdapter, ObjectMeta, ObjectStoreAdapter, WritePrecondition,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Unavailable,
    Unknown,
}

impl Fault {
    fn error(&self, adapter: &str, op: &str, key: &str) -> AdapterError {
        let message = format!("injected fault on {} {}", op, key);
        match self {
            Fault::Unavailable => AdapterError::unavailable(adapter, message),
            Fault::Unknown => AdapterError::unknown(adapter, message),
        }
    }
}

struct Rule {
    op: &'static str,
    prefix: String,
    fault: Fault,
    /// `None` fails forever.
    remaining: Option<u32>,
}

/// Rules matched by operation name and key prefix.
#[derive(Default)]
pub struct FaultSwitch {
    rules: Mutex<Vec<Rule>>,
    tripped: AtomicUsize,
}

impl FaultSwitch {
    /// Fail `op` on keys starting with `prefix`, `times` times or forever.
    pub fn inject(&self, op: &'static str, prefix: &str, fault: Fault, times: Option<u32>) {
        self.rules
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Rule {
                op,
                prefix: prefix.to_string(),
                fault,
                remaining: times,
            });
    }

    pub fn clear(&self) {
        self.rules.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// How many calls were failed so far.
    pub fn tripped(&self) -> usize {
        self.tripped.load(Ordering::SeqCst)
    }

    fn check(&self, adapter: &str, op: &str, key: &str) -> AdapterResult<()> {
        let mut rules = self.rules.lock().unwrap_or_else(|p| p.into_inner());
        let hit = rules
            .iter_mut()
            .find(|r| r.op == op && key.starts_with(&r.prefix) && r.remaining != Some(0));
        match hit {
            Some(rule) => {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                self.tripped.fetch_add(1, Ordering::SeqCst);
                Err(rule.fault.error(adapter, op, key))
            }
            None => Ok(()),
        }
    }
}

pub struct FaultyObjectStore {
    inner: Arc<dyn ObjectStoreAdapter>,
    pub faults: FaultSwitch,
}

impl FaultyObjectStore {
    pub fn new(inner: Arc<dyn ObjectStoreAdapter>) -> Self {
        Self {
            inner,
            faults: FaultSwitch::default(),
        }
    }
}

#[async_trait::async_trait]
impl Adapter for FaultyObjectStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn technology(&self) -> &str {
        self.inner.technology()
    }

    async fn health_check(&self) -> AdapterResult<()> {
        self.faults.check(self.name(), "health_check", "")?;
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> AdapterResult<()> {
        self.inner.shutdown().await
    }
}

#[async_trait::async_trait]
impl ObjectStoreAdapter for FaultyObjectStore {
    async fn put_object(&self, key: &str, data: Bytes) -> AdapterResult<ObjectMeta> {
        self.faults.check(self.name(), "put_object", key)?;
        self.inner.put_object(key, data).await
    }

    async fn get_object(&self, key: &str) -> AdapterResult<Bytes> {
        self.faults.check(self.name(), "get_object", key)?;
        self.inner.get_object(key).await
    }

    async fn head_object(&self, key: &str) -> AdapterResult<Option<ObjectMeta>> {
        self.faults.check(self.name(), "head_object", key)?;
        self.inner.head_object(key).await
    }

    async fn delete_object(&self, key: &str) -> AdapterResult<()> {
        self.faults.check(self.name(), "delete_object", key)?;
        self.inner.delete_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> AdapterResult<Vec<ObjectMeta>> {
        self.faults.check(self.name(), "list_objects", prefix)?;
        self.inner.list_objects(prefix).await
    }
}

/// Document keys are matched as `{collection}/{key}`.
pub struct FaultyDocumentStore {
    inner: Arc<dyn DocumentStoreAdapter>,
    pub faults: FaultSwitch,
}

impl FaultyDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStoreAdapter>) -> Self {
        Self {
            inner,
            faults: FaultSwitch::default(),
        }
    }
}

#[async_trait::async_trait]
impl Adapter for FaultyDocumentStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn technology(&self) -> &str {
        self.inner.technology()
    }

    async fn health_check(&self) -> AdapterResult<()> {
        self.faults.check(self.name(), "health_check", "")?;
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> AdapterResult<()> {
        self.inner.shutdown().await
    }
}

#[async_trait::async_trait]
impl DocumentStoreAdapter for FaultyDocumentStore {
    async fn get(&self, collection: &str, key: &str) -> AdapterResult<Document> {
        self.faults
            .check(self.name(), "get", &format!("{}/{}", collection, key))?;
        self.inner.get(collection, key).await
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
        precondition: WritePrecondition,
    ) -> AdapterResult<u64> {
        self.faults
            .check(self.name(), "put", &format!("{}/{}", collection, key))?;
        self.inner.put(collection, key, value, precondition).await
    }

    async fn delete(&self, collection: &str, key: &str) -> AdapterResult<()> {
        self.faults
            .check(self.name(), "delete", &format!("{}/{}", collection, key))?;
        self.inner.delete(collection, key).await
    }

    async fn list_keys(&self, collection: &str, prefix: &str) -> AdapterResult<Vec<String>> {
        self.faults
            .check(self.name(), "list_keys", &format!("{}/{}", collection, prefix))?;
        self.inner.list_keys(collection, prefix).await
    }
}

/// Node and edge operations are matched on the node key (edge source for `add_edge`).
pub struct FaultyGraphStore {
    inner: Arc<dyn GraphStoreAdapter>,
    pub faults: FaultSwitch,
}

impl FaultyGraphStore {
    pub fn new(inner: Arc<dyn GraphStoreAdapter>) -> Self {
        Self {
            inner,
            faults: FaultSwitch::default(),
        }
    }
}

#[async_trait::async_trait]
impl Adapter for FaultyGraphStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn technology(&self) -> &str {
        self.inner.technology()
    }

    async fn health_check(&self) -> AdapterResult<()> {
        self.faults.check(self.name(), "health_check", "")?;
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> AdapterResult<()> {
        self.inner.shutdown().await
    }
}

#[async_trait::async_trait]
impl GraphStoreAdapter for FaultyGraphStore {
    async fn upsert_node(&self, node: GraphNode) -> AdapterResult<()> {
        self.faults.check(self.name(), "upsert_node", &node.key)?;
        self.inner.upsert_node(node).await
    }

    async fn get_node(&self, key: &str) -> AdapterResult<Option<GraphNode>> {
        self.faults.check(self.name(), "get_node", key)?;
        self.inner.get_node(key).await
    }

    async fn add_edge(&self, edge: GraphEdge) -> AdapterResult<bool> {
        self.faults.check(self.name(), "add_edge", &edge.from)?;
        self.inner.add_edge(edge).await
    }

    async fn neighbors(
        &self,
        key: &str,
        relation: &str,
        direction: Direction,
    ) -> AdapterResult<Vec<String>> {
        self.faults.check(self.name(), "neighbors", key)?;
        self.inner.neighbors(key, relation, direction).await
    }
}
