//! Graph store adapters: labelled nodes and directed, named edges.

use crate::adapter::Adapter;
use crate::error::{AdapterError, AdapterResult};
use crate::fs_util;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub relation: String,
    pub to: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[async_trait::async_trait]
pub trait GraphStoreAdapter: Adapter {
    /// Insert or replace a node by key.
    async fn upsert_node(&self, node: GraphNode) -> AdapterResult<()>;

    async fn get_node(&self, key: &str) -> AdapterResult<Option<GraphNode>>;

    /// Returns `false` if the edge already existed. Both endpoints must exist.
    async fn add_edge(&self, edge: GraphEdge) -> AdapterResult<bool>;

    /// Keys of nodes connected to `key` by `relation` in `direction`.
    async fn neighbors(
        &self,
        key: &str,
        relation: &str,
        direction: Direction,
    ) -> AdapterResult<Vec<String>>;
}

/// The whole graph. Shared by both adapters; the filesystem one persists it.
#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphData {
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeSet<GraphEdge>,
}

impl GraphData {
    fn upsert_node(&mut self, node: GraphNode) {
        self.nodes.insert(node.key.clone(), node);
    }

    fn add_edge(&mut self, edge: GraphEdge) -> AdapterResult<bool> {
        for endpoint in [&edge.from, &edge.to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(AdapterError::NotFound(format!("node {}", endpoint)));
            }
        }
        Ok(self.edges.insert(edge))
    }

    fn neighbors(&self, key: &str, relation: &str, direction: Direction) -> Vec<String> {
        self.edges
            .iter()
            .filter(|e| e.relation == relation)
            .filter_map(|e| match direction {
                Direction::Outgoing if e.from == key => Some(e.to.clone()),
                Direction::Incoming if e.to == key => Some(e.from.clone()),
                _ => None,
            })
            .collect()
    }
}

fn lock_poisoned() -> AdapterError {
    AdapterError::unknown("graph_store", "graph lock poisoned")
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryGraphStore {
    data: RwLock<GraphData>,
    closed: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::unavailable("graph_store", "adapter shut down"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Adapter for MemoryGraphStore {
    fn name(&self) -> &str {
        "graph_store"
    }

    fn technology(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> AdapterResult<()> {
        self.check_open()
    }

    async fn shutdown(&self) -> AdapterResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait::async_trait]
impl GraphStoreAdapter for MemoryGraphStore {
    async fn upsert_node(&self, node: GraphNode) -> AdapterResult<()> {
        self.check_open()?;
        self.data.write().map_err(|_| lock_poisoned())?.upsert_node(node);
        Ok(())
    }

    async fn get_node(&self, key: &str) -> AdapterResult<Option<GraphNode>> {
        self.check_open()?;
        Ok(self.data.read().map_err(|_| lock_poisoned())?.nodes.get(key).cloned())
    }

    async fn add_edge(&self, edge: GraphEdge) -> AdapterResult<bool> {
        self.check_open()?;
        self.data.write().map_err(|_| lock_poisoned())?.add_edge(edge)
    }

    async fn neighbors(
        &self,
        key: &str,
        relation: &str,
        direction: Direction,
    ) -> AdapterResult<Vec<String>> {
        self.check_open()?;
        Ok(self
            .data
            .read()
            .map_err(|_| lock_poisoned())?
            .neighbors(key, relation, direction))
    }
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Keeps the graph in memory and rewrites `<root>/graph.json` after every mutation.
pub struct LocalFsGraphStore {
    path: PathBuf,
    data: tokio::sync::Mutex<GraphData>,
    closed: AtomicBool,
}

impl LocalFsGraphStore {
    pub async fn open(root: impl AsRef<Path>) -> AdapterResult<Self> {
        let root = root.as_ref();
        fs_util::ensure_dir("graph_store", root).await?;
        let path = root.join("graph.json");
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AdapterError::unavailable(
                    "graph_store",
                    format!("cannot parse {}: {}", path.display(), e),
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GraphData::default(),
            Err(e) => return Err(AdapterError::from_io("graph_store", "graph.json", e)),
        };
        tracing::debug!(
            "graph store opened at {} ({} nodes, {} edges)",
            path.display(),
            data.nodes.len(),
            data.edges.len()
        );
        Ok(Self {
            path,
            data: tokio::sync::Mutex::new(data),
            closed: AtomicBool::new(false),
        })
    }

    fn check_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::unavailable("graph_store", "adapter shut down"));
        }
        Ok(())
    }

    async fn persist(&self, data: &GraphData) -> AdapterResult<()> {
        let bytes = serde_json::to_vec_pretty(data)
            .map_err(|e| AdapterError::unknown("graph_store", e.to_string()))?;
        fs_util::write_atomic("graph_store", &self.path, &bytes).await
    }
}

#[async_trait::async_trait]
impl Adapter for LocalFsGraphStore {
    fn name(&self) -> &str {
        "graph_store"
    }

    fn technology(&self) -> &str {
        "local_fs"
    }

    async fn health_check(&self) -> AdapterResult<()> {
        self.check_open()?;
        match self.path.parent() {
            Some(dir) => fs_util::ensure_dir("graph_store", dir).await,
            None => Ok(()),
        }
    }

    async fn shutdown(&self) -> AdapterResult<()> {
        let data = self.data.lock().await;
        self.closed.store(true, Ordering::Release);
        self.persist(&data).await
    }
}

#[async_trait::async_trait]
impl GraphStoreAdapter for LocalFsGraphStore {
    async fn upsert_node(&self, node: GraphNode) -> AdapterResult<()> {
        self.check_open()?;
        let mut data = self.data.lock().await;
        data.upsert_node(node);
        self.persist(&data).await
    }

    async fn get_node(&self, key: &str) -> AdapterResult<Option<GraphNode>> {
        self.check_open()?;
        Ok(self.data.lock().await.nodes.get(key).cloned())
    }

    async fn add_edge(&self, edge: GraphEdge) -> AdapterResult<bool> {
        self.check_open()?;
        let mut data = self.data.lock().await;
        let added = data.add_edge(edge)?;
        if added {
            self.persist(&data).await?;
        }
        Ok(added)
    }

    async fn neighbors(
        &self,
        key: &str,
        relation: &str,
        direction: Direction,
    ) -> AdapterResult<Vec<String>> {
        self.check_open()?;
        Ok(self.data.lock().await.neighbors(key, relation, direction))
    }
}
