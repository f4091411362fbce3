//! Lineage over a graph store adapter.

use crate::retry::{normalize, Retrier};
use futures::TryFutureExt;
use std::sync::Arc;
use strata_adapters::{Direction, GraphEdge, GraphNode, GraphStoreAdapter};
use strata_core::{Error, GraphStorage, NodeKind, NodeRef, Result};
use tracing::{debug, warn};

pub struct GraphAbstraction {
    graph: Arc<dyn GraphStoreAdapter>,
    retrier: Retrier,
}

impl GraphAbstraction {
    pub fn new(graph: Arc<dyn GraphStoreAdapter>, retrier: Retrier) -> Self {
        Self { graph, retrier }
    }

    /// Create the node on first sight. Existing properties are left alone.
    async fn ensure_node(&self, node: &NodeRef) -> Result<()> {
        let key = node.key();
        let existing = self
            .retrier
            .run("get_node", || self.graph.get_node(&key).map_err(normalize))
            .await?;
        if existing.is_some() {
            return Ok(());
        }
        let fresh = GraphNode {
            key: key.clone(),
            label: node.kind.to_string(),
            properties: serde_json::json!({
                "kind": node.kind,
                "id": node.id,
                "first_seen": chrono::Utc::now(),
            }),
        };
        self.retrier
            .run("upsert_node", || self.graph.upsert_node(fresh.clone()).map_err(normalize))
            .await
    }

    async fn neighbors(
        &self,
        node: &NodeRef,
        relation: &str,
        direction: Direction,
    ) -> Result<Vec<NodeRef>> {
        let key = node.key();
        let keys = self
            .retrier
            .run("neighbors", || {
                self.graph.neighbors(&key, relation, direction).map_err(normalize)
            })
            .await?;
        Ok(keys
            .iter()
            .filter_map(|k| {
                let parsed = parse_node_key(k);
                if parsed.is_none() {
                    warn!("ignoring unparseable graph key {}", k);
                }
                parsed
            })
            .collect())
    }
}

/// Inverse of [`NodeRef::key`].
fn parse_node_key(key: &str) -> Option<NodeRef> {
    let (kind, id) = key.split_once('/')?;
    let kind: NodeKind = serde_json::from_value(serde_json::Value::String(kind.to_string())).ok()?;
    Some(NodeRef::new(kind, id))
}

#[async_trait::async_trait]
impl GraphStorage for GraphAbstraction {
    async fn link(&self, from: &NodeRef, relation: &str, to: &NodeRef) -> Result<()> {
        if relation.is_empty() {
            return Err(Error::InvalidInput("relation must not be empty".into()));
        }
        self.ensure_node(from).await?;
        self.ensure_node(to).await?;
        let edge = GraphEdge {
            from: from.key(),
            relation: relation.to_string(),
            to: to.key(),
        };
        let added = self
            .retrier
            .run("add_edge", || self.graph.add_edge(edge.clone()).map_err(normalize))
            .await?;
        if added {
            debug!("lineage {} -{}-> {}", edge.from, relation, edge.to);
        }
        Ok(())
    }

    async fn related(&self, node: &NodeRef, relation: &str) -> Result<Vec<NodeRef>> {
        self.neighbors(node, relation, Direction::Outgoing).await
    }

    async fn referrers(&self, node: &NodeRef, relation: &str) -> Result<Vec<NodeRef>> {
        self.neighbors(node, relation, Direction::Incoming).await
    }

    async fn describe(&self, node: &NodeRef) -> Result<serde_json::Value> {
        let key = node.key();
        self.retrier
            .run("get_node", || self.graph.get_node(&key).map_err(normalize))
            .await?
            .map(|n| n.properties)
            .ok_or_else(|| Error::NotFound(format!("graph node {}", key)))
    }
}
