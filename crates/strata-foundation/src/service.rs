//! Foundation service: the composition root.
//!
//! Builds adapters from configuration (or takes pre-built overrides), checks
//! their health, wires one abstraction per protocol and publishes them. The
//! wiring is written once and read without locks afterwards.

use crate::file_storage::FileStorageAbstraction;
use crate::graph::GraphAbstraction;
use crate::retry::{normalize, Retrier};
use crate::state::StateAbstraction;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_adapters::{
    Adapter, DocumentStoreAdapter, GraphStoreAdapter, LocalFsDocumentStore, LocalFsGraphStore,
    LocalFsObjectStore, MemoryDocumentStore, MemoryGraphStore, MemoryObjectStore,
    ObjectStoreAdapter,
};
use strata_core::{
    Error, FileStorage, GraphStorage, ProtocolKind, Result, StateManagement,
    StrataConfig,
};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// A published abstraction, looked up by protocol.
#[derive(Clone)]
pub enum AbstractionHandle {
    State(Arc<dyn StateManagement>),
    FileStorage(Arc<dyn FileStorage>),
    Graph(Arc<dyn GraphStorage>),
}

impl AbstractionHandle {
    pub fn protocol(&self) -> ProtocolKind {
        match self {
            Self::State(_) => ProtocolKind::StateManagement,
            Self::FileStorage(_) => ProtocolKind::FileStorage,
            Self::Graph(_) => ProtocolKind::GraphStorage,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AdapterHealth {
    pub slot: String,
    pub technology: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub adapters: Vec<AdapterHealth>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.adapters.iter().all(|a| a.healthy)
    }
}

/// Pre-built adapters that replace the configured ones.
#[derive(Clone, Default)]
struct AdapterOverrides {
    object_store: Option<Arc<dyn ObjectStoreAdapter>>,
    metadata_store: Option<Arc<dyn DocumentStoreAdapter>>,
    graph_store: Option<Arc<dyn GraphStoreAdapter>>,
}

struct Wiring {
    object_store: Arc<dyn ObjectStoreAdapter>,
    metadata_store: Arc<dyn DocumentStoreAdapter>,
    graph_store: Arc<dyn GraphStoreAdapter>,
    state: Arc<StateAbstraction>,
    files: Arc<FileStorageAbstraction>,
    graph: Arc<GraphAbstraction>,
}

/// Adapters constructed so far during `initialize`.
#[derive(Default)]
struct Started {
    object_store: Option<Arc<dyn ObjectStoreAdapter>>,
    metadata_store: Option<Arc<dyn DocumentStoreAdapter>>,
}

impl Started {
    /// Release in reverse construction order and hand back the startup error.
    async fn abort(&self, err: Error) -> Error {
        warn!("Foundation initialization failed: {}", err);
        if let Some(adapter) = &self.metadata_store {
            release(adapter.as_ref()).await;
        }
        if let Some(adapter) = &self.object_store {
            release(adapter.as_ref()).await;
        }
        err
    }
}

async fn release<A: Adapter + ?Sized>(adapter: &A) {
    match adapter.shutdown().await {
        Ok(()) => info!("{} ({}) shut down", adapter.name(), adapter.technology()),
        Err(e) => warn!("{} shutdown failed: {}", adapter.name(), e),
    }
}

async fn check_health<A: Adapter + ?Sized>(adapter: &A) -> Result<()> {
    adapter.health_check().await.map_err(|e| {
        Error::unavailable(
            adapter.name(),
            format!("{} failed health check: {}", adapter.technology(), e),
        )
    })
}

async fn health_of<A: Adapter + ?Sized>(adapter: &A) -> AdapterHealth {
    let result = adapter.health_check().await;
    AdapterHealth {
        slot: adapter.name().to_string(),
        technology: adapter.technology().to_string(),
        healthy: result.is_ok(),
        message: result.err().map(|e| e.to_string()),
    }
}

pub struct FoundationBuilder {
    config: StrataConfig,
    overrides: AdapterOverrides,
}

impl FoundationBuilder {
    pub fn with_object_store(mut self, adapter: Arc<dyn ObjectStoreAdapter>) -> Self {
        self.overrides.object_store = Some(adapter);
        self
    }

    pub fn with_metadata_store(mut self, adapter: Arc<dyn DocumentStoreAdapter>) -> Self {
        self.overrides.metadata_store = Some(adapter);
        self
    }

    pub fn with_graph_store(mut self, adapter: Arc<dyn GraphStoreAdapter>) -> Self {
        self.overrides.graph_store = Some(adapter);
        self
    }

    pub fn build(self) -> Arc<FoundationService> {
        Arc::new(FoundationService {
            config: self.config,
            overrides: self.overrides,
            wiring: OnceCell::new(),
            shut_down: AtomicBool::new(false),
        })
    }
}

pub struct FoundationService {
    config: StrataConfig,
    overrides: AdapterOverrides,
    wiring: OnceCell<Wiring>,
    shut_down: AtomicBool,
}

impl FoundationService {
    pub fn builder(config: StrataConfig) -> FoundationBuilder {
        FoundationBuilder {
            config,
            overrides: AdapterOverrides::default(),
        }
    }

    pub fn new(config: StrataConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// Idempotent. Either every protocol is published or none is.
    pub async fn initialize(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::NotInitialized);
        }
        self.wiring.get_or_try_init(|| self.wire()).await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.wiring.initialized() && !self.shut_down.load(Ordering::Acquire)
    }

    async fn wire(&self) -> Result<Wiring> {
        let foundation = &self.config.foundation;
        let mut started = Started::default();

        let object_store: Arc<dyn ObjectStoreAdapter> = match &self.overrides.object_store {
            Some(adapter) => adapter.clone(),
            None => match foundation.root_for(&foundation.object_store, "objects") {
                None => Arc::new(MemoryObjectStore::new()),
                Some(root) => Arc::new(LocalFsObjectStore::open(root).await.map_err(normalize)?),
            },
        };
        started.object_store = Some(object_store.clone());
        if let Err(e) = check_health(object_store.as_ref()).await {
            return Err(started.abort(e).await);
        }

        let metadata_store: Arc<dyn DocumentStoreAdapter> = match &self.overrides.metadata_store {
            Some(adapter) => adapter.clone(),
            None => match foundation.root_for(&foundation.metadata_store, "metadata") {
                None => Arc::new(MemoryDocumentStore::new()),
                Some(root) => match LocalFsDocumentStore::open(root).await {
                    Ok(store) => Arc::new(store),
                    Err(e) => return Err(started.abort(normalize(e)).await),
                },
            },
        };
        started.metadata_store = Some(metadata_store.clone());
        if let Err(e) = check_health(metadata_store.as_ref()).await {
            return Err(started.abort(e).await);
        }

        let graph_store: Arc<dyn GraphStoreAdapter> = match &self.overrides.graph_store {
            Some(adapter) => adapter.clone(),
            None => match foundation.root_for(&foundation.graph_store, "graph") {
                None => Arc::new(MemoryGraphStore::new()),
                Some(root) => match LocalFsGraphStore::open(root).await {
                    Ok(store) => Arc::new(store),
                    Err(e) => return Err(started.abort(normalize(e)).await),
                },
            },
        };
        if let Err(e) = check_health(graph_store.as_ref()).await {
            release(graph_store.as_ref()).await;
            return Err(started.abort(e).await);
        }

        let retry = &self.config.retry;
        let wiring = Wiring {
            state: Arc::new(StateAbstraction::new(
                metadata_store.clone(),
                Retrier::new("state", retry.state.clone()),
            )),
            files: Arc::new(FileStorageAbstraction::new(
                object_store.clone(),
                metadata_store.clone(),
                Retrier::new("file_storage", retry.file_storage.clone()),
                self.config.indexes.file_id,
            )),
            graph: Arc::new(GraphAbstraction::new(
                graph_store.clone(),
                Retrier::new("graph", retry.graph.clone()),
            )),
            object_store,
            metadata_store,
            graph_store,
        };

        info!(
            "Foundation initialized: object_store={}, metadata_store={}, graph_store={}",
            wiring.object_store.technology(),
            wiring.metadata_store.technology(),
            wiring.graph_store.technology()
        );
        Ok(wiring)
    }

    fn wiring(&self) -> Result<&Wiring> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::NotInitialized);
        }
        self.wiring.get().ok_or(Error::NotInitialized)
    }

    pub fn get_abstraction(&self, kind: ProtocolKind) -> Result<AbstractionHandle> {
        let wiring = self.wiring()?;
        Ok(match kind {
            ProtocolKind::StateManagement => AbstractionHandle::State(wiring.state.clone()),
            ProtocolKind::FileStorage => AbstractionHandle::FileStorage(wiring.files.clone()),
            ProtocolKind::GraphStorage => AbstractionHandle::Graph(wiring.graph.clone()),
        })
    }

    pub fn state(&self) -> Result<Arc<dyn StateManagement>> {
        Ok(self.wiring()?.state.clone())
    }

    pub fn file_storage(&self) -> Result<Arc<dyn FileStorage>> {
        Ok(self.wiring()?.files.clone())
    }

    pub fn graph(&self) -> Result<Arc<dyn GraphStorage>> {
        Ok(self.wiring()?.graph.clone())
    }

    /// Fails with `ProtocolUnresolved` for the first protocol that has no abstraction.
    pub fn require(&self, protocols: &[ProtocolKind]) -> Result<()> {
        for kind in protocols {
            match self.get_abstraction(*kind) {
                Ok(handle) if handle.protocol() == *kind => {}
                Ok(_) | Err(Error::NotInitialized) => return Err(Error::ProtocolUnresolved(*kind)),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let wiring = self.wiring()?;
        Ok(HealthReport {
            adapters: vec![
                health_of(wiring.object_store.as_ref()).await,
                health_of(wiring.metadata_store.as_ref()).await,
                health_of(wiring.graph_store.as_ref()).await,
            ],
        })
    }

    /// Best effort, reverse construction order. Later lookups fail with `NotInitialized`.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(wiring) = self.wiring.get() else {
            return;
        };
        release(wiring.graph_store.as_ref()).await;
        release(wiring.metadata_store.as_ref()).await;
        release(wiring.object_store.as_ref()).await;
    }
}

/// Memory-only configuration. Handy for tests and dry runs.
pub fn in_memory_config() -> StrataConfig {
    StrataConfig {
        foundation: strata_core::FoundationConfig::in_memory(),
        ..StrataConfig::default()
    }
}

