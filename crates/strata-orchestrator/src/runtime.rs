//! Intent runtime: submission, scheduling, cancellation and the execution
//! state machine.
//!
//! Each submitted intent gets a `pending` record and its own task. The task
//! waits for a concurrency permit, moves the record to `running`, hands an
//! [`ExecutionContext`] to the orchestrator and writes the terminal state.
//! Cancellation only wins while the record is still `pending`.

use crate::context::ExecutionContext;
use crate::index::ArtifactIndex;
use crate::orchestrator::{Orchestrator, OrchestratorRegistry};
use crate::resolver::ArtifactResolver;
use crate::store::ExecutionStore;
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{
    relation, Error, ErrorKind, ExecutionId, ExecutionState, ExecutionStatus, Intent,
    MaterializationPolicy, NodeRef, ProtocolKind, Result, RetryPolicy, StepFailure,
};
use strata_foundation::FoundationService;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct IntentRuntime {
    foundation: Arc<FoundationService>,
    registry: OrchestratorRegistry,
    store: Arc<ExecutionStore>,
    index: Arc<ArtifactIndex>,
    resolver: ArtifactResolver,
    policy: MaterializationPolicy,
    permits: Arc<Semaphore>,
    /// Executions that have not reached `running` yet.
    pending: DashMap<ExecutionId, CancellationToken>,
}

impl IntentRuntime {
    /// Initialize the foundation and check that every protocol the
    /// registered orchestrators need resolves. Fails fast otherwise.
    pub async fn start(
        foundation: Arc<FoundationService>,
        registry: OrchestratorRegistry,
    ) -> Result<Arc<Self>> {
        foundation.initialize().await?;
        foundation.require(&ProtocolKind::ALL)?;
        for orchestrator in registry.orchestrators() {
            foundation.require(orchestrator.required_protocols())?;
        }

        let config = foundation.config().clone();
        let state = foundation.state()?;
        let files = foundation.file_storage()?;
        let graph = foundation.graph()?;

        let cas_policy = RetryPolicy {
            max_attempts: config.runtime.status_update_attempts.max(1),
            ..config.retry.state.clone()
        };
        let store = Arc::new(ExecutionStore::new(state.clone(), cas_policy));
        let index = Arc::new(ArtifactIndex::new(state, config.indexes.artifact));
        let resolver = ArtifactResolver::new(files, graph, index.clone(), store.clone());

        info!(
            "Intent runtime started: intents [{}], {} concurrent executions",
            registry.intent_names().join(", "),
            config.runtime.max_concurrent_executions
        );

        Ok(Arc::new(Self {
            foundation,
            registry,
            store,
            index,
            resolver,
            policy: config.materialization.clone(),
            permits: Arc::new(Semaphore::new(config.runtime.max_concurrent_executions.max(1))),
            pending: DashMap::new(),
        }))
    }

    pub fn foundation(&self) -> &Arc<FoundationService> {
        &self.foundation
    }

    pub fn registry(&self) -> &OrchestratorRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &ArtifactResolver {
        &self.resolver
    }

    /// Validate, record as `pending` and schedule. Returns before the
    /// orchestrator runs.
    pub async fn submit(self: &Arc<Self>, intent: Intent) -> Result<ExecutionId> {
        intent.validate()?;
        let orchestrator = self
            .registry
            .get(&intent.name)
            .ok_or_else(|| Error::InvalidInput(format!("unknown intent '{}'", intent.name)))?;
        orchestrator.validate(&intent)?;

        self.foundation
            .state()?
            .open_session(&intent.session())
            .await?;

        let execution_id = ExecutionId::generate();
        self.store
            .create(&ExecutionStatus::pending(execution_id.clone(), &intent))
            .await?;

        let token = CancellationToken::new();
        self.pending.insert(execution_id.clone(), token.clone());

        info!(
            "Execution {} pending: {} for {}/{}",
            execution_id, intent.name, intent.tenant_id, intent.session_id
        );

        let runtime = self.clone();
        let id = execution_id.clone();
        tokio::spawn(async move {
            runtime.run(id, intent, orchestrator, token).await;
        });

        Ok(execution_id)
    }

    pub async fn status(&self, execution_id: &ExecutionId) -> Result<ExecutionStatus> {
        self.store.get(execution_id).await
    }

    /// `Ok(true)` if the execution was still pending and is now failed with
    /// kind `cancelled`. `Ok(false)` once it has started or finished.
    pub async fn cancel(&self, execution_id: &ExecutionId) -> Result<bool> {
        let failure = StepFailure::new(
            "cancel",
            ErrorKind::Cancelled,
            "cancelled before the orchestrator started",
        );
        let outcome = self
            .store
            .update(execution_id, |s| {
                if s.state != ExecutionState::Pending {
                    return Err(Error::invalid_transition(s.state, "cancel (requires pending)"));
                }
                s.fail(failure.clone())
            })
            .await;

        match outcome {
            Ok(_) => {
                if let Some((_, token)) = self.pending.remove(execution_id) {
                    token.cancel();
                }
                info!("Execution {} cancelled", execution_id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::InvalidTransition => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Poll until the execution is terminal.
    pub async fn wait_for(
        &self,
        execution_id: &ExecutionId,
        timeout: Duration,
    ) -> Result<ExecutionStatus> {
        let started = Instant::now();
        loop {
            let status = self.store.get(execution_id).await?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            if started.elapsed() >= timeout {
                return Err(Error::Timeout {
                    operation: format!("wait for execution {}", execution_id),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn run(
        self: Arc<Self>,
        execution_id: ExecutionId,
        intent: Intent,
        orchestrator: Arc<dyn Orchestrator>,
        token: CancellationToken,
    ) {
        let permit = tokio::select! {
            _ = token.cancelled() => {
                debug!("Execution {} cancelled while waiting for a slot", execution_id);
                return;
            }
            permit = self.permits.clone().acquire_owned() => permit,
        };
        let _permit = match permit {
            Ok(p) => p,
            Err(_) => {
                let err = Error::unavailable("runtime", "execution scheduler closed");
                self.finish(&execution_id, Err(StepFailure::from_error("schedule", &err)))
                    .await;
                return;
            }
        };

        let started = self
            .store
            .update(&execution_id, |s| s.transition(ExecutionState::Running))
            .await;
        self.pending.remove(&execution_id);
        match started {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::InvalidTransition => {
                debug!("Execution {} was cancelled before start", execution_id);
                return;
            }
            Err(e) => {
                error!("Execution {} could not start: {}", execution_id, e);
                self.finish(&execution_id, Err(StepFailure::from_error("start", &e)))
                    .await;
                return;
            }
        }

        let outcome = self.execute(&execution_id, intent, orchestrator.as_ref()).await;
        self.finish(&execution_id, outcome).await;
    }

    async fn execute(
        &self,
        execution_id: &ExecutionId,
        intent: Intent,
        orchestrator: &dyn Orchestrator,
    ) -> std::result::Result<(), StepFailure> {
        let (files, graph) = match (self.foundation.file_storage(), self.foundation.graph()) {
            (Ok(files), Ok(graph)) => (files, graph),
            (Err(e), _) | (_, Err(e)) => return Err(StepFailure::from_error("resolve_protocols", &e)),
        };

        let session = intent.session();
        let ctx = ExecutionContext::new(
            execution_id.clone(),
            intent,
            files,
            graph.clone(),
            self.store.clone(),
            self.index.clone(),
            self.policy.clone(),
        );

        if let Err(e) = graph
            .link(
                &NodeRef::execution(execution_id.as_str()),
                relation::RAN_IN,
                &NodeRef::session(&session),
            )
            .await
        {
            if let Err(note_err) = ctx.note("lineage", &e).await {
                return Err(StepFailure::from_error("lineage", &note_err));
            }
        }

        debug!("Execution {} running in realm {}", execution_id, orchestrator.realm());
        match AssertUnwindSafe(orchestrator.execute(&ctx)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let step = ctx
                    .failed_step()
                    .unwrap_or_else(|| orchestrator.realm().to_string());
                Err(StepFailure::from_error(step, &e))
            }
            Err(_) => Err(StepFailure::from_error(
                orchestrator.realm(),
                &Error::Internal("orchestrator panicked".into()),
            )),
        }
    }

    async fn finish(
        &self,
        execution_id: &ExecutionId,
        outcome: std::result::Result<(), StepFailure>,
    ) {
        let written = match &outcome {
            Ok(()) => {
                self.store
                    .update(execution_id, |s| s.transition(ExecutionState::Succeeded))
                    .await
            }
            Err(failure) => {
                self.store
                    .update(execution_id, |s| s.fail(failure.clone()))
                    .await
            }
        };

        match (written, outcome) {
            (Ok(status), Ok(())) if status.is_incomplete() => warn!(
                "Execution {} succeeded with {} skipped step(s)",
                execution_id,
                status.non_fatal().len()
            ),
            (Ok(status), Ok(())) => info!(
                "Execution {} succeeded with {} artifact(s)",
                execution_id,
                status.artifacts.len()
            ),
            (Ok(_), Err(failure)) => error!(
                "Execution {} failed at {} ({}): {}",
                execution_id, failure.step, failure.kind, failure.message
            ),
            (Err(e), _) => error!(
                "Execution {} terminal state could not be written: {}",
                execution_id, e
            ),
        }
    }
}
