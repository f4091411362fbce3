//! strata-orchestrator: realm orchestrators, the intent runtime and artifact
//! retrieval.
//!
//! Orchestrators see protocols only. The runtime owns the execution record
//! and the state machine around each orchestrator call.

pub mod context;
pub mod index;
pub mod orchestrator;
pub mod realms;
pub mod resolver;
pub mod runtime;
pub mod store;
pub mod visual;

pub use context::{ArtifactContent, ArtifactDraft, ExecutionContext};
pub use index::{ArtifactIndex, ArtifactIndexEntry};
pub use orchestrator::{Orchestrator, OrchestratorRegistry};
pub use realms::{IngestOrchestrator, WorkflowOrchestrator, CREATE_WORKFLOW, INGEST_FILE};
pub use resolver::{ArtifactResolver, ResolvedArtifact};
pub use runtime::IntentRuntime;
pub use store::ExecutionStore;
pub use visual::{HttpVisualGenerator, RenderedVisual, UnconfiguredVisualGenerator, VisualGenerator};

use std::sync::Arc;
use strata_core::{Result, StrataConfig};

/// Registry with the reference realms wired from configuration.
pub fn default_registry(config: &StrataConfig) -> Result<OrchestratorRegistry> {
    let visuals = visual::from_config(&config.visual)?;
    OrchestratorRegistry::new()
        .with(Arc::new(IngestOrchestrator))?
        .with(Arc::new(WorkflowOrchestrator::new(visuals)))
}
