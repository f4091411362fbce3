//! Reference realms.

pub mod ingest;
pub mod workflow;

pub use ingest::{IngestOrchestrator, INGEST_FILE};
pub use workflow::{WorkflowOrchestrator, CREATE_WORKFLOW, VISUAL_STEP};
