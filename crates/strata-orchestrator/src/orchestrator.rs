//! Orchestrator trait and the intent-name registry.

use crate::context::ExecutionContext;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{Error, Intent, ProtocolKind, Result};

/// One realm's intent handler. Works through protocols only.
#[async_trait::async_trait]
pub trait Orchestrator: Send + Sync {
    fn realm(&self) -> &str;

    /// Intent names this orchestrator answers to.
    fn intents(&self) -> &[&str];

    fn required_protocols(&self) -> &[ProtocolKind];

    /// Reject malformed payloads before an execution is created.
    fn validate(&self, _intent: &Intent) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()>;
}

#[derive(Default, Clone)]
pub struct OrchestratorRegistry {
    by_intent: HashMap<String, Arc<dyn Orchestrator>>,
}

impl OrchestratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `Conflict` if an intent name is already claimed.
    pub fn register(&mut self, orchestrator: Arc<dyn Orchestrator>) -> Result<()> {
        for name in orchestrator.intents() {
            if let Some(existing) = self.by_intent.get(*name) {
                return Err(Error::Conflict(format!(
                    "intent {} already handled by realm {}",
                    name,
                    existing.realm()
                )));
            }
        }
        for name in orchestrator.intents() {
            self.by_intent.insert(name.to_string(), orchestrator.clone());
        }
        Ok(())
    }

    pub fn with(mut self, orchestrator: Arc<dyn Orchestrator>) -> Result<Self> {
        self.register(orchestrator)?;
        Ok(self)
    }

    pub fn get(&self, intent_name: &str) -> Option<Arc<dyn Orchestrator>> {
        self.by_intent.get(intent_name).cloned()
    }

    pub fn intent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_intent.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn orchestrators(&self) -> Vec<Arc<dyn Orchestrator>> {
        let mut seen: Vec<Arc<dyn Orchestrator>> = Vec::new();
        for o in self.by_intent.values() {
            if !seen.iter().any(|s| Arc::ptr_eq(s, o)) {
                seen.push(o.clone());
            }
        }
        seen
    }
}
