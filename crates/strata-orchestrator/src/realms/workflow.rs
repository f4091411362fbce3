//! `create_workflow`: build a structured workflow definition, then try to
//! render a visual of it. The visual is optional.

use crate::context::{ArtifactDraft, ExecutionContext};
use crate::orchestrator::Orchestrator;
use crate::visual::VisualGenerator;
use serde::Deserialize;
use std::sync::Arc;
use strata_core::{Error, Intent, ProtocolKind, Result};
use tracing::info;

pub const CREATE_WORKFLOW: &str = "create_workflow";
pub const VISUAL_STEP: &str = "visual_generation";

#[derive(Debug, Deserialize)]
struct WorkflowPayload {
    name: String,
    steps: Vec<StepSpec>,
    #[serde(default)]
    description: Option<String>,
}

/// A step is either a bare title or `{ "title", "owner" }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepSpec {
    Title(String),
    Detailed {
        title: String,
        #[serde(default)]
        owner: Option<String>,
    },
}

impl StepSpec {
    fn title(&self) -> &str {
        match self {
            Self::Title(t) => t,
            Self::Detailed { title, .. } => title,
        }
    }

    fn owner(&self) -> Option<&str> {
        match self {
            Self::Title(_) => None,
            Self::Detailed { owner, .. } => owner.as_deref(),
        }
    }
}

impl WorkflowPayload {
    fn parse(intent: &Intent) -> Result<Self> {
        let payload: Self = serde_json::from_value(intent.payload.clone())
            .map_err(|e| Error::InvalidInput(format!("create_workflow payload: {}", e)))?;
        if payload.name.trim().is_empty() {
            return Err(Error::InvalidInput("workflow name must not be empty".into()));
        }
        if payload.steps.is_empty() {
            return Err(Error::InvalidInput("a workflow needs at least one step".into()));
        }
        if payload.steps.iter().any(|s| s.title().trim().is_empty()) {
            return Err(Error::InvalidInput("step titles must not be empty".into()));
        }
        Ok(payload)
    }

    fn definition(&self, workflow_id: &str) -> serde_json::Value {
        let steps: Vec<serde_json::Value> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                serde_json::json!({
                    "index": i + 1,
                    "title": s.title(),
                    "owner": s.owner(),
                    "next": (i + 1 < self.steps.len()).then_some(i + 2),
                })
            })
            .collect();
        serde_json::json!({
            "workflow_id": workflow_id,
            "name": self.name,
            "description": self.description,
            "steps": steps,
        })
    }
}

pub struct WorkflowOrchestrator {
    visuals: Arc<dyn VisualGenerator>,
}

impl WorkflowOrchestrator {
    pub fn new(visuals: Arc<dyn VisualGenerator>) -> Self {
        Self { visuals }
    }
}

#[async_trait::async_trait]
impl Orchestrator for WorkflowOrchestrator {
    fn realm(&self) -> &str {
        "journey"
    }

    fn intents(&self) -> &[&str] {
        &[CREATE_WORKFLOW]
    }

    fn required_protocols(&self) -> &[ProtocolKind] {
        &[
            ProtocolKind::StateManagement,
            ProtocolKind::FileStorage,
            ProtocolKind::GraphStorage,
        ]
    }

    fn validate(&self, intent: &Intent) -> Result<()> {
        WorkflowPayload::parse(intent).map(|_| ())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        let payload = ctx
            .required("parse_payload", async { WorkflowPayload::parse(ctx.intent()) })
            .await?;
        let workflow_id = format!("wf-{}", uuid::Uuid::new_v4().simple());
        let definition = payload.definition(&workflow_id);

        ctx.required(
            "workflow_definition",
            ctx.emit_artifact(ArtifactDraft::structured("workflow.json", definition.clone())),
        )
        .await?;

        let visual = ctx
            .optional(VISUAL_STEP, async {
                let rendered = self.visuals.render(&definition).await?;
                ctx.emit_artifact(ArtifactDraft::visual(
                    "workflow-visual",
                    rendered.content_type,
                    rendered.content,
                ))
                .await
            })
            .await?;

        info!(
            "Workflow {} created with {} steps (visual: {})",
            payload.name,
            payload.steps.len(),
            if visual.is_some() { "yes" } else { "skipped" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent(payload: serde_json::Value) -> Intent {
        Intent::new(CREATE_WORKFLOW, "acme", "s-1", payload)
    }

    #[test]
    fn definition_links_steps_in_order() {
        let p = WorkflowPayload::parse(&intent(json!({
            "name": "onboarding",
            "steps": ["collect documents", {"title": "review", "owner": "ops"}, "approve"],
        })))
        .unwrap();
        let def = p.definition("wf-1");
        assert_eq!(def["steps"][0]["next"], 2);
        assert_eq!(def["steps"][1]["owner"], "ops");
        assert!(def["steps"][2]["next"].is_null());
        assert_eq!(def["name"], "onboarding");
    }

    #[test]
    fn rejects_empty_workflows() {
        assert!(WorkflowPayload::parse(&intent(json!({"name": "x", "steps": []}))).is_err());
        assert!(WorkflowPayload::parse(&intent(json!({"name": " ", "steps": ["a"]}))).is_err());
        assert!(WorkflowPayload::parse(&intent(json!({"steps": ["a"]}))).is_err());
    }
}
