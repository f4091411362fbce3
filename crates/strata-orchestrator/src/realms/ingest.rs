//! `ingest_file`: store one uploaded file and expose it as a file artifact.

use crate::context::{ArtifactDraft, ExecutionContext};
use crate::orchestrator::Orchestrator;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use strata_core::{Error, Intent, ProtocolKind, Result};
use tracing::info;

pub const INGEST_FILE: &str = "ingest_file";

/// Exactly one of `content_base64` and `text` carries the file body.
#[derive(Debug, Deserialize)]
struct IngestPayload {
    file_name: String,
    #[serde(default = "default_content_type")]
    content_type: String,
    #[serde(default)]
    content_base64: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

fn default_content_type() -> String {
    "application/octet-stream".into()
}

impl IngestPayload {
    fn parse(intent: &Intent) -> Result<Self> {
        let payload: Self = serde_json::from_value(intent.payload.clone())
            .map_err(|e| Error::InvalidInput(format!("ingest_file payload: {}", e)))?;
        if payload.file_name.trim().is_empty() {
            return Err(Error::InvalidInput("file_name must not be empty".into()));
        }
        match (&payload.content_base64, &payload.text) {
            (Some(_), None) | (None, Some(_)) => Ok(payload),
            _ => Err(Error::InvalidInput(
                "exactly one of content_base64 or text is required".into(),
            )),
        }
    }

    fn content(&self) -> Result<Bytes> {
        match (&self.content_base64, &self.text) {
            (Some(b64), _) => base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map(Bytes::from)
                .map_err(|e| Error::InvalidInput(format!("content_base64: {}", e))),
            (None, Some(text)) => Ok(Bytes::from(text.clone().into_bytes())),
            (None, None) => Err(Error::InvalidInput("no file content".into())),
        }
    }
}

pub struct IngestOrchestrator;

#[async_trait::async_trait]
impl Orchestrator for IngestOrchestrator {
    fn realm(&self) -> &str {
        "content"
    }

    fn intents(&self) -> &[&str] {
        &[INGEST_FILE]
    }

    fn required_protocols(&self) -> &[ProtocolKind] {
        &[ProtocolKind::StateManagement, ProtocolKind::FileStorage]
    }

    fn validate(&self, intent: &Intent) -> Result<()> {
        IngestPayload::parse(intent).map(|_| ())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        let payload = ctx
            .required("parse_payload", async { IngestPayload::parse(ctx.intent()) })
            .await?;
        let content = ctx.required("decode_content", async { payload.content() }).await?;
        let size = content.len();

        let artifact = ctx
            .required(
                "store_file",
                ctx.emit_artifact(ArtifactDraft::file(
                    payload.file_name.clone(),
                    payload.content_type.clone(),
                    content,
                )),
            )
            .await?;

        info!(
            "Ingested {} ({} bytes) as {}",
            payload.file_name,
            size,
            artifact.file_reference.as_deref().unwrap_or("inline")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent(payload: serde_json::Value) -> Intent {
        Intent::new(INGEST_FILE, "acme", "s-1", payload)
    }

    #[test]
    fn accepts_text_or_base64() {
        let o = IngestOrchestrator;
        o.validate(&intent(json!({"file_name": "a.txt", "text": "hi"}))).unwrap();
        o.validate(&intent(json!({"file_name": "a.bin", "content_base64": "aGk="})))
            .unwrap();
    }

    #[test]
    fn rejects_bad_payloads() {
        let o = IngestOrchestrator;
        for payload in [
            json!({}),
            json!({"file_name": "", "text": "x"}),
            json!({"file_name": "a", "text": "x", "content_base64": "eA=="}),
            json!({"file_name": "a"}),
        ] {
            assert!(o.validate(&intent(payload.clone())).is_err(), "{}", payload);
        }
    }

    #[test]
    fn decodes_base64_content() {
        let p = IngestPayload::parse(&intent(json!({"file_name": "a", "content_base64": "aGk="})))
            .unwrap();
        assert_eq!(&p.content().unwrap()[..], b"hi");
        assert_eq!(p.content_type, "application/octet-stream");
    }
}
