//! Visual generation collaborator.
//!
//! Rendering lives in an external service. Workflows treat it as optional:
//! any failure here becomes a non-fatal note on the execution.

use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{Error, Result, VisualConfig};
use tracing::{debug, error};

pub struct RenderedVisual {
    pub content_type: String,
    pub content: Bytes,
}

#[async_trait::async_trait]
pub trait VisualGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, workflow: &serde_json::Value) -> Result<RenderedVisual>;
}

/// Pick the generator for a configuration.
pub fn from_config(config: &VisualConfig) -> Result<Arc<dyn VisualGenerator>> {
    Ok(match &config.endpoint {
        Some(endpoint) => Arc::new(HttpVisualGenerator::new(
            endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
        )?),
        None => Arc::new(UnconfiguredVisualGenerator),
    })
}

/// Stands in when no rendering endpoint is configured. Always unavailable.
pub struct UnconfiguredVisualGenerator;

#[async_trait::async_trait]
impl VisualGenerator for UnconfiguredVisualGenerator {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn render(&self, _workflow: &serde_json::Value) -> Result<RenderedVisual> {
        Err(Error::unavailable("visual_generation", "no rendering endpoint configured"))
    }
}

/// POSTs the workflow JSON and takes the response body as the visual.
pub struct HttpVisualGenerator {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpVisualGenerator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("visual client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl VisualGenerator for HttpVisualGenerator {
    fn name(&self) -> &str {
        "http"
    }

    async fn render(&self, workflow: &serde_json::Value) -> Result<RenderedVisual> {
        debug!("Rendering workflow visual via {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(workflow)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        operation: "visual_generation".into(),
                        elapsed_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    Error::unavailable("visual_generation", e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Visual service error {}: {}", status, body);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                Error::unavailable("visual_generation", format!("{}: {}", status, body))
            } else {
                Error::Internal(format!("visual service rejected request: {}: {}", status, body))
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/svg+xml")
            .to_string();
        let content = response
            .bytes()
            .await
            .map_err(|e| Error::unavailable("visual_generation", e.to_string()))?;

        Ok(RenderedVisual {
            content_type,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use strata_core::ErrorKind;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/render", addr)
    }

    #[tokio::test]
    async fn unconfigured_is_unavailable() {
        let generator = from_config(&VisualConfig::default()).unwrap();
        let err = generator.render(&serde_json::json!({})).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn http_generator_returns_body() {
        let router = Router::new().route(
            "/render",
            post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                (
                    [(axum::http::header::CONTENT_TYPE, "image/svg+xml")],
                    format!("<svg><title>{}</title></svg>", body["name"].as_str().unwrap_or("")),
                )
            }),
        );
        let endpoint = serve(router).await;
        let generator = HttpVisualGenerator::new(endpoint, Duration::from_secs(5)).unwrap();

        let visual = generator
            .render(&serde_json::json!({"name": "onboarding"}))
            .await
            .unwrap();
        assert_eq!(visual.content_type, "image/svg+xml");
        assert_eq!(&visual.content[..], b"<svg><title>onboarding</title></svg>");
    }

    #[tokio::test]
    async fn server_errors_are_unavailable() {
        let router = Router::new().route(
            "/render",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "renderer down") }),
        );
        let endpoint = serve(router).await;
        let generator = HttpVisualGenerator::new(endpoint, Duration::from_secs(5)).unwrap();
        let err = generator.render(&serde_json::json!({})).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
