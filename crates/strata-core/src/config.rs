//! Strata configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use crate::error::{Error, Result};
use crate::types::MaterializationPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub gateway: GatewayConfig,
    pub foundation: FoundationConfig,
    /// Retry policy per abstraction.
    pub retry: RetryConfig,
    pub materialization: MaterializationPolicy,
    pub indexes: IndexConfig,
    pub visual: VisualConfig,
    pub runtime: RuntimeConfig,
}

// ============================================================
// Gateway
// ============================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bind: BindMode,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_port() -> u16 {
    18800
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: BindMode::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    #[default]
    Loopback,
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    pub token: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    None,
    Token,
}

// ============================================================
// Foundation
// ============================================================

/// Which technology backs one adapter slot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum AdapterBackend {
    Memory,
    /// Directory-backed store. Without `root` it lives under `data_dir`.
    LocalFs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<PathBuf>,
    },
}

impl AdapterBackend {
    pub fn local_fs() -> Self {
        Self::LocalFs { root: None }
    }

    pub fn local_fs_at(root: impl Into<PathBuf>) -> Self {
        Self::LocalFs {
            root: Some(root.into()),
        }
    }
}

impl Default for AdapterBackend {
    fn default() -> Self {
        Self::local_fs()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoundationConfig {
    pub data_dir: PathBuf,
    pub object_store: AdapterBackend,
    pub metadata_store: AdapterBackend,
    pub graph_store: AdapterBackend,
}

impl Default for FoundationConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("strata-data"),
            object_store: AdapterBackend::local_fs(),
            metadata_store: AdapterBackend::local_fs(),
            graph_store: AdapterBackend::local_fs(),
        }
    }
}

impl FoundationConfig {
    /// Every slot in memory. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            object_store: AdapterBackend::Memory,
            metadata_store: AdapterBackend::Memory,
            graph_store: AdapterBackend::Memory,
            ..Self::default()
        }
    }

    /// Filesystem root for a slot, if the slot is filesystem-backed.
    pub fn root_for(&self, backend: &AdapterBackend, slot: &str) -> Option<PathBuf> {
        match backend {
            AdapterBackend::Memory => None,
            AdapterBackend::LocalFs { root: Some(root) } => Some(root.clone()),
            AdapterBackend::LocalFs { root: None } => Some(self.data_dir.join(slot)),
        }
    }
}

// ============================================================
// Retry
// ============================================================

/// Bounded exponential backoff for one abstraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Wall-clock limit for all attempts together. 0 disables it.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 50,
            backoff_cap_ms: 2_000,
            timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_base_ms: 0,
            backoff_cap_ms: 0,
            timeout_ms: 0,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub state: RetryPolicy,
    pub file_storage: RetryPolicy,
    pub graph: RetryPolicy,
}

// ============================================================
// Indexes and collaborators
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maintain `file_id -> FileReference` so files resolve without session context.
    pub file_id: bool,
    /// Maintain `artifact_id -> file_reference` for direct artifact retrieval.
    pub artifact: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            file_id: true,
            artifact: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Rendering service endpoint. Unset means visual generation is unavailable.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Executions allowed to run at once. Others wait in `pending`.
    pub max_concurrent_executions: usize,
    /// Compare-and-swap attempts for one execution record update.
    pub status_update_attempts: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 64,
            status_update_attempts: 16,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl StrataConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{} - using defaults", e);
                Self::default()
            }
        }
    }

    /// Like [`StrataConfig::load`], but a file that exists and fails to parse
    /// is an error instead of a silent fallback.
    pub fn try_load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    Error::InvalidInput(format!("Failed to parse {}: {}", path.display(), e))
                })?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {} - using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::InvalidInput(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Apply `STRATA_*` environment overrides on top of file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("STRATA_DATA_DIR") {
            self.foundation.data_dir = PathBuf::from(dir);
        }
        if let Ok(token) = std::env::var("STRATA_GATEWAY_TOKEN") {
            self.gateway.auth.token = Some(token);
        }
        if let Ok(endpoint) = std::env::var("STRATA_VISUAL_ENDPOINT") {
            self.visual.endpoint = Some(endpoint);
        }
        self
    }

    /// Render the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
