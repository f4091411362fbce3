//! Lifecycle shared by every adapter.

use crate::error::AdapterResult;

#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    /// Slot name used in logs, e.g. "object_store".
    fn name(&self) -> &str;

    /// Technology identifier, e.g. "memory" or "local_fs".
    fn technology(&self) -> &str;

    async fn health_check(&self) -> AdapterResult<()>;

    /// Release resources. Calls after shutdown fail with `Unavailable`.
    async fn shutdown(&self) -> AdapterResult<()>;
}
