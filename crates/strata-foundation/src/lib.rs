//! Strata Foundation - abstractions over adapters, wired by one composition root
//!
//! Orchestrators never touch an adapter. They ask the [`FoundationService`]
//! for an abstraction by protocol and work through that trait only.

pub mod file_storage;
pub mod graph;
pub mod retry;
pub mod service;
pub mod state;
pub mod testing;

pub use file_storage::{sha256_hex, FileStorageAbstraction};
pub use graph::GraphAbstraction;
pub use retry::{normalize, unavailable_only, Retrier};
pub use service::{
    in_memory_config, AbstractionHandle, AdapterHealth, FoundationBuilder, FoundationService,
    HealthReport,
};
pub use state::StateAbstraction;
