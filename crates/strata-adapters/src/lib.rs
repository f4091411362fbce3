//! strata-adapters: thin bindings to concrete storage technologies.
//!
//! Each adapter translates calls 1:1 into its technology and maps native
//! failures onto [`AdapterError`]. No business rules live here: validation,
//! retries and cross-store consistency belong to the abstractions that own
//! these adapters.

pub mod adapter;
pub mod document_store;
pub mod error;
pub mod graph_store;
pub mod object_store;

mod fs_util;

pub use adapter::Adapter;
pub use document_store::{
    Document, DocumentStoreAdapter, LocalFsDocumentStore, MemoryDocumentStore, WritePrecondition,
};
pub use error::{AdapterError, AdapterResult};
pub use graph_store::{
    Direction, GraphEdge, GraphNode, GraphStoreAdapter, LocalFsGraphStore, MemoryGraphStore,
};
pub use object_store::{LocalFsObjectStore, MemoryObjectStore, ObjectMeta, ObjectStoreAdapter};
