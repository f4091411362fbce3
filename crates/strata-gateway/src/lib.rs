//! Strata Gateway - HTTP API for intents, executions and artifacts

pub mod auth;
pub mod error;
pub mod server;

pub use auth::ResolvedAuth;
pub use error::ApiError;
pub use server::{router, serve, AppState, SubmitRequest, SubmitResponse, TOKEN_ENV};
