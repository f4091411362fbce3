//! Strata Core - Types, protocols, configuration and error handling

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::*;
pub use error::{Compensation, Error, ErrorKind, Result};
pub use protocol::*;
pub use types::*;
