//! Multi-engine query bridge
//!
//! One SQL statement in, one uniform column/row result out, whichever engine
//! runs it: the embedded polars SQL engine, a managed catalog-backed query
//! service, or a versioned table exposed through the embedded engine.

pub mod athena;
pub mod config;
pub mod embedding;
pub mod error;
pub mod execution;
pub mod observability;
pub mod security;
pub mod table;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use execution::{EngineKind, QueryDispatcher, QueryPayload, QueryRequest, QueryResult};
