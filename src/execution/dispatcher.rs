//! Query Dispatcher - single entry point for every request
//!
//! Validates the request, runs the permission hook, hands the statement to
//! the engine registered for its kind and wraps whatever comes back into a
//! uniform `QueryResult`. Request-level failures (bad input, denied
//! permission) are `Err`; anything an engine raises becomes an error result.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::execution::embedded::{DataDirConnectionFactory, EmbeddedEngine};
use crate::execution::engine::{EngineKind, ExecutionEngine, QueryPayload, QueryRequest};
use crate::execution::managed::ManagedCatalogEngine;
use crate::execution::result::QueryResult;
use crate::execution::versioned::{CachingTableResolver, VersionedTableEngine};
use crate::security::{AllowAll, PermissionCheck, ReadOnlyGuard};
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub struct QueryDispatcher {
    engines: HashMap<EngineKind, Arc<dyn ExecutionEngine>>,
    permissions: Arc<dyn PermissionCheck>,
}

impl QueryDispatcher {
    /// Dispatcher with no engines; add them with `with_engine`.
    pub fn new(permissions: Arc<dyn PermissionCheck>) -> Self {
        Self {
            engines: HashMap::new(),
            permissions,
        }
    }

    /// Register `engine` for the kind it reports, replacing any previous one.
    pub fn with_engine(mut self, engine: Arc<dyn ExecutionEngine>) -> Self {
        self.engines.insert(engine.kind(), engine);
        self
    }

    /// All three engines wired from configuration
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let permissions: Arc<dyn PermissionCheck> = if config.read_only {
            Arc::new(ReadOnlyGuard::new())
        } else {
            Arc::new(AllowAll)
        };

        let embedded = EmbeddedEngine::new(Arc::new(DataDirConnectionFactory::new(
            config.data_dir.clone(),
        )));
        let managed = ManagedCatalogEngine::from_config(&config.managed)?;
        let versioned = VersionedTableEngine::new(Arc::new(CachingTableResolver::new()));

        Ok(Self::new(permissions)
            .with_engine(Arc::new(embedded))
            .with_engine(Arc::new(managed))
            .with_engine(Arc::new(versioned)))
    }

    pub fn available_engines(&self) -> Vec<EngineKind> {
        self.engines
            .keys()
            .copied()
            .sorted_by_key(|kind| kind.as_str())
            .collect()
    }

    fn engine(&self, kind: EngineKind) -> Result<&Arc<dyn ExecutionEngine>> {
        self.engines.get(&kind).ok_or_else(|| {
            BridgeError::InvalidInput(format!("Engine '{}' is not configured", kind))
        })
    }

    /// Parse a wire payload and execute it.
    pub async fn execute_payload(&self, payload: QueryPayload) -> Result<QueryResult> {
        let request = QueryRequest::try_from(payload)?;
        self.execute(request).await
    }

    pub async fn execute(&self, request: QueryRequest) -> Result<QueryResult> {
        let start = Instant::now();

        request.validate()?;
        let engine = self.engine(request.engine)?;
        self.permissions.check(&request.statement)?;

        let span = info_span!("query", request_id = %Uuid::new_v4(), engine = %request.engine);
        let outcome = async {
            info!("Dispatching query: {}", request.statement);
            engine.execute(&request.statement, &request.options).await
        }
        .instrument(span.clone())
        .await;

        let elapsed = start.elapsed().as_secs_f64();
        Ok(span.in_scope(|| match outcome {
            Ok(rows) => {
                info!("Query returned {} rows in {:.3}s", rows.row_count(), elapsed);
                QueryResult::success(rows, elapsed)
            }
            Err(e) => {
                error!("Query failed after {:.3}s: {}", elapsed, e);
                QueryResult::failure(e.to_string(), elapsed)
            }
        }))
    }

    pub async fn health_check(&self, kind: EngineKind) -> Result<bool> {
        self.engine(kind)?.health_check().await
    }
}
