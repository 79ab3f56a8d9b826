//! Managed Catalog Execution Engine
//!
//! Statements go to a managed query service speaking the Presto/Trino REST
//! statement protocol. Tables are resolved by a metadata catalog, which also
//! answers DESCRIBE directly.

use crate::athena::AthenaTranslator;
use crate::config::ManagedEngineConfig;
use crate::error::{BridgeError, Result};
use crate::execution::engine::{EngineKind, EngineOptions, ExecutionEngine};
use crate::execution::result::RowSet;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Column names and declared types of catalog tables
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    /// Ordered `(column, type)` pairs of `database.table`
    async fn table_types(&self, database: &str, table: &str) -> Result<Vec<(String, String)>>;
}

/// In-memory catalog, usually loaded from a JSON file of the form
/// `{"database": {"table": [{"name": "id", "type": "bigint"}]}}`
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    databases: BTreeMap<String, BTreeMap<String, Vec<CatalogColumn>>>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogColumn {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            BridgeError::Catalog(format!("Failed to open catalog {}: {}", path.display(), e))
        })?;
        let databases = serde_json::from_reader(file)?;
        Ok(Self { databases })
    }

    pub fn with_table<I, N, T>(mut self, database: &str, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        let columns = columns
            .into_iter()
            .map(|(name, column_type)| CatalogColumn {
                name: name.into(),
                column_type: column_type.into(),
            })
            .collect();
        self.databases
            .entry(database.to_string())
            .or_default()
            .insert(table.to_string(), columns);
        self
    }
}

#[async_trait]
impl MetadataCatalog for StaticCatalog {
    async fn table_types(&self, database: &str, table: &str) -> Result<Vec<(String, String)>> {
        let columns = self
            .databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .ok_or_else(|| {
                BridgeError::Catalog(format!("Table {}.{} not found in catalog", database, table))
            })?;
        Ok(columns
            .iter()
            .map(|c| (c.name.clone(), c.column_type.clone()))
            .collect())
    }
}

/// Submits SQL to the managed service
#[async_trait]
pub trait ManagedQueryService: Send + Sync {
    async fn run(&self, sql: &str, database: &str, workgroup: &str) -> Result<RowSet>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

// Statement protocol: POST /v1/statement with SQL as plain text, then follow
// nextUri until it disappears. Columns and data may arrive on any page.

const USER_HEADER: &str = "X-Trino-User";
const CATALOG_HEADER: &str = "X-Trino-Catalog";
const SCHEMA_HEADER: &str = "X-Trino-Schema";
const CLIENT_TAGS_HEADER: &str = "X-Trino-Client-Tags";

#[derive(Debug, Deserialize)]
struct StatementResponse {
    id: Option<String>,
    #[serde(rename = "nextUri")]
    next_uri: Option<String>,
    columns: Option<Vec<StatementColumn>>,
    data: Option<Vec<Vec<Value>>>,
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    message: String,
    #[serde(rename = "errorCode")]
    error_code: Option<u32>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
}

impl StatementError {
    /// Failures of the service itself, as opposed to problems with the statement
    fn is_transient(&self) -> bool {
        matches!(self.error_type.as_deref(), Some("INTERNAL_ERROR"))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StatementColumn {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

/// Limits for following a statement through its result pages
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub max_polls: usize,
    /// Extra attempts per page after a transient failure
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// The n-th poll waits `n * poll_step`, capped at ten steps
    pub poll_step: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_polls: 10_000,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            poll_step: Duration::from_millis(100),
        }
    }
}

impl PollPolicy {
    fn delay_after(&self, poll: usize) -> Duration {
        self.poll_step * poll.min(10) as u32
    }
}

/// What one HTTP exchange produced
enum PageOutcome {
    Page(StatementResponse),
    Transient(String),
    Fatal(BridgeError),
}

async fn read_page(response: reqwest::Response) -> PageOutcome {
    let status = response.status();
    if status.is_server_error() {
        return PageOutcome::Transient(format!("status {}", status));
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return PageOutcome::Fatal(BridgeError::Execution(format!(
            "Managed service answered {}: {}",
            status, text
        )));
    }

    match response.json::<StatementResponse>().await {
        Err(e) => PageOutcome::Transient(format!("unreadable page: {}", e)),
        Ok(page) => match &page.error {
            Some(error) if error.is_transient() => PageOutcome::Transient(error.message.clone()),
            Some(error) => PageOutcome::Fatal(query_error(error)),
            None => PageOutcome::Page(page),
        },
    }
}

/// REST client for the managed service
pub struct StatementClient {
    client: Client,
    coordinator_url: String,
    catalog: String,
    user: String,
    timeout: Duration,
    policy: PollPolicy,
}

impl StatementClient {
    pub fn new(config: &ManagedEngineConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| BridgeError::Execution(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            coordinator_url: config.coordinator_url.trim_end_matches('/').to_string(),
            catalog: config.catalog.clone(),
            user: config.user.clone(),
            timeout,
            policy: PollPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn page_url(&self, next_uri: &str) -> String {
        if next_uri.starts_with("http://") || next_uri.starts_with("https://") {
            next_uri.to_string()
        } else {
            format!("{}{}", self.coordinator_url, next_uri)
        }
    }

    /// Submission is not idempotent, so it is never retried.
    async fn submit(&self, sql: &str, database: &str, workgroup: &str) -> Result<StatementResponse> {
        let response = self
            .client
            .post(format!("{}/v1/statement", self.coordinator_url))
            .header(USER_HEADER, &self.user)
            .header(CATALOG_HEADER, &self.catalog)
            .header(SCHEMA_HEADER, database)
            .header(CLIENT_TAGS_HEADER, workgroup)
            .header("Content-Type", "text/plain")
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| BridgeError::Execution(format!("Failed to submit query: {}", e)))?;

        match read_page(response).await {
            PageOutcome::Page(page) => Ok(page),
            PageOutcome::Fatal(e) => Err(e),
            PageOutcome::Transient(reason) => Err(BridgeError::Execution(format!(
                "Query submission failed: {}",
                reason
            ))),
        }
    }

    async fn fetch(&self, next_uri: &str) -> Result<StatementResponse> {
        let url = self.page_url(next_uri);
        let mut attempt = 0;
        loop {
            let outcome = match self.client.get(&url).header(USER_HEADER, &self.user).send().await {
                Ok(response) => read_page(response).await,
                Err(e) if e.is_timeout() || e.is_connect() => PageOutcome::Transient(e.to_string()),
                Err(e) => PageOutcome::Fatal(BridgeError::Execution(format!(
                    "Failed to fetch results: {}",
                    e
                ))),
            };

            match outcome {
                PageOutcome::Page(page) => return Ok(page),
                PageOutcome::Fatal(e) => return Err(e),
                PageOutcome::Transient(reason) if attempt < self.policy.max_retries => {
                    attempt += 1;
                    warn!(
                        "Transient failure on {} ({}), retry {}/{}",
                        url, reason, attempt, self.policy.max_retries
                    );
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                PageOutcome::Transient(reason) => {
                    return Err(BridgeError::Execution(format!(
                        "Giving up on {} after {} retries: {}",
                        url, attempt, reason
                    )))
                }
            }
        }
    }
}

fn query_error(error: &StatementError) -> BridgeError {
    BridgeError::Execution(format!(
        "Query error: {} (code: {:?})",
        error.message, error.error_code
    ))
}

/// Non-finite doubles arrive as strings; report them as null like other missing values.
fn normalize_value(column_type: &str, value: Value) -> Value {
    let floating = matches!(column_type, "double" | "real");
    match value {
        Value::String(s) if floating && matches!(s.as_str(), "NaN" | "Infinity" | "-Infinity") => {
            Value::Null
        }
        other => other,
    }
}

fn rows_from_pages(columns: &[StatementColumn], data: Vec<Vec<Value>>) -> RowSet {
    let rows = data
        .into_iter()
        .map(|row| {
            let mut values = row.into_iter();
            columns
                .iter()
                .map(|col| normalize_value(&col.column_type, values.next().unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    RowSet::new(columns.iter().map(|c| c.name.clone()).collect(), rows)
}

#[async_trait]
impl ManagedQueryService for StatementClient {
    async fn run(&self, sql: &str, database: &str, workgroup: &str) -> Result<RowSet> {
        let start = Instant::now();
        let mut page = self.submit(sql, database, workgroup).await?;
        let query_id = page.id.clone().unwrap_or_else(|| "?".to_string());
        info!("Managed query submitted: {}", query_id);

        let mut columns: Option<Vec<StatementColumn>> = None;
        let mut data = Vec::new();
        let mut polls = 0usize;

        loop {
            if columns.is_none() {
                columns = page.columns.take();
            }
            data.extend(page.data.take().unwrap_or_default());

            let Some(next_uri) = page.next_uri.take() else { break };
            if start.elapsed() >= self.timeout {
                return Err(BridgeError::Execution(format!(
                    "Query {} timed out after {}ms",
                    query_id,
                    self.timeout.as_millis()
                )));
            }
            if polls >= self.policy.max_polls {
                return Err(BridgeError::Execution(format!(
                    "Query {} exceeded max polls ({})",
                    query_id, self.policy.max_polls
                )));
            }

            polls += 1;
            page = self.fetch(&next_uri).await?;
            tokio::time::sleep(self.policy.delay_after(polls)).await;
        }

        // Statements without a result set (DDL) report no columns
        let columns = columns.unwrap_or_default();
        debug!("Managed query {} returned {} rows after {} polls", query_id, data.len(), polls);
        Ok(rows_from_pages(&columns, data))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/v1/info", self.coordinator_url);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                error!("Managed service health check failed: status {}", response.status());
                Ok(false)
            }
            Err(e) => {
                error!("Managed service health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Managed catalog engine: DESCRIBE via catalog, everything else via the service
pub struct ManagedCatalogEngine {
    service: Arc<dyn ManagedQueryService>,
    catalog: Arc<dyn MetadataCatalog>,
    default_database: String,
    default_workgroup: String,
}

impl ManagedCatalogEngine {
    pub fn new(service: Arc<dyn ManagedQueryService>, catalog: Arc<dyn MetadataCatalog>) -> Self {
        let defaults = ManagedEngineConfig::default();
        Self {
            service,
            catalog,
            default_database: defaults.default_database,
            default_workgroup: defaults.default_workgroup,
        }
    }

    pub fn with_defaults(mut self, database: impl Into<String>, workgroup: impl Into<String>) -> Self {
        self.default_database = database.into();
        self.default_workgroup = workgroup.into();
        self
    }

    /// Wire the REST client and the file catalog from configuration.
    pub fn from_config(config: &ManagedEngineConfig) -> Result<Self> {
        let service = Arc::new(StatementClient::new(config)?);
        let catalog = match &config.catalog_file {
            Some(path) => StaticCatalog::from_file(path)?,
            None => StaticCatalog::new(),
        };
        Ok(Self::new(service, Arc::new(catalog))
            .with_defaults(&config.default_database, &config.default_workgroup))
    }

    pub fn catalog(&self) -> &dyn MetadataCatalog {
        self.catalog.as_ref()
    }

    /// Database a non-DESCRIBE statement runs in
    pub fn resolve_database(&self, statement: &str, options: &EngineOptions) -> String {
        if let Some(database) = options.database() {
            return database.to_string();
        }
        match AthenaTranslator::extract_database(statement) {
            Some(database) => {
                info!("Auto-extracted database from query: {}", database);
                database
            }
            None => self.default_database.clone(),
        }
    }
}

#[async_trait]
impl ExecutionEngine for ManagedCatalogEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::ManagedCatalog
    }

    async fn execute(&self, statement: &str, options: &EngineOptions) -> Result<RowSet> {
        if let Some(target) = AthenaTranslator::detect_describe(statement) {
            let database = target
                .database
                .as_deref()
                .or_else(|| options.database())
                .ok_or_else(|| {
                    BridgeError::InvalidInput("Database must be specified for DESCRIBE query".to_string())
                })?;
            info!("Executing DESCRIBE via catalog: {}.{}", database, target.table);
            return AthenaTranslator::describe_via_catalog(self.catalog.as_ref(), database, &target.table)
                .await;
        }

        let rewritten = AthenaTranslator::rewrite_table_references(statement);
        debug!("Transformed query: {}", rewritten);
        let database = self.resolve_database(&rewritten, options);
        let workgroup = options.workgroup().unwrap_or(&self.default_workgroup);

        info!("Executing managed query in {} ({}): {}", database, workgroup, rewritten);
        self.service.run(&rewritten, &database, workgroup).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.service.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::{DATABASE_OPTION, WORKGROUP_OPTION};
    use std::sync::Mutex;

    /// Records every submission and answers with a fixed row
    #[derive(Default)]
    struct RecordingService {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ManagedQueryService for RecordingService {
        async fn run(&self, sql: &str, database: &str, workgroup: &str) -> Result<RowSet> {
            self.calls
                .lock()
                .unwrap()
                .push((sql.to_string(), database.to_string(), workgroup.to_string()));
            Ok(RowSet::new(vec!["n".to_string()], vec![vec![Value::from(1)]]))
        }
    }

    fn engine(service: Arc<RecordingService>) -> ManagedCatalogEngine {
        let catalog = StaticCatalog::new().with_table("sales", "orders", vec![("id", "bigint")]);
        ManagedCatalogEngine::new(service, Arc::new(catalog)).with_defaults("fallback", "primary")
    }

    #[tokio::test]
    async fn test_rewrites_and_extracts_database() {
        let service = Arc::new(RecordingService::default());
        let engine = engine(Arc::clone(&service));

        engine
            .execute("SELECT * FROM AwsDataCatalog.sales.orders", &EngineOptions::new())
            .await
            .unwrap();

        let calls = service.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            (
                "SELECT * FROM sales.orders".to_string(),
                "sales".to_string(),
                "primary".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_request_database_wins_then_default() {
        let service = Arc::new(RecordingService::default());
        let engine = engine(Arc::clone(&service));

        let options = EngineOptions::new()
            .with(DATABASE_OPTION, "web")
            .with(WORKGROUP_OPTION, "analysts");
        engine.execute("SELECT * FROM sales.orders", &options).await.unwrap();
        engine.execute("SELECT 1", &EngineOptions::new()).await.unwrap();

        let calls = service.calls.lock().unwrap();
        assert_eq!(calls[0].1, "web");
        assert_eq!(calls[0].2, "analysts");
        assert_eq!(calls[1].1, "fallback");
    }

    #[tokio::test]
    async fn test_describe_uses_catalog_not_service() {
        let service = Arc::new(RecordingService::default());
        let engine = engine(Arc::clone(&service));

        let rows = engine
            .execute("DESCRIBE orders", &EngineOptions::new().with(DATABASE_OPTION, "sales"))
            .await
            .unwrap();
        assert_eq!(rows.rows[0][1], Value::from("BIGINT"));

        let err = engine.execute("DESCRIBE orders", &EngineOptions::new()).await;
        assert!(err.is_err());
        assert!(service.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_static_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"sales": {"orders": [{"name": "id", "type": "bigint"}, {"name": "total", "type": "double"}]}}"#,
        )
        .unwrap();

        let catalog = StaticCatalog::from_file(&path).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let columns = rt.block_on(catalog.table_types("sales", "orders")).unwrap();
        assert_eq!(
            columns,
            vec![
                ("id".to_string(), "bigint".to_string()),
                ("total".to_string(), "double".to_string())
            ]
        );
        assert!(rt.block_on(catalog.table_types("sales", "missing")).is_err());
    }

    #[test]
    fn test_rows_from_pages_normalizes_non_finite() {
        let columns = vec![
            StatementColumn { name: "x".into(), column_type: "double".into() },
            StatementColumn { name: "s".into(), column_type: "varchar".into() },
        ];
        let rows = rows_from_pages(
            &columns,
            vec![
                vec![Value::from("NaN"), Value::from("NaN")],
                vec![Value::from(1.5)],
            ],
        );
        assert_eq!(rows.column_names, vec!["x", "s"]);
        assert_eq!(rows.rows[0], vec![Value::Null, Value::from("NaN")]);
        assert_eq!(rows.rows[1], vec![Value::from(1.5), Value::Null]);
    }
}
