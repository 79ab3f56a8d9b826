use async_trait::async_trait;
use polars::prelude::*;
use query_bridge::error::{BridgeError, Result};
use query_bridge::execution::{
    CachingTableResolver, ConnectionFactory, DataDirConnectionFactory, EmbeddedConnection,
    EmbeddedEngine, ManagedCatalogEngine, ManagedQueryService, QueryStatus, RowSet, StaticCatalog,
    TableClientResolver, VersionedTableEngine,
};
use query_bridge::security::{AllowAll, ReadOnlyGuard};
use query_bridge::table::LocalTableStore;
use query_bridge::{QueryDispatcher, QueryPayload};
use serde_json::Value;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn payload(query: &str, engine: Option<&str>) -> QueryPayload {
    QueryPayload {
        query: Some(query.to_string()),
        query_engine: engine.map(str::to_string),
        ..Default::default()
    }
}

/// Connection factory that counts how often it is asked for a connection
fn counting_factory(counter: Arc<AtomicUsize>) -> Arc<dyn ConnectionFactory> {
    Arc::new(move || -> Result<EmbeddedConnection> {
        counter.fetch_add(1, Ordering::SeqCst);
        let mut conn = EmbeddedConnection::new();
        conn.register("nums", df!["n" => [1i64, 2, 3]]?.lazy());
        Ok(conn)
    })
}

fn write_orders(dir: &Path) {
    let mut orders = df![
        "order_id" => [1i64, 2, 3],
        "region" => ["north", "south", "north"],
        "amount" => [10.0f64, 20.0, 30.0],
    ]
    .unwrap();
    let mut file = File::create(dir.join("orders.parquet")).unwrap();
    ParquetWriter::new(&mut file).finish(&mut orders).unwrap();
}

#[tokio::test]
async fn unknown_engine_never_touches_connection_factory() {
    let counter = Arc::new(AtomicUsize::new(0));
    let dispatcher = QueryDispatcher::new(Arc::new(AllowAll))
        .with_engine(Arc::new(EmbeddedEngine::new(counting_factory(counter.clone()))));

    let err = dispatcher
        .execute_payload(payload("SELECT * FROM nums", Some("spark")))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::InvalidInput(_)));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn permission_rejection_happens_before_dispatch() {
    let counter = Arc::new(AtomicUsize::new(0));
    let dispatcher = QueryDispatcher::new(Arc::new(ReadOnlyGuard::new()))
        .with_engine(Arc::new(EmbeddedEngine::new(counting_factory(counter.clone()))));

    let err = dispatcher
        .execute_payload(payload("DELETE FROM nums", Some("duckdb")))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::PermissionDenied(_)));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn embedded_queries_get_a_fresh_connection_each() {
    let counter = Arc::new(AtomicUsize::new(0));
    let dispatcher = QueryDispatcher::new(Arc::new(AllowAll))
        .with_engine(Arc::new(EmbeddedEngine::new(counting_factory(counter.clone()))));

    for _ in 0..2 {
        let result = dispatcher
            .execute_payload(payload("SELECT MAX(n) AS top FROM nums", None))
            .await
            .unwrap();
        assert_eq!(result.rows, vec![vec![Value::from(3)]]);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn embedded_engine_over_data_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_orders(dir.path());
    let dispatcher = QueryDispatcher::new(Arc::new(AllowAll)).with_engine(Arc::new(
        EmbeddedEngine::new(Arc::new(DataDirConnectionFactory::new(dir.path()))),
    ));

    let result = dispatcher
        .execute_payload(payload(
            "SELECT region, SUM(amount) AS total FROM orders GROUP BY region ORDER BY region",
            Some("duckdb"),
        ))
        .await
        .unwrap();

    assert_eq!(result.status, QueryStatus::Success);
    assert_eq!(result.column_names, vec!["region", "total"]);
    assert_eq!(
        result.rows,
        vec![
            vec![Value::from("north"), Value::from(40.0)],
            vec![Value::from("south"), Value::from(20.0)],
        ]
    );
}

#[tokio::test]
async fn engine_errors_become_error_results() {
    let dir = tempfile::tempdir().unwrap();
    write_orders(dir.path());
    let dispatcher = QueryDispatcher::new(Arc::new(AllowAll)).with_engine(Arc::new(
        EmbeddedEngine::new(Arc::new(DataDirConnectionFactory::new(dir.path()))),
    ));

    let result = dispatcher
        .execute_payload(payload("SELECT * FROM no_such_table", None))
        .await
        .unwrap();

    assert_eq!(result.status, QueryStatus::Error);
    assert!(result.error.is_some());
    assert!(result.column_names.is_empty());
    assert!(result.rows.is_empty());

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["status"], "error");
    assert!(json["runtime"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn versioned_table_snapshot_is_built_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalTableStore::new(dir.path());
    store
        .create_table(
            "events",
            &mut df!["id" => [1i64, 2, 3], "kind" => ["a", "b", "a"]].unwrap(),
            None,
        )
        .unwrap();
    let table_path = dir.path().join("events.vtable").to_string_lossy().to_string();

    let resolver = Arc::new(CachingTableResolver::new());
    let dispatcher = QueryDispatcher::new(Arc::new(AllowAll))
        .with_engine(Arc::new(VersionedTableEngine::new(resolver.clone())));

    let request = |sql: &str| QueryPayload {
        query: Some(sql.to_string()),
        query_engine: Some("lance".to_string()),
        table_path: Some(table_path.clone()),
        ..Default::default()
    };

    let first = dispatcher
        .execute_payload(request("SELECT kind, COUNT(*) AS n FROM lance_table GROUP BY kind ORDER BY kind"))
        .await
        .unwrap();
    let second = dispatcher
        .execute_payload(request("SELECT kind, COUNT(*) AS n FROM lance_table GROUP BY kind ORDER BY kind"))
        .await
        .unwrap();

    assert_eq!(first.column_names, second.column_names);
    assert_eq!(first.rows, second.rows);
    assert_eq!(resolver.resolve(&table_path).unwrap().conversion_count(), 1);

    let bad = dispatcher.execute_payload(request("SELEC nonsense")).await.unwrap();
    assert_eq!(bad.status, QueryStatus::Error);
}

#[tokio::test]
async fn versioned_table_path_must_carry_suffix() {
    let dispatcher = QueryDispatcher::new(Arc::new(AllowAll))
        .with_engine(Arc::new(VersionedTableEngine::new(Arc::new(CachingTableResolver::new()))));

    let err = dispatcher
        .execute_payload(QueryPayload {
            query: Some("SELECT 1".to_string()),
            query_engine: Some("lance".to_string()),
            table_path: Some("/tmp/events".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidInput(_)));
}

#[derive(Default)]
struct FakeService {
    submitted: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ManagedQueryService for FakeService {
    async fn run(&self, sql: &str, database: &str, _workgroup: &str) -> Result<RowSet> {
        self.submitted
            .lock()
            .unwrap()
            .push((sql.to_string(), database.to_string()));
        if sql.contains("broken") {
            return Err(BridgeError::Execution("TABLE_NOT_FOUND".to_string()));
        }
        Ok(RowSet::new(vec!["total".to_string()], vec![vec![Value::from(42)]]))
    }
}

#[tokio::test]
async fn managed_engine_round_trip() {
    let service = Arc::new(FakeService::default());
    let catalog = StaticCatalog::new().with_table(
        "sales",
        "orders",
        vec![("order_id", "bigint"), ("placed", "timestamp")],
    );
    let engine = ManagedCatalogEngine::new(service.clone(), Arc::new(catalog));
    let dispatcher = QueryDispatcher::new(Arc::new(AllowAll)).with_engine(Arc::new(engine));

    let result = dispatcher
        .execute_payload(payload(
            "SELECT SUM(x) AS total FROM AwsDataCatalog.sales.orders",
            Some("athena"),
        ))
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![Value::from(42)]]);

    let describe = dispatcher
        .execute_payload(payload("DESCRIBE sales.orders", Some("athena")))
        .await
        .unwrap();
    assert_eq!(describe.column_names, vec!["col_name", "data_type", "comment"]);
    assert_eq!(
        describe.rows[1],
        vec![Value::from("placed"), Value::from("TIMESTAMP"), Value::from("")]
    );

    let failed = dispatcher
        .execute_payload(payload("SELECT * FROM sales.broken", Some("athena")))
        .await
        .unwrap();
    assert_eq!(failed.status, QueryStatus::Error);

    let submitted = service.submitted.lock().unwrap();
    assert_eq!(
        submitted[0],
        ("SELECT SUM(x) AS total FROM sales.orders".to_string(), "sales".to_string())
    );
    assert_eq!(submitted.len(), 2);
}
