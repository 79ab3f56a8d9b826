pub mod dispatcher;
pub mod embedded;
pub mod engine;
pub mod managed;
pub mod result;
pub mod versioned;

pub use dispatcher::QueryDispatcher;
pub use embedded::{ConnectionFactory, DataDirConnectionFactory, EmbeddedConnection, EmbeddedEngine};
pub use engine::{EngineKind, EngineOptions, ExecutionEngine, QueryPayload, QueryRequest};
pub use managed::{
    ManagedCatalogEngine, ManagedQueryService, MetadataCatalog, PollPolicy, StatementClient,
    StaticCatalog,
};
pub use result::{QueryResult, QueryStatus, RowSet};
pub use versioned::{CachingTableResolver, TableClientResolver, VersionedTableEngine};
