pub mod config;
pub mod datalayer;
pub mod error;
pub mod query;
pub mod storage;

pub use config::ArangoConfig;
pub use datalayer::{
    CollectionPerResource, DataLayer, DataLayerSettings, Datasource, Documents, Domain, Lookup,
    ParsedRequest, ResourceResolver,
};
pub use error::{DbError, DbResult};
pub use query::{compile, parse_sort, scan, scan_where, CompiledQuery, QueryBuilder, QueryPlan};
pub use storage::{
    CountSource, Cursor, Document, Engine, HttpEngine, InsertResult, MemoryEngine, ResultSet,
    RevisionResult, Value,
};
