//! Graph store: embedded engine, exclusive-access lock, declarative
//! schema and versioned migrations.

pub mod lock;
pub mod migrations;
pub mod schema;
pub mod store;

pub use lock::StoreLock;
pub use migrations::{CODE_SCHEMA_VERSION, Migration, MigrationRunner, MigrationStep, open_and_migrate};
pub use schema::{ColumnType, RelationDef, SchemaDef};
pub use store::{
    CompactionStats, GraphStore, Params, Rows, Tx, VectorIndexParams, compact, params,
};
