//! Synapta: a code knowledge engine.
//!
//! Ingests a source repository, parses it (through an external parser
//! collaborator) into a typed entity graph, stores the graph in an
//! embedded database, enriches it with semantic signals and serves
//! read queries to external consumers.

pub mod analysis;
pub mod config;
pub mod error;
pub mod extract;
pub mod feedback;
pub mod ident;
pub mod indexer;
pub mod link;
pub mod logging;
pub mod model;
pub mod parsing;
pub mod project;
pub mod providers;
pub mod query;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod watcher;

pub use config::Settings;
pub use error::{IndexError, IndexResult, StoreError, StoreResult};
pub use extract::{EntityExtractor, ExtractionResult};
pub use indexer::{Indexer, IndexingProgressEvent, IndexingReport};
pub use link::Linker;
pub use model::RowBatch;
pub use parsing::{UceParser, UceTree};
pub use project::{ProjectDetector, Scanner};
pub use query::QueryService;
pub use storage::{GraphStore, MigrationRunner, SchemaDef};
pub use types::{EntityId, EntityKind, Language, Range};
