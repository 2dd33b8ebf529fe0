//! Versioned schema migrations.
//!
//! The runner owns the `schema_version` singleton relation (the
//! generator is forbidden from declaring it) and applies an ordered
//! list of `up`/`down` steps. Scripted steps commit atomically with
//! the version update; engine-level steps (index and relation
//! management) cannot be buffered in a transaction, so their version
//! row is written immediately after the step succeeds.

use crate::error::{IndexError, IndexResult, StoreError, StoreResult};
use crate::storage::schema::{SchemaDef, VERSION_RELATION};
use crate::storage::store::{GraphStore, Params, Tx, VectorIndexParams, params};
use cozo::DataValue;

/// Schema version this build writes.
pub const CODE_SCHEMA_VERSION: i64 = 2;

/// Name of the embedding vector index created by migration 2.
pub const EMBEDDING_INDEX: &str = "vec_idx";

type ScriptedFn = Box<dyn Fn(&GraphStore, &Tx) -> StoreResult<()> + Send + Sync>;
type EngineFn = Box<dyn Fn(&GraphStore) -> StoreResult<()> + Send + Sync>;

/// One direction of a migration.
pub enum MigrationStep {
    /// DDL/data scripts; run inside the step transaction and committed
    /// atomically with the version update.
    Scripted(ScriptedFn),
    /// Engine-level operations (vector indexes, relation removal).
    Engine(EngineFn),
}

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: MigrationStep,
    pub down: MigrationStep,
}

pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    /// Build a runner from an ordered migration list.
    pub fn new(migrations: Vec<Migration>) -> StoreResult<Self> {
        let mut last = 0;
        for m in &migrations {
            if m.version <= last {
                return Err(StoreError::Schema {
                    reason: format!(
                        "migration versions must be strictly ascending (saw {} after {})",
                        m.version, last
                    ),
                });
            }
            last = m.version;
        }
        Ok(Self { migrations })
    }

    /// The standard migration chain for this build.
    pub fn core(embedding_dimensions: usize) -> Self {
        let schema = SchemaDef::core_with_dimensions(embedding_dimensions);

        let create_schema = schema.clone();
        let drop_schema = schema;

        let migrations = vec![
            Migration {
                version: 1,
                name: "core graph schema",
                up: MigrationStep::Scripted(Box::new(move |_store, tx| {
                    create_schema.validate()?;
                    for rel in create_schema.relations() {
                        tx.execute(&rel.create_ddl(), Params::new())?;
                    }
                    Ok(())
                })),
                down: MigrationStep::Engine(Box::new(move |store| {
                    let mut names = drop_schema.relation_names();
                    names.reverse();
                    for name in names {
                        if store.relation_exists(name)? {
                            store.execute(&format!("::remove {name}"), Params::new())?;
                        }
                    }
                    Ok(())
                })),
            },
            Migration {
                version: 2,
                name: "embedding vector index",
                up: MigrationStep::Engine(Box::new(move |store| {
                    store.create_vector_index(
                        "embeddings",
                        EMBEDDING_INDEX,
                        "vector",
                        embedding_dimensions,
                        &VectorIndexParams::default(),
                    )
                })),
                down: MigrationStep::Engine(Box::new(|store| {
                    store.remove_vector_index("embeddings", EMBEDDING_INDEX)
                })),
            },
        ];

        Self { migrations }
    }

    /// Highest version this runner can reach.
    pub fn latest_version(&self) -> i64 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    /// Current store version; 0 when the journal relation is missing.
    pub fn current_version(store: &GraphStore) -> StoreResult<i64> {
        if !store.relation_exists(VERSION_RELATION)? {
            return Ok(0);
        }
        let rows = store.query(
            &format!("?[version] := *{VERSION_RELATION}{{k, version}}, k = 0"),
            Params::new(),
        )?;
        if rows.is_empty() {
            Ok(0)
        } else {
            rows.get_int(0, "version")
        }
    }

    /// Refuse stores written by a newer build (invariant: every open
    /// verifies `store_version <= code_version`).
    pub fn ensure_compatible(&self, store: &GraphStore) -> IndexResult<()> {
        let current = Self::current_version(store)?;
        let latest = self.latest_version();
        if current > latest {
            return Err(IndexError::SchemaMismatch {
                store_version: current,
                code_version: latest,
            });
        }
        Ok(())
    }

    /// Migrate to `target`, applying `up` steps ascending or `down`
    /// steps descending. Failure of a step rolls that step back; prior
    /// steps remain committed and the error surfaces.
    pub fn migrate(&self, store: &GraphStore, target: i64) -> IndexResult<()> {
        self.bootstrap_journal(store)
            .map_err(IndexError::Store)?;
        let current = Self::current_version(store).map_err(IndexError::Store)?;

        if target > current {
            for m in self.migrations.iter().filter(|m| {
                m.version > current && m.version <= target
            }) {
                tracing::info!(target: "store", "applying migration {} ({})", m.version, m.name);
                self.apply(store, &m.up, m.version).map_err(|e| {
                    IndexError::MigrationFailed {
                        version: m.version,
                        name: m.name.to_string(),
                        reason: e.to_string(),
                    }
                })?;
            }
        } else if target < current {
            for m in self.migrations.iter().rev().filter(|m| {
                m.version <= current && m.version > target
            }) {
                tracing::info!(target: "store", "reverting migration {} ({})", m.version, m.name);
                let previous = self.previous_version(m.version);
                self.apply(store, &m.down, previous).map_err(|e| {
                    IndexError::MigrationFailed {
                        version: m.version,
                        name: m.name.to_string(),
                        reason: e.to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }

    /// Migrate to the newest version this runner knows.
    pub fn migrate_to_latest(&self, store: &GraphStore) -> IndexResult<()> {
        self.ensure_compatible(store)?;
        self.migrate(store, self.latest_version())
    }

    fn previous_version(&self, version: i64) -> i64 {
        self.migrations
            .iter()
            .filter(|m| m.version < version)
            .map(|m| m.version)
            .max()
            .unwrap_or(0)
    }

    fn apply(
        &self,
        store: &GraphStore,
        step: &MigrationStep,
        resulting_version: i64,
    ) -> StoreResult<()> {
        match step {
            MigrationStep::Scripted(f) => store.with_transaction(|tx| {
                f(store, tx)?;
                Self::write_version_tx(tx, resulting_version)
            }),
            MigrationStep::Engine(f) => {
                f(store)?;
                self.write_version_direct(store, resulting_version)
            }
        }
    }

    fn bootstrap_journal(&self, store: &GraphStore) -> StoreResult<()> {
        if !store.relation_exists(VERSION_RELATION)? {
            store.execute(
                &format!(
                    ":create {VERSION_RELATION} {{k: Int => version: Int, applied_at: Int}}"
                ),
                Params::new(),
            )?;
        }
        Ok(())
    }

    fn version_script() -> String {
        format!(
            "?[k, version, applied_at] <- [[0, $version, $applied_at]]\n\
             :put {VERSION_RELATION} {{k => version, applied_at}}"
        )
    }

    fn version_params(version: i64) -> Params {
        params([
            ("version", DataValue::from(version)),
            (
                "applied_at",
                DataValue::from(crate::types::utc_timestamp() as i64),
            ),
        ])
    }

    fn write_version_tx(tx: &Tx, version: i64) -> StoreResult<()> {
        tx.execute(&Self::version_script(), Self::version_params(version))
            .map(|_| ())
    }

    fn write_version_direct(&self, store: &GraphStore, version: i64) -> StoreResult<()> {
        store
            .execute(&Self::version_script(), Self::version_params(version))
            .map(|_| ())
    }
}

/// Open a store directory, verify version compatibility and bring the
/// schema up to date. The standard startup path.
pub fn open_and_migrate(
    engine: &str,
    store_dir: &std::path::Path,
    embedding_dimensions: usize,
) -> IndexResult<GraphStore> {
    let store = GraphStore::open_with_engine(engine, store_dir).map_err(|e| match e {
        StoreError::Locked { path, pid } => IndexError::StoreUnavailable {
            path,
            reason: format!("locked by live process {pid}"),
        },
        other => IndexError::StoreUnavailable {
            path: store_dir.to_path_buf(),
            reason: other.to_string(),
        },
    })?;
    let runner = MigrationRunner::core(embedding_dimensions);
    runner.migrate_to_latest(&store)?;
    Ok(store)
}
