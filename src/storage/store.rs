//! Embedded graph store.
//!
//! A single-writer relational store layered over an embedded engine
//! (`sqlite` for durable stores, `mem` for tests). Scripts are
//! parameterized; reads materialize full row sets; writes go through
//! [`GraphStore::execute`] or a [`Tx`] obtained from
//! [`GraphStore::with_transaction`]. Transactions are flat — the `Tx`
//! value is passed into query/execute calls to buffer operations, and
//! nothing becomes visible to other readers until commit.

use crate::error::{StoreError, StoreResult};
use crate::model::{RowBatch, ToRow};
use crate::storage::lock::StoreLock;
use crate::storage::schema::{RelationDef, SchemaDef};
use crate::types::EntityId;
use cozo::{DataValue, DbInstance, MultiTransaction, NamedRows, ScriptMutability};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Engine file name inside the store directory.
const ENGINE_FILE: &str = "graph.db";

/// Parameter map for scripts.
pub type Params = BTreeMap<String, DataValue>;

/// Build a parameter map from `(name, value)` pairs.
pub fn params<const N: usize>(pairs: [(&str, DataValue); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// A materialized result set: headers plus rows.
#[derive(Debug, Clone)]
pub struct Rows {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<DataValue>>,
}

impl Rows {
    fn from_named(named: NamedRows) -> Self {
        Self {
            headers: named.headers,
            rows: named.rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, column: &str) -> StoreResult<usize> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| StoreError::MissingColumn {
                column: column.to_string(),
            })
    }

    pub fn get_str(&self, row: usize, column: &str) -> StoreResult<&str> {
        let idx = self.column_index(column)?;
        self.rows[row][idx]
            .get_str()
            .ok_or(StoreError::UnexpectedValue {
                column: column.to_string(),
                expected: "string",
            })
    }

    pub fn get_opt_str(&self, row: usize, column: &str) -> StoreResult<Option<String>> {
        let idx = self.column_index(column)?;
        match &self.rows[row][idx] {
            DataValue::Null => Ok(None),
            v => v
                .get_str()
                .map(|s| Some(s.to_string()))
                .ok_or(StoreError::UnexpectedValue {
                    column: column.to_string(),
                    expected: "string or null",
                }),
        }
    }

    pub fn get_int(&self, row: usize, column: &str) -> StoreResult<i64> {
        let idx = self.column_index(column)?;
        self.rows[row][idx]
            .get_int()
            .ok_or(StoreError::UnexpectedValue {
                column: column.to_string(),
                expected: "integer",
            })
    }

    pub fn get_float(&self, row: usize, column: &str) -> StoreResult<f64> {
        let idx = self.column_index(column)?;
        self.rows[row][idx]
            .get_float()
            .ok_or(StoreError::UnexpectedValue {
                column: column.to_string(),
                expected: "float",
            })
    }

    pub fn get_bool(&self, row: usize, column: &str) -> StoreResult<bool> {
        let idx = self.column_index(column)?;
        match &self.rows[row][idx] {
            DataValue::Bool(b) => Ok(*b),
            _ => Err(StoreError::UnexpectedValue {
                column: column.to_string(),
                expected: "bool",
            }),
        }
    }

    pub fn get_str_list(&self, row: usize, column: &str) -> StoreResult<Vec<String>> {
        let idx = self.column_index(column)?;
        match &self.rows[row][idx] {
            DataValue::List(items) => Ok(items
                .iter()
                .filter_map(|v| v.get_str().map(str::to_string))
                .collect()),
            _ => Err(StoreError::UnexpectedValue {
                column: column.to_string(),
                expected: "list",
            }),
        }
    }

    pub fn get_entity_id(&self, row: usize, column: &str) -> StoreResult<EntityId> {
        let raw = self.get_str(row, column)?;
        EntityId::new(raw).ok_or(StoreError::UnexpectedValue {
            column: column.to_string(),
            expected: "16-hex entity id",
        })
    }
}

/// Parameters for an HNSW vector index.
#[derive(Debug, Clone)]
pub struct VectorIndexParams {
    pub m: usize,
    pub ef_construction: usize,
    pub distance: &'static str,
}

impl Default for VectorIndexParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            distance: "Cosine",
        }
    }
}

/// Map an engine error message onto the store failure taxonomy.
fn map_engine_error(message: String) -> StoreError {
    let lowered = message.to_lowercase();
    if lowered.contains("conflict") || lowered.contains("busy") || lowered.contains("locked") {
        StoreError::Busy { reason: message }
    } else {
        StoreError::Query { message }
    }
}

/// The embedded graph store handle.
pub struct GraphStore {
    db: DbInstance,
    path: PathBuf,
    // Held for the lifetime of the handle; dropped (and thus released)
    // on close. Memory stores have no marker.
    _lock: Option<StoreLock>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl GraphStore {
    /// Open (or create) a durable store at `store_dir`, acquiring the
    /// exclusive-access marker first.
    pub fn open(store_dir: &Path) -> StoreResult<Self> {
        Self::open_with_engine("sqlite", store_dir)
    }

    /// Open with an explicit engine name ("sqlite" or "mem").
    pub fn open_with_engine(engine: &str, store_dir: &Path) -> StoreResult<Self> {
        if engine == "mem" {
            return Self::in_memory();
        }
        let lock = StoreLock::acquire(store_dir)?;
        let db_path = store_dir.join(ENGINE_FILE);
        let db = DbInstance::new(engine, &db_path, "").map_err(|e| StoreError::Corrupt {
            reason: e.to_string(),
        })?;
        Ok(Self {
            db,
            path: store_dir.to_path_buf(),
            _lock: Some(lock),
        })
    }

    /// Open a memory-only store (tests). No marker, nothing persisted.
    pub fn in_memory() -> StoreResult<Self> {
        let db = DbInstance::new("mem", "", "").map_err(|e| StoreError::Corrupt {
            reason: e.to_string(),
        })?;
        Ok(Self {
            db,
            path: PathBuf::new(),
            _lock: None,
        })
    }

    /// Store directory (empty for memory stores).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read-only script and materialize the result.
    pub fn query(&self, script: &str, params: Params) -> StoreResult<Rows> {
        self.db
            .run_script(script, params, ScriptMutability::Immutable)
            .map(Rows::from_named)
            .map_err(|e| map_engine_error(e.to_string()))
    }

    /// Run a write statement (create/put/remove).
    pub fn execute(&self, script: &str, params: Params) -> StoreResult<Rows> {
        self.db
            .run_script(script, params, ScriptMutability::Mutable)
            .map(Rows::from_named)
            .map_err(|e| map_engine_error(e.to_string()))
    }

    /// Run `f` inside a single atomic write transaction.
    ///
    /// Statements buffered through the [`Tx`] become visible to other
    /// readers only at commit; any error from `f` discards all of them.
    /// Transactions are flat: do not call `with_transaction` from
    /// inside `f`.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Tx) -> StoreResult<T>) -> StoreResult<T> {
        let tx = Tx {
            inner: self.db.multi_transaction(true),
        };
        match f(&tx) {
            Ok(value) => {
                tx.inner
                    .commit()
                    .map_err(|e| map_engine_error(e.to_string()))?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.inner.abort();
                Err(e)
            }
        }
    }

    /// Whether a stored relation exists.
    pub fn relation_exists(&self, name: &str) -> StoreResult<bool> {
        let rows = self.query("::relations", Params::new())?;
        for i in 0..rows.len() {
            if rows.get_str(i, "name")? == name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Register an HNSW vector index over a fixed-width float column.
    pub fn create_vector_index(
        &self,
        relation: &str,
        index_name: &str,
        column: &str,
        dimensions: usize,
        params: &VectorIndexParams,
    ) -> StoreResult<()> {
        let script = format!(
            "::hnsw create {relation}:{index_name} {{\
             dim: {dimensions}, m: {m}, dtype: F32, fields: [{column}], \
             distance: {distance}, ef_construction: {ef} }}",
            m = params.m,
            distance = params.distance,
            ef = params.ef_construction,
        );
        self.execute(&script, Params::new()).map(|_| ())
    }

    /// Drop a previously registered vector index.
    pub fn remove_vector_index(&self, relation: &str, index_name: &str) -> StoreResult<()> {
        self.execute(
            &format!("::hnsw drop {relation}:{index_name}"),
            Params::new(),
        )
        .map(|_| ())
    }

    /// Release the store handle (and the access marker).
    pub fn close(self) {}
}

/// A transaction in flight. Passed by reference into query/execute
/// calls to buffer operations against the pending commit.
pub struct Tx {
    inner: MultiTransaction,
}

impl Tx {
    /// Read step inside the transaction.
    pub fn query(&self, script: &str, params: Params) -> StoreResult<Rows> {
        self.inner
            .run_script(script, params)
            .map(Rows::from_named)
            .map_err(|e| map_engine_error(e.to_string()))
    }

    /// Buffer a write statement.
    pub fn execute(&self, script: &str, params: Params) -> StoreResult<Rows> {
        self.inner
            .run_script(script, params)
            .map(Rows::from_named)
            .map_err(|e| map_engine_error(e.to_string()))
    }
}

// ─── Batch writes and cascades ──────────────────────────────────────────

fn rows_param<R: ToRow>(rows: &[R]) -> DataValue {
    DataValue::List(rows.iter().map(|r| DataValue::List(r.values())).collect())
}

fn put_rows<R: ToRow>(tx: &Tx, rel: &RelationDef, rows: &[R]) -> StoreResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    tx.execute(
        &rel.put_script(),
        params([("rows", rows_param(rows))]),
    )
    .map(|_| ())
}

/// Write an entire row batch inside one transaction.
pub fn put_batch(tx: &Tx, schema: &SchemaDef, batch: &RowBatch) -> StoreResult<()> {
    let rel = |name: &str| -> StoreResult<&RelationDef> {
        schema.relation(name).ok_or_else(|| StoreError::Schema {
            reason: format!("unknown relation '{name}'"),
        })
    };

    put_rows(tx, rel("files")?, &batch.files)?;
    put_rows(tx, rel("functions")?, &batch.functions)?;
    put_rows(tx, rel("classes")?, &batch.classes)?;
    put_rows(tx, rel("interfaces")?, &batch.interfaces)?;
    put_rows(tx, rel("type_aliases")?, &batch.type_aliases)?;
    put_rows(tx, rel("variables")?, &batch.variables)?;
    put_rows(tx, rel("ghost_nodes")?, &batch.ghost_nodes)?;
    put_rows(tx, rel("contains")?, &batch.contains)?;
    put_rows(tx, rel("calls")?, &batch.calls)?;
    put_rows(tx, rel("imports")?, &batch.imports)?;
    put_rows(tx, rel("has_method")?, &batch.has_method)?;
    put_rows(tx, rel("uses_type")?, &batch.uses_type)?;
    put_rows(tx, rel("references_external")?, &batch.references_external)?;

    // Inheritance edges fan out across three relations.
    for kind in [
        crate::model::InheritanceKind::Extends,
        crate::model::InheritanceKind::Implements,
        crate::model::InheritanceKind::ExtendsInterface,
    ] {
        let rows: Vec<_> = batch
            .inheritance
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        put_rows(tx, rel(kind.relation())?, &rows)?;
    }
    Ok(())
}

/// Entity relations owned by a file (cascade sources).
const FILE_OWNED: [&str; 5] = [
    "functions",
    "classes",
    "interfaces",
    "type_aliases",
    "variables",
];

/// Edge relations incident on file-owned entities:
/// `(relation, key columns, outgoing columns, incoming columns)`.
///
/// Outgoing edges are regenerated by the owning file's next link pass,
/// so they match against every old id. Incoming edges from *other*
/// files stay valid as long as their target id survives; they match
/// only against ids the re-extraction dropped.
const EDGE_CASCADES: [(&str, &[&str], &[&str], &[&str]); 8] = [
    (
        "contains",
        &["parent_id", "child_id"],
        &["parent_id", "child_id"],
        &[],
    ),
    (
        "calls",
        &["caller_id", "callee_id", "line"],
        &["caller_id"],
        &["callee_id"],
    ),
    ("extends", &["from_id", "to_id"], &["from_id"], &["to_id"]),
    ("implements", &["from_id", "to_id"], &["from_id"], &["to_id"]),
    (
        "extends_interface",
        &["from_id", "to_id"],
        &["from_id"],
        &["to_id"],
    ),
    (
        "has_method",
        &["class_id", "function_id"],
        &["class_id", "function_id"],
        &[],
    ),
    (
        "uses_type",
        &["source_id", "type_id", "context"],
        &["source_id"],
        &["type_id"],
    ),
    (
        "references_external",
        &["source_id", "ghost_id"],
        &["source_id"],
        &[],
    ),
];

fn cascade_script(relation: &str, keys: &[&str], outgoing: &[&str], incoming: &[&str]) -> String {
    let key_list = keys.join(", ");
    let mut alts: Vec<String> = outgoing
        .iter()
        .map(|c| format!("is_in({c}, $ids)"))
        .collect();
    alts.extend(incoming.iter().map(|c| format!("is_in({c}, $removed)")));
    let body = if alts.len() == 1 {
        alts.remove(0)
    } else {
        format!("({})", alts.join("; "))
    };
    format!(
        "?[{key_list}] := *{relation}{{{key_list}}}, {body}\n:rm {relation} {{{key_list}}}"
    )
}

/// Ids of every entity owned by `file_id` (the file id included).
pub fn file_entity_ids(tx: &Tx, file_id: &EntityId) -> StoreResult<Vec<EntityId>> {
    let mut ids = vec![file_id.clone()];
    for relation in FILE_OWNED {
        let rows = tx.query(
            &format!(
                "?[id] := *{relation}{{id, file_id}}, file_id = $fid"
            ),
            params([("fid", DataValue::from(file_id.as_str()))]),
        )?;
        for i in 0..rows.len() {
            ids.push(rows.get_entity_id(i, "id")?);
        }
    }
    Ok(ids)
}

fn id_list(ids: &[EntityId]) -> DataValue {
    DataValue::List(ids.iter().map(|id| DataValue::from(id.as_str())).collect())
}

/// Delete a file's rows and dependent rows, atomically within `tx`,
/// ahead of re-inserting `surviving` (the ids the new extraction still
/// produces; empty when the file is gone).
///
/// Covers owned entities, outgoing edges, incoming edges whose target
/// id vanished, import rows, embeddings and cached analysis.
pub fn delete_file_cascade(
    tx: &Tx,
    file_id: &EntityId,
    surviving: &[EntityId],
) -> StoreResult<()> {
    let old_ids = file_entity_ids(tx, file_id)?;
    let removed: Vec<EntityId> = old_ids
        .iter()
        .filter(|id| !surviving.contains(id))
        .cloned()
        .collect();
    let file_survives = surviving.contains(file_id);
    let fid = DataValue::from(file_id.as_str());

    for (relation, keys, outgoing, incoming) in EDGE_CASCADES {
        tx.execute(
            &cascade_script(relation, keys, outgoing, incoming),
            params([
                ("ids", id_list(&old_ids)),
                ("removed", id_list(&removed)),
            ]),
        )?;
    }

    // Outgoing imports are regenerated by the next link pass; incoming
    // ones survive unless the file itself is going away.
    let import_filter = if file_survives {
        "from_file_id = $fid"
    } else {
        "(from_file_id = $fid; to_file_id = $fid)"
    };
    tx.execute(
        &format!(
            "?[from_file_id, to_file_id] := *imports{{from_file_id, to_file_id}}, \
             {import_filter}\n:rm imports {{from_file_id, to_file_id}}"
        ),
        params([("fid", fid.clone())]),
    )?;

    tx.execute(
        "?[entity_id] := *embeddings{entity_id}, is_in(entity_id, $ids)\n\
         :rm embeddings {entity_id}",
        params([("ids", id_list(&old_ids))]),
    )?;

    tx.execute(
        "?[function_id, file_hash, analyzer] := \
         *analysis_cache{function_id, file_hash, analyzer}, is_in(function_id, $ids)\n\
         :rm analysis_cache {function_id, file_hash, analyzer}",
        params([("ids", id_list(&old_ids))]),
    )?;

    for relation in FILE_OWNED {
        tx.execute(
            &format!(
                "?[id] := *{relation}{{id, file_id}}, file_id = $fid\n:rm {relation} {{id}}"
            ),
            params([("fid", fid.clone())]),
        )?;
    }

    tx.execute(
        "?[id] := id = $fid, *files{id}\n:rm files {id}",
        params([("fid", fid)]),
    )?;

    Ok(())
}

/// Compaction summary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactionStats {
    pub ghosts_removed: usize,
    pub cache_entries_removed: usize,
}

/// Compaction pass: drop unreferenced ghost nodes and analysis-cache
/// entries that are orphaned or keyed by a superseded file hash.
pub fn compact(store: &GraphStore) -> StoreResult<CompactionStats> {
    let ghosts_removed = collect_ghosts(store)?;

    let orphaned = store.execute(
        "?[function_id, file_hash, analyzer] := \
         *analysis_cache{function_id, file_hash, analyzer}, \
         not *functions{id: function_id}\n\
         :rm analysis_cache {function_id, file_hash, analyzer}",
        Params::new(),
    )?;
    let stale = store.execute(
        "?[function_id, file_hash, analyzer] := \
         *analysis_cache{function_id, file_hash, analyzer}, \
         *functions{id: function_id, file_id}, \
         *files{id: file_id, content_hash}, \
         file_hash != content_hash\n\
         :rm analysis_cache {function_id, file_hash, analyzer}",
        Params::new(),
    )?;

    Ok(CompactionStats {
        ghosts_removed,
        cache_entries_removed: orphaned.len() + stale.len(),
    })
}

/// Garbage-collect ghost nodes that no `references_external` edge
/// targets any more. Runs after linking; returns the number removed.
pub fn collect_ghosts(store: &GraphStore) -> StoreResult<usize> {
    let orphans = store.query(
        "?[id] := *ghost_nodes{id}, not *references_external{ghost_id: id}",
        Params::new(),
    )?;
    if orphans.is_empty() {
        return Ok(0);
    }
    let count = orphans.len();
    store.execute(
        "?[id] := *ghost_nodes{id}, not *references_external{ghost_id: id}\n\
         :rm ghost_nodes {id}",
        Params::new(),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::SchemaDef;

    fn mem_store_with_schema() -> GraphStore {
        let store = GraphStore::in_memory().unwrap();
        let schema = SchemaDef::core();
        for rel in schema.relations() {
            store.execute(&rel.create_ddl(), Params::new()).unwrap();
        }
        store
    }

    #[test]
    fn create_and_put_and_query() {
        let store = mem_store_with_schema();
        store
            .execute(
                "?[id, package_name, export_name] <- [['aaaaaaaaaaaaaaaa', 'lodash', 'map']]\n\
                 :put ghost_nodes {id => package_name, export_name}",
                Params::new(),
            )
            .unwrap();

        let rows = store
            .query(
                "?[id, package_name] := *ghost_nodes{id, package_name}",
                Params::new(),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get_str(0, "package_name").unwrap(), "lodash");
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = mem_store_with_schema();
        let result: StoreResult<()> = store.with_transaction(|tx| {
            tx.execute(
                "?[id, package_name, export_name] <- [['bbbbbbbbbbbbbbbb', 'p', 'e']]\n\
                 :put ghost_nodes {id => package_name, export_name}",
                Params::new(),
            )?;
            Err(StoreError::Query {
                message: "boom".into(),
            })
        });
        assert!(result.is_err());

        let rows = store
            .query("?[id] := *ghost_nodes{id}", Params::new())
            .unwrap();
        assert!(rows.is_empty(), "aborted writes must not be visible");
    }

    #[test]
    fn transaction_commits_visible_rows() {
        let store = mem_store_with_schema();
        store
            .with_transaction(|tx| {
                tx.execute(
                    "?[id, package_name, export_name] <- [['cccccccccccccccc', 'p', 'e']]\n\
                     :put ghost_nodes {id => package_name, export_name}",
                    Params::new(),
                )
                .map(|_| ())
            })
            .unwrap();
        let rows = store
            .query("?[id] := *ghost_nodes{id}", Params::new())
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn relation_exists_reports_created_relations() {
        let store = mem_store_with_schema();
        assert!(store.relation_exists("files").unwrap());
        assert!(!store.relation_exists("nonexistent").unwrap());
    }

    #[test]
    fn parameterized_query_binds_values() {
        let store = mem_store_with_schema();
        store
            .execute(
                "?[id, package_name, export_name] <- \
                 [['dddddddddddddddd', 'a', 'x'], ['eeeeeeeeeeeeeeee', 'b', 'y']]\n\
                 :put ghost_nodes {id => package_name, export_name}",
                Params::new(),
            )
            .unwrap();
        let rows = store
            .query(
                "?[id] := *ghost_nodes{id, package_name}, package_name = $p",
                params([("p", DataValue::from("b"))]),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get_str(0, "id").unwrap(), "eeeeeeeeeeeeeeee");
    }

    #[test]
    fn compact_sweeps_orphaned_and_stale_cache_entries() {
        let store = mem_store_with_schema();
        // A function whose file carries hash 'current'.
        store
            .execute(
                "?[id, relative_path, absolute_path, extension, content_hash, size_bytes, \
                  last_indexed_at, language, framework] <- \
                 [['3333333333333333', 'a.ts', '/w/a.ts', 'ts', 'current', 1, 0, 'typescript', null]]\n\
                 :put files {id => absolute_path, relative_path, extension, content_hash, \
                  size_bytes, last_indexed_at, language, framework}",
                Params::new(),
            )
            .unwrap();
        store
            .execute(
                "?[id, name, file_id, parent_scope, start_line, end_line, start_col, end_col, \
                  signature, return_type, is_exported, is_async, is_generator, is_method, \
                  complexity, parameter_count, doc_comment, embedding_text, inference_confidence] <- \
                 [['4444444444444444', 'f', '3333333333333333', '', 1, 2, 0, 0, 'f()', null, \
                   false, false, false, false, 1, 0, null, null, null]]\n\
                 :put functions {id => name, file_id, parent_scope, start_line, end_line, \
                  start_col, end_col, signature, return_type, is_exported, is_async, \
                  is_generator, is_method, complexity, parameter_count, doc_comment, \
                  embedding_text, inference_confidence}",
                Params::new(),
            )
            .unwrap();
        // Three cache entries: live, stale hash, orphaned function.
        store
            .execute(
                "?[function_id, file_hash, analyzer, result, computed_at] <- [\
                 ['4444444444444444', 'current', 'returns', json('{}'), 0], \
                 ['4444444444444444', 'old', 'returns', json('{}'), 0], \
                 ['5555555555555555', 'x', 'returns', json('{}'), 0]]\n\
                 :put analysis_cache {function_id, file_hash, analyzer => result, computed_at}",
                Params::new(),
            )
            .unwrap();

        let stats = compact(&store).unwrap();
        assert_eq!(stats.cache_entries_removed, 2);

        let remaining = store
            .query(
                "?[function_id, file_hash] := *analysis_cache{function_id, file_hash}",
                Params::new(),
            )
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining.get_str(0, "file_hash").unwrap(), "current");
    }

    #[test]
    fn ghost_gc_removes_unreferenced_only() {
        let store = mem_store_with_schema();
        store
            .execute(
                "?[id, package_name, export_name] <- \
                 [['ffffffffffffffff', 'pkg', 'used'], ['1111111111111111', 'pkg', 'orphan']]\n\
                 :put ghost_nodes {id => package_name, export_name}",
                Params::new(),
            )
            .unwrap();
        store
            .execute(
                "?[source_id, ghost_id, line] <- [['2222222222222222', 'ffffffffffffffff', 3]]\n\
                 :put references_external {source_id, ghost_id => line}",
                Params::new(),
            )
            .unwrap();

        let removed = collect_ghosts(&store).unwrap();
        assert_eq!(removed, 1);
        let rows = store
            .query("?[id] := *ghost_nodes{id}", Params::new())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get_str(0, "id").unwrap(), "ffffffffffffffff");
    }
}
