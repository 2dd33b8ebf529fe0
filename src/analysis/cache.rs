//! Analysis result cache.
//!
//! Results are keyed by `(function_id, file_content_hash, analyzer)` in
//! the `analysis_cache` relation, with a memory layer in front. The
//! coordinator is the only writer (writer-through); readers may briefly
//! see stale entries after an invalidation, which is acceptable because
//! keys include the file hash — a changed file simply misses.

use crate::error::{StoreError, StoreResult};
use crate::storage::{GraphStore, Params, params};
use crate::types::EntityId;
use cozo::{DataValue, JsonData};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

type Key = (String, String, &'static str);

pub struct AnalysisCache {
    store: Arc<GraphStore>,
    memory: DashMap<Key, serde_json::Value>,
}

impl AnalysisCache {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self {
            store,
            memory: DashMap::new(),
        }
    }

    fn key(function_id: &EntityId, file_hash: &str, analyzer: &'static str) -> Key {
        (function_id.to_string(), file_hash.to_string(), analyzer)
    }

    /// Look up a cached result, memory first, then the store.
    pub fn get<T: DeserializeOwned>(
        &self,
        function_id: &EntityId,
        file_hash: &str,
        analyzer: &'static str,
    ) -> StoreResult<Option<T>> {
        let key = Self::key(function_id, file_hash, analyzer);
        if let Some(hit) = self.memory.get(&key) {
            return Ok(serde_json::from_value(hit.clone()).ok());
        }

        let rows = self.store.query(
            "?[result] := *analysis_cache{function_id, file_hash, analyzer, result}, \
             function_id = $fid, file_hash = $hash, analyzer = $analyzer",
            params([
                ("fid", DataValue::from(function_id.as_str())),
                ("hash", DataValue::from(file_hash)),
                ("analyzer", DataValue::from(analyzer)),
            ]),
        )?;
        if rows.is_empty() {
            return Ok(None);
        }
        let value = match &rows.rows[0][0] {
            DataValue::Json(JsonData(v)) => v.clone(),
            _ => {
                return Err(StoreError::UnexpectedValue {
                    column: "result".to_string(),
                    expected: "json",
                });
            }
        };
        self.memory.insert(key, value.clone());
        Ok(serde_json::from_value(value).ok())
    }

    /// Store a result (writer-through: store first, then memory).
    pub fn put<T: Serialize>(
        &self,
        function_id: &EntityId,
        file_hash: &str,
        analyzer: &'static str,
        result: &T,
    ) -> StoreResult<()> {
        let value = serde_json::to_value(result).map_err(|e| StoreError::Query {
            message: format!("cannot serialize analysis result: {e}"),
        })?;

        self.store.execute(
            "?[function_id, file_hash, analyzer, result, computed_at] <- \
             [[$fid, $hash, $analyzer, $result, $now]]\n\
             :put analysis_cache {function_id, file_hash, analyzer => result, computed_at}",
            params([
                ("fid", DataValue::from(function_id.as_str())),
                ("hash", DataValue::from(file_hash)),
                ("analyzer", DataValue::from(analyzer)),
                ("result", DataValue::Json(JsonData(value.clone()))),
                (
                    "now",
                    DataValue::from(crate::types::utc_timestamp() as i64),
                ),
            ]),
        )?;
        self.memory
            .insert(Self::key(function_id, file_hash, analyzer), value);
        Ok(())
    }

    /// Drop every cached entry for a function (all hashes, all
    /// analyzers). Used by the compaction sweep.
    pub fn invalidate_function(&self, function_id: &EntityId) -> StoreResult<()> {
        self.memory.retain(|key, _| key.0 != function_id.as_str());
        self.store.execute(
            "?[function_id, file_hash, analyzer] := \
             *analysis_cache{function_id, file_hash, analyzer}, function_id = $fid\n\
             :rm analysis_cache {function_id, file_hash, analyzer}",
            params([("fid", DataValue::from(function_id.as_str()))]),
        )?;
        Ok(())
    }

    pub fn memory_entries(&self) -> usize {
        self.memory.len()
    }
}
