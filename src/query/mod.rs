//! Read contracts offered to collaborators (tool servers, viewers).
//!
//! Thin wrappers over parameterized store queries. Everything here is
//! read-only and safe to call while indexing runs; readers may observe
//! a mixture of old and new rows across files mid-run, never a partial
//! file.

use crate::error::StoreResult;
use crate::storage::{GraphStore, Params, Rows, params};
use crate::types::{EntityId, EntityKind};
use cozo::DataValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Compact entity view returned by lookups and search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub file_id: Option<EntityId>,
    pub start_line: u32,
    pub end_line: u32,
}

/// One end of a call edge plus the call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPeer {
    pub id: EntityId,
    pub name: String,
    pub line: u32,
    pub is_direct: bool,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportLink {
    pub file_id: EntityId,
    pub relative_path: String,
    pub imported_symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: EntityId,
    pub relative_path: String,
    pub language: String,
    pub size_bytes: u64,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverviewStats {
    pub files: usize,
    pub functions: usize,
    pub classes: usize,
    pub interfaces: usize,
    pub type_aliases: usize,
    pub variables: usize,
    pub calls: usize,
    pub imports: usize,
    pub ghost_nodes: usize,
    pub files_by_language: HashMap<String, usize>,
}

pub struct QueryService {
    store: Arc<GraphStore>,
}

impl QueryService {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    pub fn list_files(&self) -> StoreResult<Vec<FileSummary>> {
        let rows = self.store.query(
            "?[id, relative_path, language, size_bytes, content_hash] := \
             *files{id, relative_path, language, size_bytes, content_hash}",
            Params::new(),
        )?;
        let mut out = Vec::with_capacity(rows.len());
        for i in 0..rows.len() {
            out.push(FileSummary {
                id: rows.get_entity_id(i, "id")?,
                relative_path: rows.get_str(i, "relative_path")?.to_string(),
                language: rows.get_str(i, "language")?.to_string(),
                size_bytes: rows.get_int(i, "size_bytes")? as u64,
                content_hash: rows.get_str(i, "content_hash")?.to_string(),
            });
        }
        out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(out)
    }

    pub fn list_functions(&self) -> StoreResult<Vec<EntitySummary>> {
        self.list_entities("functions", EntityKind::Function)
    }

    pub fn list_classes(&self) -> StoreResult<Vec<EntitySummary>> {
        self.list_entities("classes", EntityKind::Class)
    }

    pub fn list_interfaces(&self) -> StoreResult<Vec<EntitySummary>> {
        self.list_entities("interfaces", EntityKind::Interface)
    }

    fn list_entities(&self, relation: &str, kind: EntityKind) -> StoreResult<Vec<EntitySummary>> {
        let rows = self.store.query(
            &format!(
                "?[id, name, file_id, start_line, end_line] := \
                 *{relation}{{id, name, file_id, start_line, end_line}}"
            ),
            Params::new(),
        )?;
        let mut out = Vec::with_capacity(rows.len());
        for i in 0..rows.len() {
            out.push(summary_from(&rows, i, kind)?);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Look an id up across every entity relation.
    pub fn get_entity(&self, id: &EntityId) -> StoreResult<Option<EntitySummary>> {
        let probes: [(&str, EntityKind); 5] = [
            ("functions", EntityKind::Function),
            ("classes", EntityKind::Class),
            ("interfaces", EntityKind::Interface),
            ("type_aliases", EntityKind::TypeAlias),
            ("variables", EntityKind::Variable),
        ];
        for (relation, kind) in probes {
            let rows = self.store.query(
                &format!(
                    "?[id, name, file_id, start_line, end_line] := \
                     *{relation}{{id, name, file_id, start_line, end_line}}, id = $id"
                ),
                params([("id", DataValue::from(id.as_str()))]),
            )?;
            if !rows.is_empty() {
                let kind = if kind == EntityKind::Function
                    && self.is_method(id)?
                {
                    EntityKind::Method
                } else {
                    kind
                };
                return Ok(Some(summary_from(&rows, 0, kind)?));
            }
        }

        let files = self.store.query(
            "?[id, relative_path] := *files{id, relative_path}, id = $id",
            params([("id", DataValue::from(id.as_str()))]),
        )?;
        if !files.is_empty() {
            return Ok(Some(EntitySummary {
                id: files.get_entity_id(0, "id")?,
                kind: EntityKind::File,
                name: files.get_str(0, "relative_path")?.to_string(),
                file_id: None,
                start_line: 0,
                end_line: 0,
            }));
        }

        let ghosts = self.store.query(
            "?[id, package_name, export_name] := \
             *ghost_nodes{id, package_name, export_name}, id = $id",
            params([("id", DataValue::from(id.as_str()))]),
        )?;
        if !ghosts.is_empty() {
            return Ok(Some(EntitySummary {
                id: ghosts.get_entity_id(0, "id")?,
                kind: EntityKind::Ghost,
                name: format!(
                    "{}:{}",
                    ghosts.get_str(0, "package_name")?,
                    ghosts.get_str(0, "export_name")?
                ),
                file_id: None,
                start_line: 0,
                end_line: 0,
            }));
        }
        Ok(None)
    }

    fn is_method(&self, id: &EntityId) -> StoreResult<bool> {
        let rows = self.store.query(
            "?[is_method] := *functions{id, is_method}, id = $id",
            params([("id", DataValue::from(id.as_str()))]),
        )?;
        if rows.is_empty() {
            Ok(false)
        } else {
            rows.get_bool(0, "is_method")
        }
    }

    /// Functions calling `id`.
    pub fn get_callers(&self, id: &EntityId) -> StoreResult<Vec<CallPeer>> {
        let rows = self.store.query(
            "?[peer, name, line, is_direct, is_async] := \
             *calls{caller_id: peer, callee_id, line, is_direct, is_async}, callee_id = $id, \
             *functions{id: peer, name}",
            params([("id", DataValue::from(id.as_str()))]),
        )?;
        call_peers(rows)
    }

    /// Functions `id` calls.
    pub fn get_callees(&self, id: &EntityId) -> StoreResult<Vec<CallPeer>> {
        let rows = self.store.query(
            "?[peer, name, line, is_direct, is_async] := \
             *calls{caller_id, callee_id: peer, line, is_direct, is_async}, caller_id = $id, \
             *functions{id: peer, name}",
            params([("id", DataValue::from(id.as_str()))]),
        )?;
        call_peers(rows)
    }

    /// Files `file_id` imports.
    pub fn get_imports(&self, file_id: &EntityId) -> StoreResult<Vec<ImportLink>> {
        let rows = self.store.query(
            "?[peer, relative_path, imported_symbols] := \
             *imports{from_file_id, to_file_id: peer, imported_symbols}, from_file_id = $id, \
             *files{id: peer, relative_path}",
            params([("id", DataValue::from(file_id.as_str()))]),
        )?;
        import_links(rows)
    }

    /// Files importing `file_id`.
    pub fn get_importers(&self, file_id: &EntityId) -> StoreResult<Vec<ImportLink>> {
        let rows = self.store.query(
            "?[peer, relative_path, imported_symbols] := \
             *imports{from_file_id: peer, to_file_id, imported_symbols}, to_file_id = $id, \
             *files{id: peer, relative_path}",
            params([("id", DataValue::from(file_id.as_str()))]),
        )?;
        import_links(rows)
    }

    /// Case-insensitive substring search over entity names, optionally
    /// narrowed to one kind.
    pub fn search(&self, text: &str, kind: Option<EntityKind>) -> StoreResult<Vec<EntitySummary>> {
        let needle = text.to_lowercase();
        let targets: Vec<(&str, EntityKind)> = match kind {
            Some(EntityKind::Function) | Some(EntityKind::Method) => {
                vec![("functions", EntityKind::Function)]
            }
            Some(EntityKind::Class) => vec![("classes", EntityKind::Class)],
            Some(EntityKind::Interface) => vec![("interfaces", EntityKind::Interface)],
            Some(EntityKind::TypeAlias) => vec![("type_aliases", EntityKind::TypeAlias)],
            Some(EntityKind::Variable) => vec![("variables", EntityKind::Variable)],
            _ => vec![
                ("functions", EntityKind::Function),
                ("classes", EntityKind::Class),
                ("interfaces", EntityKind::Interface),
                ("type_aliases", EntityKind::TypeAlias),
                ("variables", EntityKind::Variable),
            ],
        };

        let mut out = Vec::new();
        for (relation, kind) in targets {
            let rows = self.store.query(
                &format!(
                    "?[id, name, file_id, start_line, end_line] := \
                     *{relation}{{id, name, file_id, start_line, end_line}}, \
                     str_includes(lowercase(name), $needle)"
                ),
                params([("needle", DataValue::from(needle.as_str()))]),
            )?;
            for i in 0..rows.len() {
                out.push(summary_from(&rows, i, kind)?);
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// The `limit` most complex functions, descending.
    pub fn most_complex(&self, limit: usize) -> StoreResult<Vec<EntitySummary>> {
        let rows = self.store.query(
            &format!(
                "?[id, name, file_id, start_line, end_line, complexity] := \
                 *functions{{id, name, file_id, start_line, end_line, complexity}}\n\
                 :sort -complexity\n:limit {limit}"
            ),
            Params::new(),
        )?;
        let mut out = Vec::with_capacity(rows.len());
        for i in 0..rows.len() {
            out.push(summary_from(&rows, i, EntityKind::Function)?);
        }
        Ok(out)
    }

    /// Whole-store counts, including per-language file counts.
    pub fn overview_stats(&self) -> StoreResult<OverviewStats> {
        let mut stats = OverviewStats::default();

        let counts: [(&str, &mut usize); 9] = [
            ("files", &mut stats.files),
            ("functions", &mut stats.functions),
            ("classes", &mut stats.classes),
            ("interfaces", &mut stats.interfaces),
            ("type_aliases", &mut stats.type_aliases),
            ("variables", &mut stats.variables),
            ("calls", &mut stats.calls),
            ("imports", &mut stats.imports),
            ("ghost_nodes", &mut stats.ghost_nodes),
        ];
        for (relation, slot) in counts {
            let key = match relation {
                "calls" => "caller_id",
                "imports" => "from_file_id",
                _ => "id",
            };
            let rows = self.store.query(
                &format!("?[count({key})] := *{relation}{{{key}}}"),
                Params::new(),
            )?;
            if !rows.is_empty() {
                *slot = rows.rows[0][0].get_int().unwrap_or(0) as usize;
            }
        }

        let rows = self.store.query(
            "?[language, count(id)] := *files{id, language}",
            Params::new(),
        )?;
        for i in 0..rows.len() {
            let language = rows.get_str(i, "language")?.to_string();
            let count = rows.rows[i][1].get_int().unwrap_or(0) as usize;
            stats.files_by_language.insert(language, count);
        }
        Ok(stats)
    }
}

fn summary_from(rows: &Rows, i: usize, kind: EntityKind) -> StoreResult<EntitySummary> {
    Ok(EntitySummary {
        id: rows.get_entity_id(i, "id")?,
        kind,
        name: rows.get_str(i, "name")?.to_string(),
        file_id: Some(rows.get_entity_id(i, "file_id")?),
        start_line: rows.get_int(i, "start_line")? as u32,
        end_line: rows.get_int(i, "end_line")? as u32,
    })
}

fn call_peers(rows: Rows) -> StoreResult<Vec<CallPeer>> {
    let mut out = Vec::with_capacity(rows.len());
    for i in 0..rows.len() {
        out.push(CallPeer {
            id: rows.get_entity_id(i, "peer")?,
            name: rows.get_str(i, "name")?.to_string(),
            line: rows.get_int(i, "line")? as u32,
            is_direct: rows.get_bool(i, "is_direct")?,
            is_async: rows.get_bool(i, "is_async")?,
        });
    }
    out.sort_by_key(|p| (p.line, p.id.clone()));
    Ok(out)
}

fn import_links(rows: Rows) -> StoreResult<Vec<ImportLink>> {
    let mut out = Vec::with_capacity(rows.len());
    for i in 0..rows.len() {
        out.push(ImportLink {
            file_id: rows.get_entity_id(i, "peer")?,
            relative_path: rows.get_str(i, "relative_path")?.to_string(),
            imported_symbols: rows.get_str_list(i, "imported_symbols")?,
        });
    }
    out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(out)
}
