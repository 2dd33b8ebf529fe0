//! Call/type linking — Pass 2.
//!
//! Resolves the unresolved calls and type references recorded by Pass 1
//! against a global symbol registry. Resolution order for a call:
//!
//! 1. If the call site names a module and an import of the file covers
//!    the callee, look the callee up among the target file's exports.
//! 2. Otherwise, if the name is declared in the same file, resolve
//!    locally.
//! 3. Otherwise allocate (or reuse) a ghost node and emit a
//!    `references_external` edge.
//!
//! Overloads are told apart by call-site arity when the parser reports
//! it; failing that the first candidate in source order wins and an
//! ambiguity diagnostic is recorded. Linker output for one file is
//! committed in a single transaction, and a linking failure never rolls
//! back that file's Pass-1 rows.

use crate::extract::{ExtractionResult, UnresolvedCall, UnresolvedTypeRef};
use crate::ident;
use crate::model::{
    CallsRow, GhostNodeRow, ImportsRow, InheritanceKind, InheritanceRow, ReferencesExternalRow,
    RowBatch, TypeRefContext, UsesTypeRow,
};
use crate::storage::{GraphStore, Params, store};
use crate::types::{EntityId, EntityKind};
use dashmap::DashMap;
use std::collections::HashMap;

/// Fallback package name for references with no module specifier.
const UNKNOWN_PACKAGE: &str = "<unknown>";

/// One symbol as the linker sees it.
#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub start_line: u32,
    pub param_count: Option<u32>,
    pub exported: bool,
}

impl SymbolInfo {
    fn is_type(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::Class | EntityKind::Interface | EntityKind::TypeAlias
        )
    }

    fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::Function | EntityKind::Method | EntityKind::Class
        )
    }
}

/// Read-mostly symbol registry: built in one phase, read-only during
/// resolution.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    /// relative path → declared symbols, in source order.
    by_file: HashMap<String, Vec<SymbolInfo>>,
    /// relative path → file row id.
    file_ids: HashMap<String, EntityId>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one file's extraction output.
    pub fn register(&mut self, result: &ExtractionResult) {
        let mut symbols: Vec<SymbolInfo> = Vec::new();
        let exported_names = &result.exports;

        for f in &result.batch.functions {
            if f.is_method {
                continue; // methods resolve through their class
            }
            symbols.push(SymbolInfo {
                id: f.id.clone(),
                name: f.name.clone(),
                kind: EntityKind::Function,
                start_line: f.start_line,
                param_count: Some(f.parameter_count),
                exported: f.is_exported || exported_names.contains(&f.name),
            });
        }
        for c in &result.batch.classes {
            symbols.push(SymbolInfo {
                id: c.id.clone(),
                name: c.name.clone(),
                kind: EntityKind::Class,
                start_line: c.start_line,
                param_count: None,
                exported: c.is_exported || exported_names.contains(&c.name),
            });
        }
        for i in &result.batch.interfaces {
            symbols.push(SymbolInfo {
                id: i.id.clone(),
                name: i.name.clone(),
                kind: EntityKind::Interface,
                start_line: i.start_line,
                param_count: None,
                exported: i.is_exported || exported_names.contains(&i.name),
            });
        }
        for t in &result.batch.type_aliases {
            symbols.push(SymbolInfo {
                id: t.id.clone(),
                name: t.name.clone(),
                kind: EntityKind::TypeAlias,
                start_line: t.start_line,
                param_count: None,
                exported: t.is_exported || exported_names.contains(&t.name),
            });
        }

        symbols.sort_by_key(|s| s.start_line);
        self.by_file.insert(result.relative_path.clone(), symbols);
        self.file_ids
            .insert(result.relative_path.clone(), result.file_id.clone());
    }

    /// Rebuild the registry from stored rows (incremental re-link path).
    pub fn load_from_store(store: &GraphStore) -> crate::error::StoreResult<Self> {
        let mut registry = Self::new();

        let files = store.query(
            "?[id, relative_path] := *files{id, relative_path}",
            Params::new(),
        )?;
        let mut path_by_file_id: HashMap<String, String> = HashMap::new();
        for i in 0..files.len() {
            let id = files.get_entity_id(i, "id")?;
            let path = files.get_str(i, "relative_path")?.to_string();
            path_by_file_id.insert(id.to_string(), path.clone());
            registry.file_ids.insert(path, id);
        }

        let mut add = |path: &str, info: SymbolInfo| {
            registry
                .by_file
                .entry(path.to_string())
                .or_default()
                .push(info);
        };

        let functions = store.query(
            "?[id, name, file_id, start_line, parameter_count, is_exported, is_method] := \
             *functions{id, name, file_id, start_line, parameter_count, is_exported, is_method}",
            Params::new(),
        )?;
        for i in 0..functions.len() {
            if functions.get_bool(i, "is_method")? {
                continue;
            }
            let file_id = functions.get_str(i, "file_id")?;
            if let Some(path) = path_by_file_id.get(file_id).cloned() {
                add(
                    &path,
                    SymbolInfo {
                        id: functions.get_entity_id(i, "id")?,
                        name: functions.get_str(i, "name")?.to_string(),
                        kind: EntityKind::Function,
                        start_line: functions.get_int(i, "start_line")? as u32,
                        param_count: Some(functions.get_int(i, "parameter_count")? as u32),
                        exported: functions.get_bool(i, "is_exported")?,
                    },
                );
            }
        }

        for (relation, kind) in [
            ("classes", EntityKind::Class),
            ("interfaces", EntityKind::Interface),
            ("type_aliases", EntityKind::TypeAlias),
        ] {
            let rows = store.query(
                &format!(
                    "?[id, name, file_id, start_line, is_exported] := \
                     *{relation}{{id, name, file_id, start_line, is_exported}}"
                ),
                Params::new(),
            )?;
            for i in 0..rows.len() {
                let file_id = rows.get_str(i, "file_id")?;
                if let Some(path) = path_by_file_id.get(file_id).cloned() {
                    add(
                        &path,
                        SymbolInfo {
                            id: rows.get_entity_id(i, "id")?,
                            name: rows.get_str(i, "name")?.to_string(),
                            kind,
                            start_line: rows.get_int(i, "start_line")? as u32,
                            param_count: None,
                            exported: rows.get_bool(i, "is_exported")?,
                        },
                    );
                }
            }
        }

        for symbols in registry.by_file.values_mut() {
            symbols.sort_by_key(|s| s.start_line);
        }
        Ok(registry)
    }

    pub fn file_id(&self, relative_path: &str) -> Option<&EntityId> {
        self.file_ids.get(relative_path)
    }

    fn local(&self, relative_path: &str) -> &[SymbolInfo] {
        self.by_file
            .get(relative_path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn exported(&self, relative_path: &str, name: &str) -> Vec<&SymbolInfo> {
        self.local(relative_path)
            .iter()
            .filter(|s| s.exported && s.name == name)
            .collect()
    }

    /// Resolve a relative module specifier against the importing file.
    /// `./util` from `src/a.ts` matches `src/util.ts`, `src/util.ext`,
    /// or `src/util/index.*`. Bare specifiers are external packages.
    pub fn resolve_module(&self, from: &str, specifier: &str) -> Option<String> {
        if !specifier.starts_with("./") && !specifier.starts_with("../") {
            return None;
        }
        let dir = match from.rfind('/') {
            Some(idx) => &from[..idx],
            None => "",
        };
        let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
        for part in specifier.split('/') {
            match part {
                "." | "" => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        let candidate = segments.join("/");

        if self.file_ids.contains_key(&candidate) {
            return Some(candidate);
        }
        let with_ext = self
            .file_ids
            .keys()
            .find(|path| {
                path.strip_prefix(&candidate)
                    .is_some_and(|rest| rest.starts_with('.') && !rest[1..].contains('/'))
            })
            .cloned();
        if with_ext.is_some() {
            return with_ext;
        }
        let index_prefix = format!("{candidate}/index.");
        self.file_ids
            .keys()
            .find(|path| path.starts_with(&index_prefix))
            .cloned()
    }
}

/// Why the linker emitted a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDiagnosticKind {
    /// Multiple candidates matched; first in source order was chosen.
    Ambiguous { candidates: usize },
}

#[derive(Debug, Clone)]
pub struct LinkDiagnostic {
    pub relative_path: String,
    pub name: String,
    pub line: u32,
    pub kind: LinkDiagnosticKind,
}

/// Rows and diagnostics the linker produced for one file.
#[derive(Debug, Default)]
pub struct LinkOutput {
    pub batch: RowBatch,
    pub diagnostics: Vec<LinkDiagnostic>,
    pub resolved_calls: usize,
    pub ghost_refs: usize,
}

/// The Pass-2 linker. Shares one ghost ledger across all files so each
/// `(package, export)` pair materializes exactly one ghost row.
pub struct Linker {
    registry: SymbolRegistry,
    ghosts: DashMap<(String, String), EntityId>,
}

impl Linker {
    pub fn new(registry: SymbolRegistry) -> Self {
        Self {
            registry,
            ghosts: DashMap::new(),
        }
    }

    /// Build a linker over a full set of extraction results.
    pub fn from_results(results: &[ExtractionResult]) -> Self {
        let mut registry = SymbolRegistry::new();
        for result in results {
            registry.register(result);
        }
        Self::new(registry)
    }

    /// Build a linker from stored rows, then overlay fresh results
    /// (incremental path: changed files shadow their stored symbols).
    pub fn from_store(
        store: &GraphStore,
        fresh: &[ExtractionResult],
    ) -> crate::error::StoreResult<Self> {
        let mut registry = SymbolRegistry::load_from_store(store)?;
        for result in fresh {
            registry.register(result);
        }
        Ok(Self::new(registry))
    }

    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    /// Link one file's pending references.
    pub fn link_file(&self, result: &ExtractionResult) -> LinkOutput {
        let mut out = LinkOutput::default();

        // File-to-file import rows first; call resolution reads them.
        let mut import_targets: Vec<(String, Vec<String>)> = Vec::new();
        for (specifier, symbols, line) in &result.imports {
            if let Some(target) = self
                .registry
                .resolve_module(&result.relative_path, specifier)
            {
                if let Some(to_file_id) = self.registry.file_id(&target) {
                    out.batch.imports.push(ImportsRow {
                        from_file_id: result.file_id.clone(),
                        to_file_id: to_file_id.clone(),
                        imported_symbols: symbols.clone(),
                        line: *line,
                    });
                    import_targets.push((target, symbols.clone()));
                }
            }
        }

        for call in &result.unresolved_calls {
            self.link_call(result, call, &import_targets, &mut out);
        }
        for type_ref in &result.unresolved_types {
            self.link_type_ref(result, type_ref, &import_targets, &mut out);
        }
        out
    }

    fn link_call(
        &self,
        result: &ExtractionResult,
        call: &UnresolvedCall,
        imports: &[(String, Vec<String>)],
        out: &mut LinkOutput,
    ) {
        // (a) Imported symbol, when the call site names a module.
        if let Some(specifier) = &call.module_path {
            if let Some(target) = self
                .registry
                .resolve_module(&result.relative_path, specifier)
            {
                let covered = imports
                    .iter()
                    .any(|(t, symbols)| t == &target && symbols.contains(&call.callee_name));
                if covered {
                    let candidates: Vec<&SymbolInfo> = self
                        .registry
                        .exported(&target, &call.callee_name)
                        .into_iter()
                        .filter(|s| s.is_callable())
                        .collect();
                    if let Some(symbol) = self.pick(&candidates, call.arg_count, result, &call.callee_name, call.line, out)
                    {
                        out.batch.calls.push(CallsRow {
                            caller_id: call.caller_id.clone(),
                            callee_id: symbol.id.clone(),
                            line: call.line,
                            is_direct: call.is_direct,
                            is_async: call.is_async,
                        });
                        out.resolved_calls += 1;
                        return;
                    }
                }
            }
        }

        // (b) Local symbol table.
        let locals: Vec<&SymbolInfo> = self
            .registry
            .local(&result.relative_path)
            .iter()
            .filter(|s| s.is_callable() && s.name == call.callee_name)
            .collect();
        if let Some(symbol) =
            self.pick(&locals, call.arg_count, result, &call.callee_name, call.line, out)
        {
            out.batch.calls.push(CallsRow {
                caller_id: call.caller_id.clone(),
                callee_id: symbol.id.clone(),
                line: call.line,
                is_direct: call.is_direct,
                is_async: call.is_async,
            });
            out.resolved_calls += 1;
            return;
        }

        // (c) Ghost reference. Not an error.
        let package = call
            .module_path
            .clone()
            .unwrap_or_else(|| UNKNOWN_PACKAGE.to_string());
        let ghost_id = self.ghost(&package, &call.callee_name, out);
        out.batch.references_external.push(ReferencesExternalRow {
            source_id: call.caller_id.clone(),
            ghost_id,
            line: call.line,
        });
        out.ghost_refs += 1;
    }

    fn link_type_ref(
        &self,
        result: &ExtractionResult,
        type_ref: &UnresolvedTypeRef,
        imports: &[(String, Vec<String>)],
        out: &mut LinkOutput,
    ) {
        // Imported types first (name must be covered by an import row),
        // then local declarations.
        let mut resolved: Option<&SymbolInfo> = None;
        for (target, symbols) in imports {
            if symbols.contains(&type_ref.type_name) {
                let candidates: Vec<&SymbolInfo> = self
                    .registry
                    .exported(target, &type_ref.type_name)
                    .into_iter()
                    .filter(|s| s.is_type())
                    .collect();
                resolved = self.pick(&candidates, None, result, &type_ref.type_name, 0, out);
                if resolved.is_some() {
                    break;
                }
            }
        }
        if resolved.is_none() {
            let locals: Vec<&SymbolInfo> = self
                .registry
                .local(&result.relative_path)
                .iter()
                .filter(|s| s.is_type() && s.name == type_ref.type_name)
                .collect();
            resolved = self.pick(&locals, None, result, &type_ref.type_name, 0, out);
        }

        match resolved {
            Some(symbol) => match type_ref.context {
                TypeRefContext::Extends => out.batch.inheritance.push(InheritanceRow {
                    kind: InheritanceKind::Extends,
                    from_id: type_ref.source_id.clone(),
                    to_id: symbol.id.clone(),
                }),
                TypeRefContext::Implements => out.batch.inheritance.push(InheritanceRow {
                    kind: InheritanceKind::Implements,
                    from_id: type_ref.source_id.clone(),
                    to_id: symbol.id.clone(),
                }),
                TypeRefContext::ExtendsInterface => out.batch.inheritance.push(InheritanceRow {
                    kind: InheritanceKind::ExtendsInterface,
                    from_id: type_ref.source_id.clone(),
                    to_id: symbol.id.clone(),
                }),
                context => out.batch.uses_type.push(UsesTypeRow {
                    source_id: type_ref.source_id.clone(),
                    type_id: symbol.id.clone(),
                    context,
                    parameter_name: type_ref.parameter_name.clone(),
                }),
            },
            None => {
                let ghost_id = self.ghost(UNKNOWN_PACKAGE, &type_ref.type_name, out);
                out.batch.references_external.push(ReferencesExternalRow {
                    source_id: type_ref.source_id.clone(),
                    ghost_id,
                    line: 0,
                });
                out.ghost_refs += 1;
            }
        }
    }

    /// Tie-breaking: a unique candidate wins outright; with several,
    /// prefer an exact arity match, else the first in source order
    /// (ascending start line, then name) with an ambiguity diagnostic.
    fn pick<'a>(
        &self,
        candidates: &[&'a SymbolInfo],
        arity: Option<u32>,
        result: &ExtractionResult,
        name: &str,
        line: u32,
        out: &mut LinkOutput,
    ) -> Option<&'a SymbolInfo> {
        match candidates.len() {
            0 => None,
            1 => Some(candidates[0]),
            _ => {
                if let Some(arity) = arity {
                    let exact: Vec<&'a SymbolInfo> = candidates
                        .iter()
                        .copied()
                        .filter(|s| s.param_count == Some(arity))
                        .collect();
                    if exact.len() == 1 {
                        return Some(exact[0]);
                    }
                }
                let mut ordered: Vec<&'a SymbolInfo> = candidates.to_vec();
                ordered.sort_by(|a, b| {
                    a.start_line
                        .cmp(&b.start_line)
                        .then_with(|| a.name.cmp(&b.name))
                });
                out.diagnostics.push(LinkDiagnostic {
                    relative_path: result.relative_path.clone(),
                    name: name.to_string(),
                    line,
                    kind: LinkDiagnosticKind::Ambiguous {
                        candidates: candidates.len(),
                    },
                });
                tracing::debug!(
                    target: "linker",
                    "ambiguous reference '{name}' in {} ({} candidates), picked source order",
                    result.relative_path,
                    candidates.len()
                );
                Some(ordered[0])
            }
        }
    }

    fn ghost(&self, package: &str, export: &str, out: &mut LinkOutput) -> EntityId {
        let key = (package.to_string(), export.to_string());
        if let Some(existing) = self.ghosts.get(&key) {
            return existing.clone();
        }
        let id = ident::ghost_id(package, export);
        self.ghosts.insert(key, id.clone());
        out.batch.ghost_nodes.push(GhostNodeRow {
            id: id.clone(),
            package_name: package.to_string(),
            export_name: export.to_string(),
        });
        id
    }
}

/// Commit one file's link output in a single transaction.
pub fn commit_link_output(
    store: &GraphStore,
    schema: &crate::storage::SchemaDef,
    output: &LinkOutput,
) -> crate::error::StoreResult<()> {
    if output.batch.is_empty() {
        return Ok(());
    }
    store.with_transaction(|tx| store::put_batch(tx, schema, &output.batch))
}
