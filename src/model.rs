//! Stored row types: the entities and relationships of the graph.
//!
//! Both entities and edges are first-class rows in the graph store.
//! Edges have no independent lifetime; they are deleted with either
//! endpoint. Every row type knows how to serialize itself into the
//! column order its relation declares in [`crate::storage::schema`].

use crate::types::{EntityId, EntityKind};
use cozo::DataValue;
use serde::{Deserialize, Serialize};

/// One row per indexed source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRow {
    pub id: EntityId,
    pub absolute_path: String,
    pub relative_path: String,
    pub extension: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub last_indexed_at: u64,
    pub language: String,
    pub framework: Option<String>,
}

/// Functions and methods share this record; methods always carry their
/// parent class in `parent_scope` and set `is_method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRow {
    pub id: EntityId,
    pub name: String,
    pub file_id: EntityId,
    pub parent_scope: String,
    pub start_line: u32,
    pub end_line: u32,
    pub start_col: u16,
    pub end_col: u16,
    pub signature: String,
    pub return_type: Option<String>,
    pub is_exported: bool,
    pub is_async: bool,
    pub is_generator: bool,
    pub is_method: bool,
    pub complexity: u32,
    pub parameter_count: u32,
    pub doc_comment: Option<String>,
    pub embedding_text: Option<String>,
    pub inference_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRow {
    pub id: EntityId,
    pub name: String,
    pub file_id: EntityId,
    pub start_line: u32,
    pub end_line: u32,
    pub is_abstract: bool,
    pub is_exported: bool,
    pub extends_name: Option<String>,
    pub implements_names: Vec<String>,
    pub doc_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRow {
    pub id: EntityId,
    pub name: String,
    pub file_id: EntityId,
    pub start_line: u32,
    pub end_line: u32,
    pub is_exported: bool,
    pub extends_names: Vec<String>,
    pub doc_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAliasRow {
    pub id: EntityId,
    pub name: String,
    pub file_id: EntityId,
    pub start_line: u32,
    pub end_line: u32,
    pub is_exported: bool,
    pub aliased_type: Option<String>,
    pub doc_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRow {
    pub id: EntityId,
    pub name: String,
    pub file_id: EntityId,
    pub start_line: u32,
    pub end_line: u32,
    pub is_exported: bool,
    pub is_const: bool,
    pub type_name: Option<String>,
}

/// Placeholder entity for an external (unresolved or third-party)
/// reference target. Deduplicated by `(package_name, export_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostNodeRow {
    pub id: EntityId,
    pub package_name: String,
    pub export_name: String,
}

// ─── Edge rows ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainsRow {
    pub parent_id: EntityId,
    pub child_id: EntityId,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallsRow {
    pub caller_id: EntityId,
    pub callee_id: EntityId,
    pub line: u32,
    pub is_direct: bool,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportsRow {
    pub from_file_id: EntityId,
    pub to_file_id: EntityId,
    pub imported_symbols: Vec<String>,
    pub line: u32,
}

/// Which of the three inheritance relations an edge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritanceKind {
    Extends,
    Implements,
    ExtendsInterface,
}

impl InheritanceKind {
    pub fn relation(&self) -> &'static str {
        match self {
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::ExtendsInterface => "extends_interface",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceRow {
    pub kind: InheritanceKind,
    pub from_id: EntityId,
    pub to_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasMethodRow {
    pub class_id: EntityId,
    pub function_id: EntityId,
    pub visibility: String,
    pub is_static: bool,
    pub is_abstract: bool,
}

/// Context in which a type reference occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRefContext {
    Parameter,
    Return,
    Generic,
    Extends,
    Implements,
    ExtendsInterface,
}

impl TypeRefContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parameter => "parameter",
            Self::Return => "return",
            Self::Generic => "generic",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::ExtendsInterface => "extends_interface",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsesTypeRow {
    pub source_id: EntityId,
    pub type_id: EntityId,
    pub context: TypeRefContext,
    pub parameter_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencesExternalRow {
    pub source_id: EntityId,
    pub ghost_id: EntityId,
    pub line: u32,
}

// ─── Batch ──────────────────────────────────────────────────────────────

/// A batch of rows for one file, committed as one atomic block.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    pub files: Vec<FileRow>,
    pub functions: Vec<FunctionRow>,
    pub classes: Vec<ClassRow>,
    pub interfaces: Vec<InterfaceRow>,
    pub type_aliases: Vec<TypeAliasRow>,
    pub variables: Vec<VariableRow>,
    pub ghost_nodes: Vec<GhostNodeRow>,
    pub contains: Vec<ContainsRow>,
    pub calls: Vec<CallsRow>,
    pub imports: Vec<ImportsRow>,
    pub inheritance: Vec<InheritanceRow>,
    pub has_method: Vec<HasMethodRow>,
    pub uses_type: Vec<UsesTypeRow>,
    pub references_external: Vec<ReferencesExternalRow>,
}

impl RowBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: RowBatch) {
        self.files.extend(other.files);
        self.functions.extend(other.functions);
        self.classes.extend(other.classes);
        self.interfaces.extend(other.interfaces);
        self.type_aliases.extend(other.type_aliases);
        self.variables.extend(other.variables);
        self.ghost_nodes.extend(other.ghost_nodes);
        self.contains.extend(other.contains);
        self.calls.extend(other.calls);
        self.imports.extend(other.imports);
        self.inheritance.extend(other.inheritance);
        self.has_method.extend(other.has_method);
        self.uses_type.extend(other.uses_type);
        self.references_external.extend(other.references_external);
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn row_count(&self) -> usize {
        self.files.len()
            + self.functions.len()
            + self.classes.len()
            + self.interfaces.len()
            + self.type_aliases.len()
            + self.variables.len()
            + self.ghost_nodes.len()
            + self.contains.len()
            + self.calls.len()
            + self.imports.len()
            + self.inheritance.len()
            + self.has_method.len()
            + self.uses_type.len()
            + self.references_external.len()
    }

    /// Ids of every entity row in this batch (files and ghosts included).
    pub fn entity_ids(&self) -> Vec<(EntityId, EntityKind)> {
        let mut out = Vec::new();
        out.extend(self.files.iter().map(|r| (r.id.clone(), EntityKind::File)));
        out.extend(self.functions.iter().map(|r| {
            let kind = if r.is_method {
                EntityKind::Method
            } else {
                EntityKind::Function
            };
            (r.id.clone(), kind)
        }));
        out.extend(self.classes.iter().map(|r| (r.id.clone(), EntityKind::Class)));
        out.extend(
            self.interfaces
                .iter()
                .map(|r| (r.id.clone(), EntityKind::Interface)),
        );
        out.extend(
            self.type_aliases
                .iter()
                .map(|r| (r.id.clone(), EntityKind::TypeAlias)),
        );
        out.extend(
            self.variables
                .iter()
                .map(|r| (r.id.clone(), EntityKind::Variable)),
        );
        out.extend(
            self.ghost_nodes
                .iter()
                .map(|r| (r.id.clone(), EntityKind::Ghost)),
        );
        out
    }
}

// ─── DataValue conversion ───────────────────────────────────────────────

/// Helpers shared by every row serializer.
pub(crate) mod value {
    use cozo::DataValue;

    pub fn str(s: &str) -> DataValue {
        DataValue::from(s)
    }

    pub fn opt_str(s: &Option<String>) -> DataValue {
        match s {
            Some(v) => DataValue::from(v.as_str()),
            None => DataValue::Null,
        }
    }

    pub fn int(v: i64) -> DataValue {
        DataValue::from(v)
    }

    pub fn boolean(v: bool) -> DataValue {
        DataValue::from(v)
    }

    pub fn opt_float(v: &Option<f64>) -> DataValue {
        match v {
            Some(f) => DataValue::from(*f),
            None => DataValue::Null,
        }
    }

    pub fn str_list(items: &[String]) -> DataValue {
        DataValue::List(items.iter().map(|s| DataValue::from(s.as_str())).collect())
    }
}

/// Serialize rows in the column order their relation declares.
pub trait ToRow {
    /// Relation this row belongs to.
    fn relation(&self) -> &'static str;
    /// Values in declared column order (keys first, then dependents).
    fn values(&self) -> Vec<DataValue>;
}

impl ToRow for FileRow {
    fn relation(&self) -> &'static str {
        "files"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.id.as_str()),
            value::str(&self.absolute_path),
            value::str(&self.relative_path),
            value::str(&self.extension),
            value::str(&self.content_hash),
            value::int(self.size_bytes as i64),
            value::int(self.last_indexed_at as i64),
            value::str(&self.language),
            value::opt_str(&self.framework),
        ]
    }
}

impl ToRow for FunctionRow {
    fn relation(&self) -> &'static str {
        "functions"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.id.as_str()),
            value::str(&self.name),
            value::str(self.file_id.as_str()),
            value::str(&self.parent_scope),
            value::int(self.start_line as i64),
            value::int(self.end_line as i64),
            value::int(self.start_col as i64),
            value::int(self.end_col as i64),
            value::str(&self.signature),
            value::opt_str(&self.return_type),
            value::boolean(self.is_exported),
            value::boolean(self.is_async),
            value::boolean(self.is_generator),
            value::boolean(self.is_method),
            value::int(self.complexity as i64),
            value::int(self.parameter_count as i64),
            value::opt_str(&self.doc_comment),
            value::opt_str(&self.embedding_text),
            value::opt_float(&self.inference_confidence),
        ]
    }
}

impl ToRow for ClassRow {
    fn relation(&self) -> &'static str {
        "classes"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.id.as_str()),
            value::str(&self.name),
            value::str(self.file_id.as_str()),
            value::int(self.start_line as i64),
            value::int(self.end_line as i64),
            value::boolean(self.is_abstract),
            value::boolean(self.is_exported),
            value::opt_str(&self.extends_name),
            value::str_list(&self.implements_names),
            value::opt_str(&self.doc_comment),
        ]
    }
}

impl ToRow for InterfaceRow {
    fn relation(&self) -> &'static str {
        "interfaces"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.id.as_str()),
            value::str(&self.name),
            value::str(self.file_id.as_str()),
            value::int(self.start_line as i64),
            value::int(self.end_line as i64),
            value::boolean(self.is_exported),
            value::str_list(&self.extends_names),
            value::opt_str(&self.doc_comment),
        ]
    }
}

impl ToRow for TypeAliasRow {
    fn relation(&self) -> &'static str {
        "type_aliases"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.id.as_str()),
            value::str(&self.name),
            value::str(self.file_id.as_str()),
            value::int(self.start_line as i64),
            value::int(self.end_line as i64),
            value::boolean(self.is_exported),
            value::opt_str(&self.aliased_type),
            value::opt_str(&self.doc_comment),
        ]
    }
}

impl ToRow for VariableRow {
    fn relation(&self) -> &'static str {
        "variables"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.id.as_str()),
            value::str(&self.name),
            value::str(self.file_id.as_str()),
            value::int(self.start_line as i64),
            value::int(self.end_line as i64),
            value::boolean(self.is_exported),
            value::boolean(self.is_const),
            value::opt_str(&self.type_name),
        ]
    }
}

impl ToRow for GhostNodeRow {
    fn relation(&self) -> &'static str {
        "ghost_nodes"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.id.as_str()),
            value::str(&self.package_name),
            value::str(&self.export_name),
        ]
    }
}

impl ToRow for ContainsRow {
    fn relation(&self) -> &'static str {
        "contains"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.parent_id.as_str()),
            value::str(self.child_id.as_str()),
            value::int(self.line as i64),
        ]
    }
}

impl ToRow for CallsRow {
    fn relation(&self) -> &'static str {
        "calls"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.caller_id.as_str()),
            value::str(self.callee_id.as_str()),
            value::int(self.line as i64),
            value::boolean(self.is_direct),
            value::boolean(self.is_async),
        ]
    }
}

impl ToRow for ImportsRow {
    fn relation(&self) -> &'static str {
        "imports"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.from_file_id.as_str()),
            value::str(self.to_file_id.as_str()),
            value::str_list(&self.imported_symbols),
            value::int(self.line as i64),
        ]
    }
}

impl ToRow for InheritanceRow {
    fn relation(&self) -> &'static str {
        self.kind.relation()
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.from_id.as_str()),
            value::str(self.to_id.as_str()),
        ]
    }
}

impl ToRow for HasMethodRow {
    fn relation(&self) -> &'static str {
        "has_method"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.class_id.as_str()),
            value::str(self.function_id.as_str()),
            value::str(&self.visibility),
            value::boolean(self.is_static),
            value::boolean(self.is_abstract),
        ]
    }
}

impl ToRow for UsesTypeRow {
    fn relation(&self) -> &'static str {
        "uses_type"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.source_id.as_str()),
            value::str(self.type_id.as_str()),
            value::str(self.context.as_str()),
            value::opt_str(&self.parameter_name),
        ]
    }
}

impl ToRow for ReferencesExternalRow {
    fn relation(&self) -> &'static str {
        "references_external"
    }
    fn values(&self) -> Vec<DataValue> {
        vec![
            value::str(self.source_id.as_str()),
            value::str(self.ghost_id.as_str()),
            value::int(self.line as i64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident;

    fn sample_function() -> FunctionRow {
        FunctionRow {
            id: ident::entity_id("src/a.ts", EntityKind::Function, "", "f", &[]),
            name: "f".into(),
            file_id: ident::file_id("src/a.ts"),
            parent_scope: String::new(),
            start_line: 1,
            end_line: 3,
            start_col: 0,
            end_col: 1,
            signature: "f(): void".into(),
            return_type: Some("void".into()),
            is_exported: true,
            is_async: false,
            is_generator: false,
            is_method: false,
            complexity: 1,
            parameter_count: 0,
            doc_comment: None,
            embedding_text: None,
            inference_confidence: None,
        }
    }

    #[test]
    fn function_row_arity_matches_schema() {
        let row = sample_function();
        let def = crate::storage::schema::SchemaDef::core();
        let rel = def.relation("functions").unwrap();
        assert_eq!(row.values().len(), rel.arity());
    }

    #[test]
    fn all_batch_rows_match_schema_arity() {
        let def = crate::storage::schema::SchemaDef::core();
        let file = FileRow {
            id: ident::file_id("src/a.ts"),
            absolute_path: "/w/src/a.ts".into(),
            relative_path: "src/a.ts".into(),
            extension: "ts".into(),
            content_hash: "00".into(),
            size_bytes: 10,
            last_indexed_at: 0,
            language: "typescript".into(),
            framework: None,
        };
        assert_eq!(file.values().len(), def.relation("files").unwrap().arity());

        let ghost = GhostNodeRow {
            id: ident::ghost_id("lodash", "map"),
            package_name: "lodash".into(),
            export_name: "map".into(),
        };
        assert_eq!(
            ghost.values().len(),
            def.relation("ghost_nodes").unwrap().arity()
        );

        let uses = UsesTypeRow {
            source_id: ident::entity_id("a.ts", EntityKind::Function, "", "f", &[]),
            type_id: ident::entity_id("a.ts", EntityKind::Class, "", "C", &[]),
            context: TypeRefContext::Parameter,
            parameter_name: Some("c".into()),
        };
        assert_eq!(
            uses.values().len(),
            def.relation("uses_type").unwrap().arity()
        );
    }

    #[test]
    fn batch_merge_and_counts() {
        let mut a = RowBatch::new();
        a.functions.push(sample_function());
        let mut b = RowBatch::new();
        b.functions.push(sample_function());
        b.contains.push(ContainsRow {
            parent_id: ident::file_id("src/a.ts"),
            child_id: a.functions[0].id.clone(),
            line: 1,
        });
        a.merge(b);
        assert_eq!(a.row_count(), 3);
        assert_eq!(a.entity_ids().len(), 2);
    }

    #[test]
    fn inheritance_row_picks_relation_by_kind() {
        let row = InheritanceRow {
            kind: InheritanceKind::ExtendsInterface,
            from_id: ident::entity_id("a.ts", EntityKind::Interface, "", "A", &[]),
            to_id: ident::entity_id("a.ts", EntityKind::Interface, "", "B", &[]),
        };
        assert_eq!(row.relation(), "extends_interface");
    }
}
