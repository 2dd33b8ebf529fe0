//! Declarative schema for the graph store.
//!
//! Relations are declared as data (key columns, dependent columns,
//! types, nullability) and a generator emits the engine DDL from the
//! map. The `schema_version` singleton is the migration runner's
//! private contract and must never appear here; the runner rejects any
//! schema that tries to declare it.

use crate::error::{StoreError, StoreResult};
use indexmap::IndexMap;

/// Name of the version singleton owned by the migration runner.
pub const VERSION_RELATION: &str = "schema_version";

/// Column value types supported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Str,
    Int,
    Float,
    Bool,
    /// List of strings (imported symbol lists, implements lists).
    StrList,
    /// Opaque JSON payload (analyzer results).
    Json,
    Bytes,
    /// Fixed-width float vector with declared dimensionality.
    Vector(usize),
}

impl ColumnType {
    fn ddl(&self) -> String {
        match self {
            Self::Str => "String".to_string(),
            Self::Int => "Int".to_string(),
            Self::Float => "Float".to_string(),
            Self::Bool => "Bool".to_string(),
            Self::StrList => "[String]".to_string(),
            Self::Json => "Json".to_string(),
            Self::Bytes => "Bytes".to_string(),
            Self::Vector(dim) => format!("<F32; {dim}>"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    pub fn nullable(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }

    fn ddl(&self) -> String {
        let suffix = if self.nullable { "?" } else { "" };
        format!("{}: {}{}", self.name, self.ty.ddl(), suffix)
    }
}

/// One relation: key columns determine the row identity; dependent
/// columns hang off the key.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub name: &'static str,
    pub keys: Vec<Column>,
    pub values: Vec<Column>,
}

impl RelationDef {
    pub fn new(name: &'static str, keys: Vec<Column>, values: Vec<Column>) -> Self {
        Self { name, keys, values }
    }

    pub fn arity(&self) -> usize {
        self.keys.len() + self.values.len()
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.keys
            .iter()
            .chain(self.values.iter())
            .map(|c| c.name)
            .collect()
    }

    /// `:create` DDL for this relation.
    pub fn create_ddl(&self) -> String {
        let keys: Vec<String> = self.keys.iter().map(Column::ddl).collect();
        if self.values.is_empty() {
            format!(":create {} {{{}}}", self.name, keys.join(", "))
        } else {
            let values: Vec<String> = self.values.iter().map(Column::ddl).collect();
            format!(
                ":create {} {{{} => {}}}",
                self.name,
                keys.join(", "),
                values.join(", ")
            )
        }
    }

    /// Script that puts `$rows` into this relation.
    pub fn put_script(&self) -> String {
        let cols = self.column_names().join(", ");
        let keys: Vec<&str> = self.keys.iter().map(|c| c.name).collect();
        let spec = if self.values.is_empty() {
            keys.join(", ")
        } else {
            let values: Vec<&str> = self.values.iter().map(|c| c.name).collect();
            format!("{} => {}", keys.join(", "), values.join(", "))
        };
        format!(
            "?[{cols}] <- $rows\n:put {} {{{spec}}}",
            self.name
        )
    }

    /// Script that removes `$rows` (key tuples) from this relation.
    pub fn rm_script(&self) -> String {
        let keys: Vec<&str> = self.keys.iter().map(|c| c.name).collect();
        format!(
            "?[{cols}] <- $rows\n:rm {} {{{cols}}}",
            self.name,
            cols = keys.join(", ")
        )
    }
}

/// The full declarative schema map, in deterministic declaration order.
#[derive(Debug, Clone)]
pub struct SchemaDef {
    relations: IndexMap<&'static str, RelationDef>,
}

impl SchemaDef {
    pub fn empty() -> Self {
        Self {
            relations: IndexMap::new(),
        }
    }

    pub fn with(mut self, rel: RelationDef) -> Self {
        self.relations.insert(rel.name, rel);
        self
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.values()
    }

    pub fn relation_names(&self) -> Vec<&'static str> {
        self.relations.keys().copied().collect()
    }

    /// Reject schemas that try to own the version singleton.
    pub fn validate(&self) -> StoreResult<()> {
        if self.relations.contains_key(VERSION_RELATION) {
            return Err(StoreError::Schema {
                reason: format!(
                    "relation '{VERSION_RELATION}' is reserved for the migration runner"
                ),
            });
        }
        for rel in self.relations.values() {
            if rel.keys.is_empty() {
                return Err(StoreError::Schema {
                    reason: format!("relation '{}' declares no key columns", rel.name),
                });
            }
        }
        Ok(())
    }

    /// The core graph schema (version 1), with the embedding column
    /// sized to `dimensions`.
    pub fn core_with_dimensions(dimensions: usize) -> Self {
        use ColumnType::*;

        Self::empty()
            .with(RelationDef::new(
                "files",
                vec![Column::required("id", Str)],
                vec![
                    Column::required("absolute_path", Str),
                    Column::required("relative_path", Str),
                    Column::required("extension", Str),
                    Column::required("content_hash", Str),
                    Column::required("size_bytes", Int),
                    Column::required("last_indexed_at", Int),
                    Column::required("language", Str),
                    Column::nullable("framework", Str),
                ],
            ))
            .with(RelationDef::new(
                "functions",
                vec![Column::required("id", Str)],
                vec![
                    Column::required("name", Str),
                    Column::required("file_id", Str),
                    Column::required("parent_scope", Str),
                    Column::required("start_line", Int),
                    Column::required("end_line", Int),
                    Column::required("start_col", Int),
                    Column::required("end_col", Int),
                    Column::required("signature", Str),
                    Column::nullable("return_type", Str),
                    Column::required("is_exported", Bool),
                    Column::required("is_async", Bool),
                    Column::required("is_generator", Bool),
                    Column::required("is_method", Bool),
                    Column::required("complexity", Int),
                    Column::required("parameter_count", Int),
                    Column::nullable("doc_comment", Str),
                    Column::nullable("embedding_text", Str),
                    Column::nullable("inference_confidence", Float),
                ],
            ))
            .with(RelationDef::new(
                "classes",
                vec![Column::required("id", Str)],
                vec![
                    Column::required("name", Str),
                    Column::required("file_id", Str),
                    Column::required("start_line", Int),
                    Column::required("end_line", Int),
                    Column::required("is_abstract", Bool),
                    Column::required("is_exported", Bool),
                    Column::nullable("extends_name", Str),
                    Column::required("implements_names", StrList),
                    Column::nullable("doc_comment", Str),
                ],
            ))
            .with(RelationDef::new(
                "interfaces",
                vec![Column::required("id", Str)],
                vec![
                    Column::required("name", Str),
                    Column::required("file_id", Str),
                    Column::required("start_line", Int),
                    Column::required("end_line", Int),
                    Column::required("is_exported", Bool),
                    Column::required("extends_names", StrList),
                    Column::nullable("doc_comment", Str),
                ],
            ))
            .with(RelationDef::new(
                "type_aliases",
                vec![Column::required("id", Str)],
                vec![
                    Column::required("name", Str),
                    Column::required("file_id", Str),
                    Column::required("start_line", Int),
                    Column::required("end_line", Int),
                    Column::required("is_exported", Bool),
                    Column::nullable("aliased_type", Str),
                    Column::nullable("doc_comment", Str),
                ],
            ))
            .with(RelationDef::new(
                "variables",
                vec![Column::required("id", Str)],
                vec![
                    Column::required("name", Str),
                    Column::required("file_id", Str),
                    Column::required("start_line", Int),
                    Column::required("end_line", Int),
                    Column::required("is_exported", Bool),
                    Column::required("is_const", Bool),
                    Column::nullable("type_name", Str),
                ],
            ))
            .with(RelationDef::new(
                "ghost_nodes",
                vec![Column::required("id", Str)],
                vec![
                    Column::required("package_name", Str),
                    Column::required("export_name", Str),
                ],
            ))
            .with(RelationDef::new(
                "contains",
                vec![
                    Column::required("parent_id", Str),
                    Column::required("child_id", Str),
                ],
                vec![Column::required("line", Int)],
            ))
            .with(RelationDef::new(
                "calls",
                vec![
                    Column::required("caller_id", Str),
                    Column::required("callee_id", Str),
                    Column::required("line", Int),
                ],
                vec![
                    Column::required("is_direct", Bool),
                    Column::required("is_async", Bool),
                ],
            ))
            .with(RelationDef::new(
                "imports",
                vec![
                    Column::required("from_file_id", Str),
                    Column::required("to_file_id", Str),
                ],
                vec![
                    Column::required("imported_symbols", StrList),
                    Column::required("line", Int),
                ],
            ))
            .with(RelationDef::new(
                "extends",
                vec![
                    Column::required("from_id", Str),
                    Column::required("to_id", Str),
                ],
                vec![],
            ))
            .with(RelationDef::new(
                "implements",
                vec![
                    Column::required("from_id", Str),
                    Column::required("to_id", Str),
                ],
                vec![],
            ))
            .with(RelationDef::new(
                "extends_interface",
                vec![
                    Column::required("from_id", Str),
                    Column::required("to_id", Str),
                ],
                vec![],
            ))
            .with(RelationDef::new(
                "has_method",
                vec![
                    Column::required("class_id", Str),
                    Column::required("function_id", Str),
                ],
                vec![
                    Column::required("visibility", Str),
                    Column::required("is_static", Bool),
                    Column::required("is_abstract", Bool),
                ],
            ))
            .with(RelationDef::new(
                "uses_type",
                vec![
                    Column::required("source_id", Str),
                    Column::required("type_id", Str),
                    Column::required("context", Str),
                ],
                vec![Column::nullable("parameter_name", Str)],
            ))
            .with(RelationDef::new(
                "references_external",
                vec![
                    Column::required("source_id", Str),
                    Column::required("ghost_id", Str),
                ],
                vec![Column::required("line", Int)],
            ))
            .with(RelationDef::new(
                "embeddings",
                vec![Column::required("entity_id", Str)],
                vec![
                    Column::required("vector", Vector(dimensions)),
                    Column::required("text_hash", Str),
                ],
            ))
            .with(RelationDef::new(
                "analysis_cache",
                vec![
                    Column::required("function_id", Str),
                    Column::required("file_hash", Str),
                    Column::required("analyzer", Str),
                ],
                vec![
                    Column::required("result", Json),
                    Column::required("computed_at", Int),
                ],
            ))
    }

    /// Core schema with the default embedding dimensionality.
    pub fn core() -> Self {
        Self::core_with_dimensions(384)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_schema_validates() {
        SchemaDef::core().validate().unwrap();
    }

    #[test]
    fn version_relation_is_rejected() {
        let bad = SchemaDef::empty().with(RelationDef::new(
            VERSION_RELATION,
            vec![Column::required("k", ColumnType::Int)],
            vec![],
        ));
        assert!(matches!(
            bad.validate(),
            Err(StoreError::Schema { .. })
        ));
    }

    #[test]
    fn keyless_relation_is_rejected() {
        let bad = SchemaDef::empty().with(RelationDef::new(
            "orphan",
            vec![],
            vec![Column::required("v", ColumnType::Int)],
        ));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn create_ddl_shape() {
        let def = SchemaDef::core();
        let files = def.relation("files").unwrap();
        let ddl = files.create_ddl();
        assert!(ddl.starts_with(":create files {id: String =>"));
        assert!(ddl.contains("framework: String?"));

        let extends = def.relation("extends").unwrap();
        assert_eq!(
            extends.create_ddl(),
            ":create extends {from_id: String, to_id: String}"
        );
    }

    #[test]
    fn vector_column_carries_dimensionality() {
        let def = SchemaDef::core_with_dimensions(768);
        let ddl = def.relation("embeddings").unwrap().create_ddl();
        assert!(ddl.contains("<F32; 768>"));
    }

    #[test]
    fn put_script_lists_all_columns() {
        let def = SchemaDef::core();
        let script = def.relation("calls").unwrap().put_script();
        assert!(script.contains("?[caller_id, callee_id, line, is_direct, is_async] <- $rows"));
        assert!(script.contains(":put calls {caller_id, callee_id, line => is_direct, is_async}"));
    }

    #[test]
    fn rm_script_uses_keys_only() {
        let def = SchemaDef::core();
        let script = def.relation("files").unwrap().rm_script();
        assert!(script.contains("?[id] <- $rows"));
        assert!(script.contains(":rm files {id}"));
    }

    #[test]
    fn declaration_order_is_stable() {
        let names = SchemaDef::core().relation_names();
        assert_eq!(names[0], "files");
        assert_eq!(names[1], "functions");
        assert!(names.contains(&"analysis_cache"));
        assert!(!names.contains(&VERSION_RELATION));
    }
}
