//! Entity extraction — Pass 1.
//!
//! Converts one file's UCE tree into a row batch plus the unresolved
//! cross-file references the linker settles in Pass 2. Extraction is
//! strictly local: nothing here looks at another file. Per-entity
//! failures become diagnostics and extraction continues; an id
//! collision is a hard error.

pub mod chunks;

pub use chunks::{BODY_PREVIEW_CAP, EmbeddingChunk};

use crate::error::{IndexError, IndexResult};
use crate::ident::{self, ParamSig};
use crate::model::{
    ClassRow, ContainsRow, FileRow, FunctionRow, HasMethodRow, InterfaceRow, RowBatch,
    TypeAliasRow, TypeRefContext, VariableRow,
};
use crate::parsing::{
    Modifiers, UceClass, UceFunction, UceInterface, UceTree, UceTypeAlias, UceVariable,
    Visibility,
};
use crate::project::ScannedFile;
use crate::types::{EntityId, EntityKind, utc_timestamp};
use std::collections::HashMap;

/// Primitive type names filtered out of unresolved-type emission.
/// Language-agnostic allow-list; anything here never becomes a type ref.
const PRIMITIVE_TYPES: &[&str] = &[
    "string", "number", "boolean", "void", "undefined", "null", "never", "any", "unknown",
    "bigint", "symbol", "object", "str", "int", "float", "bool", "bytes", "i8", "i16", "i32",
    "i64", "u8", "u16", "u32", "u64", "f32", "f64", "usize", "isize", "char", "unit", "none",
];

/// A call site awaiting Pass-2 resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedCall {
    pub caller_id: EntityId,
    pub callee_name: String,
    pub module_path: Option<String>,
    pub line: u32,
    pub is_direct: bool,
    pub is_async: bool,
    pub arg_count: Option<u32>,
}

/// A type reference awaiting Pass-2 resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedTypeRef {
    pub source_id: EntityId,
    pub type_name: String,
    pub context: TypeRefContext,
    pub parameter_name: Option<String>,
}

/// Per-entity extraction diagnostic.
#[derive(Debug, Clone)]
pub struct ExtractionDiagnostic {
    pub kind: EntityKind,
    pub name: String,
    pub error: String,
    pub line: u32,
}

/// Everything Pass 1 produced for one file.
#[derive(Debug)]
pub struct ExtractionResult {
    pub file_id: EntityId,
    pub relative_path: String,
    pub content_hash: String,
    pub batch: RowBatch,
    pub unresolved_calls: Vec<UnresolvedCall>,
    pub unresolved_types: Vec<UnresolvedTypeRef>,
    pub chunks: Vec<EmbeddingChunk>,
    pub diagnostics: Vec<ExtractionDiagnostic>,
    /// Names this file exports, keyed for the linker's import resolution.
    pub exports: Vec<String>,
    /// Raw imports (module specifier → symbols) for Pass 2.
    pub imports: Vec<(String, Vec<String>, u32)>,
}

/// Reduce a parser-reported type to its base name:
/// `Array<User>` → `Array`, `T[]` → `T`, `A | B` → `A`.
/// Returns `None` for primitives and empty results.
pub fn reduce_type(raw: &str) -> Option<String> {
    let mut name = raw.trim();
    // Union / intersection: first alternative.
    if let Some(first) = name.split(['|', '&']).next() {
        name = first.trim();
    }
    // Array shorthand.
    while let Some(stripped) = name.strip_suffix("[]") {
        name = stripped.trim();
    }
    // Generics: base name only.
    if let Some(base) = name.split('<').next() {
        name = base.trim();
    }
    if name.is_empty() || PRIMITIVE_TYPES.contains(&name.to_lowercase().as_str()) {
        return None;
    }
    Some(name.to_string())
}

/// Tagged dispatch target: one variant per entity kind.
enum EntityNode<'a> {
    Function(&'a UceFunction),
    Class(&'a UceClass),
    Interface(&'a UceInterface),
    TypeAlias(&'a UceTypeAlias),
    Variable(&'a UceVariable),
}

/// The Pass-1 extractor. Stateless; one instance serves all workers.
#[derive(Debug, Default, Clone)]
pub struct EntityExtractor;

impl EntityExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract one file. `framework` comes from project detection and
    /// lands on the file row.
    pub fn extract(
        &self,
        file: &ScannedFile,
        tree: &UceTree,
        framework: Option<&str>,
    ) -> IndexResult<ExtractionResult> {
        let file_id = ident::file_id(&file.relative_path);
        let mut out = ExtractionResult {
            file_id: file_id.clone(),
            relative_path: file.relative_path.clone(),
            content_hash: file.content_hash.clone(),
            batch: RowBatch::new(),
            unresolved_calls: Vec::new(),
            unresolved_types: Vec::new(),
            chunks: Vec::new(),
            diagnostics: Vec::new(),
            exports: tree.exports.clone(),
            imports: tree
                .imports
                .iter()
                .map(|i| (i.module_path.clone(), i.symbols.clone(), i.line))
                .collect(),
        };

        out.batch.files.push(FileRow {
            id: file_id.clone(),
            absolute_path: file.absolute_path.to_string_lossy().into_owned(),
            relative_path: file.relative_path.clone(),
            extension: file
                .absolute_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string(),
            content_hash: file.content_hash.clone(),
            size_bytes: file.size_bytes,
            last_indexed_at: utc_timestamp(),
            language: file.language.name().to_string(),
            framework: framework.map(str::to_string),
        });

        // Seen-id ledger: same id twice is a hard error, never an
        // overwrite.
        let mut seen: HashMap<EntityId, String> = HashMap::new();
        seen.insert(file_id.clone(), format!("file {}", file.relative_path));

        let nodes: Vec<EntityNode> = tree
            .functions
            .iter()
            .map(EntityNode::Function)
            .chain(tree.classes.iter().map(EntityNode::Class))
            .chain(tree.interfaces.iter().map(EntityNode::Interface))
            .chain(tree.type_aliases.iter().map(EntityNode::TypeAlias))
            .chain(tree.variables.iter().map(EntityNode::Variable))
            .collect();

        for node in nodes {
            match node {
                EntityNode::Function(f) => {
                    self.extract_function(&mut out, &mut seen, f, "", Visibility::Public, None)?
                }
                EntityNode::Class(c) => self.extract_class(&mut out, &mut seen, c)?,
                EntityNode::Interface(i) => self.extract_interface(&mut out, &mut seen, i)?,
                EntityNode::TypeAlias(t) => self.extract_type_alias(&mut out, &mut seen, t)?,
                EntityNode::Variable(v) => self.extract_variable(&mut out, &mut seen, v)?,
            }
        }

        Ok(out)
    }

    fn claim_id(
        seen: &mut HashMap<EntityId, String>,
        id: &EntityId,
        descriptor: String,
    ) -> IndexResult<()> {
        if let Some(existing) = seen.get(id) {
            return Err(IndexError::IdCollision {
                id: id.clone(),
                existing: existing.clone(),
                incoming: descriptor,
            });
        }
        seen.insert(id.clone(), descriptor);
        Ok(())
    }

    fn params_sig(function: &UceFunction) -> Vec<ParamSig> {
        function
            .params
            .iter()
            .map(|p| ParamSig {
                name: p.name.clone(),
                type_name: p.type_name.clone(),
            })
            .collect()
    }

    /// Shared extractor for free functions and methods. Methods carry
    /// the class name as `parent_scope` and a `has_method` edge.
    fn extract_function(
        &self,
        out: &mut ExtractionResult,
        seen: &mut HashMap<EntityId, String>,
        function: &UceFunction,
        parent_scope: &str,
        visibility: Visibility,
        parent_class: Option<&EntityId>,
    ) -> IndexResult<()> {
        let kind = if parent_class.is_some() {
            EntityKind::Method
        } else {
            EntityKind::Function
        };
        let params = Self::params_sig(function);
        let id = ident::entity_id(
            &out.relative_path,
            kind,
            parent_scope,
            &function.name,
            &params,
        );
        Self::claim_id(
            seen,
            &id,
            format!("{} {}{}", kind.tag(), scope_prefix(parent_scope), function.name),
        )?;

        let chunk = chunks::function_chunk(
            id.clone(),
            kind,
            &out.relative_path,
            function,
            parent_scope,
        );

        out.batch.functions.push(FunctionRow {
            id: id.clone(),
            name: function.name.clone(),
            file_id: out.file_id.clone(),
            parent_scope: parent_scope.to_string(),
            start_line: function.range.start_line,
            end_line: function.range.end_line,
            start_col: function.range.start_column,
            end_col: function.range.end_column,
            signature: function.signature.clone(),
            return_type: function.return_type.clone(),
            is_exported: function.is_exported(),
            is_async: function.is_async(),
            is_generator: function.modifiers.contains(Modifiers::GENERATOR),
            is_method: parent_class.is_some(),
            complexity: function.complexity,
            parameter_count: function.params.len() as u32,
            doc_comment: function.doc_comment.clone(),
            embedding_text: Some(chunk.text.clone()),
            inference_confidence: None,
        });

        // Containment hangs off the enclosing scope.
        let parent_id = parent_class.unwrap_or(&out.file_id).clone();
        out.batch.contains.push(ContainsRow {
            parent_id: parent_id.clone(),
            child_id: id.clone(),
            line: function.range.start_line,
        });

        if let Some(class_id) = parent_class {
            out.batch.has_method.push(HasMethodRow {
                class_id: class_id.clone(),
                function_id: id.clone(),
                visibility: visibility_tag(visibility).to_string(),
                is_static: function.modifiers.contains(Modifiers::STATIC),
                is_abstract: function.modifiers.contains(Modifiers::ABSTRACT),
            });
        }

        for call in &function.calls {
            out.unresolved_calls.push(UnresolvedCall {
                caller_id: id.clone(),
                callee_name: call.callee.clone(),
                module_path: call.module_path.clone(),
                line: call.line,
                is_direct: call.is_direct,
                is_async: call.is_await,
                arg_count: call.arg_count,
            });
        }

        for param in &function.params {
            if let Some(ty) = param.type_name.as_deref().and_then(reduce_type) {
                out.unresolved_types.push(UnresolvedTypeRef {
                    source_id: id.clone(),
                    type_name: ty,
                    context: TypeRefContext::Parameter,
                    parameter_name: Some(param.name.clone()),
                });
            }
        }
        if let Some(ty) = function.return_type.as_deref().and_then(reduce_type) {
            out.unresolved_types.push(UnresolvedTypeRef {
                source_id: id.clone(),
                type_name: ty,
                context: TypeRefContext::Return,
                parameter_name: None,
            });
        }

        out.chunks.push(chunk);
        Ok(())
    }

    fn extract_class(
        &self,
        out: &mut ExtractionResult,
        seen: &mut HashMap<EntityId, String>,
        class: &UceClass,
    ) -> IndexResult<()> {
        let id = ident::entity_id(&out.relative_path, EntityKind::Class, "", &class.name, &[]);
        Self::claim_id(seen, &id, format!("class {}", class.name))?;

        out.batch.classes.push(ClassRow {
            id: id.clone(),
            name: class.name.clone(),
            file_id: out.file_id.clone(),
            start_line: class.range.start_line,
            end_line: class.range.end_line,
            is_abstract: class.modifiers.contains(Modifiers::ABSTRACT),
            is_exported: class.modifiers.contains(Modifiers::EXPORT),
            extends_name: class.extends.clone(),
            implements_names: class.implements.clone(),
            doc_comment: class.doc_comment.clone(),
        });
        out.batch.contains.push(ContainsRow {
            parent_id: out.file_id.clone(),
            child_id: id.clone(),
            line: class.range.start_line,
        });

        // Inheritance targets resolve in Pass 2; record the symbolic refs.
        if let Some(base) = class.extends.as_deref().and_then(reduce_type) {
            out.unresolved_types.push(UnresolvedTypeRef {
                source_id: id.clone(),
                type_name: base,
                context: TypeRefContext::Extends,
                parameter_name: None,
            });
        }
        for iface in &class.implements {
            if let Some(name) = reduce_type(iface) {
                out.unresolved_types.push(UnresolvedTypeRef {
                    source_id: id.clone(),
                    type_name: name,
                    context: TypeRefContext::Implements,
                    parameter_name: None,
                });
            }
        }

        out.chunks
            .push(chunks::class_chunk(id.clone(), &out.relative_path, class));

        for method in &class.methods {
            self.extract_function(
                out,
                seen,
                &method.function,
                &class.name,
                method.visibility,
                Some(&id),
            )?;
        }
        Ok(())
    }

    fn extract_interface(
        &self,
        out: &mut ExtractionResult,
        seen: &mut HashMap<EntityId, String>,
        interface: &UceInterface,
    ) -> IndexResult<()> {
        let id = ident::entity_id(
            &out.relative_path,
            EntityKind::Interface,
            "",
            &interface.name,
            &[],
        );
        Self::claim_id(seen, &id, format!("interface {}", interface.name))?;

        out.batch.interfaces.push(InterfaceRow {
            id: id.clone(),
            name: interface.name.clone(),
            file_id: out.file_id.clone(),
            start_line: interface.range.start_line,
            end_line: interface.range.end_line,
            is_exported: interface.modifiers.contains(Modifiers::EXPORT),
            extends_names: interface.extends.clone(),
            doc_comment: interface.doc_comment.clone(),
        });
        out.batch.contains.push(ContainsRow {
            parent_id: out.file_id.clone(),
            child_id: id.clone(),
            line: interface.range.start_line,
        });

        for base in &interface.extends {
            if let Some(name) = reduce_type(base) {
                out.unresolved_types.push(UnresolvedTypeRef {
                    source_id: id.clone(),
                    type_name: name,
                    context: TypeRefContext::ExtendsInterface,
                    parameter_name: None,
                });
            }
        }
        Ok(())
    }

    fn extract_type_alias(
        &self,
        out: &mut ExtractionResult,
        seen: &mut HashMap<EntityId, String>,
        alias: &UceTypeAlias,
    ) -> IndexResult<()> {
        let id = ident::entity_id(
            &out.relative_path,
            EntityKind::TypeAlias,
            "",
            &alias.name,
            &[],
        );
        Self::claim_id(seen, &id, format!("type_alias {}", alias.name))?;

        out.batch.type_aliases.push(TypeAliasRow {
            id: id.clone(),
            name: alias.name.clone(),
            file_id: out.file_id.clone(),
            start_line: alias.range.start_line,
            end_line: alias.range.end_line,
            is_exported: alias.modifiers.contains(Modifiers::EXPORT),
            aliased_type: alias.aliased.clone(),
            doc_comment: alias.doc_comment.clone(),
        });
        out.batch.contains.push(ContainsRow {
            parent_id: out.file_id.clone(),
            child_id: id.clone(),
            line: alias.range.start_line,
        });

        if let Some(target) = alias.aliased.as_deref().and_then(reduce_type) {
            out.unresolved_types.push(UnresolvedTypeRef {
                source_id: id,
                type_name: target,
                context: TypeRefContext::Generic,
                parameter_name: None,
            });
        }
        Ok(())
    }

    fn extract_variable(
        &self,
        out: &mut ExtractionResult,
        seen: &mut HashMap<EntityId, String>,
        variable: &UceVariable,
    ) -> IndexResult<()> {
        let id = ident::entity_id(
            &out.relative_path,
            EntityKind::Variable,
            "",
            &variable.name,
            &[],
        );
        Self::claim_id(seen, &id, format!("variable {}", variable.name))?;

        out.batch.variables.push(VariableRow {
            id: id.clone(),
            name: variable.name.clone(),
            file_id: out.file_id.clone(),
            start_line: variable.range.start_line,
            end_line: variable.range.end_line,
            is_exported: variable.modifiers.contains(Modifiers::EXPORT),
            is_const: variable.is_const,
            type_name: variable.type_name.clone(),
        });
        out.batch.contains.push(ContainsRow {
            parent_id: out.file_id.clone(),
            child_id: id,
            line: variable.range.start_line,
        });
        Ok(())
    }
}

fn scope_prefix(parent_scope: &str) -> String {
    if parent_scope.is_empty() {
        String::new()
    } else {
        format!("{parent_scope}.")
    }
}

fn visibility_tag(v: Visibility) -> &'static str {
    match v {
        Visibility::Public => "public",
        Visibility::Protected => "protected",
        Visibility::Private => "private",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::{UceCall, UceImport, UceParam};
    use crate::types::{Language, Range};
    use std::path::PathBuf;

    fn scanned(relative: &str, content: &[u8]) -> ScannedFile {
        ScannedFile {
            absolute_path: PathBuf::from(format!("/repo/{relative}")),
            relative_path: relative.to_string(),
            size_bytes: content.len() as u64,
            content_hash: crate::project::hash_bytes(content),
            language: Language::TypeScript,
        }
    }

    fn greet_tree() -> UceTree {
        UceTree {
            functions: vec![
                UceFunction::new("greet", Range::new(1, 0, 3, 1))
                    .with_params(vec![UceParam::new("name", Some("string"))])
                    .with_return_type("string")
                    .with_signature("greet(name: string): string")
                    .with_modifiers(Modifiers::EXPORT),
            ],
            exports: vec!["greet".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn fresh_extraction_produces_expected_rows() {
        let file = scanned("src/util.ext", b"function greet() {}");
        let result = EntityExtractor::new()
            .extract(&file, &greet_tree(), None)
            .unwrap();

        assert_eq!(result.batch.files.len(), 1);
        assert_eq!(result.batch.functions.len(), 1);
        assert_eq!(result.batch.contains.len(), 1);

        let function = &result.batch.functions[0];
        let expected_id = ident::entity_id(
            "src/util.ext",
            EntityKind::Function,
            "",
            "greet",
            &[ParamSig::new("name", Some("string"))],
        );
        assert_eq!(function.id, expected_id);
        assert_eq!(result.batch.contains[0].parent_id, result.file_id);
        assert_eq!(result.batch.contains[0].child_id, expected_id);
        assert_eq!(result.batch.contains[0].line, 1);
    }

    #[test]
    fn primitive_types_are_filtered_from_type_refs() {
        let file = scanned("src/util.ext", b"x");
        let result = EntityExtractor::new()
            .extract(&file, &greet_tree(), None)
            .unwrap();
        // `string` params/returns are primitives: no type refs at all.
        assert!(result.unresolved_types.is_empty());
    }

    #[test]
    fn generic_and_array_types_reduce_to_base() {
        assert_eq!(reduce_type("Array<User>").as_deref(), Some("Array"));
        assert_eq!(reduce_type("User[]").as_deref(), Some("User"));
        assert_eq!(reduce_type("User | null").as_deref(), Some("User"));
        assert_eq!(reduce_type("string"), None);
        assert_eq!(reduce_type("string[]"), None);
        assert_eq!(reduce_type(""), None);
    }

    #[test]
    fn class_with_methods_emits_has_method_and_scoped_ids() {
        let class = UceClass::new("UserService", Range::new(1, 0, 20, 1))
            .extending("BaseService")
            .implementing("Repository")
            .with_modifiers(Modifiers::EXPORT)
            .with_method(
                UceFunction::new("save", Range::new(2, 2, 5, 3))
                    .with_params(vec![UceParam::new("user", Some("User"))])
                    .with_modifiers(Modifiers::ASYNC),
                Visibility::Public,
            );
        let tree = UceTree {
            classes: vec![class],
            ..Default::default()
        };
        let file = scanned("src/service.ts", b"class UserService {}");
        let result = EntityExtractor::new().extract(&file, &tree, None).unwrap();

        assert_eq!(result.batch.classes.len(), 1);
        assert_eq!(result.batch.functions.len(), 1);
        assert_eq!(result.batch.has_method.len(), 1);

        let method = &result.batch.functions[0];
        assert!(method.is_method);
        assert_eq!(method.parent_scope, "UserService");
        assert!(method.is_async);

        // contains: file→class and class→method.
        assert_eq!(result.batch.contains.len(), 2);
        let class_id = &result.batch.classes[0].id;
        assert_eq!(&result.batch.contains[1].parent_id, class_id);

        // extends + implements recorded as unresolved refs, method's
        // parameter type too.
        let contexts: Vec<_> = result.unresolved_types.iter().map(|t| t.context).collect();
        assert!(contexts.contains(&TypeRefContext::Extends));
        assert!(contexts.contains(&TypeRefContext::Implements));
        assert!(contexts.contains(&TypeRefContext::Parameter));
    }

    #[test]
    fn calls_are_recorded_unresolved() {
        let tree = UceTree {
            functions: vec![
                UceFunction::new("main", Range::new(1, 0, 5, 1)).with_call(
                    UceCall::new("greet", 3).with_module("./util").awaited(),
                ),
            ],
            imports: vec![UceImport::new("./util", vec!["greet".to_string()], 1)],
            ..Default::default()
        };
        let file = scanned("src/a.ext", b"main");
        let result = EntityExtractor::new().extract(&file, &tree, None).unwrap();

        assert_eq!(result.unresolved_calls.len(), 1);
        let call = &result.unresolved_calls[0];
        assert_eq!(call.callee_name, "greet");
        assert_eq!(call.module_path.as_deref(), Some("./util"));
        assert_eq!(call.line, 3);
        assert!(call.is_async);
        assert_eq!(result.imports.len(), 1);
    }

    #[test]
    fn duplicate_entities_are_a_hard_error() {
        let tree = UceTree {
            functions: vec![
                UceFunction::new("dup", Range::line(1)),
                UceFunction::new("dup", Range::line(9)),
            ],
            ..Default::default()
        };
        let file = scanned("src/a.ext", b"x");
        let err = EntityExtractor::new().extract(&file, &tree, None).unwrap_err();
        assert!(matches!(err, IndexError::IdCollision { .. }));
    }

    #[test]
    fn reformat_keeps_ids_stable() {
        let file = scanned("src/util.ext", b"v1");
        let r1 = EntityExtractor::new()
            .extract(&file, &greet_tree(), None)
            .unwrap();

        // Same declarations, shifted two lines down (reformat).
        let mut shifted = greet_tree();
        shifted.functions[0].range = Range::new(3, 0, 5, 1);
        let file2 = scanned("src/util.ext", b"v2 with leading blank lines");
        let r2 = EntityExtractor::new().extract(&file2, &shifted, None).unwrap();

        assert_eq!(r1.batch.functions[0].id, r2.batch.functions[0].id);
        assert_ne!(
            r1.batch.functions[0].start_line,
            r2.batch.functions[0].start_line
        );
    }

    #[test]
    fn embedding_chunks_cover_functions_and_classes() {
        let tree = UceTree {
            functions: vec![UceFunction::new("f", Range::line(1))],
            classes: vec![UceClass::new("C", Range::line(5))],
            ..Default::default()
        };
        let file = scanned("src/x.ts", b"x");
        let result = EntityExtractor::new().extract(&file, &tree, None).unwrap();
        assert_eq!(result.chunks.len(), 2);
        // Function rows carry the chunk text for embedding.
        assert!(result.batch.functions[0].embedding_text.is_some());
    }
}
