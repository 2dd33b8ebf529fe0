//! Universal code entity (UCE) contract.
//!
//! The parser front-end is an external collaborator: anything that can
//! turn source bytes into a [`UceTree`] can feed the indexing pipeline.
//! This module defines that surface — the per-file entity lists, their
//! modifiers and locations, the body representation consumed by the
//! semantic analyzers, and the [`UceParser`] trait the coordinator
//! drives. No grammar library leaks through this boundary.

use crate::types::{Language, Range};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

bitflags::bitflags! {
    /// Declaration modifiers reported by the parser.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const EXPORT    = 0b0000_0001;
        const ASYNC     = 0b0000_0010;
        const STATIC    = 0b0000_0100;
        const ABSTRACT  = 0b0000_1000;
        const GENERATOR = 0b0001_0000;
    }
}

/// Errors from a parser collaborator.
#[derive(Error, Debug)]
pub enum UceParseError {
    #[error("Failed to initialize parser for {language}: {reason}")]
    ParserInit { language: String, reason: String },

    #[error("Syntax error at line {line}: {reason}")]
    Syntax { line: u32, reason: String },

    #[error("Invalid UTF-8 in source file")]
    InvalidUtf8,

    #[error("No parser registered for '{path}'")]
    NoParser { path: String },
}

/// A function or method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UceParam {
    pub name: String,
    pub type_name: Option<String>,
}

impl UceParam {
    pub fn new(name: impl Into<String>, type_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.map(str::to_string),
        }
    }
}

/// A call site observed inside a function body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UceCall {
    /// Callee name as written at the call site.
    pub callee: String,
    /// Module specifier if the callee is known to come from an import.
    pub module_path: Option<String>,
    pub line: u32,
    /// Direct invocation (`f()`) as opposed to passed-as-value.
    pub is_direct: bool,
    pub is_await: bool,
    /// Argument count at the call site, when the parser reports it.
    /// Used to pick between overloads.
    pub arg_count: Option<u32>,
}

impl UceCall {
    pub fn new(callee: impl Into<String>, line: u32) -> Self {
        Self {
            callee: callee.into(),
            module_path: None,
            line,
            is_direct: true,
            is_await: false,
            arg_count: None,
        }
    }

    pub fn with_args(mut self, count: u32) -> Self {
        self.arg_count = Some(count);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module_path = Some(module.into());
        self
    }

    pub fn awaited(mut self) -> Self {
        self.is_await = true;
        self
    }

    pub fn indirect(mut self) -> Self {
        self.is_direct = false;
        self
    }
}

/// A function or method declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UceFunction {
    pub name: String,
    pub range: Range,
    #[serde(skip)]
    pub modifiers: Modifiers,
    pub params: Vec<UceParam>,
    pub return_type: Option<String>,
    pub signature: String,
    pub doc_comment: Option<String>,
    /// Cyclomatic complexity as reported by the parser front-end.
    pub complexity: u32,
    pub calls: Vec<UceCall>,
    pub body: Option<BodyNode>,
    /// Capped plain-text body preview used for embedding chunks.
    pub body_preview: Option<String>,
}

impl UceFunction {
    pub fn new(name: impl Into<String>, range: Range) -> Self {
        let name = name.into();
        Self {
            signature: format!("{name}()"),
            name,
            range,
            modifiers: Modifiers::empty(),
            params: Vec::new(),
            return_type: None,
            doc_comment: None,
            complexity: 1,
            calls: Vec::new(),
            body: None,
            body_preview: None,
        }
    }

    pub fn with_params(mut self, params: Vec<UceParam>) -> Self {
        self.params = params;
        self
    }

    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = Some(ty.into());
        self
    }

    pub fn with_signature(mut self, sig: impl Into<String>) -> Self {
        self.signature = sig.into();
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc_comment = Some(doc.into());
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_complexity(mut self, complexity: u32) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_call(mut self, call: UceCall) -> Self {
        self.calls.push(call);
        self
    }

    pub fn with_body(mut self, body: BodyNode) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_body_preview(mut self, preview: impl Into<String>) -> Self {
        self.body_preview = Some(preview.into());
        self
    }

    pub fn is_exported(&self) -> bool {
        self.modifiers.contains(Modifiers::EXPORT)
    }

    pub fn is_async(&self) -> bool {
        self.modifiers.contains(Modifiers::ASYNC)
    }
}

/// A class declaration with its methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UceClass {
    pub name: String,
    pub range: Range,
    #[serde(skip)]
    pub modifiers: Modifiers,
    pub extends: Option<String>,
    pub implements: Vec<String>,
    pub doc_comment: Option<String>,
    pub methods: Vec<UceMethod>,
}

/// A method inside a class: a function plus visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UceMethod {
    pub function: UceFunction,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

impl UceClass {
    pub fn new(name: impl Into<String>, range: Range) -> Self {
        Self {
            name: name.into(),
            range,
            modifiers: Modifiers::empty(),
            extends: None,
            implements: Vec::new(),
            doc_comment: None,
            methods: Vec::new(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn extending(mut self, base: impl Into<String>) -> Self {
        self.extends = Some(base.into());
        self
    }

    pub fn implementing(mut self, iface: impl Into<String>) -> Self {
        self.implements.push(iface.into());
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc_comment = Some(doc.into());
        self
    }

    pub fn with_method(mut self, function: UceFunction, visibility: Visibility) -> Self {
        self.methods.push(UceMethod {
            function,
            visibility,
        });
        self
    }
}

/// An interface declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UceInterface {
    pub name: String,
    pub range: Range,
    #[serde(skip)]
    pub modifiers: Modifiers,
    pub extends: Vec<String>,
    pub doc_comment: Option<String>,
}

impl UceInterface {
    pub fn new(name: impl Into<String>, range: Range) -> Self {
        Self {
            name: name.into(),
            range,
            modifiers: Modifiers::empty(),
            extends: Vec::new(),
            doc_comment: None,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn extending(mut self, base: impl Into<String>) -> Self {
        self.extends.push(base.into());
        self
    }
}

/// A type alias declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UceTypeAlias {
    pub name: String,
    pub range: Range,
    #[serde(skip)]
    pub modifiers: Modifiers,
    pub aliased: Option<String>,
    pub doc_comment: Option<String>,
}

impl UceTypeAlias {
    pub fn new(name: impl Into<String>, range: Range) -> Self {
        Self {
            name: name.into(),
            range,
            modifiers: Modifiers::empty(),
            aliased: None,
            doc_comment: None,
        }
    }

    pub fn aliasing(mut self, target: impl Into<String>) -> Self {
        self.aliased = Some(target.into());
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// A top-level variable declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UceVariable {
    pub name: String,
    pub range: Range,
    #[serde(skip)]
    pub modifiers: Modifiers,
    pub type_name: Option<String>,
    pub is_const: bool,
}

impl UceVariable {
    pub fn new(name: impl Into<String>, range: Range) -> Self {
        Self {
            name: name.into(),
            range,
            modifiers: Modifiers::empty(),
            type_name: None,
            is_const: false,
        }
    }

    pub fn typed(mut self, ty: impl Into<String>) -> Self {
        self.type_name = Some(ty.into());
        self
    }

    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// An import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UceImport {
    /// Module specifier as written (`./util`, `lodash`).
    pub module_path: String,
    /// Imported symbol names.
    pub symbols: Vec<String>,
    pub line: u32,
}

impl UceImport {
    pub fn new(module_path: impl Into<String>, symbols: Vec<String>, line: u32) -> Self {
        Self {
            module_path: module_path.into(),
            symbols,
            line,
        }
    }
}

/// The universal code entity tree for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UceTree {
    pub functions: Vec<UceFunction>,
    pub classes: Vec<UceClass>,
    pub interfaces: Vec<UceInterface>,
    pub type_aliases: Vec<UceTypeAlias>,
    pub variables: Vec<UceVariable>,
    pub imports: Vec<UceImport>,
    /// Names this file exports (used by the linker to resolve imports).
    pub exports: Vec<String>,
}

impl UceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        let method_count: usize = self.classes.iter().map(|c| c.methods.len()).sum();
        self.functions.len()
            + self.classes.len()
            + method_count
            + self.interfaces.len()
            + self.type_aliases.len()
            + self.variables.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Body representation for semantic analyzers
// ═══════════════════════════════════════════════════════════════════════

/// Statement/expression kinds the analyzers recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyNodeKind {
    Block,
    Assignment,
    Call,
    Return,
    Throw,
    Try,
    Catch,
    If,
    Loop,
    Literal,
    Identifier,
    PropertyAccess,
    Expression,
}

/// Language-agnostic body node. `text` holds the source snippet for the
/// node; heuristic analyzers match against it, structural analyzers walk
/// `children`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyNode {
    pub kind: BodyNodeKind,
    pub text: String,
    pub line: u32,
    pub children: Vec<BodyNode>,
}

impl BodyNode {
    pub fn new(kind: BodyNodeKind, text: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: BodyNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: Vec<BodyNode>) -> Self {
        self.children = children;
        self
    }

    /// Depth-first traversal over this node and all descendants.
    pub fn walk(&self, visit: &mut impl FnMut(&BodyNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Collect all descendants (including self) of a given kind,
    /// in source order.
    pub fn find_all(&self, kind: BodyNodeKind) -> Vec<&BodyNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.kind == kind {
                out.push(node);
            }
            for child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parser collaborator trait
// ═══════════════════════════════════════════════════════════════════════

/// The parser collaborator contract.
///
/// Implementations must be thread-safe: the coordinator may call
/// `parse_file` from several extraction workers at once.
pub trait UceParser: Send + Sync {
    /// Parse source text into a UCE tree.
    fn parse(&self, source: &str, language: Language) -> Result<UceTree, UceParseError>;

    /// Parse with the file path available for lookup/diagnostics.
    ///
    /// The default forwards to [`parse`](Self::parse); fixture parsers
    /// override this to serve prebuilt trees keyed by path.
    fn parse_file(
        &self,
        _path: &Path,
        source: &str,
        language: Language,
    ) -> Result<UceTree, UceParseError> {
        self.parse(source, language)
    }
}

/// A parser that serves prebuilt trees keyed by relative path.
///
/// Used by tests and demos that drive the pipeline without a grammar
/// front-end. Paths are matched by suffix so absolute paths resolve to
/// their registered relative form.
#[derive(Default)]
pub struct StaticParser {
    trees: HashMap<String, UceTree>,
}

impl StaticParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(mut self, relative_path: impl Into<String>, tree: UceTree) -> Self {
        self.trees.insert(relative_path.into(), tree);
        self
    }

    pub fn insert(&mut self, relative_path: impl Into<String>, tree: UceTree) {
        self.trees.insert(relative_path.into(), tree);
    }
}

impl UceParser for StaticParser {
    fn parse(&self, _source: &str, _language: Language) -> Result<UceTree, UceParseError> {
        Err(UceParseError::NoParser {
            path: "<unknown>".to_string(),
        })
    }

    fn parse_file(
        &self,
        path: &Path,
        _source: &str,
        _language: Language,
    ) -> Result<UceTree, UceParseError> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.trees
            .iter()
            .find(|(rel, _)| normalized.ends_with(rel.as_str()))
            .map(|(_, tree)| tree.clone())
            .ok_or_else(|| UceParseError::NoParser {
                path: normalized.clone(),
            })
    }
}
