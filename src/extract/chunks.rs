//! Embedding chunk composition.
//!
//! One chunk per function/method/class: a canonical text block built
//! from the name, signature, cleaned doc comment, a capped body
//! preview, parameters and return type. The chunk text is what gets
//! embedded; the entity id keys the stored vector.

use crate::parsing::{UceClass, UceFunction};
use crate::types::{EntityId, EntityKind};
use serde::{Deserialize, Serialize};

/// Body previews are capped to keep chunk size bounded.
pub const BODY_PREVIEW_CAP: usize = 240;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingChunk {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub relative_path: String,
    pub text: String,
}

/// Strip comment delimiters and collapse whitespace in a doc comment.
fn clean_doc(doc: &str) -> String {
    doc.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_start_matches("*/")
                .trim_start_matches("///")
                .trim_start_matches("//")
                .trim_start_matches('*')
                .trim_start_matches('#')
                .trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate at a char boundary, appending an ellipsis when cut.
fn cap_preview(text: &str) -> String {
    if text.chars().count() <= BODY_PREVIEW_CAP {
        return text.to_string();
    }
    let capped: String = text.chars().take(BODY_PREVIEW_CAP).collect();
    format!("{capped}…")
}

/// Build the chunk for a function or method.
pub fn function_chunk(
    entity_id: EntityId,
    kind: EntityKind,
    relative_path: &str,
    function: &UceFunction,
    parent_scope: &str,
) -> EmbeddingChunk {
    let mut parts: Vec<String> = Vec::new();

    if parent_scope.is_empty() {
        parts.push(format!("{} {}", kind.tag(), function.name));
    } else {
        parts.push(format!("{} {}.{}", kind.tag(), parent_scope, function.name));
    }
    parts.push(format!("signature: {}", function.signature));

    if let Some(doc) = &function.doc_comment {
        let cleaned = clean_doc(doc);
        if !cleaned.is_empty() {
            parts.push(format!("doc: {cleaned}"));
        }
    }

    if !function.params.is_empty() {
        let params: Vec<String> = function
            .params
            .iter()
            .map(|p| match &p.type_name {
                Some(ty) => format!("{}: {ty}", p.name),
                None => p.name.clone(),
            })
            .collect();
        parts.push(format!("params: {}", params.join(", ")));
    }

    if let Some(ret) = &function.return_type {
        parts.push(format!("returns: {ret}"));
    }

    if let Some(preview) = &function.body_preview {
        parts.push(format!("body: {}", cap_preview(preview)));
    }

    EmbeddingChunk {
        entity_id,
        kind,
        name: function.name.clone(),
        relative_path: relative_path.to_string(),
        text: parts.join("\n"),
    }
}

/// Build the chunk for a class.
pub fn class_chunk(
    entity_id: EntityId,
    relative_path: &str,
    class: &UceClass,
) -> EmbeddingChunk {
    let mut parts: Vec<String> = Vec::new();
    parts.push(format!("class {}", class.name));

    if let Some(base) = &class.extends {
        parts.push(format!("extends: {base}"));
    }
    if !class.implements.is_empty() {
        parts.push(format!("implements: {}", class.implements.join(", ")));
    }
    if let Some(doc) = &class.doc_comment {
        let cleaned = clean_doc(doc);
        if !cleaned.is_empty() {
            parts.push(format!("doc: {cleaned}"));
        }
    }
    if !class.methods.is_empty() {
        let names: Vec<&str> = class
            .methods
            .iter()
            .map(|m| m.function.name.as_str())
            .collect();
        parts.push(format!("methods: {}", names.join(", ")));
    }

    EmbeddingChunk {
        entity_id,
        kind: EntityKind::Class,
        name: class.name.clone(),
        relative_path: relative_path.to_string(),
        text: parts.join("\n"),
    }
}
