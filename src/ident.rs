//! Deterministic entity identifiers.
//!
//! Ids are the first 16 hex characters of a SHA-256 digest over the
//! entity's stable coordinates:
//!
//! ```text
//! {relative_path}:{kind}:{parent_scope}:{name}:{disambiguator}
//! ```
//!
//! Location (line/column) never participates, so reformatting a file
//! leaves every id untouched, while renaming an entity or moving it to
//! another file produces a new id. Overloads are told apart by the
//! parameter-signature disambiguator.

use crate::types::{EntityId, EntityKind};
use sha2::{Digest, Sha256};

/// Longest disambiguator embedded verbatim; anything longer falls back
/// to a secondary hash of the full signature string.
const MAX_DISAMBIGUATOR_LEN: usize = 96;

/// A function parameter as reported by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSig {
    pub name: String,
    /// Parser-reported type, if any. Missing types hash as `any`.
    pub type_name: Option<String>,
}

impl ParamSig {
    pub fn new(name: impl Into<String>, type_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.map(str::to_string),
        }
    }
}

/// First 16 hex chars of sha256(input).
fn hex16(input: &str) -> EntityId {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    EntityId::from_raw(out)
}

/// Eight hex chars of sha256(input), used for oversized signatures.
fn hex8(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Normalize a relative path to forward slashes.
pub fn normalize_path(relative_path: &str) -> String {
    relative_path.replace('\\', "/")
}

/// Build the parameter disambiguator: `"p1:T1,p2:T2"`, empty for
/// parameterless functions. Oversized signatures collapse to
/// `sig#<hash8>` so pathological generic soup stays bounded.
pub fn disambiguator(params: &[ParamSig]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let full: Vec<String> = params
        .iter()
        .map(|p| {
            let ty = p.type_name.as_deref().unwrap_or("any");
            format!("{}:{}", p.name, ty)
        })
        .collect();
    let joined = full.join(",");
    if joined.len() > MAX_DISAMBIGUATOR_LEN {
        format!("sig#{}", hex8(&joined))
    } else {
        joined
    }
}

/// Id for a code entity (function, class, interface, type alias, variable).
///
/// `parent_scope` is empty for file-level entities, the class name for
/// methods, or the enclosing scope chain (`Outer.inner`) for nested
/// entities.
pub fn entity_id(
    relative_path: &str,
    kind: EntityKind,
    parent_scope: &str,
    name: &str,
    params: &[ParamSig],
) -> EntityId {
    let path = normalize_path(relative_path);
    let disambig = disambiguator(params);
    hex16(&format!(
        "{path}:{}:{parent_scope}:{name}:{disambig}",
        kind.tag()
    ))
}

/// Id for a file row.
pub fn file_id(relative_path: &str) -> EntityId {
    hex16(&format!("file:{}", normalize_path(relative_path)))
}

/// Id for a ghost node, deduplicated by `(package, export)`.
pub fn ghost_id(package_name: &str, export_name: &str) -> EntityId {
    hex16(&format!("ghost:{package_name}:{export_name}"))
}

/// Id for a module (directory) grouping.
pub fn module_id(directory: &str) -> EntityId {
    hex16(&format!("module:{}", normalize_path(directory)))
}
