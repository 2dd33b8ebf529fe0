//! Shared test fixtures: a small line-oriented parser implementing the
//! UCE contract, plus indexer setup helpers.

use std::path::Path;
use std::sync::Arc;

use synapta::config::Settings;
use synapta::parsing::{
    Modifiers, UceCall, UceFunction, UceImport, UceParam, UceParseError, UceParser, UceTree,
};
use synapta::storage::{GraphStore, MigrationRunner};
use synapta::types::{Language, Range};
use synapta::Indexer;

/// Minimal parser for test sources. Understands:
///
/// ```text
/// import { a, b } from "./mod"
/// export function name(p: string): string {
///   other("x")
/// }
/// ```
pub struct MiniParser;

impl MiniParser {
    fn parse_params(raw: &str) -> Vec<UceParam> {
        raw.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once(':') {
                Some((name, ty)) => UceParam::new(name.trim(), Some(ty.trim())),
                None => UceParam::new(p, None),
            })
            .collect()
    }

    fn header_of(line: &str) -> Option<(bool, bool, String, String, Option<String>)> {
        let trimmed = line.trim();
        let exported = trimmed.starts_with("export ");
        let rest = trimmed.trim_start_matches("export ").trim();
        let is_async = rest.starts_with("async ");
        let rest = rest.trim_start_matches("async ").trim();
        let rest = rest.strip_prefix("function ")?;

        let open = rest.find('(')?;
        let close = rest.find(')')?;
        let name = rest[..open].trim().to_string();
        let params = rest[open + 1..close].to_string();
        let return_type = rest[close + 1..]
            .trim()
            .strip_prefix(':')
            .map(|r| r.trim().trim_end_matches('{').trim().to_string())
            .filter(|r| !r.is_empty());
        Some((exported, is_async, name, params, return_type))
    }
}

impl UceParser for MiniParser {
    fn parse(&self, source: &str, _language: Language) -> Result<UceTree, UceParseError> {
        let lines: Vec<&str> = source.lines().collect();
        let mut tree = UceTree::new();

        // Imports first; call sites consult them.
        for (i, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("import {") {
                let Some((symbols, module)) = rest.split_once("} from") else {
                    continue;
                };
                let module = module.trim().trim_matches(['"', '\'', ';']).to_string();
                let symbols: Vec<String> = symbols
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                tree.imports
                    .push(UceImport::new(module, symbols, i as u32 + 1));
            }
        }

        // Function declarations with brace-matched bodies.
        let mut i = 0;
        while i < lines.len() {
            let Some((exported, is_async, name, raw_params, return_type)) =
                Self::header_of(lines[i])
            else {
                i += 1;
                continue;
            };

            let start_line = i as u32 + 1;
            let mut end = i;
            for (j, line) in lines.iter().enumerate().skip(i + 1) {
                if line.trim_start().starts_with('}') {
                    end = j;
                    break;
                }
            }
            let end_line = end as u32 + 1;

            let params = Self::parse_params(&raw_params);
            let signature = match &return_type {
                Some(ret) => format!("{name}({raw_params}): {ret}"),
                None => format!("{name}({raw_params})"),
            };
            let mut modifiers = Modifiers::empty();
            if exported {
                modifiers |= Modifiers::EXPORT;
                tree.exports.push(name.clone());
            }
            if is_async {
                modifiers |= Modifiers::ASYNC;
            }

            let mut function = UceFunction::new(&name, Range::new(start_line, 0, end_line, 1))
                .with_params(params)
                .with_signature(signature)
                .with_modifiers(modifiers);
            if let Some(ret) = return_type {
                function = function.with_return_type(ret);
            }

            // Call sites inside the body.
            let mut complexity = 1;
            for (j, line) in lines.iter().enumerate().take(end).skip(i + 1) {
                let trimmed = line.trim();
                if trimmed.starts_with("if ") || trimmed.starts_with("for ")
                    || trimmed.starts_with("while ")
                {
                    complexity += 1;
                }
                let Some(open) = trimmed.find('(') else {
                    continue;
                };
                let callee: String = trimmed[..open]
                    .chars()
                    .rev()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                if callee.is_empty()
                    || matches!(
                        callee.as_str(),
                        "function" | "if" | "for" | "while" | "switch" | "return"
                    )
                {
                    continue;
                }
                let args_raw = trimmed[open + 1..]
                    .split(')')
                    .next()
                    .unwrap_or("")
                    .trim();
                let arg_count = if args_raw.is_empty() {
                    0
                } else {
                    args_raw.split(',').count() as u32
                };
                let mut call = UceCall::new(&callee, j as u32 + 1).with_args(arg_count);
                if let Some(import) = tree
                    .imports
                    .iter()
                    .find(|imp| imp.symbols.contains(&callee))
                {
                    call = call.with_module(&import.module_path);
                }
                function = function.with_call(call);
            }
            function = function.with_complexity(complexity);

            if let Some(first_body_line) = lines.get(i + 1) {
                function = function.with_body_preview(first_body_line.trim());
            }

            tree.functions.push(function);
            i = end + 1;
        }

        Ok(tree)
    }

    fn parse_file(
        &self,
        _path: &Path,
        source: &str,
        language: Language,
    ) -> Result<UceTree, UceParseError> {
        self.parse(source, language)
    }
}

/// Indexer over an in-memory store, migrated, with the mini parser.
pub fn mini_indexer() -> Indexer {
    let store = GraphStore::in_memory().expect("mem store");
    MigrationRunner::core(8)
        .migrate_to_latest(&store)
        .expect("migrations");
    let mut settings = Settings::default();
    settings.storage.embedding_dimensions = 8;
    settings.indexing.parallel_threads = 2;
    Indexer::new(Arc::new(settings), Arc::new(store), Arc::new(MiniParser))
}
