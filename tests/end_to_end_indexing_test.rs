//! End-to-end indexing scenarios over a toy repository: fresh index,
//! reformat, rename, cross-file calls and ghost references.

mod common;

use common::mini_indexer;
use std::fs;
use synapta::ident::{self, ParamSig};
use synapta::storage::{Params, params};
use synapta::types::EntityKind;
use tempfile::TempDir;

const UTIL_EXPORTED: &str = r#"export function greet(name: string): string {
  return "hello " + name
}
"#;

#[tokio::test(flavor = "multi_thread")]
async fn fresh_index_produces_expected_rows_and_ids() {
    let repo = TempDir::new().unwrap();
    fs::create_dir_all(repo.path().join("src")).unwrap();
    fs::write(repo.path().join("src/util.ts"), UTIL_EXPORTED).unwrap();

    let indexer = mini_indexer();
    let report = indexer.index_project(repo.path()).await.unwrap();

    assert!(report.success());
    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_failed, 0);

    let expected_file_id = ident::file_id("src/util.ts");
    let expected_fn_id = ident::entity_id(
        "src/util.ts",
        EntityKind::Function,
        "",
        "greet",
        &[ParamSig::new("name", Some("string"))],
    );

    let store = indexer.store();
    let files = store
        .query(
            "?[id, content_hash] := *files{id, content_hash}",
            Params::new(),
        )
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files.get_str(0, "id").unwrap(), expected_file_id.as_str());
    assert_eq!(
        files.get_str(0, "content_hash").unwrap(),
        synapta::project::hash_bytes(UTIL_EXPORTED.as_bytes())
    );

    let functions = store
        .query("?[id, name] := *functions{id, name}", Params::new())
        .unwrap();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions.get_str(0, "id").unwrap(), expected_fn_id.as_str());

    let contains = store
        .query(
            "?[parent_id, child_id, line] := *contains{parent_id, child_id, line}",
            Params::new(),
        )
        .unwrap();
    assert_eq!(contains.len(), 1);
    assert_eq!(
        contains.get_str(0, "parent_id").unwrap(),
        expected_file_id.as_str()
    );
    assert_eq!(
        contains.get_str(0, "child_id").unwrap(),
        expected_fn_id.as_str()
    );
    assert_eq!(contains.get_int(0, "line").unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn reformat_keeps_ids_and_updates_hash_and_lines() {
    let repo = TempDir::new().unwrap();
    fs::create_dir_all(repo.path().join("src")).unwrap();
    let path = repo.path().join("src/util.ts");
    fs::write(&path, UTIL_EXPORTED).unwrap();

    let indexer = mini_indexer();
    indexer.index_project(repo.path()).await.unwrap();

    let fn_id = ident::entity_id(
        "src/util.ts",
        EntityKind::Function,
        "",
        "greet",
        &[ParamSig::new("name", Some("string"))],
    );

    // Insert two leading blank lines.
    let reformatted = format!("\n\n{UTIL_EXPORTED}");
    fs::write(&path, &reformatted).unwrap();
    let report = indexer.index_project(repo.path()).await.unwrap();
    assert_eq!(report.files_indexed, 1);

    let store = indexer.store();
    let functions = store
        .query(
            "?[id, start_line] := *functions{id, start_line}",
            Params::new(),
        )
        .unwrap();
    assert_eq!(functions.len(), 1, "no new or orphan function rows");
    assert_eq!(functions.get_str(0, "id").unwrap(), fn_id.as_str());
    assert_eq!(functions.get_int(0, "start_line").unwrap(), 3);

    let files = store
        .query("?[content_hash] := *files{content_hash}", Params::new())
        .unwrap();
    assert_eq!(
        files.get_str(0, "content_hash").unwrap(),
        synapta::project::hash_bytes(reformatted.as_bytes())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rename_swaps_ids_and_drops_old_edges() {
    let repo = TempDir::new().unwrap();
    fs::create_dir_all(repo.path().join("src")).unwrap();
    let path = repo.path().join("src/util.ts");
    fs::write(&path, UTIL_EXPORTED).unwrap();

    let indexer = mini_indexer();
    indexer.index_project(repo.path()).await.unwrap();

    let old_id = ident::entity_id(
        "src/util.ts",
        EntityKind::Function,
        "",
        "greet",
        &[ParamSig::new("name", Some("string"))],
    );
    let new_id = ident::entity_id(
        "src/util.ts",
        EntityKind::Function,
        "",
        "hello",
        &[ParamSig::new("name", Some("string"))],
    );

    fs::write(&path, UTIL_EXPORTED.replace("greet", "hello")).unwrap();
    indexer.index_project(repo.path()).await.unwrap();

    let store = indexer.store();
    let functions = store
        .query("?[id] := *functions{id}", Params::new())
        .unwrap();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions.get_str(0, "id").unwrap(), new_id.as_str());

    // No edge still references the old id.
    let stale = store
        .query(
            "?[parent_id, child_id] := *contains{parent_id, child_id}, \
             (parent_id = $old; child_id = $old)",
            params([("old", cozo::DataValue::from(old_id.as_str()))]),
        )
        .unwrap();
    assert!(stale.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn cross_file_call_resolves_to_imported_function() {
    let repo = TempDir::new().unwrap();
    fs::create_dir_all(repo.path().join("src")).unwrap();
    fs::write(repo.path().join("src/util.ts"), UTIL_EXPORTED).unwrap();
    fs::write(
        repo.path().join("src/a.ts"),
        r#"import { greet } from "./util"

function main() {
  greet("x")
}
"#,
    )
    .unwrap();

    let indexer = mini_indexer();
    let report = indexer.index_project(repo.path()).await.unwrap();
    assert!(report.success());
    assert_eq!(report.calls_resolved, 1);

    let store = indexer.store();
    let file_a = ident::file_id("src/a.ts");
    let file_util = ident::file_id("src/util.ts");
    let greet_id = ident::entity_id(
        "src/util.ts",
        EntityKind::Function,
        "",
        "greet",
        &[ParamSig::new("name", Some("string"))],
    );
    let main_id = ident::entity_id("src/a.ts", EntityKind::Function, "", "main", &[]);

    let imports = store
        .query(
            "?[from_file_id, to_file_id, imported_symbols] := \
             *imports{from_file_id, to_file_id, imported_symbols}",
            Params::new(),
        )
        .unwrap();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports.get_str(0, "from_file_id").unwrap(), file_a.as_str());
    assert_eq!(
        imports.get_str(0, "to_file_id").unwrap(),
        file_util.as_str()
    );
    assert_eq!(
        imports.get_str_list(0, "imported_symbols").unwrap(),
        vec!["greet".to_string()]
    );

    let calls = store
        .query(
            "?[caller_id, callee_id, line, is_direct, is_async] := \
             *calls{caller_id, callee_id, line, is_direct, is_async}",
            Params::new(),
        )
        .unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls.get_str(0, "caller_id").unwrap(), main_id.as_str());
    assert_eq!(calls.get_str(0, "callee_id").unwrap(), greet_id.as_str());
    assert_eq!(calls.get_int(0, "line").unwrap(), 4);
    assert!(calls.get_bool(0, "is_direct").unwrap());
    assert!(!calls.get_bool(0, "is_async").unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn unexported_target_materializes_ghost_reference() {
    let repo = TempDir::new().unwrap();
    fs::create_dir_all(repo.path().join("src")).unwrap();
    // util declares greet but does not export it.
    fs::write(
        repo.path().join("src/util.ts"),
        r#"function greet(name: string): string {
  return "hello " + name
}
"#,
    )
    .unwrap();
    fs::write(
        repo.path().join("src/a.ts"),
        r#"import { greet } from "./util"

function main() {
  greet("x")
}
"#,
    )
    .unwrap();

    let indexer = mini_indexer();
    let report = indexer.index_project(repo.path()).await.unwrap();
    assert_eq!(report.ghost_refs, 1);

    let store = indexer.store();
    let ghosts = store
        .query(
            "?[id, package_name, export_name] := \
             *ghost_nodes{id, package_name, export_name}",
            Params::new(),
        )
        .unwrap();
    assert_eq!(ghosts.len(), 1);
    assert_eq!(ghosts.get_str(0, "package_name").unwrap(), "./util");
    assert_eq!(ghosts.get_str(0, "export_name").unwrap(), "greet");

    let refs = store
        .query(
            "?[source_id, ghost_id] := *references_external{source_id, ghost_id}",
            Params::new(),
        )
        .unwrap();
    assert_eq!(refs.len(), 1);

    let calls = store
        .query("?[caller_id] := *calls{caller_id}", Params::new())
        .unwrap();
    assert!(calls.is_empty(), "no concrete call edge for a ghost target");
}

#[tokio::test(flavor = "multi_thread")]
async fn modifying_a_callee_file_keeps_incoming_edges_until_rename() {
    let repo = TempDir::new().unwrap();
    fs::create_dir_all(repo.path().join("src")).unwrap();
    let util_path = repo.path().join("src/util.ts");
    fs::write(&util_path, UTIL_EXPORTED).unwrap();
    fs::write(
        repo.path().join("src/a.ts"),
        r#"import { greet } from "./util"

function main() {
  greet("x")
}
"#,
    )
    .unwrap();

    let indexer = mini_indexer();
    indexer.index_project(repo.path()).await.unwrap();

    let count_calls = || {
        indexer
            .store()
            .query("?[caller_id] := *calls{caller_id}", Params::new())
            .unwrap()
            .len()
    };
    assert_eq!(count_calls(), 1);

    // Reformat the callee file: ids are stable, so the incoming call
    // edge from the untouched caller file must survive re-extraction.
    fs::write(&util_path, format!("\n\n{UTIL_EXPORTED}")).unwrap();
    indexer.index_project(repo.path()).await.unwrap();
    assert_eq!(count_calls(), 1, "stable-id rewrite keeps incoming edges");

    // Rename the callee: its id changes, so the stale incoming edge is
    // scrubbed until the caller's file re-links.
    fs::write(&util_path, UTIL_EXPORTED.replace("greet", "hello")).unwrap();
    indexer.index_project(repo.path()).await.unwrap();
    assert_eq!(count_calls(), 0, "dangling incoming edges are removed");
}

#[tokio::test(flavor = "multi_thread")]
async fn reindexing_unchanged_repo_is_a_row_level_noop() {
    let repo = TempDir::new().unwrap();
    fs::create_dir_all(repo.path().join("src")).unwrap();
    fs::write(repo.path().join("src/util.ts"), UTIL_EXPORTED).unwrap();

    let indexer = mini_indexer();
    indexer.index_project(repo.path()).await.unwrap();

    let store = indexer.store();
    let before = store
        .query(
            "?[id, last_indexed_at] := *files{id, last_indexed_at}",
            Params::new(),
        )
        .unwrap();

    let second = indexer.index_project(repo.path()).await.unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_unchanged, 1);
    assert_eq!(second.files_removed, 0);

    let after = store
        .query(
            "?[id, last_indexed_at] := *files{id, last_indexed_at}",
            Params::new(),
        )
        .unwrap();
    assert_eq!(before.rows, after.rows, "unchanged file rows untouched");
}
