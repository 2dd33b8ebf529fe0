//! Project detection from manifests and marker files.
//!
//! Produces a [`DetectedProject`] describing the primary language, the
//! framework (from a priority-ranked package-name table), a coarse
//! project classification, source/ignore globs and entry points.

use crate::error::{IndexError, IndexResult};
use crate::types::Language;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Coarse classification of a detected project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Application,
    Library,
    Service,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedProject {
    pub root: PathBuf,
    pub language: Language,
    pub framework: Option<String>,
    pub project_type: ProjectType,
    pub source_globs: Vec<String>,
    pub ignore_globs: Vec<String>,
    pub entry_points: Vec<PathBuf>,
}

/// Priority-ranked framework table: first matching package wins.
/// `(package name, framework tag, serves requests)`
const FRAMEWORKS: &[(&str, &str, bool)] = &[
    ("next", "next", true),
    ("@nestjs/core", "nestjs", true),
    ("react", "react", false),
    ("vue", "vue", false),
    ("svelte", "svelte", false),
    ("express", "express", true),
    ("fastify", "fastify", true),
    ("axum", "axum", true),
    ("actix-web", "actix-web", true),
    ("django", "django", true),
    ("flask", "flask", true),
    ("fastapi", "fastapi", true),
    ("github.com/gin-gonic/gin", "gin", true),
];

pub struct ProjectDetector;

impl ProjectDetector {
    /// Inspect `root` and classify the project.
    ///
    /// Probes, in order: `package.json` (+ `tsconfig.json`),
    /// `Cargo.toml`, `pyproject.toml` / `requirements.txt`, `go.mod`.
    pub fn detect(root: &Path) -> IndexResult<DetectedProject> {
        if root.join("package.json").is_file() {
            return Self::detect_node(root);
        }
        if root.join("Cargo.toml").is_file() {
            return Self::detect_rust(root);
        }
        if root.join("pyproject.toml").is_file() || root.join("requirements.txt").is_file() {
            return Self::detect_python(root);
        }
        if root.join("go.mod").is_file() {
            return Self::detect_go(root);
        }

        // No manifest: fall back to a generic multi-language layout.
        Ok(DetectedProject {
            root: root.to_path_buf(),
            language: Language::Unknown,
            framework: None,
            project_type: ProjectType::Library,
            source_globs: vec!["**/*".to_string()],
            ignore_globs: default_ignores(),
            entry_points: Vec::new(),
        })
    }

    fn detect_node(root: &Path) -> IndexResult<DetectedProject> {
        let manifest_path = root.join("package.json");
        let body =
            std::fs::read_to_string(&manifest_path).map_err(|source| IndexError::FileRead {
                path: manifest_path.clone(),
                source,
            })?;
        let manifest: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();

        let mut dependencies: Vec<String> = Vec::new();
        for section in ["dependencies", "devDependencies"] {
            if let Some(map) = manifest.get(section).and_then(|v| v.as_object()) {
                dependencies.extend(map.keys().cloned());
            }
        }

        let framework = match_framework(&dependencies);
        let serves = framework
            .as_ref()
            .map(|f| f.1)
            .unwrap_or(false);

        let language = if root.join("tsconfig.json").is_file() {
            Language::TypeScript
        } else {
            Language::JavaScript
        };

        let has_bin = manifest.get("bin").is_some();
        let project_type = if serves {
            ProjectType::Service
        } else if has_bin {
            ProjectType::Application
        } else {
            ProjectType::Library
        };

        let source_globs = match language {
            Language::TypeScript => vec![
                "**/*.ts".to_string(),
                "**/*.tsx".to_string(),
                "**/*.js".to_string(),
            ],
            _ => vec!["**/*.js".to_string(), "**/*.jsx".to_string()],
        };

        Ok(DetectedProject {
            root: root.to_path_buf(),
            language,
            framework: framework.map(|f| f.0),
            project_type,
            source_globs,
            ignore_globs: default_ignores(),
            entry_points: existing(root, &["src/index.ts", "src/index.js", "index.ts", "index.js"]),
        })
    }

    fn detect_rust(root: &Path) -> IndexResult<DetectedProject> {
        let manifest_path = root.join("Cargo.toml");
        let body =
            std::fs::read_to_string(&manifest_path).map_err(|source| IndexError::FileRead {
                path: manifest_path.clone(),
                source,
            })?;
        let manifest: toml::Value = body.parse().unwrap_or(toml::Value::String(String::new()));

        let mut dependencies: Vec<String> = Vec::new();
        if let Some(deps) = manifest.get("dependencies").and_then(|v| v.as_table()) {
            dependencies.extend(deps.keys().cloned());
        }
        let framework = match_framework(&dependencies);

        let has_main = root.join("src/main.rs").is_file();
        let project_type = if framework.as_ref().map(|f| f.1).unwrap_or(false) {
            ProjectType::Service
        } else if has_main {
            ProjectType::Application
        } else {
            ProjectType::Library
        };

        Ok(DetectedProject {
            root: root.to_path_buf(),
            language: Language::Rust,
            framework: framework.map(|f| f.0),
            project_type,
            source_globs: vec!["**/*.rs".to_string()],
            ignore_globs: default_ignores(),
            entry_points: existing(root, &["src/main.rs", "src/lib.rs"]),
        })
    }

    fn detect_python(root: &Path) -> IndexResult<DetectedProject> {
        let mut dependencies: Vec<String> = Vec::new();
        if let Ok(body) = std::fs::read_to_string(root.join("requirements.txt")) {
            dependencies.extend(
                body.lines()
                    .map(|l| {
                        l.split(['=', '<', '>', '~', ';', ' '])
                            .next()
                            .unwrap_or("")
                            .trim()
                            .to_lowercase()
                    })
                    .filter(|s| !s.is_empty()),
            );
        }
        if let Ok(body) = std::fs::read_to_string(root.join("pyproject.toml")) {
            if let Ok(manifest) = body.parse::<toml::Value>() {
                if let Some(deps) = manifest
                    .get("project")
                    .and_then(|p| p.get("dependencies"))
                    .and_then(|v| v.as_array())
                {
                    dependencies.extend(deps.iter().filter_map(|d| {
                        d.as_str()
                            .map(|s| s.split(['=', '<', '>', '~', '[']).next().unwrap_or("").to_lowercase())
                    }));
                }
            }
        }

        let framework = match_framework(&dependencies);
        let project_type = if framework.as_ref().map(|f| f.1).unwrap_or(false) {
            ProjectType::Service
        } else {
            ProjectType::Library
        };

        Ok(DetectedProject {
            root: root.to_path_buf(),
            language: Language::Python,
            framework: framework.map(|f| f.0),
            project_type,
            source_globs: vec!["**/*.py".to_string()],
            ignore_globs: default_ignores(),
            entry_points: existing(root, &["main.py", "app.py", "manage.py"]),
        })
    }

    fn detect_go(root: &Path) -> IndexResult<DetectedProject> {
        let body = std::fs::read_to_string(root.join("go.mod")).unwrap_or_default();
        let dependencies: Vec<String> = body
            .lines()
            .map(|l| l.trim().split_whitespace().next().unwrap_or("").to_string())
            .collect();
        let framework = match_framework(&dependencies);

        Ok(DetectedProject {
            root: root.to_path_buf(),
            language: Language::Go,
            framework: framework.map(|f| f.0),
            project_type: if root.join("main.go").is_file() {
                ProjectType::Application
            } else {
                ProjectType::Library
            },
            source_globs: vec!["**/*.go".to_string()],
            ignore_globs: default_ignores(),
            entry_points: existing(root, &["main.go", "cmd/main.go"]),
        })
    }
}

/// First framework whose package name appears in the dependency list.
fn match_framework(dependencies: &[String]) -> Option<(String, bool)> {
    for (package, tag, serves) in FRAMEWORKS {
        if dependencies.iter().any(|d| d == package) {
            return Some((tag.to_string(), *serves));
        }
    }
    None
}

fn default_ignores() -> Vec<String> {
    vec![
        "node_modules/**".to_string(),
        "target/**".to_string(),
        "dist/**".to_string(),
        "build/**".to_string(),
        ".git/**".to_string(),
        "__pycache__/**".to_string(),
        "vendor/**".to_string(),
    ]
}

fn existing(root: &Path, candidates: &[&str]) -> Vec<PathBuf> {
    candidates
        .iter()
        .map(|c| root.join(c))
        .filter(|p| p.is_file())
        .collect()
}
