//! Semantic analyzers: data flow, return paths, error paths and
//! design-pattern detection.
//!
//! All analyzers share one policy: never computed at index time for
//! every function. The facade computes on first request, stores the
//! result in the `analysis_cache` relation keyed by
//! `(function_id, file_content_hash)`, and a file hash change makes old
//! entries unreachable.

pub mod cache;
pub mod data_flow;
pub mod errors;
pub mod patterns;
pub mod returns;

pub use cache::AnalysisCache;
pub use data_flow::{
    DataFlowAnalyzer, DataFlowOptions, DataFlowResult, FlowEdge, FlowEdgeKind, FlowNode,
    FlowNodeKind, TaintSource,
};
pub use errors::{CatchBlock, ErrorAnalysis, ErrorAnalyzer, RecoveryStrategy, ThrowPoint};
pub use patterns::{
    DetectedPattern, Evidence, PatternContext, PatternDetector, PatternRegistry, Signal,
    create_default_registry,
};
pub use returns::{ReturnAnalysis, ReturnAnalyzer, ReturnPoint, ReturnValueKind};

use crate::config::AnalysisConfig;
use crate::error::StoreResult;
use crate::parsing::UceFunction;
use crate::storage::GraphStore;
use crate::telemetry::Tracer;
use crate::types::EntityId;
use std::sync::Arc;

/// Lazy, cached entry point over the per-function analyzers.
pub struct SemanticAnalyzers {
    cache: AnalysisCache,
    options: DataFlowOptions,
    registry: PatternRegistry,
    tracer: Tracer,
}

impl SemanticAnalyzers {
    pub fn new(store: Arc<GraphStore>, config: &AnalysisConfig) -> Self {
        Self {
            cache: AnalysisCache::new(store),
            options: DataFlowOptions::from(config),
            registry: create_default_registry(),
            tracer: Tracer::disabled(),
        }
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Data flow for one function, cached by `(id, file_hash)`.
    pub fn data_flow(
        &self,
        function_id: &EntityId,
        file_hash: &str,
        function: &UceFunction,
    ) -> StoreResult<DataFlowResult> {
        if let Some(hit) = self.cache.get(function_id, file_hash, "data_flow")? {
            return Ok(hit);
        }
        let mut span = self.tracer.start_span("analysis.data_flow");
        span.set_attr("function", function_id.as_str());
        let result = DataFlowAnalyzer::new().analyze(function, &self.options);
        if result.timed_out {
            tracing::warn!(
                target: "analysis",
                "data-flow analysis timed out for {function_id}; confidence forced to 0"
            );
        }
        span.set_attr("nodes", result.nodes.len() as u64);
        span.set_attr("timed_out", result.timed_out);
        span.end();

        self.cache
            .put(function_id, file_hash, "data_flow", &result)?;
        Ok(result)
    }

    /// Return-path analysis, cached.
    pub fn returns(
        &self,
        function_id: &EntityId,
        file_hash: &str,
        function: &UceFunction,
    ) -> StoreResult<ReturnAnalysis> {
        if let Some(hit) = self.cache.get(function_id, file_hash, "returns")? {
            return Ok(hit);
        }
        let result = ReturnAnalyzer::new().analyze(function);
        self.cache.put(function_id, file_hash, "returns", &result)?;
        Ok(result)
    }

    /// Run every pattern detector over one file's rows. Not cached:
    /// detection is cheap relative to the row fetch the caller already
    /// paid for.
    pub fn detect_patterns(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut span = self.tracer.start_span("analysis.patterns");
        span.set_attr("file", ctx.relative_path);
        let detected = self.registry.run_all(ctx);
        span.set_attr("detected", detected.len() as u64);
        span.end();
        detected
    }

    /// Error-path analysis, cached.
    pub fn errors(
        &self,
        function_id: &EntityId,
        file_hash: &str,
        function: &UceFunction,
    ) -> StoreResult<ErrorAnalysis> {
        if let Some(hit) = self.cache.get(function_id, file_hash, "errors")? {
            return Ok(hit);
        }
        let result = ErrorAnalyzer::new().analyze(function);
        self.cache.put(function_id, file_hash, "errors", &result)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident;
    use crate::parsing::{BodyNode, BodyNodeKind};
    use crate::storage::MigrationRunner;
    use crate::types::{EntityKind, Range};

    fn analyzers() -> SemanticAnalyzers {
        let store = GraphStore::in_memory().unwrap();
        MigrationRunner::core(8).migrate_to_latest(&store).unwrap();
        SemanticAnalyzers::new(Arc::new(store), &AnalysisConfig::default())
    }

    fn subject() -> (EntityId, UceFunction) {
        let body = BodyNode::new(BodyNodeKind::Block, "", 1)
            .with_child(BodyNode::new(BodyNodeKind::Return, "return 1", 2));
        (
            ident::entity_id("a.ts", EntityKind::Function, "", "f", &[]),
            UceFunction::new("f", Range::new(1, 0, 3, 1)).with_body(body),
        )
    }

    #[test]
    fn second_request_is_served_from_cache() {
        let analyzers = analyzers();
        let (id, function) = subject();

        let first = analyzers.returns(&id, "hash", &function).unwrap();
        // A different function body with the same key must return the
        // cached result, proving the cache is keyed, not recomputed.
        let other = UceFunction::new("f", Range::line(1));
        let second = analyzers.returns(&id, "hash", &other).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn hash_change_recomputes() {
        let analyzers = analyzers();
        let (id, function) = subject();
        analyzers.returns(&id, "hash1", &function).unwrap();

        let other = UceFunction::new("f", Range::line(1));
        let recomputed = analyzers.returns(&id, "hash2", &other).unwrap();
        assert!(recomputed.points.is_empty(), "fresh analysis of empty body");
    }

    #[test]
    fn pattern_detection_runs_through_the_facade() {
        let analyzers = analyzers();
        let class = crate::parsing::UceClass::new("UserRepository", Range::new(1, 0, 30, 1))
            .with_method(
                UceFunction::new("findById", Range::line(2)),
                crate::parsing::Visibility::Public,
            )
            .with_method(
                UceFunction::new("save", Range::line(8)),
                crate::parsing::Visibility::Public,
            );
        let tree = crate::parsing::UceTree {
            classes: vec![class],
            ..Default::default()
        };
        let file = crate::project::ScannedFile {
            absolute_path: std::path::PathBuf::from("/w/src/repo.ts"),
            relative_path: "src/repo.ts".to_string(),
            size_bytes: 1,
            content_hash: "33".repeat(32),
            language: crate::types::Language::TypeScript,
        };
        let batch = crate::extract::EntityExtractor::new()
            .extract(&file, &tree, None)
            .unwrap()
            .batch;
        let ctx = PatternContext::from_batch("src/repo.ts", &batch);

        let detected = analyzers.detect_patterns(&ctx);
        assert!(detected.iter().any(|p| p.pattern == "repository"));
    }

    #[test]
    fn data_flow_results_cache_round_trip() {
        let analyzers = analyzers();
        let (id, function) = subject();
        let first = analyzers.data_flow(&id, "h", &function).unwrap();
        let second = analyzers.data_flow(&id, "h", &function).unwrap();
        assert_eq!(first, second);
    }
}
