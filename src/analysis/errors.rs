//! Error-path analysis: throw points and try/catch blocks with a
//! recovery-strategy tag per catch.

use crate::parsing::{BodyNode, BodyNodeKind, UceFunction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Catch rethrows (possibly wrapped).
    Rethrow,
    /// Catch logs and lets execution continue.
    LogAndContinue,
    /// Catch substitutes a fallback value.
    Fallback,
    /// Catch body does nothing observable.
    Swallow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowPoint {
    pub line: u32,
    pub text: String,
    /// Inside a try block whose catch may recover.
    pub guarded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchBlock {
    pub line: u32,
    pub strategy: RecoveryStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub throw_points: Vec<ThrowPoint>,
    pub catch_blocks: Vec<CatchBlock>,
}

impl ErrorAnalysis {
    pub fn has_error_handling(&self) -> bool {
        !self.catch_blocks.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ErrorAnalyzer;

impl ErrorAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, function: &UceFunction) -> ErrorAnalysis {
        let mut analysis = ErrorAnalysis::default();
        if let Some(body) = &function.body {
            walk(body, false, &mut analysis);
        }
        analysis
    }
}

fn walk(node: &BodyNode, guarded: bool, out: &mut ErrorAnalysis) {
    match node.kind {
        BodyNodeKind::Throw => out.throw_points.push(ThrowPoint {
            line: node.line,
            text: node.text.trim().to_string(),
            guarded,
        }),
        BodyNodeKind::Catch => {
            out.catch_blocks.push(CatchBlock {
                line: node.line,
                strategy: classify_catch(node),
            });
            // The catch body itself is unguarded.
            for child in &node.children {
                walk(child, false, out);
            }
            return;
        }
        _ => {}
    }

    let child_guarded = guarded || node.kind == BodyNodeKind::Try;
    for child in &node.children {
        // A try's catch arm is not covered by its own try.
        let inner = if child.kind == BodyNodeKind::Catch {
            false
        } else {
            child_guarded
        };
        walk(child, inner, out);
    }
}

fn classify_catch(node: &BodyNode) -> RecoveryStrategy {
    let mut text = String::new();
    node.walk(&mut |n| {
        text.push_str(&n.text);
        text.push('\n');
    });
    let lowered = text.to_lowercase();

    if lowered.contains("throw") || lowered.contains("panic") || lowered.contains("raise") {
        RecoveryStrategy::Rethrow
    } else if lowered.contains("log")
        || lowered.contains("console.")
        || lowered.contains("tracing::")
        || lowered.contains("warn")
    {
        RecoveryStrategy::LogAndContinue
    } else if lowered.contains("return") || lowered.contains("default") {
        RecoveryStrategy::Fallback
    } else {
        RecoveryStrategy::Swallow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Range;

    fn function(body: BodyNode) -> UceFunction {
        UceFunction::new("subject", Range::new(1, 0, 30, 1)).with_body(body)
    }

    fn try_with_catch(catch_children: Vec<BodyNode>) -> BodyNode {
        BodyNode::new(BodyNodeKind::Block, "", 1).with_child(
            BodyNode::new(BodyNodeKind::Try, "try", 2)
                .with_child(BodyNode::new(BodyNodeKind::Throw, "throw new Error(\"x\")", 3))
                .with_child(
                    BodyNode::new(BodyNodeKind::Catch, "catch (e)", 4)
                        .with_children(catch_children),
                ),
        )
    }

    #[test]
    fn guarded_throws_and_rethrow_strategy() {
        let body = try_with_catch(vec![BodyNode::new(
            BodyNodeKind::Throw,
            "throw wrap(e)",
            5,
        )]);
        let analysis = ErrorAnalyzer::new().analyze(&function(body));

        assert_eq!(analysis.throw_points.len(), 2);
        assert!(analysis.throw_points[0].guarded);
        // The rethrow inside the catch is not guarded by its own try.
        assert!(!analysis.throw_points[1].guarded);
        assert_eq!(analysis.catch_blocks.len(), 1);
        assert_eq!(analysis.catch_blocks[0].strategy, RecoveryStrategy::Rethrow);
    }

    #[test]
    fn log_and_fallback_strategies() {
        let logging = try_with_catch(vec![BodyNode::new(
            BodyNodeKind::Call,
            "console.error(e)",
            5,
        )]);
        let analysis = ErrorAnalyzer::new().analyze(&function(logging));
        assert_eq!(
            analysis.catch_blocks[0].strategy,
            RecoveryStrategy::LogAndContinue
        );

        let fallback = try_with_catch(vec![BodyNode::new(
            BodyNodeKind::Return,
            "return defaults",
            5,
        )]);
        let analysis = ErrorAnalyzer::new().analyze(&function(fallback));
        assert_eq!(analysis.catch_blocks[0].strategy, RecoveryStrategy::Fallback);
    }

    #[test]
    fn empty_catch_swallows() {
        let body = try_with_catch(vec![]);
        let analysis = ErrorAnalyzer::new().analyze(&function(body));
        assert_eq!(analysis.catch_blocks[0].strategy, RecoveryStrategy::Swallow);
    }

    #[test]
    fn unguarded_throw_outside_try() {
        let body = BodyNode::new(BodyNodeKind::Block, "", 1).with_child(BodyNode::new(
            BodyNodeKind::Throw,
            "throw new Error(\"boom\")",
            2,
        ));
        let analysis = ErrorAnalyzer::new().analyze(&function(body));
        assert_eq!(analysis.throw_points.len(), 1);
        assert!(!analysis.throw_points[0].guarded);
        assert!(!analysis.has_error_handling());
    }
}
