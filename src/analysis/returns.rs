//! Return-path analysis.
//!
//! Enumerates return points, classifies the returned value, infers a
//! type union and flags void/always-throws shapes. Transformations are
//! detected by string pattern against the body. Confidence starts at
//! 0.5 and is boosted by declared types, identified data sources and
//! literal returns.

use crate::parsing::{BodyNode, BodyNodeKind, UceFunction};
use serde::{Deserialize, Serialize};

/// Pipeline-style transformations recognized in bodies.
const TRANSFORMATION_PATTERNS: &[&str] = &[
    ".map(",
    ".filter(",
    ".reduce(",
    ".sort(",
    ".slice(",
    ".join(",
    ".split(",
    ".concat(",
    ".flat(",
    ".reverse(",
    "JSON.parse",
    "JSON.stringify",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnValueKind {
    Literal,
    Variable,
    Call,
    Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnPoint {
    pub line: u32,
    /// Nested under a branch, loop or try block.
    pub conditional: bool,
    pub kind: ReturnValueKind,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnAnalysis {
    pub points: Vec<ReturnPoint>,
    /// Union of inferred return types, declared type first.
    pub inferred_types: Vec<String>,
    pub can_return_void: bool,
    pub always_throws: bool,
    pub transformations: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Default, Clone)]
pub struct ReturnAnalyzer;

impl ReturnAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, function: &UceFunction) -> ReturnAnalysis {
        let mut analysis = ReturnAnalysis::default();

        let Some(body) = &function.body else {
            analysis.can_return_void = function.return_type.as_deref().unwrap_or("void") == "void";
            analysis.confidence = 0.5;
            if let Some(ty) = &function.return_type {
                analysis.inferred_types.push(ty.clone());
                analysis.confidence += 0.2;
            }
            return analysis;
        };

        collect_returns(body, false, &mut analysis.points);

        // Transformations anywhere in the body, in pattern order.
        let mut body_text = String::new();
        body.walk(&mut |node| {
            body_text.push_str(&node.text);
            body_text.push('\n');
        });
        for pattern in TRANSFORMATION_PATTERNS {
            if body_text.contains(pattern) {
                analysis
                    .transformations
                    .push(pattern.trim_matches(['.', '(']).to_string());
            }
        }

        let throws = !body.find_all(BodyNodeKind::Throw).is_empty();
        let unconditional_throw = body
            .children
            .iter()
            .any(|child| child.kind == BodyNodeKind::Throw);
        analysis.always_throws = throws && analysis.points.is_empty() && unconditional_throw;

        analysis.can_return_void = analysis.points.is_empty()
            || analysis
                .points
                .iter()
                .any(|p| p.text.is_empty() || p.conditional);

        // Type union: declared type first, then literal-derived guesses.
        if let Some(ty) = &function.return_type {
            analysis.inferred_types.push(ty.clone());
        }
        for point in &analysis.points {
            if point.kind == ReturnValueKind::Literal {
                let ty = literal_type(&point.text);
                if !analysis.inferred_types.contains(&ty.to_string()) {
                    analysis.inferred_types.push(ty.to_string());
                }
            }
        }

        let mut confidence: f64 = 0.5;
        if function.return_type.is_some() {
            confidence += 0.2;
        }
        if analysis
            .points
            .iter()
            .any(|p| p.kind == ReturnValueKind::Literal)
        {
            confidence += 0.1;
        }
        if analysis
            .points
            .iter()
            .any(|p| p.kind == ReturnValueKind::Call)
        {
            confidence += 0.1;
        }
        analysis.confidence = confidence.min(0.95);
        analysis
    }
}

fn collect_returns(node: &BodyNode, conditional: bool, out: &mut Vec<ReturnPoint>) {
    if node.kind == BodyNodeKind::Return {
        let value = node.text.trim().trim_start_matches("return").trim();
        out.push(ReturnPoint {
            line: node.line,
            conditional,
            kind: classify_value(value),
            text: value.to_string(),
        });
    }
    let child_conditional = conditional
        || matches!(
            node.kind,
            BodyNodeKind::If | BodyNodeKind::Loop | BodyNodeKind::Try | BodyNodeKind::Catch
        );
    for child in &node.children {
        collect_returns(child, child_conditional, out);
    }
}

fn classify_value(value: &str) -> ReturnValueKind {
    if value.is_empty() {
        return ReturnValueKind::Literal;
    }
    if is_literal(value) {
        ReturnValueKind::Literal
    } else if value.ends_with(')') && value.contains('(') && !value.contains([' ', '+']) {
        ReturnValueKind::Call
    } else if value
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
    {
        ReturnValueKind::Variable
    } else {
        ReturnValueKind::Expression
    }
}

fn is_literal(value: &str) -> bool {
    value.starts_with('"')
        || value.starts_with('\'')
        || value.starts_with('`')
        || value.parse::<f64>().is_ok()
        || matches!(value, "true" | "false" | "null" | "undefined" | "None")
}

fn literal_type(value: &str) -> &'static str {
    if value.starts_with(['"', '\'', '`']) {
        "string"
    } else if value.parse::<f64>().is_ok() {
        "number"
    } else if matches!(value, "true" | "false") {
        "boolean"
    } else if matches!(value, "null" | "undefined" | "None") || value.is_empty() {
        "void"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Range;

    fn function(body: BodyNode) -> UceFunction {
        UceFunction::new("subject", Range::new(1, 0, 20, 1)).with_body(body)
    }

    #[test]
    fn enumerates_conditional_and_unconditional_returns() {
        let body = BodyNode::new(BodyNodeKind::Block, "", 1)
            .with_child(
                BodyNode::new(BodyNodeKind::If, "if (x)", 2)
                    .with_child(BodyNode::new(BodyNodeKind::Return, "return \"early\"", 3)),
            )
            .with_child(BodyNode::new(BodyNodeKind::Return, "return compute()", 5));

        let analysis = ReturnAnalyzer::new().analyze(&function(body));
        assert_eq!(analysis.points.len(), 2);
        assert!(analysis.points[0].conditional);
        assert!(!analysis.points[1].conditional);
        assert_eq!(analysis.points[0].kind, ReturnValueKind::Literal);
        assert_eq!(analysis.points[1].kind, ReturnValueKind::Call);
    }

    #[test]
    fn literal_returns_boost_confidence_and_infer_types() {
        let body = BodyNode::new(BodyNodeKind::Block, "", 1)
            .with_child(BodyNode::new(BodyNodeKind::Return, "return 42", 2));
        let subject = function(body).with_return_type("number");

        let analysis = ReturnAnalyzer::new().analyze(&subject);
        assert!(analysis.inferred_types.contains(&"number".to_string()));
        // 0.5 base + 0.2 declared + 0.1 literal
        assert!((analysis.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn always_throws_detection() {
        let body = BodyNode::new(BodyNodeKind::Block, "", 1).with_child(BodyNode::new(
            BodyNodeKind::Throw,
            "throw new Error(\"nope\")",
            2,
        ));
        let analysis = ReturnAnalyzer::new().analyze(&function(body));
        assert!(analysis.always_throws);
        assert!(analysis.points.is_empty());
    }

    #[test]
    fn conditional_throw_is_not_always_throws() {
        let body = BodyNode::new(BodyNodeKind::Block, "", 1)
            .with_child(
                BodyNode::new(BodyNodeKind::If, "if (bad)", 2)
                    .with_child(BodyNode::new(BodyNodeKind::Throw, "throw bad", 3)),
            )
            .with_child(BodyNode::new(BodyNodeKind::Return, "return ok", 5));
        let analysis = ReturnAnalyzer::new().analyze(&function(body));
        assert!(!analysis.always_throws);
    }

    #[test]
    fn transformations_detected_by_pattern() {
        let body = BodyNode::new(BodyNodeKind::Block, "", 1).with_child(BodyNode::new(
            BodyNodeKind::Return,
            "return items.map(f).filter(g)",
            2,
        ));
        let analysis = ReturnAnalyzer::new().analyze(&function(body));
        assert!(analysis.transformations.contains(&"map".to_string()));
        assert!(analysis.transformations.contains(&"filter".to_string()));
        assert!(!analysis.transformations.contains(&"sort".to_string()));
    }

    #[test]
    fn bodyless_function_reports_void() {
        let subject = UceFunction::new("f", Range::line(1));
        let analysis = ReturnAnalyzer::new().analyze(&subject);
        assert!(analysis.can_return_void);
        assert_eq!(analysis.confidence, 0.5);
    }
}
