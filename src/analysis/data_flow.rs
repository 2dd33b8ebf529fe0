//! Intra-function data-flow analysis.
//!
//! Builds a small graph over one function body: parameters, variables,
//! call results, returns and external values as nodes; assignments,
//! reads, propagation and merges as edges. Values derived from known
//! external surfaces carry a taint source tag. The analysis is
//! heuristic and cooperative: it checks its wall-clock budget while
//! walking and returns a partial result with zero confidence on
//! timeout.

use crate::config::AnalysisConfig;
use crate::parsing::{BodyNode, BodyNodeKind, UceFunction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowNodeKind {
    Parameter,
    Variable,
    Return,
    CallResult,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEdgeKind {
    Assign,
    Transform,
    Read,
    Write,
    Parameter,
    Return,
    Conditional,
    Merge,
    Propagate,
}

/// Where an externally-derived value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintSource {
    UserInput,
    Network,
    Filesystem,
    Database,
    Environment,
    Time,
    Random,
    ExternalApi,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: usize,
    pub kind: FlowNodeKind,
    pub name: String,
    pub line: u32,
    pub taint: Option<TaintSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub from: usize,
    pub to: usize,
    pub kind: FlowEdgeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFlowResult {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub confidence: f64,
    pub timed_out: bool,
}

impl DataFlowResult {
    pub fn tainted_nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.iter().filter(|n| n.taint.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct DataFlowOptions {
    pub max_call_depth: u32,
    pub track_taint: bool,
    pub include_literals: bool,
    pub analyze_properties: bool,
    pub timeout: Duration,
}

impl Default for DataFlowOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 5,
            track_taint: true,
            include_literals: false,
            analyze_properties: true,
            timeout: Duration::from_secs(5),
        }
    }
}

impl From<&AnalysisConfig> for DataFlowOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_call_depth: config.max_call_depth,
            track_taint: config.track_taint,
            include_literals: config.include_literals,
            analyze_properties: config.analyze_properties,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

/// Classify a snippet against known external surfaces.
fn taint_of(text: &str) -> Option<TaintSource> {
    let lowered = text.to_lowercase();
    let rules: [(&[&str], TaintSource); 8] = [
        (&["fetch(", "http.", "axios", "request("], TaintSource::Network),
        (
            &["readfile", "fs.", "open(", "read_to_string"],
            TaintSource::Filesystem,
        ),
        (&["query(", "sql", ".exec(", "find_one"], TaintSource::Database),
        (&["process.env", "env::var", "getenv"], TaintSource::Environment),
        (&["date.now", "now()", "time.time", "instant::now"], TaintSource::Time),
        (&["random", "math.random", "uuid"], TaintSource::Random),
        (&["req.body", "req.params", "req.query", "stdin", "input("], TaintSource::UserInput),
        (&["client.", "api."], TaintSource::ExternalApi),
    ];
    for (needles, source) in rules {
        if needles.iter().any(|n| lowered.contains(n)) {
            return Some(source);
        }
    }
    None
}

struct Builder<'a> {
    options: &'a DataFlowOptions,
    nodes: Vec<FlowNode>,
    edges: Vec<FlowEdge>,
    by_name: HashMap<String, usize>,
    deadline: Instant,
    timed_out: bool,
}

impl<'a> Builder<'a> {
    fn node(&mut self, kind: FlowNodeKind, name: &str, line: u32, taint: Option<TaintSource>) -> usize {
        if let Some(&existing) = self.by_name.get(name) {
            if self.nodes[existing].taint.is_none() {
                self.nodes[existing].taint = taint;
            }
            return existing;
        }
        let id = self.nodes.len();
        self.nodes.push(FlowNode {
            id,
            kind,
            name: name.to_string(),
            line,
            taint: if self.options.track_taint { taint } else { None },
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    fn edge(&mut self, from: usize, to: usize, kind: FlowEdgeKind) {
        let edge = FlowEdge { from, to, kind };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    fn expired(&mut self) -> bool {
        if self.timed_out {
            return true;
        }
        if Instant::now() >= self.deadline {
            self.timed_out = true;
        }
        self.timed_out
    }

    /// Ids of known nodes whose name occurs in `text`.
    fn referenced(&self, text: &str) -> Vec<usize> {
        self.by_name
            .iter()
            .filter(|(name, _)| !name.is_empty() && contains_identifier(text, name))
            .map(|(_, &id)| id)
            .collect()
    }

    fn walk(&mut self, node: &BodyNode, conditional: bool, call_depth: u32) {
        if self.expired() {
            return;
        }
        match node.kind {
            BodyNodeKind::Assignment => self.visit_assignment(node, conditional),
            BodyNodeKind::Call => {
                if call_depth < self.options.max_call_depth {
                    self.visit_call(node, conditional, call_depth);
                }
            }
            BodyNodeKind::Return => self.visit_return(node, conditional),
            BodyNodeKind::Literal if self.options.include_literals => {
                self.node(FlowNodeKind::Variable, &format!("lit:{}", node.text), node.line, None);
            }
            BodyNodeKind::PropertyAccess if self.options.analyze_properties => {
                let sources = self.referenced(&node.text);
                let target = self.node(FlowNodeKind::Variable, &node.text, node.line, taint_of(&node.text));
                for source in sources {
                    if source != target {
                        self.edge(source, target, FlowEdgeKind::Read);
                    }
                }
            }
            _ => {}
        }

        let child_conditional = conditional
            || matches!(
                node.kind,
                BodyNodeKind::If | BodyNodeKind::Loop | BodyNodeKind::Try | BodyNodeKind::Catch
            );
        let child_depth = if node.kind == BodyNodeKind::Call {
            call_depth + 1
        } else {
            call_depth
        };
        for child in &node.children {
            self.walk(child, child_conditional, child_depth);
        }
    }

    fn visit_assignment(&mut self, node: &BodyNode, conditional: bool) {
        let Some((target_raw, value)) = node.text.split_once('=') else {
            return;
        };
        let target_name = target_raw
            .trim()
            .trim_start_matches("let ")
            .trim_start_matches("const ")
            .trim_start_matches("var ")
            .trim_start_matches("mut ")
            .trim();
        if target_name.is_empty() {
            return;
        }

        let sources = self.referenced(value);
        let taint = taint_of(value);
        let is_call = value.contains('(');
        let target = self.node(FlowNodeKind::Variable, target_name, node.line, taint);

        if is_call {
            let call = self.node(
                FlowNodeKind::CallResult,
                &format!("call:{}", value.trim()),
                node.line,
                taint,
            );
            self.edge(call, target, FlowEdgeKind::Assign);
            for source in sources {
                if source != call && source != target {
                    self.edge(source, call, FlowEdgeKind::Parameter);
                    // Inputs flowing into the call taint its result.
                    if self.options.track_taint {
                        if let Some(t) = self.nodes[source].taint {
                            if self.nodes[call].taint.is_none() {
                                self.nodes[call].taint = Some(t);
                            }
                        }
                    }
                }
            }
            if self.options.track_taint {
                if let Some(t) = self.nodes[call].taint {
                    if self.nodes[target].taint.is_none() {
                        self.nodes[target].taint = Some(t);
                    }
                }
            }
        } else if sources.is_empty() {
            // No known inputs: the value is external or literal.
            if taint.is_some() {
                let external = self.node(
                    FlowNodeKind::External,
                    &format!("ext:{}", value.trim()),
                    node.line,
                    taint,
                );
                self.edge(external, target, FlowEdgeKind::Propagate);
            }
        } else {
            let kind = if sources.len() > 1 {
                FlowEdgeKind::Merge
            } else if value.trim() == self.nodes[sources[0]].name {
                FlowEdgeKind::Assign
            } else {
                FlowEdgeKind::Transform
            };
            for source in sources {
                if source != target {
                    self.edge(source, target, kind);
                    if self.options.track_taint {
                        if let Some(t) = self.nodes[source].taint {
                            if self.nodes[target].taint.is_none() {
                                self.nodes[target].taint = Some(t);
                            }
                        }
                    }
                }
            }
        }

        if conditional {
            let ids: Vec<usize> = self
                .edges
                .iter()
                .filter(|e| e.to == target)
                .map(|e| e.from)
                .collect();
            for from in ids {
                self.edge(from, target, FlowEdgeKind::Conditional);
            }
        }
    }

    fn visit_call(&mut self, node: &BodyNode, _conditional: bool, _depth: u32) {
        let taint = taint_of(&node.text);
        let sources = self.referenced(&node.text);
        let call = self.node(
            FlowNodeKind::CallResult,
            &format!("call:{}", node.text.trim()),
            node.line,
            taint,
        );
        for source in sources {
            if source != call {
                self.edge(source, call, FlowEdgeKind::Parameter);
            }
        }
    }

    fn visit_return(&mut self, node: &BodyNode, conditional: bool) {
        let value = node.text.trim().trim_start_matches("return").trim();
        let ret = self.node(FlowNodeKind::Return, &format!("return@{}", node.line), node.line, None);
        for source in self.referenced(value) {
            if source != ret {
                self.edge(source, ret, FlowEdgeKind::Return);
                if conditional {
                    self.edge(source, ret, FlowEdgeKind::Conditional);
                }
                if self.options.track_taint {
                    if let Some(t) = self.nodes[source].taint {
                        if self.nodes[ret].taint.is_none() {
                            self.nodes[ret].taint = Some(t);
                        }
                    }
                }
            }
        }
    }
}

/// Word-boundary identifier match, cheap enough to run per node pair.
fn contains_identifier(text: &str, name: &str) -> bool {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(pos) = text[start..].find(name) {
        let at = start + pos;
        let before_ok = at == 0 || !is_ident_char(bytes[at - 1]);
        let after = at + name.len();
        let after_ok = after >= bytes.len() || !is_ident_char(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
        start = at + name.len();
    }
    false
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

#[derive(Debug, Default, Clone)]
pub struct DataFlowAnalyzer;

impl DataFlowAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, function: &UceFunction, options: &DataFlowOptions) -> DataFlowResult {
        let mut builder = Builder {
            options,
            nodes: Vec::new(),
            edges: Vec::new(),
            by_name: HashMap::new(),
            deadline: Instant::now() + options.timeout,
            timed_out: false,
        };

        for param in &function.params {
            let taint = if options.track_taint {
                Some(TaintSource::UserInput)
            } else {
                None
            };
            builder.node(
                FlowNodeKind::Parameter,
                &param.name,
                function.range.start_line,
                taint,
            );
        }

        if let Some(body) = &function.body {
            builder.walk(body, false, 0);
        }

        let timed_out = builder.timed_out;
        let confidence = if timed_out {
            0.0
        } else if function.body.is_none() {
            0.2
        } else {
            // Richer graphs give more signal, capped well below certainty.
            (0.5 + 0.05 * builder.edges.len().min(8) as f64).min(0.9)
        };

        DataFlowResult {
            nodes: builder.nodes,
            edges: builder.edges,
            confidence,
            timed_out,
        }
    }
}
