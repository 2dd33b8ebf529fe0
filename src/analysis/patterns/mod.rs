//! Design-pattern detectors.
//!
//! Each detector is an independent module with a fixed list of
//! weighted signals; confidence is the sum of matched signal weights
//! and a pattern is reported only when confidence reaches the
//! detector's threshold. Detectors see one file's rows at a time and
//! never consult the store.

mod behavioral;
mod creational;
mod structural;

pub use behavioral::{ObserverDetector, RepositoryDetector, ServiceDetector, StrategyDetector};
pub use creational::{BuilderDetector, FactoryDetector, SingletonDetector};
pub use structural::{
    AdapterDetector, CompositeDetector, DecoratorDetector, FacadeDetector, ProxyDetector,
};

use crate::model::{ClassRow, FunctionRow, InterfaceRow, RowBatch};
use serde::{Deserialize, Serialize};

/// One weighted heuristic signal.
#[derive(Debug, Clone, Copy)]
pub struct Signal {
    pub name: &'static str,
    pub weight: f64,
}

/// A matched signal with what matched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub signal: String,
    pub detail: String,
}

/// A reported pattern occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub pattern: String,
    pub confidence: f64,
    pub participants: Vec<String>,
    pub evidence: Vec<Evidence>,
}

/// One file's entities, as the detectors see them.
pub struct PatternContext<'a> {
    pub relative_path: &'a str,
    pub classes: &'a [ClassRow],
    pub functions: &'a [FunctionRow],
    pub interfaces: &'a [InterfaceRow],
}

impl<'a> PatternContext<'a> {
    pub fn from_batch(relative_path: &'a str, batch: &'a RowBatch) -> Self {
        Self {
            relative_path,
            classes: &batch.classes,
            functions: &batch.functions,
            interfaces: &batch.interfaces,
        }
    }

    /// Methods declared on `class`, in source order.
    pub fn methods_of(&self, class: &ClassRow) -> Vec<&'a FunctionRow> {
        self.functions
            .iter()
            .filter(|f| f.is_method && f.parent_scope == class.name)
            .collect()
    }
}

/// Accumulates matched signals for one candidate occurrence.
pub(crate) struct Tally {
    signals: &'static [Signal],
    matched: Vec<usize>,
    evidence: Vec<Evidence>,
    participants: Vec<String>,
}

impl Tally {
    pub fn new(signals: &'static [Signal]) -> Self {
        Self {
            signals,
            matched: Vec::new(),
            evidence: Vec::new(),
            participants: Vec::new(),
        }
    }

    /// Record a signal match by name. Unknown names are a programmer
    /// error and ignored; each signal counts once.
    pub fn hit(&mut self, signal: &'static str, detail: impl Into<String>) {
        if let Some(idx) = self.signals.iter().position(|s| s.name == signal) {
            if !self.matched.contains(&idx) {
                self.matched.push(idx);
            }
            self.evidence.push(Evidence {
                signal: signal.to_string(),
                detail: detail.into(),
            });
        }
    }

    pub fn participant(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.participants.contains(&name) {
            self.participants.push(name);
        }
    }

    pub fn confidence(&self) -> f64 {
        self.matched.iter().map(|&i| self.signals[i].weight).sum()
    }

    /// Report the occurrence if confidence reached the threshold.
    pub fn finish(self, pattern: &'static str, threshold: f64) -> Option<DetectedPattern> {
        let confidence = self.confidence();
        if confidence >= threshold {
            Some(DetectedPattern {
                pattern: pattern.to_string(),
                confidence,
                participants: self.participants,
                evidence: self.evidence,
            })
        } else {
            None
        }
    }
}

/// The detector contract.
pub trait PatternDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn signals(&self) -> &'static [Signal];
    fn threshold(&self) -> f64;
    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern>;
}

/// Registry over all detectors, with enable/disable by name.
pub struct PatternRegistry {
    detectors: Vec<Box<dyn PatternDetector>>,
    disabled: std::collections::HashSet<&'static str>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
            disabled: std::collections::HashSet::new(),
        }
    }

    pub fn register(&mut self, detector: Box<dyn PatternDetector>) {
        self.detectors.push(detector);
    }

    pub fn disable(&mut self, name: &'static str) {
        self.disabled.insert(name);
    }

    pub fn count(&self) -> usize {
        self.detectors.len()
    }

    /// Run every enabled detector over one file's context.
    pub fn run_all(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for detector in &self.detectors {
            if self.disabled.contains(detector.name()) {
                continue;
            }
            out.extend(detector.detect(ctx));
        }
        out.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        create_default_registry()
    }
}

/// Registry with all twelve detectors.
pub fn create_default_registry() -> PatternRegistry {
    let mut registry = PatternRegistry::new();
    registry.register(Box::new(FactoryDetector));
    registry.register(Box::new(SingletonDetector));
    registry.register(Box::new(BuilderDetector));
    registry.register(Box::new(ObserverDetector));
    registry.register(Box::new(RepositoryDetector));
    registry.register(Box::new(ServiceDetector));
    registry.register(Box::new(StrategyDetector));
    registry.register(Box::new(AdapterDetector));
    registry.register(Box::new(DecoratorDetector));
    registry.register(Box::new(FacadeDetector));
    registry.register(Box::new(ProxyDetector));
    registry.register(Box::new(CompositeDetector));
    registry
}
