//! Structural pattern detectors: adapter, decorator, facade, proxy,
//! composite.

use super::{DetectedPattern, PatternContext, PatternDetector, Signal, Tally};
use crate::model::ClassRow;

fn implements_anything(class: &ClassRow) -> bool {
    !class.implements_names.is_empty() || class.extends_name.is_some()
}

pub struct AdapterDetector;

const ADAPTER_SIGNALS: &[Signal] = &[
    Signal {
        name: "adapter-name",
        weight: 0.5,
    },
    Signal {
        name: "implements-target",
        weight: 0.3,
    },
    Signal {
        name: "wraps-adaptee",
        weight: 0.2,
    },
];

impl PatternDetector for AdapterDetector {
    fn name(&self) -> &'static str {
        "adapter"
    }

    fn signals(&self) -> &'static [Signal] {
        ADAPTER_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(ADAPTER_SIGNALS);
            tally.participant(&class.name);

            if class.name.contains("Adapter") || class.name.contains("Wrapper") {
                tally.hit("adapter-name", &class.name);
            }
            if implements_anything(class) {
                tally.hit(
                    "implements-target",
                    class
                        .implements_names
                        .first()
                        .or(class.extends_name.as_ref())
                        .cloned()
                        .unwrap_or_default(),
                );
            }
            // Constructor taking the adaptee by parameter.
            if ctx.methods_of(class).iter().any(|m| {
                (m.name == "constructor" || m.name == "new") && m.parameter_count > 0
            }) {
                tally.hit("wraps-adaptee", "constructor-injected adaptee");
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

pub struct DecoratorDetector;

const DECORATOR_SIGNALS: &[Signal] = &[
    Signal {
        name: "decorator-name",
        weight: 0.5,
    },
    Signal {
        name: "same-interface",
        weight: 0.3,
    },
    Signal {
        name: "wraps-component",
        weight: 0.2,
    },
];

impl PatternDetector for DecoratorDetector {
    fn name(&self) -> &'static str {
        "decorator"
    }

    fn signals(&self) -> &'static [Signal] {
        DECORATOR_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(DECORATOR_SIGNALS);
            tally.participant(&class.name);

            if class.name.contains("Decorator") {
                tally.hit("decorator-name", &class.name);
            }
            if !class.implements_names.is_empty() {
                tally.hit("same-interface", class.implements_names[0].clone());
            }
            if ctx.methods_of(class).iter().any(|m| {
                (m.name == "constructor" || m.name == "new")
                    && m.signature
                        .split(['(', ')', ',', ':'])
                        .any(|part| class.implements_names.iter().any(|i| part.trim() == i))
            }) {
                tally.hit("wraps-component", "constructor takes decorated interface");
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

pub struct FacadeDetector;

const FACADE_SIGNALS: &[Signal] = &[
    Signal {
        name: "facade-name",
        weight: 0.5,
    },
    Signal {
        name: "broad-surface",
        weight: 0.3,
    },
    Signal {
        name: "thin-methods",
        weight: 0.2,
    },
];

impl PatternDetector for FacadeDetector {
    fn name(&self) -> &'static str {
        "facade"
    }

    fn signals(&self) -> &'static [Signal] {
        FACADE_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(FACADE_SIGNALS);
            tally.participant(&class.name);

            if class.name.contains("Facade") || class.name.contains("Gateway") {
                tally.hit("facade-name", &class.name);
            }
            let methods = ctx.methods_of(class);
            if methods.len() >= 5 {
                tally.hit("broad-surface", format!("{} methods", methods.len()));
            }
            let thin = methods.iter().filter(|m| m.complexity <= 2).count();
            if !methods.is_empty() && thin * 2 >= methods.len() {
                tally.hit("thin-methods", format!("{thin} delegating methods"));
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

pub struct ProxyDetector;

const PROXY_SIGNALS: &[Signal] = &[
    Signal {
        name: "proxy-name",
        weight: 0.5,
    },
    Signal {
        name: "same-interface",
        weight: 0.3,
    },
    Signal {
        name: "guard-methods",
        weight: 0.2,
    },
];

impl PatternDetector for ProxyDetector {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn signals(&self) -> &'static [Signal] {
        PROXY_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(PROXY_SIGNALS);
            tally.participant(&class.name);

            if class.name.contains("Proxy") || class.name.ends_with("Cache") {
                tally.hit("proxy-name", &class.name);
            }
            if !class.implements_names.is_empty() {
                tally.hit("same-interface", class.implements_names[0].clone());
            }
            if ctx.methods_of(class).iter().any(|m| {
                m.name.starts_with("check") || m.name.starts_with("can") || m.name.contains("access")
            }) {
                tally.hit("guard-methods", "access-control methods");
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

pub struct CompositeDetector;

const COMPOSITE_SIGNALS: &[Signal] = &[
    Signal {
        name: "composite-name",
        weight: 0.4,
    },
    Signal {
        name: "child-management",
        weight: 0.4,
    },
    Signal {
        name: "shared-component-type",
        weight: 0.2,
    },
];

impl PatternDetector for CompositeDetector {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn signals(&self) -> &'static [Signal] {
        COMPOSITE_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(COMPOSITE_SIGNALS);
            tally.participant(&class.name);

            if class.name.contains("Composite") || class.name.contains("Group")
                || class.name.contains("Tree")
            {
                tally.hit("composite-name", &class.name);
            }
            let methods = ctx.methods_of(class);
            let child_ops = methods
                .iter()
                .filter(|m| {
                    matches!(
                        m.name.as_str(),
                        "add" | "remove" | "addChild" | "removeChild" | "children" | "getChild"
                    )
                })
                .count();
            if child_ops >= 2 {
                tally.hit("child-management", format!("{child_ops} child operations"));
            }
            if implements_anything(class) {
                tally.hit(
                    "shared-component-type",
                    class
                        .implements_names
                        .first()
                        .or(class.extends_name.as_ref())
                        .cloned()
                        .unwrap_or_default(),
                );
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::EntityExtractor;
    use crate::model::RowBatch;
    use crate::parsing::{UceClass, UceFunction, UceTree, Visibility};
    use crate::project::ScannedFile;
    use crate::types::{Language, Range};
    use std::path::PathBuf;

    fn batch_for(tree: UceTree) -> RowBatch {
        let file = ScannedFile {
            absolute_path: PathBuf::from("/w/src/x.ts"),
            relative_path: "src/x.ts".to_string(),
            size_bytes: 1,
            content_hash: "11".repeat(32),
            language: Language::TypeScript,
        };
        EntityExtractor::new()
            .extract(&file, &tree, None)
            .unwrap()
            .batch
    }

    #[test]
    fn adapter_detected() {
        let class = UceClass::new("LegacyStorageAdapter", Range::new(1, 0, 20, 1))
            .implementing("Storage")
            .with_method(
                UceFunction::new("constructor", Range::line(2)).with_params(vec![
                    crate::parsing::UceParam::new("legacy", Some("LegacyStore")),
                ]),
                Visibility::Public,
            );
        let batch = batch_for(UceTree {
            classes: vec![class],
            ..Default::default()
        });
        let ctx = PatternContext::from_batch("src/x.ts", &batch);
        let detected = AdapterDetector.detect(&ctx);
        assert_eq!(detected.len(), 1);
        assert!(detected[0].confidence >= 0.99);
    }

    #[test]
    fn facade_needs_breadth() {
        let mut class = UceClass::new("BillingFacade", Range::new(1, 0, 60, 1));
        for (i, name) in ["charge", "refund", "invoice", "report", "close"]
            .iter()
            .enumerate()
        {
            class = class.with_method(
                UceFunction::new(*name, Range::line(2 + i as u32)),
                Visibility::Public,
            );
        }
        let batch = batch_for(UceTree {
            classes: vec![class],
            ..Default::default()
        });
        let ctx = PatternContext::from_batch("src/x.ts", &batch);
        let detected = FacadeDetector.detect(&ctx);
        assert_eq!(detected.len(), 1);
    }

    #[test]
    fn composite_detected_from_child_ops() {
        let class = UceClass::new("LayerGroup", Range::new(1, 0, 30, 1))
            .implementing("Layer")
            .with_method(UceFunction::new("add", Range::line(2)), Visibility::Public)
            .with_method(UceFunction::new("remove", Range::line(5)), Visibility::Public);
        let batch = batch_for(UceTree {
            classes: vec![class],
            ..Default::default()
        });
        let ctx = PatternContext::from_batch("src/x.ts", &batch);
        assert_eq!(CompositeDetector.detect(&ctx).len(), 1);
    }

    #[test]
    fn unrelated_class_matches_nothing() {
        let class = UceClass::new("Tokenizer", Range::new(1, 0, 10, 1))
            .with_method(UceFunction::new("next", Range::line(2)), Visibility::Public);
        let batch = batch_for(UceTree {
            classes: vec![class],
            ..Default::default()
        });
        let ctx = PatternContext::from_batch("src/x.ts", &batch);

        assert!(AdapterDetector.detect(&ctx).is_empty());
        assert!(ProxyDetector.detect(&ctx).is_empty());
        assert!(CompositeDetector.detect(&ctx).is_empty());
        assert!(DecoratorDetector.detect(&ctx).is_empty());
    }
}
