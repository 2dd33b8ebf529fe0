//! Behavioral and architectural pattern detectors: observer, strategy,
//! repository, service.

use super::{DetectedPattern, PatternContext, PatternDetector, Signal, Tally};

pub struct ObserverDetector;

const OBSERVER_SIGNALS: &[Signal] = &[
    Signal {
        name: "observer-name",
        weight: 0.3,
    },
    Signal {
        name: "subscription-methods",
        weight: 0.4,
    },
    Signal {
        name: "notify-method",
        weight: 0.3,
    },
];

impl PatternDetector for ObserverDetector {
    fn name(&self) -> &'static str {
        "observer"
    }

    fn signals(&self) -> &'static [Signal] {
        OBSERVER_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(OBSERVER_SIGNALS);
            tally.participant(&class.name);

            if class.name.contains("Observer")
                || class.name.contains("Emitter")
                || class.name.contains("Listener")
                || class.name.contains("Broadcaster")
            {
                tally.hit("observer-name", &class.name);
            }
            let methods = ctx.methods_of(class);
            let subs = methods
                .iter()
                .filter(|m| {
                    matches!(
                        m.name.as_str(),
                        "subscribe" | "unsubscribe" | "on" | "off" | "addListener"
                            | "removeListener"
                    )
                })
                .count();
            if subs >= 2 {
                tally.hit("subscription-methods", format!("{subs} subscription methods"));
            }
            if methods
                .iter()
                .any(|m| matches!(m.name.as_str(), "notify" | "emit" | "publish" | "broadcast"))
            {
                tally.hit("notify-method", "notify/emit present");
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

pub struct StrategyDetector;

const STRATEGY_SIGNALS: &[Signal] = &[
    Signal {
        name: "strategy-name",
        weight: 0.4,
    },
    Signal {
        name: "interchangeable-impls",
        weight: 0.4,
    },
    Signal {
        name: "single-operation",
        weight: 0.2,
    },
];

impl PatternDetector for StrategyDetector {
    fn name(&self) -> &'static str {
        "strategy"
    }

    fn signals(&self) -> &'static [Signal] {
        STRATEGY_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for interface in ctx.interfaces {
            let mut tally = Tally::new(STRATEGY_SIGNALS);
            tally.participant(&interface.name);

            if interface.name.contains("Strategy") || interface.name.contains("Policy") {
                tally.hit("strategy-name", &interface.name);
            }
            let implementers: Vec<&str> = ctx
                .classes
                .iter()
                .filter(|c| c.implements_names.contains(&interface.name))
                .map(|c| c.name.as_str())
                .collect();
            if implementers.len() >= 2 {
                tally.hit(
                    "interchangeable-impls",
                    format!("{} implementations", implementers.len()),
                );
                for name in &implementers {
                    tally.participant(*name);
                }
            }
            // All implementations expose the same narrow surface.
            if !implementers.is_empty() {
                let widths: Vec<usize> = ctx
                    .classes
                    .iter()
                    .filter(|c| c.implements_names.contains(&interface.name))
                    .map(|c| ctx.methods_of(c).len())
                    .collect();
                if widths.iter().all(|&w| w == widths[0] && w <= 2) {
                    tally.hit("single-operation", "uniform narrow surface");
                }
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

pub struct RepositoryDetector;

const REPOSITORY_SIGNALS: &[Signal] = &[
    Signal {
        name: "repository-name",
        weight: 0.5,
    },
    Signal {
        name: "crud-methods",
        weight: 0.3,
    },
    Signal {
        name: "abstracted-behind-interface",
        weight: 0.2,
    },
];

impl PatternDetector for RepositoryDetector {
    fn name(&self) -> &'static str {
        "repository"
    }

    fn signals(&self) -> &'static [Signal] {
        REPOSITORY_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(REPOSITORY_SIGNALS);
            tally.participant(&class.name);

            if class.name.ends_with("Repository")
                || class.name.ends_with("Repo")
                || class.name.ends_with("Store")
                || class.name.ends_with("Dao")
            {
                tally.hit("repository-name", &class.name);
            }
            let crud = ctx
                .methods_of(class)
                .iter()
                .filter(|m| {
                    let name = m.name.to_lowercase();
                    name.starts_with("find")
                        || name.starts_with("get")
                        || name.starts_with("save")
                        || name.starts_with("insert")
                        || name.starts_with("update")
                        || name.starts_with("delete")
                        || name.starts_with("list")
                })
                .count();
            if crud >= 2 {
                tally.hit("crud-methods", format!("{crud} persistence methods"));
            }
            if !class.implements_names.is_empty() {
                tally.hit(
                    "abstracted-behind-interface",
                    class.implements_names[0].clone(),
                );
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

pub struct ServiceDetector;

const SERVICE_SIGNALS: &[Signal] = &[
    Signal {
        name: "service-name",
        weight: 0.5,
    },
    Signal {
        name: "cohesive-operations",
        weight: 0.2,
    },
    Signal {
        name: "exported",
        weight: 0.1,
    },
    Signal {
        name: "stateless-surface",
        weight: 0.2,
    },
];

impl PatternDetector for ServiceDetector {
    fn name(&self) -> &'static str {
        "service"
    }

    fn signals(&self) -> &'static [Signal] {
        SERVICE_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(SERVICE_SIGNALS);
            tally.participant(&class.name);

            if class.name.ends_with("Service")
                || class.name.ends_with("Manager")
                || class.name.ends_with("Handler")
            {
                tally.hit("service-name", &class.name);
            }
            let methods = ctx.methods_of(class);
            if methods.len() >= 3 {
                tally.hit("cohesive-operations", format!("{} operations", methods.len()));
            }
            if class.is_exported {
                tally.hit("exported", "exported class");
            }
            if methods.iter().all(|m| !m.name.starts_with("set")) && !methods.is_empty() {
                tally.hit("stateless-surface", "no mutating setters");
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
    use crate::parsing::{Modifiers, UceClass, UceFunction, UceInterface, UceTree, Visibility};
    use crate::project::ScannedFile;
    use crate::types::{Language, Range};
    use std::path::PathBuf;

    fn batch_for(tree: UceTree) -> RowBatch {
        let file = ScannedFile {
            absolute_path: PathBuf::from("/w/src/x.ts"),
            relative_path: "src/x.ts".to_string(),
            size_bytes: 1,
            content_hash: "22".repeat(32),
            language: Language::TypeScript,
        };
        EntityExtractor::new()
            .extract(&file, &tree, None)
            .unwrap()
            .batch
    }

    #[test]
    fn observer_detected_from_subscription_surface() {
        let class = UceClass::new("EventBus", Range::new(1, 0, 40, 1))
            .with_method(UceFunction::new("subscribe", Range::line(2)), Visibility::Public)
            .with_method(
                UceFunction::new("unsubscribe", Range::line(6)),
                Visibility::Public,
            )
            .with_method(UceFunction::new("emit", Range::line(10)), Visibility::Public);
        let batch = batch_for(UceTree {
            classes: vec![class],
            ..Default::default()
        });
        let ctx = PatternContext::from_batch("src/x.ts", &batch);
        let detected = ObserverDetector.detect(&ctx);
        assert_eq!(detected.len(), 1);
        assert!((detected[0].confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn strategy_detected_from_multiple_implementations() {
        let tree = UceTree {
            interfaces: vec![UceInterface::new("RetryPolicy", Range::line(1))],
            classes: vec![
                UceClass::new("FixedRetry", Range::new(5, 0, 10, 1))
                    .implementing("RetryPolicy")
                    .with_method(UceFunction::new("next", Range::line(6)), Visibility::Public),
                UceClass::new("ExponentialRetry", Range::new(12, 0, 18, 1))
                    .implementing("RetryPolicy")
                    .with_method(UceFunction::new("next", Range::line(13)), Visibility::Public),
            ],
            ..Default::default()
        };
        let batch = batch_for(tree);
        let ctx = PatternContext::from_batch("src/x.ts", &batch);
        let detected = StrategyDetector.detect(&ctx);
        assert_eq!(detected.len(), 1);
        assert!(detected[0].participants.len() >= 3);
    }

    #[test]
    fn repository_detected_from_name_and_crud() {
        let class = UceClass::new("UserRepository", Range::new(1, 0, 30, 1))
            .with_method(UceFunction::new("findById", Range::line(2)), Visibility::Public)
            .with_method(UceFunction::new("save", Range::line(8)), Visibility::Public)
            .with_method(UceFunction::new("deleteById", Range::line(14)), Visibility::Public);
        let batch = batch_for(UceTree {
            classes: vec![class],
            ..Default::default()
        });
        let ctx = PatternContext::from_batch("src/x.ts", &batch);
        assert_eq!(RepositoryDetector.detect(&ctx).len(), 1);
    }

    #[test]
    fn service_detection_respects_threshold() {
        let service = UceClass::new("AuthService", Range::new(1, 0, 40, 1))
            .with_modifiers(Modifiers::EXPORT)
            .with_method(UceFunction::new("login", Range::line(2)), Visibility::Public)
            .with_method(UceFunction::new("logout", Range::line(8)), Visibility::Public)
            .with_method(UceFunction::new("refresh", Range::line(14)), Visibility::Public);
        let helper = UceClass::new("Totals", Range::new(50, 0, 55, 1));
        let batch = batch_for(UceTree {
            classes: vec![service, helper],
            ..Default::default()
        });
        let ctx = PatternContext::from_batch("src/x.ts", &batch);

        let detected = ServiceDetector.detect(&ctx);
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].participants[0], "AuthService");
    }
}
