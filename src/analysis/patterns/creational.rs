//! Creational pattern detectors: factory, singleton, builder.

use super::{DetectedPattern, PatternContext, PatternDetector, Signal, Tally};
use regex::Regex;
use std::sync::LazyLock;

static CREATOR_METHOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(create|make|build|new)[A-Z_]?").expect("static regex"));

static CHAINABLE_METHOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(with|set|add)[A-Z_]").expect("static regex"));

pub struct FactoryDetector;

const FACTORY_SIGNALS: &[Signal] = &[
    Signal {
        name: "factory-name",
        weight: 0.4,
    },
    Signal {
        name: "creator-methods",
        weight: 0.3,
    },
    Signal {
        name: "returns-declared-type",
        weight: 0.2,
    },
    Signal {
        name: "static-creator",
        weight: 0.2,
    },
];

impl PatternDetector for FactoryDetector {
    fn name(&self) -> &'static str {
        "factory"
    }

    fn signals(&self) -> &'static [Signal] {
        FACTORY_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        let declared: Vec<&str> = ctx
            .classes
            .iter()
            .map(|c| c.name.as_str())
            .chain(ctx.interfaces.iter().map(|i| i.name.as_str()))
            .collect();

        for class in ctx.classes {
            let mut tally = Tally::new(FACTORY_SIGNALS);
            tally.participant(&class.name);

            if class.name.contains("Factory") {
                tally.hit("factory-name", &class.name);
            }
            for method in ctx.methods_of(class) {
                if CREATOR_METHOD.is_match(&method.name) {
                    tally.hit("creator-methods", &method.name);
                    tally.participant(&method.name);
                    if let Some(ret) = &method.return_type {
                        if declared.iter().any(|d| ret.contains(d)) {
                            tally.hit("returns-declared-type", ret);
                        }
                    }
                }
            }
            let has_static_creator = ctx.methods_of(class).iter().any(|m| {
                CREATOR_METHOD.is_match(&m.name)
                    && m.signature.contains("static")
            });
            if has_static_creator {
                tally.hit("static-creator", &class.name);
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

pub struct SingletonDetector;

const SINGLETON_SIGNALS: &[Signal] = &[
    Signal {
        name: "singleton-name",
        weight: 0.3,
    },
    Signal {
        name: "instance-accessor",
        weight: 0.4,
    },
    Signal {
        name: "instance-field",
        weight: 0.3,
    },
];

impl PatternDetector for SingletonDetector {
    fn name(&self) -> &'static str {
        "singleton"
    }

    fn signals(&self) -> &'static [Signal] {
        SINGLETON_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.5
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(SINGLETON_SIGNALS);
            tally.participant(&class.name);

            if class.name.contains("Singleton") || class.name.contains("Registry") {
                tally.hit("singleton-name", &class.name);
            }
            for method in ctx.methods_of(class) {
                let lowered = method.name.to_lowercase();
                if lowered == "getinstance" || lowered == "instance" || lowered == "get_instance"
                    || lowered == "global"
                {
                    tally.hit("instance-accessor", &method.name);
                }
            }
            // Variables named like a cached instance, in the same file.
            if ctx
                .functions
                .iter()
                .any(|f| f.parent_scope == class.name && f.name.to_lowercase().contains("init"))
            {
                tally.hit("instance-field", format!("{} initializer", class.name));
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}

pub struct BuilderDetector;

const BUILDER_SIGNALS: &[Signal] = &[
    Signal {
        name: "builder-name",
        weight: 0.4,
    },
    Signal {
        name: "chainable-setters",
        weight: 0.4,
    },
    Signal {
        name: "build-method",
        weight: 0.3,
    },
];

impl PatternDetector for BuilderDetector {
    fn name(&self) -> &'static str {
        "builder"
    }

    fn signals(&self) -> &'static [Signal] {
        BUILDER_SIGNALS
    }

    fn threshold(&self) -> f64 {
        0.6
    }

    fn detect(&self, ctx: &PatternContext) -> Vec<DetectedPattern> {
        let mut out = Vec::new();
        for class in ctx.classes {
            let mut tally = Tally::new(BUILDER_SIGNALS);
            tally.participant(&class.name);

            if class.name.ends_with("Builder") {
                tally.hit("builder-name", &class.name);
            }

            let methods = ctx.methods_of(class);
            let chainable = methods
                .iter()
                .filter(|m| {
                    CHAINABLE_METHOD.is_match(&m.name)
                        && m.return_type
                            .as_deref()
                            .is_some_and(|r| r.contains(&class.name) || r == "this" || r == "Self")
                })
                .count();
            if chainable >= 2 {
                tally.hit("chainable-setters", format!("{chainable} chainable methods"));
            }
            if methods.iter().any(|m| m.name == "build" || m.name == "finish") {
                tally.hit("build-method", "build()");
            }

            out.extend(tally.finish(self.name(), self.threshold()));
        }
        out
    }
}
