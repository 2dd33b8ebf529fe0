//! Model-routing feedback loop.
//!
//! Records model-invocation outcomes in a rolling window, aggregates
//! them per model, and periodically converts the aggregates into
//! decaying score adjustments. Downstream routing asks
//! [`FeedbackLoop::adjusted_score`] before picking a model; a disabled
//! model scores negative infinity. The loop is the one process-wide
//! singleton in the system, with explicit init/shutdown.

use crate::config::FeedbackConfig;
use crate::error::{IndexError, IndexResult};
use crate::types::utc_timestamp;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// One recorded model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutcome {
    pub model_id: String,
    pub vendor: String,
    pub success: bool,
    pub latency_ms: u64,
    pub cost: f64,
    pub quality_score: Option<f64>,
    pub used_fallback: bool,
    pub timestamp: u64,
}

impl ModelOutcome {
    fn validate(&self) -> Result<(), String> {
        if self.model_id.is_empty() {
            return Err("empty model id".to_string());
        }
        if !self.cost.is_finite() || self.cost < 0.0 {
            return Err(format!("invalid cost {}", self.cost));
        }
        if let Some(q) = self.quality_score {
            if !(0.0..=1.0).contains(&q) {
                return Err(format!("quality score {q} outside [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Per-model aggregates over the rolling window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelAggregates {
    pub samples: usize,
    pub success_rate: f64,
    pub p50_latency_ms: u64,
    pub p90_latency_ms: u64,
    pub p99_latency_ms: u64,
    pub average_cost: f64,
    pub fallback_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    ScorePenalty,
    ScoreBoost,
    Disable,
}

/// A time-bounded, decaying modifier on a model's routing score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub model_id: String,
    pub kind: AdjustmentKind,
    pub value: f64,
    pub confidence: f64,
    pub reason: String,
    pub created_at: u64,
    pub expires_at: Option<u64>,
}

/// Emitted on every recalculate tick that changes a model's adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAdjustmentChanged {
    pub model_id: String,
    pub kind: AdjustmentKind,
    pub value: f64,
    pub reason: String,
}

#[derive(Debug, Default)]
struct State {
    outcomes: VecDeque<ModelOutcome>,
    adjustments: HashMap<String, Adjustment>,
}

pub struct FeedbackLoop {
    config: FeedbackConfig,
    state: Mutex<State>,
    events: broadcast::Sender<FeedbackAdjustmentChanged>,
}

impl FeedbackLoop {
    pub fn new(config: FeedbackConfig) -> Self {
        let (events, _) = broadcast::channel(128);
        Self {
            config,
            state: Mutex::new(State::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedbackAdjustmentChanged> {
        self.events.subscribe()
    }

    /// Record one outcome. Malformed records are dropped with a warning.
    pub fn record_outcome(&self, outcome: ModelOutcome) -> IndexResult<()> {
        if let Err(reason) = outcome.validate() {
            tracing::warn!(target: "feedback", "dropping outcome: {reason}");
            return Err(IndexError::FeedbackOutcomeInvalid { reason });
        }
        let mut state = self.state.lock();
        state.outcomes.push_back(outcome);
        self.prune(&mut state, utc_timestamp());
        Ok(())
    }

    fn prune(&self, state: &mut State, now: u64) {
        let horizon = now.saturating_sub(self.config.window_secs);
        while state
            .outcomes
            .front()
            .is_some_and(|o| o.timestamp < horizon)
        {
            state.outcomes.pop_front();
        }
    }

    /// Aggregates for one model over the current window.
    pub fn aggregates(&self, model_id: &str) -> ModelAggregates {
        let state = self.state.lock();
        let outcomes: Vec<&ModelOutcome> = state
            .outcomes
            .iter()
            .filter(|o| o.model_id == model_id)
            .collect();
        Self::aggregate(&outcomes)
    }

    fn aggregate(outcomes: &[&ModelOutcome]) -> ModelAggregates {
        if outcomes.is_empty() {
            return ModelAggregates::default();
        }
        let samples = outcomes.len();
        let successes = outcomes.iter().filter(|o| o.success).count();
        let fallbacks = outcomes.iter().filter(|o| o.used_fallback).count();
        let mut latencies: Vec<u64> = outcomes.iter().map(|o| o.latency_ms).collect();
        latencies.sort_unstable();

        ModelAggregates {
            samples,
            success_rate: successes as f64 / samples as f64,
            p50_latency_ms: percentile(&latencies, 50.0),
            p90_latency_ms: percentile(&latencies, 90.0),
            p99_latency_ms: percentile(&latencies, 99.0),
            average_cost: outcomes.iter().map(|o| o.cost).sum::<f64>() / samples as f64,
            fallback_rate: fallbacks as f64 / samples as f64,
        }
    }

    /// The periodic step: decay, expire, re-analyze, merge.
    pub fn recalculate(&self) -> Vec<FeedbackAdjustmentChanged> {
        self.recalculate_at(utc_timestamp())
    }

    fn recalculate_at(&self, now: u64) -> Vec<FeedbackAdjustmentChanged> {
        let mut state = self.state.lock();
        self.prune(&mut state, now);

        // 1. Decay, dropping adjustments that faded below 1.
        state.adjustments.retain(|_, adj| {
            if adj.kind != AdjustmentKind::Disable {
                adj.value *= 1.0 - self.config.decay_rate;
            }
            adj.kind == AdjustmentKind::Disable || adj.value.abs() >= 1.0
        });

        // 2. Expiry.
        state
            .adjustments
            .retain(|_, adj| adj.expires_at.is_none_or(|at| at > now));

        // 3. Re-analyze, at most one new adjustment per model.
        let models: Vec<String> = {
            let mut seen: Vec<String> = Vec::new();
            for outcome in &state.outcomes {
                if !seen.contains(&outcome.model_id) {
                    seen.push(outcome.model_id.clone());
                }
            }
            seen
        };

        let mut changes = Vec::new();
        for model_id in models {
            let outcomes: Vec<&ModelOutcome> = state
                .outcomes
                .iter()
                .filter(|o| o.model_id == model_id)
                .collect();
            if outcomes.len() < self.config.min_samples_for_adjustment {
                continue;
            }
            let aggregates = Self::aggregate(&outcomes);
            let Some(fresh) = self.analyze(&model_id, &aggregates, now) else {
                continue;
            };

            let merged = match state.adjustments.remove(&model_id) {
                None => fresh,
                Some(existing) if existing.kind == fresh.kind => Adjustment {
                    value: (existing.value + fresh.value) / 2.0,
                    confidence: (existing.confidence + 0.1).min(1.0),
                    ..fresh
                },
                Some(existing) => {
                    if existing.confidence > fresh.confidence {
                        existing
                    } else {
                        fresh
                    }
                }
            };

            changes.push(FeedbackAdjustmentChanged {
                model_id: merged.model_id.clone(),
                kind: merged.kind,
                value: merged.value,
                reason: merged.reason.clone(),
            });
            state.adjustments.insert(model_id, merged);
        }
        drop(state);

        for change in &changes {
            let _ = self.events.send(change.clone());
        }
        changes
    }

    /// Rule table from aggregates to a single candidate adjustment.
    fn analyze(
        &self,
        model_id: &str,
        aggregates: &ModelAggregates,
        now: u64,
    ) -> Option<Adjustment> {
        let success_floor = self.config.success_rate_threshold;
        let latency_ceiling = self.config.latency_threshold_ms as f64;

        if aggregates.success_rate < 0.5 && aggregates.samples >= 20 {
            return Some(Adjustment {
                model_id: model_id.to_string(),
                kind: AdjustmentKind::Disable,
                value: 0.0,
                confidence: 0.9,
                reason: format!(
                    "success rate {:.2} below 0.5 over {} samples",
                    aggregates.success_rate, aggregates.samples
                ),
                created_at: now,
                expires_at: Some(now + 3600),
            });
        }

        if aggregates.success_rate < success_floor {
            let shortfall = success_floor - aggregates.success_rate;
            return Some(Adjustment {
                model_id: model_id.to_string(),
                kind: AdjustmentKind::ScorePenalty,
                value: (shortfall * 100.0).max(1.0),
                confidence: 0.7,
                reason: format!(
                    "success rate {:.2} below threshold {success_floor:.2}",
                    aggregates.success_rate
                ),
                created_at: now,
                expires_at: None,
            });
        }

        let p90 = aggregates.p90_latency_ms as f64;
        if p90 > latency_ceiling {
            let overshoot = p90 / latency_ceiling - 1.0;
            return Some(Adjustment {
                model_id: model_id.to_string(),
                kind: AdjustmentKind::ScorePenalty,
                value: (overshoot * 20.0).max(1.0),
                confidence: 0.6,
                reason: format!("p90 latency {p90:.0}ms above {latency_ceiling:.0}ms"),
                created_at: now,
                expires_at: None,
            });
        }

        if aggregates.success_rate > 0.98 && p90 < latency_ceiling * 0.5 {
            return Some(Adjustment {
                model_id: model_id.to_string(),
                kind: AdjustmentKind::ScoreBoost,
                value: 5.0,
                confidence: 0.8,
                reason: "fast and reliable over the window".to_string(),
                created_at: now,
                expires_at: None,
            });
        }

        None
    }

    /// Base score with the current adjustment applied. Disabled models
    /// score negative infinity.
    pub fn adjusted_score(&self, model_id: &str, base_score: f64) -> f64 {
        let state = self.state.lock();
        match state.adjustments.get(model_id) {
            None => base_score,
            Some(adj) => match adj.kind {
                AdjustmentKind::Disable => f64::NEG_INFINITY,
                AdjustmentKind::ScorePenalty => base_score - adj.value * adj.confidence,
                AdjustmentKind::ScoreBoost => base_score + adj.value * adj.confidence,
            },
        }
    }

    /// Manual override: disable a model, optionally for a duration.
    pub fn disable_model(&self, model_id: &str, reason: &str, duration_secs: Option<u64>) {
        let now = utc_timestamp();
        let adjustment = Adjustment {
            model_id: model_id.to_string(),
            kind: AdjustmentKind::Disable,
            value: 0.0,
            confidence: 1.0,
            reason: reason.to_string(),
            created_at: now,
            expires_at: duration_secs.map(|d| now + d),
        };
        let change = FeedbackAdjustmentChanged {
            model_id: model_id.to_string(),
            kind: AdjustmentKind::Disable,
            value: 0.0,
            reason: reason.to_string(),
        };
        self.state
            .lock()
            .adjustments
            .insert(model_id.to_string(), adjustment);
        let _ = self.events.send(change);
        crate::log_event!("feedback", "disabled", "{model_id}: {reason}");
    }

    /// Manual override: clear any adjustment for a model.
    pub fn enable_model(&self, model_id: &str) {
        self.state.lock().adjustments.remove(model_id);
        crate::log_event!("feedback", "enabled", "{model_id}");
    }

    pub fn adjustment(&self, model_id: &str) -> Option<Adjustment> {
        self.state.lock().adjustments.get(model_id).cloned()
    }

    pub fn outcome_count(&self) -> usize {
        self.state.lock().outcomes.len()
    }

    /// Run `recalculate` on the configured interval until cancelled.
    pub fn spawn_recalc_task(self: &Arc<Self>, cancel: CancellationToken) {
        let this = Arc::clone(self);
        let interval = std::time::Duration::from_secs(this.config.recalc_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let changes = this.recalculate();
                        if !changes.is_empty() {
                            crate::debug_event!(
                                "feedback",
                                "recalculated",
                                "{} adjustments changed",
                                changes.len()
                            );
                        }
                    }
                }
            }
        });
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

// ─── Process-wide singleton ─────────────────────────────────────────────

static GLOBAL: RwLock<Option<Arc<FeedbackLoop>>> = RwLock::new(None);

/// Install the global feedback loop. Later inits replace the previous
/// instance.
pub fn init_global(config: FeedbackConfig) -> Arc<FeedbackLoop> {
    let instance = Arc::new(FeedbackLoop::new(config));
    *GLOBAL.write() = Some(Arc::clone(&instance));
    instance
}

/// The installed loop, if `init_global` has run.
pub fn global() -> Option<Arc<FeedbackLoop>> {
    GLOBAL.read().clone()
}

/// Tear down the global instance.
pub fn shutdown_global() {
    *GLOBAL.write() = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(model: &str, success: bool, latency: u64, ts: u64) -> ModelOutcome {
        ModelOutcome {
            model_id: model.to_string(),
            vendor: "acme".to_string(),
            success,
            latency_ms: latency,
            cost: 0.001,
            quality_score: Some(0.9),
            used_fallback: false,
            timestamp: ts,
        }
    }

    fn test_loop() -> FeedbackLoop {
        FeedbackLoop::new(FeedbackConfig::default())
    }

    #[test]
    fn invalid_outcomes_are_rejected() {
        let fl = test_loop();
        let mut bad = outcome("m", true, 10, utc_timestamp());
        bad.model_id = String::new();
        assert!(matches!(
            fl.record_outcome(bad),
            Err(IndexError::FeedbackOutcomeInvalid { .. })
        ));

        let mut bad = outcome("m", true, 10, utc_timestamp());
        bad.quality_score = Some(1.5);
        assert!(fl.record_outcome(bad).is_err());
        assert_eq!(fl.outcome_count(), 0);
    }

    #[test]
    fn zero_outcomes_produce_no_adjustments() {
        let fl = test_loop();
        assert!(fl.recalculate().is_empty());
    }

    #[test]
    fn below_min_samples_produces_no_adjustments() {
        let fl = test_loop();
        let now = utc_timestamp();
        // Exactly min - 1 failing samples: still no adjustment.
        for i in 0..9 {
            fl.record_outcome(outcome("m", false, 10, now - i)).unwrap();
        }
        assert!(fl.recalculate().is_empty());
        assert_eq!(fl.adjusted_score("m", 100.0), 100.0);
    }

    #[test]
    fn low_success_rate_draws_a_penalty() {
        let fl = test_loop();
        let now = utc_timestamp();
        for i in 0..10 {
            fl.record_outcome(outcome("m", i < 7, 10, now)).unwrap();
        }
        let changes = fl.recalculate();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, AdjustmentKind::ScorePenalty);
        assert!(fl.adjusted_score("m", 100.0) < 100.0);
    }

    #[test]
    fn catastrophic_model_is_disabled_with_expiry() {
        let fl = test_loop();
        let now = utc_timestamp();
        for i in 0..20 {
            fl.record_outcome(outcome("m", i < 5, 10, now)).unwrap();
        }
        let changes = fl.recalculate();
        assert_eq!(changes[0].kind, AdjustmentKind::Disable);
        assert_eq!(fl.adjusted_score("m", 100.0), f64::NEG_INFINITY);
        let adj = fl.adjustment("m").unwrap();
        assert!(adj.expires_at.is_some());
    }

    #[test]
    fn fast_reliable_model_gets_a_boost() {
        let fl = test_loop();
        let now = utc_timestamp();
        for _ in 0..50 {
            fl.record_outcome(outcome("m", true, 100, now)).unwrap();
        }
        let changes = fl.recalculate();
        assert_eq!(changes[0].kind, AdjustmentKind::ScoreBoost);
        assert!(fl.adjusted_score("m", 100.0) > 100.0);
    }

    #[test]
    fn slow_model_draws_latency_penalty() {
        let fl = test_loop();
        let now = utc_timestamp();
        for _ in 0..10 {
            fl.record_outcome(outcome("m", true, 20_000, now)).unwrap();
        }
        let changes = fl.recalculate();
        assert_eq!(changes[0].kind, AdjustmentKind::ScorePenalty);
        assert!(changes[0].reason.contains("latency"));
    }

    #[test]
    fn decay_shrinks_and_eventually_drops_adjustments() {
        let fl = test_loop();
        let now = utc_timestamp();
        for i in 0..10 {
            fl.record_outcome(outcome("m", i < 7, 10, now)).unwrap();
        }
        fl.recalculate_at(now);
        let initial = fl.adjustment("m").unwrap().value;

        // Window has moved past the outcomes; only decay applies.
        let mut value = initial;
        let mut ticks = 0;
        loop {
            fl.recalculate_at(now + fl.config.window_secs + 10 + ticks);
            ticks += 1;
            match fl.adjustment("m") {
                Some(adj) => {
                    assert!(adj.value < value);
                    value = adj.value;
                }
                None => break,
            }
            assert!(ticks < 200, "decay must terminate");
        }
    }

    #[test]
    fn same_kind_merge_averages_and_raises_confidence() {
        let fl = test_loop();
        let now = utc_timestamp();
        for i in 0..10 {
            fl.record_outcome(outcome("m", i < 7, 10, now)).unwrap();
        }
        fl.recalculate_at(now);
        let first = fl.adjustment("m").unwrap();
        fl.recalculate_at(now + 1);
        let second = fl.adjustment("m").unwrap();

        assert_eq!(first.kind, second.kind);
        assert!(second.confidence > first.confidence);
    }

    #[test]
    fn manual_disable_and_enable_override() {
        let fl = test_loop();
        fl.disable_model("m", "operator said so", None);
        assert_eq!(fl.adjusted_score("m", 10.0), f64::NEG_INFINITY);

        fl.enable_model("m");
        assert_eq!(fl.adjusted_score("m", 10.0), 10.0);
    }

    #[test]
    fn percentiles_on_sorted_latencies() {
        let latencies: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&latencies, 50.0), 51);
        assert_eq!(percentile(&latencies, 90.0), 90);
        assert_eq!(percentile(&latencies, 99.0), 99);
        assert_eq!(percentile(&[], 50.0), 0);
    }

    #[test]
    fn global_init_and_shutdown() {
        let instance = init_global(FeedbackConfig::default());
        assert!(global().is_some());
        instance.disable_model("x", "test", None);
        assert_eq!(
            global().unwrap().adjusted_score("x", 1.0),
            f64::NEG_INFINITY
        );
        shutdown_global();
        assert!(global().is_none());
    }

    #[test]
    fn adjustment_change_events_are_broadcast() {
        let fl = test_loop();
        let mut rx = fl.subscribe();
        let now = utc_timestamp();
        for i in 0..10 {
            fl.record_outcome(outcome("m", i < 7, 10, now)).unwrap();
        }
        fl.recalculate();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.model_id, "m");
        assert_eq!(event.kind, AdjustmentKind::ScorePenalty);
    }
}
