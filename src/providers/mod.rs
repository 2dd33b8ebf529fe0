//! External model providers: embedding and completion services.
//!
//! Both are opaque async collaborators. The engine never talks to a
//! vendor SDK directly; it consumes these traits and attributes
//! cost/latency through telemetry, while every completion invocation
//! feeds an outcome record into the feedback loop.

use crate::error::{StoreError, StoreResult};
use crate::feedback::{FeedbackLoop, ModelOutcome};
use crate::storage::{GraphStore, params};
use crate::telemetry::{SpanStatus, Tracer};
use crate::types::EntityId;
use async_trait::async_trait;
use cozo::DataValue;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider request failed: {message}")]
    Request { message: String, retryable: bool },

    #[error("Provider returned {got}-dimensional vector, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Embedding service: text in, fixed-width float vector out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Declared output dimensionality; must match the store schema.
    fn dimensions(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
}

/// Completion service with identity for routing and attribution.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError>;

    fn model_id(&self) -> &str;
    fn vendor(&self) -> &str;
}

/// Wraps a completion provider, recording one feedback outcome and one
/// telemetry span per invocation.
pub struct MeteredCompletion<P> {
    inner: P,
    feedback: Arc<FeedbackLoop>,
    tracer: Tracer,
    /// USD per 1k tokens, input and output.
    input_rate: f64,
    output_rate: f64,
}

impl<P: CompletionProvider> MeteredCompletion<P> {
    pub fn new(inner: P, feedback: Arc<FeedbackLoop>) -> Self {
        Self {
            inner,
            feedback,
            tracer: Tracer::disabled(),
            input_rate: 0.0,
            output_rate: 0.0,
        }
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_rates(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.input_rate = input_per_1k;
        self.output_rate = output_per_1k;
        self
    }

    fn cost_of(&self, completion: &Completion) -> f64 {
        completion.input_tokens as f64 / 1000.0 * self.input_rate
            + completion.output_tokens as f64 / 1000.0 * self.output_rate
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for MeteredCompletion<P> {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let mut span = self.tracer.start_span("provider.complete");
        span.set_attr("model", self.inner.model_id());
        span.set_attr("vendor", self.inner.vendor());

        let started = Instant::now();
        let result = self.inner.complete(prompt, options).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (success, cost) = match &result {
            Ok(completion) => {
                let cost = self.cost_of(completion);
                span.set_attr("input_tokens", completion.input_tokens);
                span.set_attr("output_tokens", completion.output_tokens);
                span.set_attr("cost", cost);
                span.set_status(SpanStatus::Ok);
                (true, cost)
            }
            Err(e) => {
                span.set_status(SpanStatus::Error(e.to_string()));
                (false, 0.0)
            }
        };
        span.set_attr("latency_ms", latency_ms);
        span.end();

        let outcome = ModelOutcome {
            model_id: self.inner.model_id().to_string(),
            vendor: self.inner.vendor().to_string(),
            success,
            latency_ms,
            cost,
            quality_score: None,
            used_fallback: false,
            timestamp: crate::types::utc_timestamp(),
        };
        if let Err(e) = self.feedback.record_outcome(outcome) {
            tracing::warn!(target: "providers", "outcome not recorded: {e}");
        }

        result
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn vendor(&self) -> &str {
        self.inner.vendor()
    }
}

/// Writes embedding vectors into the `embeddings` relation, keyed by
/// entity id.
pub struct EmbeddingWriter {
    store: Arc<GraphStore>,
    dimensions: usize,
}

impl EmbeddingWriter {
    pub fn new(store: Arc<GraphStore>, dimensions: usize) -> Self {
        Self { store, dimensions }
    }

    pub async fn store_embedding(
        &self,
        provider: &dyn EmbeddingProvider,
        entity_id: &EntityId,
        text: &str,
    ) -> StoreResult<()> {
        let vector = provider
            .embed(text)
            .await
            .map_err(|e| StoreError::Query {
                message: format!("embedding failed: {e}"),
            })?;
        if vector.len() != self.dimensions {
            return Err(StoreError::Query {
                message: format!(
                    "embedding has {} dimensions, schema declares {}",
                    vector.len(),
                    self.dimensions
                ),
            });
        }

        let list = DataValue::List(
            vector
                .into_iter()
                .map(|f| DataValue::from(f as f64))
                .collect(),
        );
        self.store.execute(
            "?[entity_id, vector, text_hash] := \
             entity_id = $id, vector = vec($v), text_hash = $hash\n\
             :put embeddings {entity_id => vector, text_hash}",
            params([
                ("id", DataValue::from(entity_id.as_str())),
                ("v", list),
                (
                    "hash",
                    DataValue::from(crate::project::hash_bytes(text.as_bytes()).as_str()),
                ),
            ]),
        )?;
        Ok(())
    }
}
