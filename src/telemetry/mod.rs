//! Lightweight span tracing.
//!
//! Span shape follows industry conventions (trace id, span id, parent,
//! attributes, events, status) without depending on any transport. The
//! coordinator, analyzers, feedback loop and providers use this for
//! cost/latency attribution. The default exporter discards everything.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    // Monotonic counter mixed with wall time: unique within a process,
    // distinct enough across processes for local correlation.
    let count = SPAN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    (nanos << 32) ^ count.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub u128);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(pub u64);

impl TraceId {
    fn generate() -> Self {
        Self(((next_id() as u128) << 64) | next_id() as u128)
    }

    pub fn to_hex(self) -> String {
        format!("{:032x}", self.0)
    }
}

impl SpanId {
    fn generate() -> Self {
        Self(next_id())
    }

    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }
}

/// Typed attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}
impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}
impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}
impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}
impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}
impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp_ms: u64,
    pub attributes: HashMap<String, AttrValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error(String),
}

/// A span in flight.
#[derive(Debug)]
pub struct Span {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    name: String,
    attributes: HashMap<String, AttrValue>,
    events: Vec<SpanEvent>,
    status: SpanStatus,
    started: Instant,
    started_at_ms: u64,
    tracer: Tracer,
}

impl Span {
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn add_event(&mut self, name: impl Into<String>) {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp_ms: now_ms(),
            attributes: HashMap::new(),
        });
    }

    pub fn add_event_with(
        &mut self,
        name: impl Into<String>,
        attributes: HashMap<String, AttrValue>,
    ) {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp_ms: now_ms(),
            attributes,
        });
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    /// Start a child span under this one.
    pub fn child(&self, name: impl Into<String>) -> Span {
        self.tracer
            .start_with_parent(name, self.trace_id, Some(self.span_id))
    }

    /// End the span and hand it to the tracer's buffer.
    pub fn end(self) {
        let data = SpanData {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            name: self.name,
            attributes: self.attributes,
            events: self.events,
            status: self.status,
            started_at_ms: self.started_at_ms,
            duration_us: self.started.elapsed().as_micros() as u64,
        };
        self.tracer.record(data);
    }
}

/// An ended span, ready for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub attributes: HashMap<String, AttrValue>,
    pub events: Vec<SpanEvent>,
    pub status: SpanStatus,
    pub started_at_ms: u64,
    pub duration_us: u64,
}

/// Receives batches of ended spans.
pub trait SpanExporter: Send + Sync {
    fn export(&self, batch: Vec<SpanData>);
}

/// Default exporter: drops everything.
pub struct NullExporter;

impl SpanExporter for NullExporter {
    fn export(&self, _batch: Vec<SpanData>) {}
}

/// Exporter that retains spans in memory; used by tests and the local
/// viewer surface.
#[derive(Default)]
pub struct CollectingExporter {
    spans: Mutex<Vec<SpanData>>,
}

impl CollectingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<SpanData> {
        std::mem::take(&mut self.spans.lock())
    }

    pub fn count(&self) -> usize {
        self.spans.lock().len()
    }
}

impl SpanExporter for CollectingExporter {
    fn export(&self, batch: Vec<SpanData>) {
        self.spans.lock().extend(batch);
    }
}

struct TracerInner {
    exporter: Arc<dyn SpanExporter>,
    buffer: Mutex<Vec<SpanData>>,
    /// Active span stack: new spans parent under the top entry.
    active: Mutex<Vec<(TraceId, SpanId)>>,
    batch_size: usize,
}

/// Span factory and buffer. Cheap to clone.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl Tracer {
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        Self {
            inner: Arc::new(TracerInner {
                exporter,
                buffer: Mutex::new(Vec::new()),
                active: Mutex::new(Vec::new()),
                batch_size: 64,
            }),
        }
    }

    /// Tracer wired to the null exporter.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullExporter))
    }

    /// Start a root span, or a child of the active span if one is
    /// attached.
    pub fn start_span(&self, name: impl Into<String>) -> Span {
        let (trace_id, parent) = match self.inner.active.lock().last() {
            Some((trace, span)) => (*trace, Some(*span)),
            None => (TraceId::generate(), None),
        };
        self.start_with_parent(name, trace_id, parent)
    }

    fn start_with_parent(
        &self,
        name: impl Into<String>,
        trace_id: TraceId,
        parent: Option<SpanId>,
    ) -> Span {
        Span {
            trace_id,
            span_id: SpanId::generate(),
            parent_span_id: parent,
            name: name.into(),
            attributes: HashMap::new(),
            events: Vec::new(),
            status: SpanStatus::Unset,
            started: Instant::now(),
            started_at_ms: now_ms(),
            tracer: self.clone(),
        }
    }

    /// Attach a span as the active parent for subsequent `start_span`
    /// calls on this tracer.
    pub fn attach(&self, span: &Span) {
        self.inner
            .active
            .lock()
            .push((span.trace_id, span.span_id));
    }

    /// Detach the most recently attached span.
    pub fn detach(&self) {
        self.inner.active.lock().pop();
    }

    fn record(&self, data: SpanData) {
        let batch = {
            let mut buffer = self.inner.buffer.lock();
            buffer.push(data);
            if buffer.len() >= self.inner.batch_size {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            self.inner.exporter.export(batch);
        }
    }

    /// Export everything buffered so far.
    pub fn flush(&self) {
        let batch = std::mem::take(&mut *self.inner.buffer.lock());
        if !batch.is_empty() {
            self.inner.exporter.export(batch);
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_ids_are_unique() {
        let a = SpanId::generate();
        let b = SpanId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_hex().len(), 16);
        assert_eq!(TraceId::generate().to_hex().len(), 32);
    }

    #[test]
    fn child_spans_share_the_trace() {
        let exporter = Arc::new(CollectingExporter::new());
        let tracer = Tracer::new(exporter.clone());

        let root = tracer.start_span("index");
        let child = root.child("extract");
        let root_trace = root.trace_id();
        let root_span = root.span_id();

        assert_eq!(child.trace_id(), root_trace);
        child.end();
        root.end();
        tracer.flush();

        let spans = exporter.take();
        assert_eq!(spans.len(), 2);
        let child_data = spans.iter().find(|s| s.name == "extract").unwrap();
        assert_eq!(child_data.parent_span_id, Some(root_span));
    }

    #[test]
    fn attach_makes_new_spans_children() {
        let exporter = Arc::new(CollectingExporter::new());
        let tracer = Tracer::new(exporter.clone());

        let root = tracer.start_span("root");
        tracer.attach(&root);
        let nested = tracer.start_span("nested");
        tracer.detach();

        assert_eq!(nested.trace_id(), root.trace_id());
        assert_eq!(nested.parent_span_id, Some(root.span_id()));
        nested.end();
        root.end();
    }

    #[test]
    fn attributes_events_and_status_survive_to_span_data() {
        let exporter = Arc::new(CollectingExporter::new());
        let tracer = Tracer::new(exporter.clone());

        let mut span = tracer.start_span("op");
        span.set_attr("file", "src/a.ts");
        span.set_attr("rows", 42i64);
        span.add_event("committed");
        span.set_status(SpanStatus::Ok);
        span.end();
        tracer.flush();

        let spans = exporter.take();
        assert_eq!(spans.len(), 1);
        let data = &spans[0];
        assert_eq!(data.attributes.get("rows"), Some(&AttrValue::Int(42)));
        assert_eq!(data.events.len(), 1);
        assert_eq!(data.status, SpanStatus::Ok);
    }

    #[test]
    fn null_exporter_discards_silently() {
        let tracer = Tracer::disabled();
        tracer.start_span("noop").end();
        tracer.flush();
    }
}
