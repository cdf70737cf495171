//! An opaque span/tracer abstraction (spec §6, §4.7): the runtime only
//! needs to carry a `traceparent`/`tracestate` pair across emitted events
//! and open/close spans around orchestrator/handler calls, never to know
//! what backend those spans end up in. Grounded on the same narrow-trait
//! shape as `arvo_persistence::pg::ConnectionProvider` — one capability,
//! swappable independently of the code that uses it — applied here to
//! tracing instead of database connections.

use uuid::Uuid;

/// The W3C-trace-context-shaped pair an `Event` carries (spec §3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub traceparent: Option<String>,
    pub tracestate: Option<String>,
}

impl TraceContext {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Starts a fresh trace: random trace-id and span-id, sampled flag set.
    pub fn new_root() -> Self {
        let trace_id = Uuid::new_v4().simple().to_string();
        let span_id = &Uuid::new_v4().simple().to_string()[..16];
        Self { traceparent: Some(format!("00-{trace_id}-{span_id}-01")), tracestate: None }
    }

    /// Derives a child context sharing the parent's trace-id with a fresh
    /// span-id, as a real W3C tracer would on entering a child span.
    pub fn child(&self) -> Self {
        let Some(parent) = &self.traceparent else {
            return Self::new_root();
        };
        let trace_id = parent.split('-').nth(1).unwrap_or("0").to_string();
        let span_id = &Uuid::new_v4().simple().to_string()[..16];
        Self { traceparent: Some(format!("00-{trace_id}-{span_id}-01")), tracestate: self.tracestate.clone() }
    }
}

/// One open span. Closed implicitly on drop.
pub trait Span: Send {
    fn context(&self) -> &TraceContext;
    fn record(&mut self, key: &str, value: &str);
}

/// Opens spans, the only capability the rest of the runtime needs.
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, parent: Option<&TraceContext>) -> Box<dyn Span>;
}

/// Logs span start/end via `log::debug!` and otherwise does nothing —
/// the default for tests and the CLI demo, and a template for wiring a real
/// backend (OpenTelemetry, Jaeger, ...) behind the same trait.
pub struct NoopTracer;

struct NoopSpan {
    name: String,
    context: TraceContext,
}

impl Span for NoopSpan {
    fn context(&self) -> &TraceContext {
        &self.context
    }

    fn record(&mut self, key: &str, value: &str) {
        log::debug!("span {} record {key}={value}", self.name);
    }
}

impl Drop for NoopSpan {
    fn drop(&mut self) {
        log::debug!("span {} end", self.name);
    }
}

impl Tracer for NoopTracer {
    fn start_span(&self, name: &str, parent: Option<&TraceContext>) -> Box<dyn Span> {
        let context = parent.map(TraceContext::child).unwrap_or_else(TraceContext::new_root);
        log::debug!("span {name} start traceparent={:?}", context.traceparent);
        Box::new(NoopSpan { name: name.to_string(), context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_root_produces_w3c_shaped_traceparent() {
        let ctx = TraceContext::new_root();
        let traceparent = ctx.traceparent.unwrap();
        let parts: Vec<&str> = traceparent.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "00");
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn child_shares_trace_id_with_parent() {
        let root = TraceContext::new_root();
        let child = root.child();
        let root_trace_id = root.traceparent.as_ref().unwrap().split('-').nth(1).unwrap();
        let child_trace_id = child.traceparent.as_ref().unwrap().split('-').nth(1).unwrap();
        assert_eq!(root_trace_id, child_trace_id);
        assert_ne!(root.traceparent, child.traceparent);
    }

    #[test]
    fn child_of_empty_context_starts_a_new_root() {
        let empty = TraceContext::empty();
        let child = empty.child();
        assert!(child.traceparent.is_some());
    }

    #[test]
    fn tracer_start_span_without_parent_roots_a_new_trace() {
        let tracer = NoopTracer;
        let span = tracer.start_span("orchestrator.execute", None);
        assert!(span.context().traceparent.is_some());
    }
}
