//! Trace context carried between stages.
//!
//! Every envelope holds the [`SpanContext`] that should parent the next
//! stage's span. A stage opens its span under that context and, before
//! forwarding, replaces it with its own span's context, so the spans of one
//! message form a single parent-child chain. An invalid (empty) context means
//! the next span starts a new trace.
//!
//! Contexts cross process boundaries as W3C `traceparent` headers through
//! the SDK's [`TraceContextPropagator`].

use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry_sdk::propagation::TraceContextPropagator;

pub use opentelemetry::trace::SpanContext;

/// Name of the HTTP header carrying a serialized context.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Parent for a stage span. An invalid context yields a root span.
pub fn parent_context(parent: &SpanContext) -> Context {
    if parent.is_valid() {
        Context::new().with_remote_span_context(parent.clone())
    } else {
        Context::new()
    }
}

/// Read a remote span context from `carrier`.
///
/// Missing or malformed `traceparent` values give an invalid context.
pub fn extract_context(carrier: &dyn Extractor) -> SpanContext {
    let cx = TraceContextPropagator::new().extract(carrier);
    cx.span().span_context().clone()
}

/// Write `span` into `carrier` as `traceparent`/`tracestate`. Invalid
/// contexts write nothing.
pub fn inject_context(span: &SpanContext, carrier: &mut dyn Injector) {
    TraceContextPropagator::new().inject_context(&parent_context(span), carrier);
}
