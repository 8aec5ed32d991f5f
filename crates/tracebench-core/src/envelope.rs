use std::time::Instant;

use crate::trace::SpanContext;

/// A message in flight, with the trace context it carries between stages.
///
/// Each hop moves the envelope into the next stage's mailbox; exactly one
/// stage owns it at a time.
#[derive(Debug, Clone)]
pub struct Envelope<P> {
    pub payload: P,
    /// Parent for the next stage's span; an empty context starts a new trace.
    pub trace: SpanContext,
    /// Submission order at the pipeline root.
    pub sequence: u64,
    /// When the message entered the pipeline.
    pub enqueued_at: Instant,
}

impl<P> Envelope<P> {
    pub fn new(payload: P, trace: SpanContext, sequence: u64) -> Self {
        Self {
            payload,
            trace,
            sequence,
            enqueued_at: Instant::now(),
        }
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}
