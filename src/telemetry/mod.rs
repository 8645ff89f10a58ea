//! Telemetry for the send pipeline.
//!
//! The gate, the limiter registry, the coordinator and the dispatcher emit
//! [`MailEvent`]s through an [`EventEmitter`]. Events flow into
//! `TelemetrySink` implementations, each a `tower::Service<MailEvent>`, which
//! log them, keep them for tests, or forward them (see `campusmail-jsonl`).
//!
//! Emission is best-effort: a failing sink never fails a request.

pub mod events;
pub mod sinks;

pub use events::{event_to_json, DispatchEvent, LimiterEvent, MailEvent, ScheduleEvent};
pub use sinks::{
    emit_best_effort, LogSink, MemorySink, NullSink, TeeError, TeeSink, TelemetrySink,
};

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

type EmitFn = dyn Fn(MailEvent) -> BoxFuture<'static, ()> + Send + Sync;

/// Type-erased handle to a sink, cheap to clone into every component.
#[derive(Clone)]
pub struct EventEmitter {
    emit: Arc<EmitFn>,
}

impl EventEmitter {
    /// Wrap any sink.
    pub fn new<S>(sink: S) -> Self
    where
        S: tower::Service<MailEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        Self {
            emit: Arc::new(move |event| {
                let sink = sink.clone();
                emit_best_effort(sink, event).boxed()
            }),
        }
    }

    /// An emitter that drops everything.
    pub fn null() -> Self {
        Self::new(NullSink)
    }

    pub async fn emit(&self, event: MailEvent) {
        (self.emit)(event).await
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::null()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}
