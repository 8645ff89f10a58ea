use super::events::MailEvent;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use thiserror::Error;
use tower::{Service, ServiceExt};

/// A telemetry sink that consumes mail events.
pub trait TelemetrySink:
    Service<MailEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: StdError + Send + 'static;
}

/// Deliver `event` once `sink` is ready. Failures are logged at debug and dropped.
pub async fn emit_best_effort<S>(sink: S, event: MailEvent)
where
    S: Service<MailEvent, Response = ()> + Send + Clone + 'static,
    S::Error: StdError + Send + 'static,
    S::Future: Send + 'static,
{
    if let Err(err) = sink.oneshot(event).await {
        tracing::debug!(error = %err, "telemetry sink dropped an event");
    }
}

// Sinks that record synchronously and cannot fail.
macro_rules! infallible_sink {
    ($($sink:ty),+ $(,)?) => {$(
        impl Service<MailEvent> for $sink {
            type Response = ();
            type Error = Infallible;
            type Future = Ready<Result<(), Infallible>>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, event: MailEvent) -> Self::Future {
                self.record(event);
                ready(Ok(()))
            }
        }

        impl TelemetrySink for $sink {
            type SinkError = Infallible;
        }
    )+};
}

infallible_sink!(NullSink, LogSink, MemorySink);

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl NullSink {
    fn record(&self, _event: MailEvent) {}
}

/// Writes each event to `tracing` at info.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl LogSink {
    fn record(&self, event: MailEvent) {
        tracing::info!(event = %event, "mail_event");
    }
}

/// Keeps every event in memory. Clones share the buffer.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<MailEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot in arrival order.
    pub fn events(&self) -> Vec<MailEvent> {
        self.buffer().clone()
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    fn record(&self, event: MailEvent) {
        self.buffer().push(event);
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<MailEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A sink behind a [`TeeSink`] failed.
#[derive(Debug, Error)]
#[error("telemetry sink failed: {0}")]
pub struct TeeError(#[source] Box<dyn StdError + Send + Sync>);

impl TeeError {
    fn wrap<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self(Box::new(err))
    }
}

/// Sends every event to two sinks. Both always receive it; the first failure
/// is reported.
#[derive(Clone, Debug)]
pub struct TeeSink<A, B> {
    primary: A,
    secondary: B,
}

impl<A, B> TeeSink<A, B> {
    pub fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }
}

impl<A, B> Service<MailEvent> for TeeSink<A, B>
where
    A: Service<MailEvent, Response = ()> + Clone + Send + 'static,
    A::Error: StdError + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: Service<MailEvent, Response = ()> + Clone + Send + 'static,
    B::Error: StdError + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type Response = ();
    type Error = TeeError;
    type Future = Pin<Box<dyn Future<Output = Result<(), TeeError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), TeeError>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: MailEvent) -> Self::Future {
        let primary = self.primary.clone().oneshot(event.clone());
        let secondary = self.secondary.clone().oneshot(event);
        Box::pin(async move {
            let (first, second) = futures::future::join(primary, secondary).await;
            first.map_err(TeeError::wrap)?;
            second.map_err(TeeError::wrap)
        })
    }
}

impl<A, B> TelemetrySink for TeeSink<A, B>
where
    A: Service<MailEvent, Response = ()> + Clone + Send + 'static,
    A::Error: StdError + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: Service<MailEvent, Response = ()> + Clone + Send + 'static,
    B::Error: StdError + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type SinkError = TeeError;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::BucketKind;
    use crate::telemetry::events::LimiterEvent;

    fn admitted(identity: &str) -> MailEvent {
        MailEvent::Limiter(LimiterEvent::Admitted {
            identity: identity.to_string(),
            bucket: BucketKind::Normal,
        })
    }

    #[derive(Clone)]
    struct Broken;

    impl Service<MailEvent> for Broken {
        type Response = ();
        type Error = std::io::Error;
        type Future = Ready<Result<(), std::io::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _event: MailEvent) -> Self::Future {
            ready(Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
    }

    #[tokio::test]
    async fn memory_sink_clones_share_events() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.call(admitted("a@princeton.edu")).await.unwrap();
        writer.call(admitted("b@princeton.edu")).await.unwrap();
        assert_eq!(sink.events(), vec![admitted("a@princeton.edu"), admitted("b@princeton.edu")]);
    }

    #[tokio::test]
    async fn tee_delivers_past_a_failing_side() {
        let kept = MemorySink::new();
        let mut tee = TeeSink::new(Broken, kept.clone());
        let err = tee.call(admitted("a@princeton.edu")).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(kept.len(), 1);

        let mut both = TeeSink::new(LogSink, kept.clone());
        both.call(admitted("b@princeton.edu")).await.unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn best_effort_swallows_sink_errors() {
        emit_best_effort(Broken, admitted("a@princeton.edu")).await;
        emit_best_effort(NullSink, admitted("a@princeton.edu")).await;
    }
}
