//! Batch delivery of due scheduled messages.

use crate::clock::Clock;
use crate::compose::MailComposer;
use crate::error::MailError;
use crate::schedule::{to_reference, DISPATCH_GRACE};
use crate::sender::EmailSender;
use crate::store::MailStore;
use crate::telemetry::{DispatchEvent, EventEmitter, MailEvent};
use crate::timeout::{TimeoutPolicy, SEND_TIMEOUT, STORE_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Delivered (whether or not the record was then removed).
    pub sent: usize,
    /// Delivery failed; the record stays for the next scan.
    pub failed: usize,
    /// Delivered but the record could not be removed, so it will be sent again.
    pub cleanup_failures: usize,
    /// Another scanner held the dispatch claim; nothing was attempted.
    pub skipped: bool,
}

/// Scans the store for due messages and delivers them.
///
/// Never touches the limiter. Scans are exclusive per store through
/// [`MailStore::claim_dispatch`], so an in-process loop and an external run
/// cannot deliver the same record twice.
#[derive(Debug, Clone)]
pub struct ScheduledDispatcher {
    store: Arc<dyn MailStore>,
    sender: Arc<dyn EmailSender>,
    composer: MailComposer,
    clock: Arc<dyn Clock>,
    grace: Duration,
    store_timeout: TimeoutPolicy,
    send_timeout: TimeoutPolicy,
    events: EventEmitter,
}

impl ScheduledDispatcher {
    pub fn new(
        store: Arc<dyn MailStore>,
        sender: Arc<dyn EmailSender>,
        composer: MailComposer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sender,
            composer,
            clock,
            grace: DISPATCH_GRACE,
            store_timeout: TimeoutPolicy::store(STORE_TIMEOUT),
            send_timeout: TimeoutPolicy::send(SEND_TIMEOUT),
            events: EventEmitter::null(),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_timeouts(mut self, store: TimeoutPolicy, send: TimeoutPolicy) -> Self {
        self.store_timeout = store;
        self.send_timeout = send;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Deliver everything scheduled at or before `now + grace`.
    ///
    /// A failed scan query aborts this run only. Per-message failures are
    /// logged and counted; the remaining messages are still attempted.
    pub async fn run_once(&self) -> Result<DispatchReport, MailError> {
        let store = &self.store;
        let Some(_claim) = self.store_timeout.execute(|| store.claim_dispatch()).await? else {
            tracing::info!("another dispatcher is scanning; skipping this run");
            self.events.emit(MailEvent::Dispatch(DispatchEvent::Skipped)).await;
            return Ok(DispatchReport { skipped: true, ..DispatchReport::default() });
        };

        let grace =
            chrono::Duration::from_std(self.grace).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = to_reference(self.clock.now() + grace);

        let due = self.store_timeout.execute(|| store.due_scheduled(&cutoff)).await?;
        let mut report = DispatchReport::default();

        for message in due {
            let email = self.composer.scheduled(&message);
            let sender = &self.sender;
            if let Err(err) = self.send_timeout.execute(|| sender.send(&email)).await {
                tracing::warn!(
                    id = %message.id,
                    identity = %message.identity,
                    error = %err,
                    "scheduled mail failed; will retry next scan"
                );
                report.failed += 1;
                self.events
                    .emit(MailEvent::Dispatch(DispatchEvent::Failed {
                        id: message.id,
                        identity: message.identity.clone(),
                        reason: err.to_string(),
                    }))
                    .await;
                continue;
            }

            report.sent += 1;
            let id = message.id;
            match self.store_timeout.execute(|| store.delete_scheduled(id)).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(%id, "scheduled mail already removed after delivery");
                }
                Err(err) => {
                    tracing::error!(
                        %id,
                        identity = %message.identity,
                        error = %err,
                        "delivered scheduled mail could not be removed"
                    );
                    report.cleanup_failures += 1;
                }
            }
            self.events
                .emit(MailEvent::Dispatch(DispatchEvent::Sent {
                    id,
                    identity: message.identity.clone(),
                }))
                .await;
        }

        if report.failed > 0 {
            tracing::warn!(failed = report.failed, "scheduled emails had errors");
        }
        if report.sent == 0 {
            tracing::info!("no scheduled emails sent at this time");
        } else {
            tracing::info!(sent = report.sent, "sent scheduled emails");
        }
        self.events
            .emit(MailEvent::Dispatch(DispatchEvent::Completed {
                sent: report.sent,
                failed: report.failed,
                cleanup_failures: report.cleanup_failures,
            }))
            .await;
        Ok(report)
    }

    /// Run a scan every `every` until `shutdown` flips to `true` or its sender drops.
    pub async fn run_periodic(&self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "scheduled dispatch scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("scheduled dispatcher stopped");
    }
}
