use crate::limiter::BucketKind;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Events emitted by the send pipeline.
///
/// Identities are included so audit logs can answer "who sent what, when".
/// Message bodies never are.
#[derive(Debug, Clone, PartialEq)]
pub enum MailEvent {
    /// Quota decisions and limiter housekeeping
    Limiter(LimiterEvent),
    /// Scheduled-message lifecycle
    Schedule(ScheduleEvent),
    /// Batch dispatcher progress
    Dispatch(DispatchEvent),
}

/// Events emitted by the send gate and the limiter registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// A token was consumed and the request admitted.
    Admitted { identity: String, bucket: BucketKind },
    /// Admitted without touching the limiter (bypass mode).
    Bypassed { identity: String },
    /// The bucket was empty.
    Rejected { identity: String, bucket: BucketKind, wait: Duration },
    /// A step after admission failed and the identity's entry was evicted.
    Refunded { identity: String },
    /// The periodic sweep ran.
    Swept { removed: usize, remaining: usize },
}

/// Events emitted by the scheduling coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleEvent {
    /// A scheduled message was stored.
    Stored { id: Uuid, identity: String, send_at: String },
    /// A scheduled message was cancelled by its owner.
    Cancelled { identity: String, send_at: String },
}

/// Events emitted by the scheduled dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// A due message was delivered and removed.
    Sent { id: Uuid, identity: String },
    /// A due message failed and stays for the next scan.
    Failed { id: Uuid, identity: String, reason: String },
    /// A scan finished.
    Completed { sent: usize, failed: usize, cleanup_failures: usize },
    /// Another scanner held the claim.
    Skipped,
}

impl fmt::Display for MailEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailEvent::Limiter(e) => write!(f, "Limiter({})", e),
            MailEvent::Schedule(e) => write!(f, "Schedule({})", e),
            MailEvent::Dispatch(e) => write!(f, "Dispatch({})", e),
        }
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admitted { identity, bucket } => {
                write!(f, "Admitted({} via {})", identity, bucket)
            }
            LimiterEvent::Bypassed { identity } => write!(f, "Bypassed({})", identity),
            LimiterEvent::Rejected { identity, bucket, wait } => {
                write!(f, "Rejected({} via {}, wait {:?})", identity, bucket, wait)
            }
            LimiterEvent::Refunded { identity } => write!(f, "Refunded({})", identity),
            LimiterEvent::Swept { removed, remaining } => {
                write!(f, "Swept(removed={}, remaining={})", removed, remaining)
            }
        }
    }
}

impl fmt::Display for ScheduleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleEvent::Stored { id, identity, send_at } => {
                write!(f, "Stored({} for {} at {})", id, identity, send_at)
            }
            ScheduleEvent::Cancelled { identity, send_at } => {
                write!(f, "Cancelled({} at {})", identity, send_at)
            }
        }
    }
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchEvent::Sent { id, identity } => write!(f, "Sent({} for {})", id, identity),
            DispatchEvent::Failed { id, identity, reason } => {
                write!(f, "Failed({} for {}: {})", id, identity, reason)
            }
            DispatchEvent::Completed { sent, failed, cleanup_failures } => write!(
                f,
                "Completed(sent={}, failed={}, cleanup_failures={})",
                sent, failed, cleanup_failures
            ),
            DispatchEvent::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Flat JSON form of an event, one object per line in audit logs.
pub fn event_to_json(event: &MailEvent) -> serde_json::Value {
    match event {
        MailEvent::Limiter(l) => match l {
            LimiterEvent::Admitted { identity, bucket } => {
                json!({ "kind": "admitted", "identity": identity, "bucket": bucket.label() })
            }
            LimiterEvent::Bypassed { identity } => {
                json!({ "kind": "bypassed", "identity": identity })
            }
            LimiterEvent::Rejected { identity, bucket, wait } => json!({
                "kind": "rejected",
                "identity": identity,
                "bucket": bucket.label(),
                "wait_ms": wait.as_millis() as u64,
            }),
            LimiterEvent::Refunded { identity } => {
                json!({ "kind": "refunded", "identity": identity })
            }
            LimiterEvent::Swept { removed, remaining } => {
                json!({ "kind": "swept", "removed": removed, "remaining": remaining })
            }
        },
        MailEvent::Schedule(s) => match s {
            ScheduleEvent::Stored { id, identity, send_at } => json!({
                "kind": "scheduled",
                "id": id.to_string(),
                "identity": identity,
                "send_at": send_at,
            }),
            ScheduleEvent::Cancelled { identity, send_at } => {
                json!({ "kind": "cancelled", "identity": identity, "send_at": send_at })
            }
        },
        MailEvent::Dispatch(d) => match d {
            DispatchEvent::Sent { id, identity } => {
                json!({ "kind": "dispatch_sent", "id": id.to_string(), "identity": identity })
            }
            DispatchEvent::Failed { id, identity, reason } => json!({
                "kind": "dispatch_failed",
                "id": id.to_string(),
                "identity": identity,
                "reason": reason,
            }),
            DispatchEvent::Completed { sent, failed, cleanup_failures } => json!({
                "kind": "dispatch_completed",
                "sent": sent,
                "failed": failed,
                "cleanup_failures": cleanup_failures,
            }),
            DispatchEvent::Skipped => json!({ "kind": "dispatch_skipped" }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display_includes_bucket_and_wait() {
        let event = LimiterEvent::Rejected {
            identity: "a@princeton.edu".into(),
            bucket: BucketKind::Test,
            wait: Duration::from_secs(30),
        };
        let text = event.to_string();
        assert!(text.contains("Rejected"));
        assert!(text.contains("test"));
        assert!(text.contains("30s"));
    }

    #[test]
    fn rejected_json() {
        let v = event_to_json(&MailEvent::Limiter(LimiterEvent::Rejected {
            identity: "a@princeton.edu".into(),
            bucket: BucketKind::Normal,
            wait: Duration::from_millis(2500),
        }));
        assert_eq!(v["kind"], "rejected");
        assert_eq!(v["bucket"], "normal");
        assert_eq!(v["wait_ms"], 2500);
    }

    #[test]
    fn dispatch_completed_json() {
        let v = event_to_json(&MailEvent::Dispatch(DispatchEvent::Completed {
            sent: 3,
            failed: 1,
            cleanup_failures: 0,
        }));
        assert_eq!(v["kind"], "dispatch_completed");
        assert_eq!(v["sent"], 3);
        assert_eq!(v["failed"], 1);
    }

    #[test]
    fn swept_display() {
        let event = MailEvent::Limiter(LimiterEvent::Swept { removed: 2, remaining: 5 });
        assert_eq!(event.to_string(), "Limiter(Swept(removed=2, remaining=5))");
    }
}
