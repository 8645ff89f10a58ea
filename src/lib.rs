#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # campusmail
//!
//! Per-user send quotas, scheduling and batch dispatch for a campus mass-mail
//! service.
//!
//! ## Features
//!
//! - **Visitor limiter**: two single-token buckets per identity (one normal
//!   send every 6 hours, one test send every minute), created lazily and swept
//!   when idle
//! - **Send gate**: admit, run, and refund on downstream failure
//! - **Scheduling**: strict-future validation in US Eastern time and at most
//!   one pending message per (identity, send time)
//! - **Dispatch**: batch delivery of due messages with per-message failure
//!   isolation
//! - **Telemetry**: `tower::Service` sinks for audit events
//!
//! ## Quick Start
//!
//! ```rust
//! use campusmail::{LimiterConfig, LimiterRegistry, SendGate, SendKind, SystemClock};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = LimiterRegistry::new(LimiterConfig::default(), Arc::new(SystemClock)).start();
//!     let gate = SendGate::new(registry.clone());
//!
//!     let first = gate.execute("student@princeton.edu", SendKind::Normal, || async {
//!         // deliver the message here
//!         Ok::<_, campusmail::MailError>(())
//!     }).await;
//!     assert!(first.is_ok());
//!
//!     let second = gate.admit("student@princeton.edu", SendKind::Normal).await;
//!     assert!(second.unwrap_err().is_rate_limited());
//!
//!     registry.shutdown().await;
//! }
//! ```

pub mod clock;
pub mod compose;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod mail;
pub mod prelude;
pub mod schedule;
pub mod sender;
pub mod settings;
pub mod store;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use compose::MailComposer;
pub use digest::{DigestCategory, DigestEntry, DigestRequest, DigestService};
pub use dispatch::{DispatchReport, ScheduledDispatcher};
pub use error::{DeliveryError, MailError, StoreError};
pub use gate::{Admission, SendGate, SendKind};
pub use limiter::{BucketKind, Decision, LimiterConfig, LimiterRegistry};
pub use mail::{Delivery, MailRequest, MailService, Submission, User};
pub use schedule::{ScheduleCoordinator, ScheduleDraft, ScheduledMessage};
pub use sender::{DryRunSender, EmailSender, OutboundEmail, Recipient};
pub use settings::{MailSettings, RunMode};
pub use store::{InMemoryMailStore, MailStore};
pub use telemetry::{EventEmitter, MailEvent};
pub use timeout::{InvalidTimeout, TimeoutPolicy};
