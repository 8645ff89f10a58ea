//! Convenient re-exports for wiring a mail service.
pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    error::{DeliveryError, MailError, StoreError},
    gate::{SendGate, SendKind},
    limiter::{LimiterConfig, LimiterRegistry},
    schedule::{is_schedule_valid, parse_schedule, validate_schedule, ScheduleCoordinator},
    sender::{EmailSender, OutboundEmail},
    store::MailStore,
    telemetry::{EventEmitter, LogSink, MemorySink, TelemetrySink},
    MailService, MailSettings, ScheduledDispatcher,
};
