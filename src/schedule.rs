//! Scheduled sends: timestamp validation and the coordinator that owns the
//! (identity, send time) uniqueness rule.

use crate::clock::Clock;
use crate::error::{MailError, StoreError};
use crate::store::MailStore;
use crate::telemetry::{EventEmitter, MailEvent, ScheduleEvent};
use crate::timeout::TimeoutPolicy;
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A schedule must land strictly after now plus this margin.
pub const SCHEDULE_MARGIN: Duration = Duration::from_secs(60);

/// The dispatcher sends anything due within this window after its scan time.
pub const DISPATCH_GRACE: Duration = Duration::from_secs(60 * 60);

const INVALID_SCHEDULE: &str = "Your email could not be scheduled at the specified time. \
     Please refresh the page and select a later time.";

const DUPLICATE_SCHEDULE: &str = "You already have an email scheduled for this time. \
     If you would like to change your message, please delete your mail in the \
     Scheduled Emails page and try again.";

/// Zone every stored send time is expressed in.
pub fn reference_zone() -> Tz {
    chrono_tz::America::New_York
}

/// Express an instant in the reference zone.
pub fn to_reference(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.with_timezone(&reference_zone()).fixed_offset()
}

/// Parse an RFC 3339 timestamp and convert it to the reference zone.
///
/// Inputs without an explicit offset are rejected.
pub fn parse_schedule(raw: &str) -> Result<DateTime<FixedOffset>, MailError> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).map_err(|err| {
        tracing::debug!(raw, error = %err, "schedule string is not valid");
        MailError::validation(INVALID_SCHEDULE)
    })?;
    Ok(parsed.with_timezone(&reference_zone()).fixed_offset())
}

/// Parse `raw` and require it to be strictly later than `now + margin`.
pub fn validate_schedule(
    raw: &str,
    now: DateTime<Utc>,
    margin: Duration,
) -> Result<DateTime<FixedOffset>, MailError> {
    let send_at = parse_schedule(raw)?;
    let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
    let earliest = now.checked_add_signed(margin).unwrap_or(DateTime::<Utc>::MAX_UTC);
    if send_at > earliest {
        Ok(send_at)
    } else {
        Err(MailError::validation(INVALID_SCHEDULE))
    }
}

/// Boolean form of [`validate_schedule`].
pub fn is_schedule_valid(raw: &str, now: DateTime<Utc>, margin: Duration) -> bool {
    validate_schedule(raw, now, margin).is_ok()
}

/// A message stored for later delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    pub id: Uuid,
    pub sender: String,
    #[serde(rename = "header")]
    pub subject: String,
    /// Sanitized HTML, without footer.
    pub body: String,
    #[serde(rename = "email")]
    pub identity: String,
    #[serde(rename = "userName")]
    pub composer_name: String,
    #[serde(rename = "schedule")]
    pub send_at: DateTime<FixedOffset>,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to store a scheduled message, before validation.
#[derive(Debug, Clone)]
pub struct ScheduleDraft {
    pub identity: String,
    pub composer_name: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub raw_schedule: String,
}

/// Owns scheduled-message validation, uniqueness and cancellation.
#[derive(Debug, Clone)]
pub struct ScheduleCoordinator {
    store: Arc<dyn MailStore>,
    clock: Arc<dyn Clock>,
    margin: Duration,
    timeout: TimeoutPolicy,
    events: EventEmitter,
}

impl ScheduleCoordinator {
    pub fn new(store: Arc<dyn MailStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            margin: SCHEDULE_MARGIN,
            timeout: TimeoutPolicy::store(crate::timeout::STORE_TIMEOUT),
            events: EventEmitter::null(),
        }
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    /// Validate `raw` against the current time.
    pub fn validate(&self, raw: &str) -> Result<DateTime<FixedOffset>, MailError> {
        validate_schedule(raw, self.clock.now(), self.margin)
    }

    pub fn is_valid(&self, raw: &str) -> bool {
        self.validate(raw).is_ok()
    }

    /// The live record for (identity, send_at), if any.
    pub async fn find_duplicate(
        &self,
        identity: &str,
        send_at: &DateTime<FixedOffset>,
    ) -> Result<Option<ScheduledMessage>, MailError> {
        let store = &self.store;
        self.timeout.execute(|| store.find_scheduled(identity, send_at)).await
    }

    /// Validate, reject duplicates, and store.
    pub async fn schedule(&self, draft: ScheduleDraft) -> Result<ScheduledMessage, MailError> {
        let send_at = self.validate(&draft.raw_schedule)?;
        if self.find_duplicate(&draft.identity, &send_at).await?.is_some() {
            return Err(MailError::conflict(DUPLICATE_SCHEDULE));
        }

        let message = ScheduledMessage {
            id: Uuid::new_v4(),
            sender: draft.sender,
            subject: draft.subject,
            body: draft.body,
            identity: draft.identity,
            composer_name: draft.composer_name,
            send_at,
            created_at: self.clock.now(),
        };

        let store = &self.store;
        let record = message.clone();
        match self.timeout.execute(|| store.insert_scheduled(record)).await {
            Ok(()) => {}
            Err(MailError::Store(StoreError::Duplicate { .. })) => {
                return Err(MailError::conflict(DUPLICATE_SCHEDULE));
            }
            Err(err) => return Err(err),
        }

        tracing::info!(
            identity = %message.identity,
            send_at = %message.send_at.to_rfc3339(),
            "scheduled mail stored"
        );
        self.events
            .emit(MailEvent::Schedule(ScheduleEvent::Stored {
                id: message.id,
                identity: message.identity.clone(),
                send_at: message.send_at.to_rfc3339(),
            }))
            .await;
        Ok(message)
    }

    /// The identity's scheduled messages, ascending by send time.
    pub async fn list_scheduled(&self, identity: &str) -> Result<Vec<ScheduledMessage>, MailError> {
        let store = &self.store;
        let mut messages = self.timeout.execute(|| store.list_scheduled(identity)).await?;
        messages.sort_by_key(|m| m.send_at);
        Ok(messages)
    }

    /// Delete the identity's message scheduled at `raw`.
    ///
    /// Past timestamps are accepted so stale entries can still be removed.
    pub async fn cancel(&self, identity: &str, raw: &str) -> Result<ScheduledMessage, MailError> {
        let send_at = parse_schedule(raw)?;
        let Some(existing) = self.find_duplicate(identity, &send_at).await? else {
            return Err(MailError::validation(
                "You do not have an email scheduled for this time.",
            ));
        };

        let store = &self.store;
        let id = existing.id;
        if !self.timeout.execute(|| store.delete_scheduled(id)).await? {
            return Err(MailError::validation(
                "You do not have an email scheduled for this time.",
            ));
        }

        tracing::info!(identity, send_at = %send_at.to_rfc3339(), "scheduled mail cancelled");
        self.events
            .emit(MailEvent::Schedule(ScheduleEvent::Cancelled {
                identity: identity.to_string(),
                send_at: send_at.to_rfc3339(),
            }))
            .await;
        Ok(existing)
    }
}
