//! The mail submission pipeline.
//!
//! Validation and sanitising happen before admission, so malformed requests
//! never cost quota. Immediate and test delivery run inside
//! [`SendGate::execute`] and are refunded on failure. Scheduled submissions
//! pass through the gate unmetered.

use crate::compose::{Draft, MailComposer};
use crate::error::MailError;
use crate::gate::{SendGate, SendKind};
use crate::schedule::{ScheduleCoordinator, ScheduleDraft, ScheduledMessage};
use crate::sender::EmailSender;
use crate::timeout::TimeoutPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: String,
}

impl User {
    /// Sessions issued before display names were recorded carry an empty name.
    pub fn require_name(&self) -> Result<(), MailError> {
        if self.name.trim().is_empty() {
            return Err(MailError::validation(
                "Hoagie Mail has been updated. Please log-out and log-in again.",
            ));
        }
        Ok(())
    }
}

/// Body of `POST /mail/send`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MailRequest {
    /// Subject line.
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub body: String,
    /// `"now"`, `"test"`, or an RFC 3339 timestamp.
    #[serde(default)]
    pub schedule: String,
}

/// What the `schedule` field asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Now,
    Test,
    At(String),
}

impl Delivery {
    pub fn parse(schedule: &str) -> Self {
        match schedule {
            "now" => Delivery::Now,
            "test" => Delivery::Test,
            other => Delivery::At(other.to_string()),
        }
    }

    pub fn kind(&self) -> SendKind {
        match self {
            Delivery::Now => SendKind::Normal,
            Delivery::Test => SendKind::Test,
            Delivery::At(_) => SendKind::Scheduled,
        }
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Sent,
    Scheduled(ScheduledMessage),
}

fn check_between(value: &str, field: &str, min: usize, max: usize) -> Result<(), MailError> {
    let count = value.chars().count();
    if count < min {
        return Err(MailError::validation(format!(
            "Please keep your {field} over the {min}-character requirement."
        )));
    }
    if count > max {
        return Err(MailError::validation(format!(
            "Please keep your {field} under the {max}-character limit."
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct MailService {
    gate: SendGate,
    coordinator: ScheduleCoordinator,
    composer: MailComposer,
    sender: Arc<dyn EmailSender>,
    send_timeout: TimeoutPolicy,
}

impl MailService {
    pub fn new(
        gate: SendGate,
        coordinator: ScheduleCoordinator,
        composer: MailComposer,
        sender: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            gate,
            coordinator,
            composer,
            sender,
            send_timeout: TimeoutPolicy::send(crate::timeout::SEND_TIMEOUT),
        }
    }

    pub fn with_send_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn coordinator(&self) -> &ScheduleCoordinator {
        &self.coordinator
    }

    pub fn gate(&self) -> &SendGate {
        &self.gate
    }

    /// Validate, admit, and either send or schedule.
    pub async fn submit(&self, user: &User, request: MailRequest) -> Result<Submission, MailError> {
        user.require_name()?;
        check_between(&request.sender, "sender name", 3, 30)?;
        check_between(&request.header, "email subject", 3, 150)?;

        let body = ammonia::clean(&request.body);
        let delivery = Delivery::parse(&request.schedule);
        let kind = delivery.kind();

        self.gate
            .execute(&user.email, kind, || async move {
                match delivery {
                    Delivery::Now | Delivery::Test => {
                        let draft = Draft {
                            identity: &user.email,
                            composer_name: &user.name,
                            sender: &request.sender,
                            subject: &request.header,
                            body: &body,
                        };
                        let email = if kind == SendKind::Test {
                            self.composer.test(draft)
                        } else {
                            self.composer.listserv(draft)
                        };
                        let sender = &self.sender;
                        self.send_timeout.execute(|| sender.send(&email)).await?;
                        if kind == SendKind::Normal {
                            tracing::info!(
                                identity = %user.email,
                                subject = %request.header,
                                "listserv mail sent"
                            );
                        }
                        Ok(Submission::Sent)
                    }
                    Delivery::At(raw) => {
                        let message = self
                            .coordinator
                            .schedule(ScheduleDraft {
                                identity: user.email.clone(),
                                composer_name: user.name.clone(),
                                sender: request.sender.clone(),
                                subject: request.header.clone(),
                                body: body.clone(),
                                raw_schedule: raw,
                            })
                            .await?;
                        Ok::<_, MailError>(Submission::Scheduled(message))
                    }
                }
            })
            .await
    }

    /// Send a test message regardless of the `schedule` field.
    pub async fn submit_test(&self, user: &User, mut request: MailRequest) -> Result<(), MailError> {
        request.schedule = "test".into();
        self.submit(user, request).await.map(|_| ())
    }
}
