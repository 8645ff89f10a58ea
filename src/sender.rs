//! Outbound email port.

use crate::error::DeliveryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// An address with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

impl Recipient {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self { email: email.into(), name: name.into() }
    }
}

/// A fully composed message ready for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: Recipient,
    pub reply_to: Recipient,
    pub to: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub subject: String,
    pub text: String,
    pub html: String,
    /// Provider-side tag for grouping sends.
    pub custom_id: String,
}

/// Sends composed messages.
#[async_trait]
pub trait EmailSender: Send + Sync + std::fmt::Debug {
    async fn send(&self, email: &OutboundEmail) -> Result<(), DeliveryError>;
}

/// Logs messages instead of sending them. Used in debug mode and tests.
#[derive(Debug, Clone, Default)]
pub struct DryRunSender {
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
}

impl DryRunSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages "sent" so far.
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl EmailSender for DryRunSender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), DeliveryError> {
        let cc: Vec<&str> = email.cc.iter().map(|r| r.email.as_str()).collect();
        tracing::info!(
            sender_name = %email.from.name,
            from = %email.from.email,
            reply_to = %email.reply_to.email,
            to = ?email.to.iter().map(|r| r.email.as_str()).collect::<Vec<_>>(),
            cc_count = cc.len(),
            cc = ?cc,
            subject = %email.subject,
            "dry run: email not sent"
        );
        tracing::debug!(body = %email.text, "dry run body");
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(email.clone());
        Ok(())
    }
}
