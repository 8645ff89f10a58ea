//! Digest submissions: one live entry per identity.

use crate::clock::Clock;
use crate::error::{MailError, StoreError};
use crate::gate::{SendGate, SendKind};
use crate::mail::User;
use crate::store::MailStore;
use crate::timeout::TimeoutPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestCategory {
    Lost,
    Sale,
    Misc,
}

impl DigestCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestCategory::Lost => "lost",
            DigestCategory::Sale => "sale",
            DigestCategory::Misc => "misc",
        }
    }

    /// Heading used when the digest is rendered.
    pub fn display_name(self) -> &'static str {
        match self {
            DigestCategory::Lost => "Lost & Found",
            DigestCategory::Sale => "Sale",
            DigestCategory::Misc => "Miscellaneous",
        }
    }

    /// Required link prefix and the message shown when it is missing.
    /// `None` means the category takes no link at all.
    fn link_rule(self) -> Option<(&'static str, &'static str)> {
        match self {
            DigestCategory::Lost => {
                Some(("https://i.imgur.com/", "Link must be a valid Imgur URL."))
            }
            DigestCategory::Sale => {
                Some(("https://docs.google.com/", "Link must be a valid Google Slides URL."))
            }
            DigestCategory::Misc => None,
        }
    }
}

impl FromStr for DigestCategory {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lost" => Ok(DigestCategory::Lost),
            "sale" => Ok(DigestCategory::Sale),
            "misc" => Ok(DigestCategory::Misc),
            _ => Err(MailError::validation("Wrong category, try again later.")),
        }
    }
}

impl fmt::Display for DigestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a digest submission.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DigestRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
}

/// A stored digest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    #[serde(rename = "email")]
    pub identity: String,
    #[serde(rename = "name")]
    pub composer_name: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub category: DigestCategory,
    pub created_at: DateTime<Utc>,
}

fn check_length(value: &str, field: &str, min: usize, max: usize) -> Result<(), MailError> {
    let count = value.chars().count();
    if count < min || count > max {
        return Err(MailError::validation(format!(
            "{field} needs to be between {min} and {max} characters inclusive."
        )));
    }
    Ok(())
}

impl DigestRequest {
    /// Check category, lengths and link rules.
    pub fn validate(&self) -> Result<(DigestCategory, Option<String>), MailError> {
        let category: DigestCategory = self.category.parse()?;
        check_length(&self.title, "Title", 3, 100)?;
        check_length(&self.description, "Description", 3, 200)?;

        let link = self.link.trim();
        if link.is_empty() {
            return Ok((category, None));
        }
        match category.link_rule() {
            Some((prefix, _)) if link.starts_with(prefix) => Ok((category, Some(link.to_string()))),
            Some((_, message)) => Err(MailError::validation(message)),
            None => Err(MailError::validation("You cannot include links in this category.")),
        }
    }
}

const DUPLICATE_DIGEST: &str =
    "You have already an existing digest. Try deleting it and send again.";

#[derive(Debug, Clone)]
pub struct DigestService {
    store: Arc<dyn MailStore>,
    gate: SendGate,
    clock: Arc<dyn Clock>,
    timeout: TimeoutPolicy,
}

impl DigestService {
    pub fn new(store: Arc<dyn MailStore>, gate: SendGate, clock: Arc<dyn Clock>) -> Self {
        Self { store, gate, clock, timeout: TimeoutPolicy::store(crate::timeout::STORE_TIMEOUT) }
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    /// The identity's live entry, if any.
    pub async fn status(&self, identity: &str) -> Result<Option<DigestEntry>, MailError> {
        let store = &self.store;
        self.timeout.execute(|| store.find_digest(identity)).await
    }

    /// Validate and store a submission. Charged to the normal bucket; any
    /// failure after admission refunds it.
    pub async fn submit(&self, user: &User, request: DigestRequest) -> Result<DigestEntry, MailError> {
        user.require_name()?;
        self.gate
            .execute(&user.email, SendKind::Normal, || async {
                let (category, link) = request.validate()?;
                if self.status(&user.email).await?.is_some() {
                    return Err(MailError::conflict(DUPLICATE_DIGEST));
                }
                let entry = DigestEntry {
                    identity: user.email.clone(),
                    composer_name: user.name.clone(),
                    title: request.title.clone(),
                    description: request.description.clone(),
                    link,
                    category,
                    created_at: self.clock.now(),
                };
                let store = &self.store;
                let record = entry.clone();
                match self.timeout.execute(|| store.insert_digest(record)).await {
                    Ok(()) => {}
                    Err(MailError::Store(StoreError::Duplicate { .. })) => {
                        return Err(MailError::conflict(DUPLICATE_DIGEST));
                    }
                    Err(err) => return Err(err),
                }
                tracing::info!(
                    identity = %entry.identity,
                    category = %entry.category,
                    "digest entry stored"
                );
                Ok::<_, MailError>(entry)
            })
            .await
    }

    /// Remove the identity's entry. Does not touch the limiter.
    pub async fn delete(&self, identity: &str) -> Result<(), MailError> {
        let store = &self.store;
        if self.timeout.execute(|| store.delete_digest(identity)).await? {
            tracing::info!(identity, "digest entry deleted");
            Ok(())
        } else {
            Err(MailError::validation(
                "You do not have an existing digest message. Please create one first.",
            ))
        }
    }
}
