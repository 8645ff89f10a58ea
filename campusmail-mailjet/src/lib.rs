//! Mailjet sender for `campusmail`. Talks to the v3.1 send API.

use async_trait::async_trait;
use campusmail::error::DeliveryError;
use campusmail::sender::{EmailSender, OutboundEmail, Recipient};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.mailjet.com/v3.1/send";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Address<'a> {
    email: &'a str,
    name: &'a str,
}

impl<'a> From<&'a Recipient> for Address<'a> {
    fn from(r: &'a Recipient) -> Self {
        Self { email: &r.email, name: &r.name }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Message<'a> {
    from: Address<'a>,
    reply_to: Address<'a>,
    to: Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<Address<'a>>,
    subject: &'a str,
    text_part: &'a str,
    #[serde(rename = "HTMLPart")]
    html_part: &'a str,
    #[serde(rename = "CustomID")]
    custom_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendRequest<'a> {
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendResponse {
    #[serde(default)]
    messages: Vec<MessageResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessageResult {
    #[serde(default)]
    status: String,
}

/// The JSON body sent for `email`.
pub fn payload(email: &OutboundEmail) -> serde_json::Value {
    let request = SendRequest {
        messages: vec![Message {
            from: (&email.from).into(),
            reply_to: (&email.reply_to).into(),
            to: email.to.iter().map(Address::from).collect(),
            cc: email.cc.iter().map(Address::from).collect(),
            subject: &email.subject,
            text_part: &email.text,
            html_part: &email.html,
            custom_id: &email.custom_id,
        }],
    };
    serde_json::to_value(request).unwrap_or(serde_json::Value::Null)
}

/// Success means the first message result reports `"success"`.
pub fn interpret(body: &str) -> Result<(), DeliveryError> {
    let response: SendResponse = serde_json::from_str(body)
        .map_err(|err| DeliveryError::Rejected(format!("unreadable provider response: {err}")))?;
    match response.messages.first() {
        Some(result) if result.status == "success" => Ok(()),
        _ => Err(DeliveryError::Rejected(
            "mail service received an error, possibly because of limits".into(),
        )),
    }
}

/// Sends through Mailjet using basic auth with the account's key pair.
#[derive(Clone)]
pub struct MailjetSender {
    client: reqwest::Client,
    endpoint: String,
    public_key: String,
    private_key: String,
}

impl std::fmt::Debug for MailjetSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailjetSender").field("endpoint", &self.endpoint).finish_non_exhaustive()
    }
}

impl MailjetSender {
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self::with_timeouts(public_key, private_key, Duration::from_secs(10), Duration::from_secs(10))
    }

    pub fn with_timeouts(
        public_key: impl Into<String>,
        private_key: impl Into<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            public_key: public_key.into(),
            private_key: private_key.into(),
        }
    }

    /// Point at a different API URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl EmailSender for MailjetSender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.public_key, Some(&self.private_key))
            .json(&payload(email))
            .send()
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;

        let status = response.status();
        let body =
            response.text().await.map_err(|err| DeliveryError::Transport(err.to_string()))?;
        let outcome = interpret(&body);
        match &outcome {
            Ok(()) => tracing::debug!(subject = %email.subject, "mailjet accepted message"),
            Err(err) => tracing::warn!(%status, error = %err, "mailjet rejected message"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutboundEmail {
        OutboundEmail {
            from: Recipient::new("hoagie@princeton.edu", "Chess Club"),
            reply_to: Recipient::new("a@princeton.edu", "Chess Club"),
            to: vec![Recipient::new("hoagie@princeton.edu", "Chess Club")],
            cc: vec![Recipient::new("BUTLERBUZZ@PRINCETON.EDU", "Butler")],
            subject: "Open night".into(),
            text: "<p>hi</p>".into(),
            html: "<p>hi</p>".into(),
            custom_id: "HoagieMail".into(),
        }
    }

    #[test]
    fn payload_uses_v31_field_names() {
        let v = payload(&email());
        let m = &v["Messages"][0];
        assert_eq!(m["From"]["Email"], "hoagie@princeton.edu");
        assert_eq!(m["ReplyTo"]["Email"], "a@princeton.edu");
        assert_eq!(m["Cc"][0]["Name"], "Butler");
        assert_eq!(m["HTMLPart"], "<p>hi</p>");
        assert_eq!(m["TextPart"], "<p>hi</p>");
        assert_eq!(m["CustomID"], "HoagieMail");
    }

    #[test]
    fn empty_cc_is_omitted() {
        let mut test_mail = email();
        test_mail.cc.clear();
        assert!(payload(&test_mail)["Messages"][0].get("Cc").is_none());
    }

    #[test]
    fn interprets_first_status() {
        assert!(interpret(r#"{"Messages":[{"Status":"success"}]}"#).is_ok());
        assert!(interpret(r#"{"Messages":[{"Status":"error"}]}"#).is_err());
        assert!(interpret(r#"{"Messages":[]}"#).is_err());
        assert!(interpret("Unauthorized").is_err());
    }
}
