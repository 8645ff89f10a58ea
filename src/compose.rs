//! Turns validated mail into provider-ready messages.

use crate::schedule::ScheduledMessage;
use crate::sender::{OutboundEmail, Recipient};
use crate::settings::MailSettings;

/// Provider tag attached to every message.
pub const CUSTOM_ID: &str = "HoagieMail";

/// Builds [`OutboundEmail`]s with footers and listserv fan-out.
#[derive(Debug, Clone)]
pub struct MailComposer {
    service_address: String,
    service_name: String,
    service_url: String,
    listservs: Vec<Recipient>,
}

/// The parts of a message the composer needs.
#[derive(Debug, Clone, Copy)]
pub struct Draft<'a> {
    pub identity: &'a str,
    pub composer_name: &'a str,
    pub sender: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

impl MailComposer {
    pub fn new(settings: &MailSettings) -> Self {
        Self {
            service_address: settings.service_address.clone(),
            service_name: settings.service_name.clone(),
            service_url: settings.service_url.clone(),
            listservs: settings.listservs.clone(),
        }
    }

    /// Listserv mail: to the service address, every listserv in CC.
    pub fn listserv(&self, draft: Draft<'_>) -> OutboundEmail {
        let footer = format!(
            "<hr /><div style=\"font-size:8pt;\">This email was instantly sent to all college \
             listservs with <a href=\"{url}\">{name}</a>. Email composed by {composer} ({email}). \
             If you believe this email is offensive, intentionally misleading or harmful, please \
             report it to <a href=\"mailto:{service}\">{service}</a>.</div>",
            url = self.service_url,
            name = self.service_name,
            composer = ammonia::clean_text(draft.composer_name),
            email = ammonia::clean_text(draft.identity),
            service = self.service_address,
        );
        let mut email = self.base(draft, &footer, &self.service_address);
        email.cc = self.listservs.clone();
        email
    }

    /// Test mail: only to the composer.
    pub fn test(&self, draft: Draft<'_>) -> OutboundEmail {
        let footer = format!(
            "<hr /><div style=\"font-size:8pt;\">This test email was instantly sent only to you \
             with <a href=\"{url}\">{name}</a>. Email composed by {composer} ({email}).</div>",
            url = self.service_url,
            name = self.service_name,
            composer = ammonia::clean_text(draft.composer_name),
            email = ammonia::clean_text(draft.identity),
        );
        self.base(draft, &footer, draft.identity)
    }

    /// A stored message on its way out through the dispatcher.
    pub fn scheduled(&self, message: &ScheduledMessage) -> OutboundEmail {
        self.listserv(Draft {
            identity: &message.identity,
            composer_name: &message.composer_name,
            sender: &message.sender,
            subject: &message.subject,
            body: &message.body,
        })
    }

    fn base(&self, draft: Draft<'_>, footer: &str, to: &str) -> OutboundEmail {
        let body = format!("{}{}", draft.body, footer);
        OutboundEmail {
            from: Recipient::new(&self.service_address, draft.sender),
            reply_to: Recipient::new(draft.identity, draft.sender),
            to: vec![Recipient::new(to, draft.sender)],
            cc: Vec::new(),
            subject: draft.subject.to_string(),
            text: body.clone(),
            html: body,
            custom_id: CUSTOM_ID.to_string(),
        }
    }
}
