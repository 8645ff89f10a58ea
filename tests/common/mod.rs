#![allow(dead_code)]

use async_trait::async_trait;
use campusmail::{DeliveryError, EmailSender, OutboundEmail, ScheduleDraft};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fails every send whose subject is in `failing`; records the rest.
#[derive(Debug, Clone, Default)]
pub struct FlakySender {
    failing: Arc<Mutex<Vec<String>>>,
    delivered: Arc<Mutex<Vec<String>>>,
    attempts: Arc<AtomicUsize>,
}

impl FlakySender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_subject(&self, subject: &str) {
        self.failing.lock().unwrap().push(subject.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSender for FlakySender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&email.subject) {
            return Err(DeliveryError::Transport("connection reset".into()));
        }
        self.delivered.lock().unwrap().push(email.subject.clone());
        Ok(())
    }
}

pub fn draft(identity: &str, subject: &str, raw_schedule: &str) -> ScheduleDraft {
    ScheduleDraft {
        identity: identity.into(),
        composer_name: "A Student".into(),
        sender: "Butler College".into(),
        subject: subject.into(),
        body: "<p>See you there</p>".into(),
        raw_schedule: raw_schedule.into(),
    }
}
