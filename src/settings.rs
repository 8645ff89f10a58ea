//! Runtime settings shared by the server and the dispatcher.

use crate::limiter::{LimiterConfig, LimiterConfigError, NORMAL_SEND_PERIOD, TEST_SEND_PERIOD};
use crate::schedule::{DISPATCH_GRACE, SCHEDULE_MARGIN};
use crate::sender::Recipient;
use crate::timeout::{InvalidTimeout, TimeoutPolicy, SEND_TIMEOUT, STORE_TIMEOUT};
use std::str::FromStr;
use std::time::Duration;

/// Whether quotas and real delivery are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Production,
    /// Limiter bypassed, dry-run sender, fixed test identity.
    Debug,
}

impl RunMode {
    pub fn is_debug(self) -> bool {
        self == RunMode::Debug
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "production" | "prod" => Ok(RunMode::Production),
            "debug" => Ok(RunMode::Debug),
            other => Err(format!("unknown run mode '{other}'")),
        }
    }
}

/// College listservs that receive every normal send.
pub fn default_listservs() -> Vec<Recipient> {
    [
        ("BUTLERBUZZ@PRINCETON.EDU", "Butler"),
        ("WHITMANWIRE@PRINCETON.EDU", "Whitman"),
        ("RockyWire@PRINCETON.EDU", "Rocky"),
        ("Re-INNformer@PRINCETON.EDU", "Forbes"),
        ("westwire@princeton.edu", "NCW"),
        ("matheymail@PRINCETON.EDU", "Mathey"),
        ("yehyellowpages@princeton.edu", "Yeh"),
        ("hoagiemailgradstudents@princeton.edu", "hoagiemailgradstudents"),
    ]
    .into_iter()
    .map(|(email, name)| Recipient::new(email, name))
    .collect()
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub mode: RunMode,
    pub normal_period: Duration,
    pub test_period: Duration,
    pub sweep_interval: Duration,
    pub schedule_margin: Duration,
    pub dispatch_grace: Duration,
    pub store_timeout: Duration,
    pub send_timeout: Duration,
    /// Address every message is sent from; normal mail is also addressed to it.
    pub service_address: String,
    pub service_name: String,
    pub service_url: String,
    pub listservs: Vec<Recipient>,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::Production,
            normal_period: NORMAL_SEND_PERIOD,
            test_period: TEST_SEND_PERIOD,
            sweep_interval: NORMAL_SEND_PERIOD,
            schedule_margin: SCHEDULE_MARGIN,
            dispatch_grace: DISPATCH_GRACE,
            store_timeout: STORE_TIMEOUT,
            send_timeout: SEND_TIMEOUT,
            service_address: "hoagie@princeton.edu".into(),
            service_name: "Hoagie Mail".into(),
            service_url: "https://mail.hoagie.io/".into(),
            listservs: default_listservs(),
        }
    }
}

impl MailSettings {
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_periods(mut self, normal: Duration, test: Duration) -> Self {
        self.normal_period = normal;
        self.test_period = test;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_schedule_margin(mut self, margin: Duration) -> Self {
        self.schedule_margin = margin;
        self
    }

    pub fn with_dispatch_grace(mut self, grace: Duration) -> Self {
        self.dispatch_grace = grace;
        self
    }

    pub fn with_timeouts(mut self, store: Duration, send: Duration) -> Self {
        self.store_timeout = store;
        self.send_timeout = send;
        self
    }

    pub fn with_service_address(mut self, address: impl Into<String>) -> Self {
        self.service_address = address.into();
        self
    }

    pub fn with_listservs(mut self, listservs: Vec<Recipient>) -> Self {
        self.listservs = listservs;
        self
    }

    /// Validated limiter configuration.
    pub fn limiter_config(&self) -> Result<LimiterConfig, LimiterConfigError> {
        LimiterConfig::new(self.normal_period, self.test_period, self.sweep_interval)
    }

    /// Validated store and send timeout policies, in that order.
    pub fn timeouts(&self) -> Result<(TimeoutPolicy, TimeoutPolicy), InvalidTimeout> {
        Ok((
            TimeoutPolicy::try_new("store", self.store_timeout)?,
            TimeoutPolicy::try_new("send", self.send_timeout)?,
        ))
    }

    /// Limiter bypass follows debug mode.
    pub fn bypass_limits(&self) -> bool {
        self.mode.is_debug()
    }
}
