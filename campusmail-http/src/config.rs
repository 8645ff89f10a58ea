use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use campusmail::{MailSettings, RunMode};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be set in production mode")]
    Missing { key: &'static str },

    #[error("invalid {key} value '{value}': {reason}")]
    Invalid { key: &'static str, value: String, reason: String },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: RunMode,
    pub port: u16,
    pub mailjet_public_key: Option<String>,
    pub mailjet_private_key: Option<String>,
    /// Base URL of the identity provider; `/userinfo` is appended. Only the
    /// server needs it, and only outside debug mode.
    pub auth_domain: Option<String>,
    pub store_path: PathBuf,
    pub event_log: Option<PathBuf>,
    /// In-process dispatch scan interval. `None` leaves dispatch to the
    /// `campusmail-dispatch` binary.
    pub dispatch_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode: RunMode = try_load(&lookup, "CAMPUSMAIL_MODE", "production")?;
        let port = try_load(&lookup, "PORT", "8080")?;
        let mailjet_public_key = secret(&lookup, "MAILJET_PUBLIC_KEY");
        let mailjet_private_key = secret(&lookup, "MAILJET_PRIVATE_KEY");

        if !mode.is_debug() {
            if mailjet_public_key.is_none() {
                return Err(ConfigError::Missing { key: "MAILJET_PUBLIC_KEY" });
            }
            if mailjet_private_key.is_none() {
                return Err(ConfigError::Missing { key: "MAILJET_PRIVATE_KEY" });
            }
        }

        let auth_domain = lookup("CAMPUSMAIL_AUTH_DOMAIN")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let store_path = try_load(&lookup, "CAMPUSMAIL_STORE_PATH", "campusmail.jsonl")?;
        let event_log = lookup("CAMPUSMAIL_EVENT_LOG").filter(|v| !v.is_empty()).map(PathBuf::from);
        let dispatch_secs: u64 = try_load(&lookup, "CAMPUSMAIL_DISPATCH_INTERVAL_SECS", "0")?;
        let dispatch_interval = (dispatch_secs > 0).then(|| Duration::from_secs(dispatch_secs));

        Ok(Self {
            mode,
            port,
            mailjet_public_key,
            mailjet_private_key,
            auth_domain,
            store_path,
            event_log,
            dispatch_interval,
        })
    }

    pub fn settings(&self) -> MailSettings {
        MailSettings::default().with_mode(self.mode)
    }

    /// The identity provider base URL, required outside debug mode.
    pub fn require_auth_domain(&self) -> Result<&str, ConfigError> {
        self.auth_domain
            .as_deref()
            .ok_or(ConfigError::Missing { key: "CAMPUSMAIL_AUTH_DOMAIN" })
    }
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let value = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    value.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid { key, value, reason: e.to_string() }
    })
}

fn secret<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    if value.is_none() {
        warn!("{key} not found");
    }
    value
}
