//! Resolving a bearer token to a [`User`].

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use campusmail::{MailError, User};
use serde::Deserialize;
use std::time::Duration;

pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer(headers: &HeaderMap) -> Result<&str, MailError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| MailError::Unauthenticated("Missing bearer token.".into()))
}

#[async_trait]
pub trait IdentityResolver: Send + Sync + std::fmt::Debug {
    async fn resolve(&self, token: &str) -> Result<User, MailError>;
}

/// Always answers with the same user. Used in debug mode.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    user: User,
}

impl StaticResolver {
    pub fn new(user: User) -> Self {
        Self { user }
    }

    pub fn debug_user() -> Self {
        Self::new(User { email: "test@princeton.edu".into(), name: "Name Lastname".into() })
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, _token: &str) -> Result<User, MailError> {
        Ok(self.user.clone())
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Looks the token up at the identity provider's `/userinfo` endpoint.
#[derive(Debug, Clone)]
pub struct UserInfoResolver {
    client: reqwest::Client,
    url: String,
}

impl UserInfoResolver {
    pub fn new(domain: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, url: format!("{}/userinfo", domain.trim_end_matches('/')) }
    }
}

#[async_trait]
impl IdentityResolver for UserInfoResolver {
    async fn resolve(&self, token: &str) -> Result<User, MailError> {
        let response = self.client.get(&self.url).bearer_auth(token).send().await.map_err(|err| {
            tracing::warn!(error = %err, "identity lookup failed");
            if err.is_timeout() {
                MailError::Timeout {
                    operation: "identity lookup",
                    elapsed: LOOKUP_TIMEOUT,
                    timeout: LOOKUP_TIMEOUT,
                }
            } else {
                MailError::Unauthenticated("Could not verify your login.".into())
            }
        })?;

        if !response.status().is_success() {
            return Err(MailError::Unauthenticated("Could not verify your login.".into()));
        }
        let info: UserInfo = response
            .json()
            .await
            .map_err(|_| MailError::Unauthenticated("Could not verify your login.".into()))?;
        let email = info
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| MailError::Unauthenticated("Login has no email address.".into()))?;
        Ok(User { email, name: info.name.unwrap_or_default() })
    }
}
