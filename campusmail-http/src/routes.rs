use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use campusmail::{DigestEntry, DigestRequest, MailRequest, ScheduledMessage, Submission, User};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{auth::bearer, error::AppError, state::AppState};

type Shared = State<Arc<AppState>>;

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let token = bearer(headers)?;
    Ok(state.identity.resolve(token).await?)
}

fn payload<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejected request body");
        AppError::MalformedPayload
    })
}

fn ok() -> Json<Value> {
    Json(json!({ "Status": "OK" }))
}

/// POST /mail/send
pub async fn send_handler(
    State(state): Shared,
    headers: HeaderMap,
    body: Result<Json<MailRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers).await?;
    let request = payload(body)?;
    match state.mail.submit(&user, request).await? {
        Submission::Sent => {}
        Submission::Scheduled(message) => {
            tracing::debug!(id = %message.id, "scheduled via /mail/send");
        }
    }
    Ok(ok())
}

/// POST /mail/sendTestMail
pub async fn test_mail_handler(
    State(state): Shared,
    headers: HeaderMap,
    body: Result<Json<MailRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers).await?;
    state.mail.submit_test(&user, payload(body)?).await?;
    Ok(ok())
}

#[derive(Debug, Serialize)]
pub struct ScheduledList {
    pub status: &'static str,
    #[serde(rename = "scheduledMail")]
    pub scheduled_mail: Vec<ScheduledMessage>,
}

/// GET /mail/scheduled/user
pub async fn scheduled_list_handler(
    State(state): Shared,
    headers: HeaderMap,
) -> Result<Json<ScheduledList>, AppError> {
    let user = authenticate(&state, &headers).await?;
    let scheduled_mail = state.mail.coordinator().list_scheduled(&user.email).await?;
    let status = if scheduled_mail.is_empty() { "unused" } else { "used" };
    Ok(Json(ScheduledList { status, scheduled_mail }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CancelRequest {
    pub schedule: String,
}

/// DELETE /mail/scheduled
pub async fn scheduled_delete_handler(
    State(state): Shared,
    headers: HeaderMap,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers).await?;
    let request = payload(body)?;
    state.mail.coordinator().cancel(&user.email, &request.schedule).await?;
    Ok(ok())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DigestStatus {
    pub title: String,
    pub category: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub email: String,
    pub status: &'static str,
}

impl From<DigestEntry> for DigestStatus {
    fn from(entry: DigestEntry) -> Self {
        Self {
            title: entry.title,
            category: entry.category.to_string(),
            description: entry.description,
            link: entry.link,
            email: entry.identity,
            status: "used",
        }
    }
}

/// GET /mail/digest
pub async fn digest_status_handler(
    State(state): Shared,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers).await?;
    let body = match state.digest.status(&user.email).await? {
        Some(entry) => json!(DigestStatus::from(entry)),
        None => json!({ "Status": "unused" }),
    };
    Ok(Json(body))
}

/// POST /mail/digest
pub async fn digest_send_handler(
    State(state): Shared,
    headers: HeaderMap,
    body: Result<Json<DigestRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers).await?;
    state.digest.submit(&user, payload(body)?).await?;
    Ok(ok())
}

/// DELETE /mail/digest
pub async fn digest_delete_handler(
    State(state): Shared,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers).await?;
    state.digest.delete(&user.email).await?;
    Ok(ok())
}
