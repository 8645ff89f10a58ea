use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use campusmail::MailError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error(transparent)]
    Mail(#[from] MailError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::Mail(err) => match err {
                MailError::Validation(_) | MailError::Conflict(_) => StatusCode::BAD_REQUEST,
                MailError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                MailError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
                MailError::Store(_) | MailError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                MailError::Delivery(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let retry_after = match &self {
            AppError::Mail(err) => err.retry_after(),
            AppError::MalformedPayload => None,
        };
        let mut response = (status, self.to_string()).into_response();
        if let Some(wait) = retry_after {
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
