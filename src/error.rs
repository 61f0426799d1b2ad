use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Timestamp format used in client-visible messages and issuance responses.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid API key! Authorization revoked.")]
    InvalidCredential,

    #[error("API key already generated at {} from IP: {identity}", .at.format(TIMESTAMP_FORMAT))]
    AlreadyIssued { identity: String, at: DateTime<Utc> },

    #[error("No API keys available!")]
    Exhausted,

    #[error("Rate limit exceeded: {limit}")]
    RateLimited { limit: String, retry_after: Duration },

    #[error("Invalid input format: {0}")]
    MalformedInput(String),

    #[error("Request body too large.")]
    PayloadTooLarge,

    #[error("Upstream inference failed: {0}")]
    UpstreamFailure(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidCredential | GatewayError::AlreadyIssued { .. } => {
                StatusCode::FORBIDDEN
            }
            GatewayError::Exhausted => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the client. Upstream and internal faults
    /// collapse to a generic string; their detail only reaches the log.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::MalformedInput(_) => "Invalid input format.".to_string(),
            GatewayError::UpstreamFailure(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_)
            | GatewayError::Json(_)
            | GatewayError::Internal(_) => "Internal server error.".to_string(),
            other => other.to_string(),
        }
    }
}

/// JSON body of every error response.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed status={} error={}", status.as_u16(), self);
        } else {
            log::warn!("Request rejected status={} error={}", status.as_u16(), self);
        }

        let mut resp = (
            status,
            Json(ErrorBody {
                detail: self.client_message(),
            }),
        )
            .into_response();

        if let GatewayError::RateLimited { retry_after, .. } = &self {
            let secs = retry_after_secs(*retry_after);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        resp
    }
}

/// Whole seconds for a `Retry-After` header, rounded up and never zero.
fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_mapping() {
        assert_eq!(GatewayError::InvalidCredential.status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayError::Exhausted.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            GatewayError::MalformedInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayError::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            GatewayError::UpstreamFailure("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let limited = GatewayError::RateLimited {
            limit: "20 per minute".into(),
            retry_after: Duration::from_secs(3),
        };
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn already_issued_message_carries_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let err = GatewayError::AlreadyIssued {
            identity: "1.2.3.4".into(),
            at,
        };
        assert_eq!(
            err.client_message(),
            "API key already generated at 2024-05-01 12:30:00 from IP: 1.2.3.4"
        );
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let err = GatewayError::UpstreamFailure("connection refused to 10.0.0.3".into());
        assert_eq!(err.client_message(), "Internal server error.");
        let err = GatewayError::Internal("lock poisoned".into());
        assert_eq!(err.client_message(), "Internal server error.");
    }

    #[test]
    fn rate_limited_response_sets_retry_after() {
        let resp = GatewayError::RateLimited {
            limit: "20 per minute".into(),
            retry_after: Duration::from_millis(2500),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "3");
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
    }
}
