use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::identity::CallerIdentity;
use crate::error::{ErrorBody, GatewayError, GatewayResult};
use crate::inference;
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Request body accepted by `/response`. Documentation only; parsing goes
/// through [`inference::validate`] so malformed bodies map to 400.
#[derive(Serialize, ToSchema)]
pub struct InferenceInput {
    pub system_prompt: String,
    pub message: String,
    /// Token budget for the completion. Must be a non-negative integer.
    pub tokens: u32,
}

/// Run the model for an authenticated caller.
///
/// Pipeline: key check, body validation, rate limit, dispatch. The key check
/// comes first so unauthenticated callers learn nothing about body rules,
/// and malformed bodies are rejected before they count against the quota.
/// That includes bodies over the size limit: the read failure is held until
/// the key has been checked.
#[utoipa::path(
    post,
    path = "/response",
    tag = "inference",
    request_body = InferenceInput,
    params(
        ("x-api-key" = String, Header, description = "API key from /generate_api")
    ),
    responses(
        (status = 200, description = "Model output, passed through as-is", body = serde_json::Value),
        (status = 400, description = "Malformed body", body = ErrorBody),
        (status = 403, description = "Missing or invalid API key", body = ErrorBody),
        (status = 413, description = "Body over 1 MiB", body = ErrorBody),
        (status = 429, description = "Rate limit exceeded (100/day, 20/minute)", body = ErrorBody),
        (status = 500, description = "Inference failed", body = ErrorBody)
    )
)]
pub async fn run_inference(
    State(state): State<AppState>,
    CallerIdentity(identity): CallerIdentity,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> GatewayResult<Json<serde_json::Value>> {
    let credential = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    state.gate.authenticate(credential).inspect_err(|_| {
        log::warn!(
            "AUDIT action=admit identity={} outcome=invalid_credential stage=authenticate",
            identity
        );
    })?;

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            GatewayError::PayloadTooLarge
        } else {
            GatewayError::MalformedInput(rejection.body_text())
        }
    })?;

    let request = inference::validate(&body).inspect_err(|e| {
        log::warn!(
            "AUDIT action=validate identity={} outcome=malformed error={}",
            identity,
            e
        );
    })?;

    state.gate.admit(credential, &identity, state.clock.now())?;

    let output = state.dispatcher.dispatch(request).await?;
    log::info!("Model response generated successfully for {}", identity);
    Ok(Json(output))
}
