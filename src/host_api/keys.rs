use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::identity::CallerIdentity;
use crate::error::{ErrorBody, GatewayResult, TIMESTAMP_FORMAT};
use crate::AppState;

const SHARE_WARNING: &str = "Don't share this secret API key.";

/// Field names on the wire match what existing clients of the service parse.
#[derive(Serialize, ToSchema)]
pub struct IssuedKey {
    /// The API key. Shown once; send it as `x-api-key` on `/response`.
    #[serde(rename = "One Time API key")]
    pub credential: String,
    /// UTC issuance time, `YYYY-MM-DD HH:MM:SS`.
    #[serde(rename = "Generation Time")]
    pub issued_at: String,
    #[serde(rename = "!")]
    pub note: String,
}

/// Issue the caller's one-time API key.
///
/// Each network address gets at most one key for the lifetime of the
/// gateway. Asking again returns 403 with the original issuance time.
#[utoipa::path(
    get,
    path = "/generate_api",
    tag = "keys",
    responses(
        (status = 200, description = "Key issued", body = IssuedKey),
        (status = 403, description = "A key was already issued to this address", body = ErrorBody),
        (status = 503, description = "Key pool exhausted", body = ErrorBody)
    )
)]
pub async fn generate_api_key(
    State(state): State<AppState>,
    CallerIdentity(identity): CallerIdentity,
) -> GatewayResult<Json<IssuedKey>> {
    let record = state.issuer.issue(&identity, state.clock.now())?;

    Ok(Json(IssuedKey {
        credential: record.credential.into_inner(),
        issued_at: record.issued_at.format(TIMESTAMP_FORMAT).to_string(),
        note: SHARE_WARNING.to_string(),
    }))
}
