pub mod identity;
pub mod inference;
pub mod keys;

use std::any::Any;
use std::net::SocketAddr;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::{IntoResponse, Response};
use axum::{routing, Json, Router};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use utoipa::OpenApi;

use crate::api_keys::PoolStats;
use crate::error::{ErrorBody, GatewayError};
use crate::AppState;

/// Inference bodies are prompts, not uploads.
const INFERENCE_BODY_LIMIT: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Keygate API",
        description = "One-time API key issuance and rate-limited access to a hosted model. Call /generate_api once per address, then send the key as `x-api-key` to /response.",
        version = "0.1.0",
        license(name = "MIT")
    ),
    paths(keys::generate_api_key, inference::run_inference),
    components(schemas(keys::IssuedKey, inference::InferenceInput, ErrorBody)),
    tags(
        (name = "keys", description = "One-time API key issuance"),
        (name = "inference", description = "Authenticated, rate-limited model access")
    )
)]
pub struct ApiDoc;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    keys_total: usize,
    keys_free: usize,
}

impl From<PoolStats> for Health {
    fn from(stats: PoolStats) -> Self {
        Health {
            status: "ok",
            keys_total: stats.total,
            keys_free: stats.free,
        }
    }
}

/// Build the gateway router. Exposed separately from [`start_server`] so
/// tests can drive it with `oneshot`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/generate_api", routing::get(keys::generate_api_key))
        .route(
            "/response",
            routing::post(inference::run_inference)
                .layer(DefaultBodyLimit::max(INFERENCE_BODY_LIMIT)),
        )
        .route("/health", routing::get(health))
        .route("/api/openapi.json", routing::get(openapi_spec))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Gateway listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(state.issuer.pool_stats().into())
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    GatewayError::Internal(format!("handler panicked: {}", detail)).into_response()
}
