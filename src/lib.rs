pub mod api_keys;
pub mod clock;
pub mod config;
mod error;
pub mod gate;
pub mod host_api;
pub mod inference;

use std::sync::Arc;

use api_keys::{KeyIssuer, KeyPool};
use clock::{Clock, SystemClock};
use config::GatewayConfig;
use gate::quota::RateLimit;
use gate::RequestGate;
use host_api::identity::IdentitySource;
use inference::{HttpInferenceRoutine, InferenceDispatcher, InferenceRoutine};

pub use error::{ErrorBody, GatewayError, GatewayResult, TIMESTAMP_FORMAT};

/// Everything a request handler needs. Owned instances, shared by clone;
/// each component guards its own state.
#[derive(Clone)]
pub struct AppState {
    pub issuer: KeyIssuer,
    pub gate: RequestGate,
    pub dispatcher: InferenceDispatcher,
    pub clock: Arc<dyn Clock>,
    pub identity: IdentitySource,
}

impl AppState {
    /// Wire the components around one shared key pool.
    pub fn new(
        pool: KeyPool,
        limits: Vec<RateLimit>,
        routine: Arc<dyn InferenceRoutine>,
        clock: Arc<dyn Clock>,
        identity: IdentitySource,
    ) -> Self {
        Self {
            issuer: KeyIssuer::new(pool.clone()),
            gate: RequestGate::new(pool, limits),
            dispatcher: InferenceDispatcher::new(routine),
            clock,
            identity,
        }
    }

    /// Build the production state: configured pool and limits, the HTTP
    /// inference routine, and the system clock.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let pool = config.build_pool()?;
        let limits = config.limits()?;
        let routine = HttpInferenceRoutine::new(config.upstream_url.clone(), config.upstream_timeout())
            .map_err(|e| GatewayError::Config(format!("inference client: {}", e)))?;

        Ok(Self::new(
            pool,
            limits,
            Arc::new(routine),
            Arc::new(SystemClock),
            IdentitySource::from_config(config.trust_forwarded_for),
        ))
    }
}
