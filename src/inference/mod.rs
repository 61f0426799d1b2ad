//! Hand-off to the external inference routine.
//!
//! The routine is opaque: it takes a system prompt, a user message and a
//! token budget, and returns a JSON response or fails. [`validate`] turns a
//! raw request body into an [`InferenceRequest`]; [`InferenceDispatcher`]
//! runs the routine exactly once and folds every failure, panics included,
//! into [`GatewayError::UpstreamFailure`].

pub mod http;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Deserialize;

use crate::error::{GatewayError, GatewayResult};

pub use http::HttpInferenceRoutine;

/// A validated inference call. Transient; dropped once dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub system_prompt: String,
    pub message: String,
    pub token_budget: u32,
}

#[derive(Deserialize)]
struct WireRequest {
    system_prompt: String,
    message: String,
    tokens: serde_json::Number,
}

/// Validate a raw request body.
///
/// The body must be a JSON object with string `system_prompt` and `message`
/// fields and a non-negative integer `tokens`. Unknown fields are ignored.
pub fn validate(body: &[u8]) -> GatewayResult<InferenceRequest> {
    let wire: WireRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::MalformedInput(e.to_string()))?;

    let token_budget = wire
        .tokens
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            GatewayError::MalformedInput(format!(
                "tokens must be a non-negative integer, got {}",
                wire.tokens
            ))
        })?;

    Ok(InferenceRequest {
        system_prompt: wire.system_prompt,
        message: wire.message,
        token_budget,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum RoutineError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// The external model runner.
#[async_trait]
pub trait InferenceRoutine: Send + Sync {
    async fn run(
        &self,
        system_prompt: &str,
        message: &str,
        token_budget: u32,
    ) -> Result<serde_json::Value, RoutineError>;
}

#[derive(Clone)]
pub struct InferenceDispatcher {
    routine: Arc<dyn InferenceRoutine>,
}

impl InferenceDispatcher {
    pub fn new(routine: Arc<dyn InferenceRoutine>) -> Self {
        Self { routine }
    }

    /// Run the routine once. No retries, no timeout of its own.
    ///
    /// The routine is polled in place, so dropping this future cancels the
    /// upstream call. A panic inside the routine is caught and reported as
    /// an upstream failure.
    pub async fn dispatch(&self, req: InferenceRequest) -> GatewayResult<serde_json::Value> {
        let started = Instant::now();
        let token_budget = req.token_budget;

        let outcome = AssertUnwindSafe(self.routine.run(&req.system_prompt, &req.message, req.token_budget))
            .catch_unwind()
            .await;

        let elapsed_ms = started.elapsed().as_millis();
        match outcome {
            Ok(Ok(output)) => {
                log::info!(
                    "AUDIT action=dispatch outcome=ok tokens={} elapsed_ms={}",
                    token_budget,
                    elapsed_ms
                );
                Ok(output)
            }
            Ok(Err(e)) => {
                log::error!(
                    "AUDIT action=dispatch outcome=upstream_failure tokens={} elapsed_ms={} error={}",
                    token_budget,
                    elapsed_ms,
                    e
                );
                Err(GatewayError::UpstreamFailure(e.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!(
                    "AUDIT action=dispatch outcome=routine_panicked tokens={} elapsed_ms={} error={}",
                    token_budget,
                    elapsed_ms,
                    message
                );
                Err(GatewayError::UpstreamFailure(format!("routine panicked: {}", message)))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceRoutine for Echo {
        async fn run(
            &self,
            system_prompt: &str,
            message: &str,
            token_budget: u32,
        ) -> Result<serde_json::Value, RoutineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({
                "system": system_prompt,
                "echo": message,
                "tokens": token_budget,
            }))
        }
    }

    struct Failing;

    #[async_trait]
    impl InferenceRoutine for Failing {
        async fn run(&self, _: &str, _: &str, _: u32) -> Result<serde_json::Value, RoutineError> {
            Err(RoutineError::Other("model crashed at layer 12".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl InferenceRoutine for Panicking {
        async fn run(&self, _: &str, _: &str, _: u32) -> Result<serde_json::Value, RoutineError> {
            panic!("routine blew up");
        }
    }

    fn request() -> InferenceRequest {
        InferenceRequest {
            system_prompt: "be brief".into(),
            message: "hi".into(),
            token_budget: 16,
        }
    }

    #[test]
    fn validate_accepts_well_formed_body() {
        let body = br#"{"system_prompt":"sys","message":"hello","tokens":128,"extra":true}"#;
        let req = validate(body).unwrap();
        assert_eq!(
            req,
            InferenceRequest {
                system_prompt: "sys".into(),
                message: "hello".into(),
                token_budget: 128,
            }
        );
    }

    #[test]
    fn validate_accepts_zero_tokens() {
        let req = validate(br#"{"system_prompt":"","message":"","tokens":0}"#).unwrap();
        assert_eq!(req.token_budget, 0);
    }

    #[test]
    fn validate_rejects_bad_tokens() {
        for body in [
            r#"{"system_prompt":"s","message":"m","tokens":-1}"#,
            r#"{"system_prompt":"s","message":"m","tokens":1.5}"#,
            r#"{"system_prompt":"s","message":"m","tokens":"10"}"#,
            r#"{"system_prompt":"s","message":"m","tokens":null}"#,
            r#"{"system_prompt":"s","message":"m","tokens":99999999999}"#,
        ] {
            assert!(
                matches!(validate(body.as_bytes()), Err(GatewayError::MalformedInput(_))),
                "body should be rejected: {}",
                body
            );
        }
    }

    #[test]
    fn validate_rejects_wrong_shapes() {
        for body in [
            "",
            "not json",
            "[]",
            r#"{"message":"m","tokens":1}"#,
            r#"{"system_prompt":5,"message":"m","tokens":1}"#,
            r#"{"system_prompt":"s","message":["m"],"tokens":1}"#,
        ] {
            assert!(
                matches!(validate(body.as_bytes()), Err(GatewayError::MalformedInput(_))),
                "body should be rejected: {}",
                body
            );
        }
    }

    #[tokio::test]
    async fn dispatch_calls_routine_once() {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = InferenceDispatcher::new(echo.clone());
        let out = dispatcher.dispatch(request()).await.unwrap();
        assert_eq!(out["echo"], "hi");
        assert_eq!(out["tokens"], 16);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn routine_error_maps_to_upstream_failure() {
        let dispatcher = InferenceDispatcher::new(Arc::new(Failing));
        let err = dispatcher.dispatch(request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamFailure(_)));
        assert_eq!(err.client_message(), "Internal server error.");
    }

    #[tokio::test]
    async fn routine_panic_maps_to_upstream_failure() {
        let dispatcher = InferenceDispatcher::new(Arc::new(Panicking));
        let err = dispatcher.dispatch(request()).await.unwrap_err();
        match err {
            GatewayError::UpstreamFailure(detail) => assert!(detail.contains("routine blew up")),
            other => panic!("expected UpstreamFailure, got {:?}", other),
        }
    }

    struct Slow {
        finished: AtomicUsize,
    }

    #[async_trait]
    impl InferenceRoutine for Slow {
        async fn run(&self, _: &str, _: &str, _: u32) -> Result<serde_json::Value, RoutineError> {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({}))
        }
    }

    #[tokio::test]
    async fn dropping_dispatch_cancels_the_routine() {
        let slow = Arc::new(Slow {
            finished: AtomicUsize::new(0),
        });
        let dispatcher = InferenceDispatcher::new(slow.clone());

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), dispatcher.dispatch(request())).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(slow.finished.load(Ordering::SeqCst), 0);
    }
}
