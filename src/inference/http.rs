use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{InferenceRoutine, RoutineError};

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    system_prompt: &'a str,
    message: &'a str,
    tokens: u32,
}

/// Runs inference by POSTing the request as JSON to a model server.
///
/// Any 2xx JSON body is passed through to the caller untouched. Other
/// statuses and transport errors become [`RoutineError`]s.
#[derive(Clone)]
pub struct HttpInferenceRoutine {
    client: reqwest::Client,
    url: String,
}

impl HttpInferenceRoutine {
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, RoutineError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build()?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl InferenceRoutine for HttpInferenceRoutine {
    async fn run(
        &self,
        system_prompt: &str,
        message: &str,
        token_budget: u32,
    ) -> Result<serde_json::Value, RoutineError> {
        let response = self
            .client
            .post(&self.url)
            .json(&UpstreamRequest {
                system_prompt,
                message,
                tokens: token_budget,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RoutineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<serde_json::Value>().await?)
    }
}
