//! HTTP adapter for the remote decision service.
//!
//! The caller treats any transport problem, non-2xx status, deadline
//! overrun, or malformed body as one thing: a failed decision call.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{
    ControlMode, DecisionRequest, DecisionResponse, IntersectionState, SignalDecision,
};

pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

pub struct DecisionClient {
    http: Client,
    base_url: String,
}

impl DecisionClient {
    /// `timeout` bounds every call; a decision that has not settled by then
    /// is treated as failed rather than stalling the tick loop.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("building decision service client")?;
        Ok(DecisionClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe `GET /health`. Any 2xx means the service is reachable.
    pub async fn check_health(&self) -> bool {
        match self.http.get(format!("{}/health", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                log::debug!("Health probe failed: {err}");
                false
            }
        }
    }

    /// Post the intersection state and return the service's decision.
    pub async fn request_decision(
        &self,
        state: IntersectionState,
        mode: ControlMode,
    ) -> Result<SignalDecision> {
        let call_id = Uuid::new_v4();
        let request = DecisionRequest {
            intersection_state: state,
            control_mode: mode,
        };

        let response = self
            .http
            .post(format!("{}/api/decision", self.base_url))
            .json(&request)
            .send()
            .await
            .with_context(|| format!("decision call {call_id}"))?
            .error_for_status()
            .with_context(|| format!("decision call {call_id} rejected"))?;

        let payload: DecisionResponse = response
            .json()
            .await
            .with_context(|| format!("decision call {call_id} returned a malformed body"))?;

        if payload.fallback_mode {
            log::warn!(
                "Decision service answered call {call_id} in fallback mode: {}",
                payload.error_message.as_deref().unwrap_or("no detail")
            );
        }
        Ok(payload.decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_normalized() {
        let client =
            DecisionClient::new("http://localhost:8000/", Duration::from_millis(100)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[tokio::test]
    async fn unreachable_service_fails_the_health_probe() {
        // Port 9 (discard) is closed on any sane test host.
        let client =
            DecisionClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(!client.check_health().await);
    }
}
