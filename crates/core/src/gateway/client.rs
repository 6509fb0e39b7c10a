//! reqwest-backed gateway implementation.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::{CallError, CallPolicy, CallReport, CallResponse, Endpoint, RetryState};
use crate::metrics;

/// Maximum number of body characters kept in an `HttpStatus` error.
const ERROR_BODY_LIMIT: usize = 200;

/// Shared HTTP client wrapper. Cheap to clone (the connection pool is shared).
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
}

impl HttpGateway {
    pub fn new() -> Result<Self, CallError> {
        let client = Client::builder()
            .user_agent(concat!("contentflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CallError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Build a gateway around an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Perform a call, retrying transient failures per `policy`.
    pub async fn call(
        &self,
        endpoint: &Endpoint,
        payload: Option<&Value>,
        policy: &CallPolicy,
    ) -> Result<CallResponse, CallError> {
        self.execute(endpoint, payload, policy).await.into_result()
    }

    /// Like [`call`](Self::call) but also reports how many attempts were made.
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        payload: Option<&Value>,
        policy: &CallPolicy,
    ) -> CallReport {
        let mut retry = RetryState::new(policy);

        loop {
            match self.attempt(endpoint, payload, policy.timeout()).await {
                Ok(response) => {
                    metrics::GATEWAY_ATTEMPTS.with_label_values(&["ok"]).inc();
                    return CallReport {
                        result: Ok(response),
                        attempts: retry.attempt(),
                    };
                }
                Err(error) => {
                    metrics::GATEWAY_ATTEMPTS
                        .with_label_values(&[error.kind()])
                        .inc();
                    let attempt = retry.attempt();
                    match retry.on_failure(&error, policy) {
                        Some(delay) => {
                            warn!(
                                "{} {} failed on attempt {} ({}), retrying in {:?}",
                                endpoint.method, endpoint.url, attempt, error, delay
                            );
                            metrics::GATEWAY_RETRIES.inc();
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            debug!(
                                "{} {} giving up after {} attempt(s): {}",
                                endpoint.method, endpoint.url, attempt, error
                            );
                            return CallReport {
                                result: Err(error),
                                attempts: attempt,
                            };
                        }
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        endpoint: &Endpoint,
        payload: Option<&Value>,
        timeout: Duration,
    ) -> Result<CallResponse, CallError> {
        let mut request = self
            .client
            .request(endpoint.method.clone(), &endpoint.url)
            .timeout(timeout)
            .header("accept", "application/json");

        if let Some(ref token) = endpoint.bearer {
            request = request.bearer_auth(token);
        }
        for (name, value) in &endpoint.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = payload {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| classify(e, timeout))?;

        if !status.is_success() {
            return Err(CallError::HttpStatus {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let body = if endpoint.expect_json {
            serde_json::from_str(&text).map_err(|e| {
                CallError::MalformedResponse(format!("invalid JSON body: {}", e))
            })?
        } else {
            serde_json::from_str(&text).unwrap_or(Value::Null)
        };

        Ok(CallResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> CallError {
    if error.is_timeout() {
        CallError::Timeout(timeout)
    } else if error.is_decode() {
        CallError::MalformedResponse(error.to_string())
    } else {
        CallError::Connection(error.to_string())
    }
}
