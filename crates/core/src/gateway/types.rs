//! Types for the HTTP gateway.

use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Classified failure of an outbound call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    /// The attempt did not finish within the per-attempt timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Could not connect, or the connection dropped mid-request.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The service answered 2xx but the body was unusable.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl CallError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, connection failures and 5xx are transient. 4xx and malformed
    /// payloads are caller errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::HttpStatus { status, .. } => (500..600).contains(status),
            Self::MalformedResponse(_) => false,
        }
    }

    /// Short label used in metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connection(_) => "connection",
            Self::HttpStatus { .. } => "http_status",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// delay = base
    Fixed,
    /// delay = base * retry
    #[default]
    Linear,
    /// delay = base * 2^(retry - 1)
    Exponential,
}

/// Timeout and retry budget for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPolicy {
    /// Timeout for each individual attempt (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt. `0` means a single attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub backoff: Backoff,

    /// Base delay the backoff grows from (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff: Backoff::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl CallPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff, base_delay: Duration) -> Self {
        self.backoff = backoff;
        self.base_delay_ms = base_delay.as_millis() as u64;
        self
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay_ms`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.base_delay_ms;
        let delay = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Linear => base.saturating_mul(u64::from(retry.max(1))),
            Backoff::Exponential => {
                base.saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)))
            }
        };
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Target of an outbound call.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub method: Method,
    pub url: String,
    /// Sent as `Authorization: Bearer <token>`.
    pub bearer: Option<String>,
    pub headers: Vec<(String, String)>,
    /// When false, any 2xx body is accepted (callback consumers often
    /// answer with plain text).
    pub expect_json: bool,
}

impl Endpoint {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            bearer: None,
            headers: Vec::new(),
            expect_json: true,
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn accept_any_body(mut self) -> Self {
        self.expect_json = false;
        self
    }
}

/// Successful response.
#[derive(Debug, Clone)]
pub struct CallResponse {
    pub status: u16,
    /// Parsed JSON body, or `Value::Null` for an empty/non-JSON body on an
    /// endpoint that does not expect JSON.
    pub body: Value,
}

/// Result of a call together with the number of attempts it took.
#[derive(Debug, Clone)]
pub struct CallReport {
    pub result: Result<CallResponse, CallError>,
    pub attempts: u32,
}

impl CallReport {
    pub fn into_result(self) -> Result<CallResponse, CallError> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CallError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(CallError::Connection("refused".into()).is_retryable());
        assert!(CallError::HttpStatus {
            status: 500,
            body: String::new()
        }
        .is_retryable());
        assert!(CallError::HttpStatus {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!CallError::HttpStatus {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!CallError::HttpStatus {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!CallError::MalformedResponse("eof".into()).is_retryable());
    }

    #[test]
    fn test_default_policy() {
        let policy = CallPolicy::default();
        assert_eq!(policy.timeout(), Duration::from_secs(60));
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff, Backoff::Linear);
    }

    #[test]
    fn test_linear_delay_matches_half_second_steps() {
        let policy = CallPolicy::default();
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = CallPolicy {
            max_delay_ms: 3_000,
            ..CallPolicy::default()
        }
        .with_backoff(Backoff::Exponential, Duration::from_millis(1000));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(3000));
        assert_eq!(policy.delay_for_retry(10), Duration::from_millis(3000));
    }

    #[test]
    fn test_deserialize_partial_policy() {
        let policy: CallPolicy = toml::from_str("max_retries = 0\nbackoff = \"fixed\"").unwrap();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.backoff, Backoff::Fixed);
        assert_eq!(policy.timeout_ms, 60_000);
    }

    #[test]
    fn test_endpoint_builder() {
        let endpoint = Endpoint::post("http://x/run")
            .with_bearer("app-1")
            .with_header("Idempotency-Key", "t-1")
            .accept_any_body();
        assert_eq!(endpoint.method, Method::POST);
        assert_eq!(endpoint.bearer.as_deref(), Some("app-1"));
        assert_eq!(endpoint.headers.len(), 1);
        assert!(!endpoint.expect_json);
    }
}
