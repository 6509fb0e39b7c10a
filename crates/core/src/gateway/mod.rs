//! Outbound HTTP gateway.
//!
//! Every call to an external service goes through [`HttpGateway`], which
//! applies a per-attempt timeout, classifies failures and retries the
//! transient ones with bounded backoff.

mod client;
mod retry;
mod types;

pub use client::HttpGateway;
pub use retry::RetryState;
pub use types::{Backoff, CallError, CallPolicy, CallReport, CallResponse, Endpoint};
