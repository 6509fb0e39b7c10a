//! HTTP surface of the content pipeline: router, handlers, shared state and
//! Prometheus exposition.

pub mod api;
pub mod metrics;
pub mod state;
