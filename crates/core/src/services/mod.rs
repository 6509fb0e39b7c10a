//! Clients for the external services the pipeline depends on.
//!
//! - Material library + keyword service ([`MaterialClient`])
//! - Dify-style generation, scoring and analysis workflows ([`DifyClient`])
//!
//! Both sit on top of [`HttpGateway`](crate::gateway::HttpGateway) and are
//! consumed through the [`MaterialService`] and [`WorkflowService`] traits so
//! tests can swap in mocks.

mod dify;
mod material;
pub mod parse;
mod traits;
mod types;

pub use dify::DifyClient;
pub use material::MaterialClient;
pub use traits::{MaterialService, WorkflowService};
pub use types::*;
