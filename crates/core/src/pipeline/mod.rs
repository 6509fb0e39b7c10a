//! The content pipeline.
//!
//! Every persona of a submitted batch becomes a [`Task`] that moves through
//! the stages `PENDING -> TAG_KEYWORDS -> MATERIAL -> REFERENCES -> DRAFT ->
//! IMAGE -> SCORE -> DONE`, or ends in `FAILED`. The [`Orchestrator`] runs
//! tasks concurrently under a shared [`ConcurrencyLimiter`], and once all
//! tasks of a batch are terminal it ranks them and hands one envelope per
//! task to the callback dispatcher.
//!
//! [`ConcurrencyLimiter`]: crate::limiter::ConcurrencyLimiter

mod batch;
mod config;
pub mod machine;
mod orchestrator;
mod runner;
mod types;

pub use batch::{BatchHandle, BatchReport, BatchStatus, TaskOutcome, TaskReport, TaskSnapshot};
pub use config::PipelineConfig;
pub use machine::TransitionError;
pub use orchestrator::{Orchestrator, OrchestratorStatus};
pub use types::*;
