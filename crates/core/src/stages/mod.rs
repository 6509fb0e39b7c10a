//! Stage executors.
//!
//! Each executor reads the outputs of earlier stages from the task and
//! returns its own output or a typed failure. Executors never touch other
//! tasks and never mutate the task; the runner records the result.

mod draft;
mod image;
mod keywords;
mod material;
mod references;
mod score;

use std::sync::Arc;

use crate::notifier::KeywordNotifier;
use crate::pipeline::{PipelineConfig, Stage, StageError, StageOutput, StageResult, Task};
use crate::services::{MaterialService, WorkflowService};

pub use references::pick_pair;
pub use score::rank_by_score;

/// Everything a stage executor may use.
#[derive(Clone)]
pub struct StageContext {
    pub material: Arc<dyn MaterialService>,
    pub workflow: Arc<dyn WorkflowService>,
    pub notifier: KeywordNotifier,
    pub config: PipelineConfig,
}

impl StageContext {
    pub fn new(
        material: Arc<dyn MaterialService>,
        workflow: Arc<dyn WorkflowService>,
        notifier: KeywordNotifier,
        config: PipelineConfig,
    ) -> Self {
        Self {
            material,
            workflow,
            notifier,
            config,
        }
    }
}

/// Run the executor for the task's current stage.
pub async fn execute(ctx: &StageContext, task: &Task) -> StageResult {
    match task.stage {
        Stage::TagKeywords => keywords::resolve(ctx, task).await.map(StageOutput::Keywords),
        Stage::Material => material::gather(ctx, task).await.map(StageOutput::Materials),
        Stage::References => references::select(task).map(StageOutput::References),
        Stage::Draft => draft::write(ctx, task).await.map(StageOutput::Draft),
        Stage::Image => image::generate(ctx, task).await.map(StageOutput::Images),
        Stage::Score => score::evaluate(ctx, task).await.map(StageOutput::Score),
        other => Err(StageError::Internal(format!(
            "stage {} has no executor",
            other
        ))),
    }
}
