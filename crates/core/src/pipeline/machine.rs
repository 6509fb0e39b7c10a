//! Stage transitions.
//!
//! Every state change of a [`Task`] goes through these functions, which
//! keep the stage sequence monotonic and terminal stages final.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{FailureSummary, Stage, StageError, StageOutput, StageRecord, Task};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("task {task_id} is already terminal ({stage})")]
    Terminal { task_id: String, stage: Stage },

    #[error("task {task_id} is at {actual}, cannot record {expected} output")]
    OutOfOrder {
        task_id: String,
        expected: Stage,
        actual: Stage,
    },
}

/// Move a fresh task into the first stage.
///
/// Tasks restored from a snapshot are already past `Pending`; they keep
/// their stage. Returns the stage to execute next.
pub fn begin(task: &mut Task) -> Result<Stage, TransitionError> {
    if task.stage.is_terminal() {
        return Err(TransitionError::Terminal {
            task_id: task.id.clone(),
            stage: task.stage,
        });
    }
    if task.stage == Stage::Pending {
        task.stage = Stage::TagKeywords;
        task.updated_at = Utc::now();
    }
    Ok(task.stage)
}

/// Record a successful stage and move to the next one.
pub fn advance(
    task: &mut Task,
    output: StageOutput,
    started_at: DateTime<Utc>,
) -> Result<Stage, TransitionError> {
    let completed = output.stage();
    if task.stage.is_terminal() {
        return Err(TransitionError::Terminal {
            task_id: task.id.clone(),
            stage: task.stage,
        });
    }
    if task.stage != completed {
        return Err(TransitionError::OutOfOrder {
            task_id: task.id.clone(),
            expected: completed,
            actual: task.stage,
        });
    }

    let now = Utc::now();
    task.outputs.record(output);
    task.history.push(StageRecord {
        stage: completed,
        started_at,
        finished_at: now,
        succeeded: true,
    });
    // Executed stages always have a successor.
    task.stage = completed.next().unwrap_or(Stage::Done);
    task.updated_at = now;
    Ok(task.stage)
}

/// Fail the task at its current stage.
pub fn fail(
    task: &mut Task,
    error: &StageError,
    started_at: DateTime<Utc>,
) -> Result<Stage, TransitionError> {
    if task.stage.is_terminal() {
        return Err(TransitionError::Terminal {
            task_id: task.id.clone(),
            stage: task.stage,
        });
    }

    let now = Utc::now();
    let failed_at = task.stage;
    task.history.push(StageRecord {
        stage: failed_at,
        started_at,
        finished_at: now,
        succeeded: false,
    });
    task.failure = Some(FailureSummary {
        kind: error.kind(),
        stage: failed_at,
        message: error.to_string(),
    });
    task.stage = Stage::Failed;
    task.updated_at = now;
    Ok(Stage::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{ErrorKind, ImageSet, KeywordSet, KeywordSource, Persona};

    fn keywords() -> StageOutput {
        StageOutput::Keywords(KeywordSet {
            tag: "travel".into(),
            keywords: vec!["beach".into()],
            chosen: "beach".into(),
            source: KeywordSource::Immediate,
        })
    }

    fn new_task() -> Task {
        Task::new("batch", 0, Persona::default())
    }

    #[test]
    fn test_begin_moves_pending_to_first_stage() {
        let mut task = new_task();
        assert_eq!(begin(&mut task).unwrap(), Stage::TagKeywords);
        assert_eq!(task.stage, Stage::TagKeywords);
    }

    #[test]
    fn test_begin_keeps_resumed_stage() {
        let mut task = new_task();
        task.stage = Stage::Draft;
        assert_eq!(begin(&mut task).unwrap(), Stage::Draft);
    }

    #[test]
    fn test_begin_rejects_terminal() {
        let mut task = new_task();
        task.stage = Stage::Done;
        assert!(matches!(
            begin(&mut task),
            Err(TransitionError::Terminal { .. })
        ));
    }

    #[test]
    fn test_advance_records_output_and_history() {
        let mut task = new_task();
        begin(&mut task).unwrap();
        let started = Utc::now();

        assert_eq!(
            advance(&mut task, keywords(), started).unwrap(),
            Stage::Material
        );
        assert_eq!(task.outputs.keywords.as_ref().unwrap().chosen, "beach");
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].stage, Stage::TagKeywords);
        assert!(task.history[0].succeeded);
    }

    #[test]
    fn test_advance_rejects_out_of_order_output() {
        let mut task = new_task();
        begin(&mut task).unwrap();

        let err = advance(
            &mut task,
            StageOutput::Images(ImageSet::default()),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::OutOfOrder {
                task_id: task.id.clone(),
                expected: Stage::Image,
                actual: Stage::TagKeywords,
            }
        );
        assert_eq!(task.stage, Stage::TagKeywords);
        assert!(task.history.is_empty());
    }

    #[test]
    fn test_fail_records_summary_and_is_final() {
        let mut task = new_task();
        begin(&mut task).unwrap();
        let err = StageError::DataInsufficiency("no keywords".into());

        assert_eq!(fail(&mut task, &err, Utc::now()).unwrap(), Stage::Failed);
        let failure = task.failure.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::DataInsufficiency);
        assert_eq!(failure.stage, Stage::TagKeywords);
        assert!(!task.history[0].succeeded);

        assert!(fail(&mut task, &err, Utc::now()).is_err());
        assert!(advance(&mut task, keywords(), Utc::now()).is_err());
        assert_eq!(task.stage, Stage::Failed);
    }
}
