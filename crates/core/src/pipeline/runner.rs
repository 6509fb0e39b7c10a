//! Drives a single task through its stages.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use super::batch::TaskSnapshot;
use super::machine;
use super::types::{Stage, StageError, Task, TaskUpdate};
use crate::audit::{AuditEvent, AuditHandle};
use crate::limiter::ConcurrencyLimiter;
use crate::metrics;
use crate::stages::{self, StageContext};

/// How a runner ended.
#[derive(Debug)]
pub(crate) enum RunOutcome {
    /// Reached `Done` or `Failed`.
    Finished(Task),
    /// Stopped by a cancel request or shutdown before reaching a terminal stage.
    Cancelled(Task),
}

impl RunOutcome {
    pub(crate) fn task(&self) -> &Task {
        match self {
            RunOutcome::Finished(task) | RunOutcome::Cancelled(task) => task,
        }
    }
}

/// Publishes stage transitions of one batch's tasks.
#[derive(Clone)]
pub(crate) struct TaskObserver {
    updates: broadcast::Sender<TaskUpdate>,
    board: Arc<RwLock<HashMap<String, TaskSnapshot>>>,
}

impl TaskObserver {
    pub(crate) fn new(
        updates: broadcast::Sender<TaskUpdate>,
        board: Arc<RwLock<HashMap<String, TaskSnapshot>>>,
    ) -> Self {
        Self { updates, board }
    }

    fn record(&self, update: &TaskUpdate) {
        {
            let mut board = self.board.write().unwrap_or_else(|e| e.into_inner());
            if let Some(snapshot) = board.get_mut(&update.task_id) {
                snapshot.stage = update.to;
                snapshot.updated_at = update.at;
            }
        }
        // No subscribers is fine.
        let _ = self.updates.send(update.clone());
    }

    fn mark_cancelled(&self, task_id: &str) {
        let mut board = self.board.write().unwrap_or_else(|e| e.into_inner());
        if let Some(snapshot) = board.get_mut(task_id) {
            snapshot.cancelled = true;
            snapshot.updated_at = Utc::now();
        }
    }
}

#[derive(Clone)]
pub(crate) struct TaskRunner {
    ctx: Arc<StageContext>,
    limiter: ConcurrencyLimiter,
    audit: Option<AuditHandle>,
    observer: TaskObserver,
}

impl TaskRunner {
    pub(crate) fn new(
        ctx: Arc<StageContext>,
        limiter: ConcurrencyLimiter,
        audit: Option<AuditHandle>,
        observer: TaskObserver,
    ) -> Self {
        Self {
            ctx,
            limiter,
            audit,
            observer,
        }
    }

    /// Run the task until it is terminal or `cancel` flips to true.
    ///
    /// Cancellation drops the in-flight stage and the concurrency permit.
    /// A task that already reached `Done` or `Failed` stays finished even if
    /// the cancel lands afterwards; its last transition is audited outside
    /// the cancellable section.
    pub(crate) async fn run(
        &self,
        mut task: Task,
        mut cancel: watch::Receiver<bool>,
    ) -> RunOutcome {
        let mut last = None;
        let finished = {
            let drive = self.drive(&mut task, &mut last);
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => false,
                finished = drive => finished,
            }
        };

        if finished || task.stage.is_terminal() {
            if let Some((from, reason)) = last {
                self.audit_transition(&task, from, reason).await;
            }
            let outcome = if task.stage == Stage::Done { "done" } else { "failed" };
            metrics::TASKS_TOTAL.with_label_values(&[outcome]).inc();
            return RunOutcome::Finished(task);
        }

        info!("Task {} cancelled at {}", task.id, task.stage);
        metrics::TASKS_TOTAL.with_label_values(&["cancelled"]).inc();
        self.observer.mark_cancelled(&task.id);
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::TaskCancelled {
                    task_id: task.id.clone(),
                    batch_id: task.batch_id.clone(),
                    stage: task.stage.to_string(),
                })
                .await;
        }
        RunOutcome::Cancelled(task)
    }

    /// Returns false when the limiter shut down before a permit was granted.
    ///
    /// The transition into a terminal stage is published to the board right
    /// away but left in `last` for `run` to audit.
    async fn drive(&self, task: &mut Task, last: &mut Option<(Stage, Option<String>)>) -> bool {
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!("Task {} not started: {}", task.id, e);
                return false;
            }
        };

        let from = task.stage;
        match machine::begin(task) {
            Ok(stage) if stage != from => self.transitioned(task, from, None).await,
            Ok(stage) => debug!("Task {} resuming at {}", task.id, stage),
            Err(e) => {
                debug!("{}", e);
                return true;
            }
        }

        while !task.stage.is_terminal() {
            let stage = task.stage;
            *task.attempts.entry(stage).or_insert(0) += 1;
            let started_at = Utc::now();
            let timer = Instant::now();

            let result = stages::execute(&self.ctx, task).await;

            let label = if result.is_ok() { "ok" } else { "error" };
            metrics::STAGE_DURATION
                .with_label_values(&[stage.as_str(), label])
                .observe(timer.elapsed().as_secs_f64());

            let transition = match result {
                Ok(output) => machine::advance(task, output, started_at).map(|_| None),
                Err(err) => {
                    warn!("Task {} failed at {}: {}", task.id, stage, err);
                    machine::fail(task, &err, started_at).map(|_| Some(err.to_string()))
                }
            };

            let reason = match transition {
                Ok(reason) => reason,
                Err(e) => {
                    error!("Task {}: {}", task.id, e);
                    let internal = StageError::Internal(e.to_string());
                    if machine::fail(task, &internal, started_at).is_err() {
                        break;
                    }
                    Some(internal.to_string())
                }
            };

            if task.stage.is_terminal() {
                self.publish(task, stage);
                *last = Some((stage, reason));
            } else {
                self.transitioned(task, stage, reason).await;
            }
        }
        true
    }

    fn publish(&self, task: &Task, from: Stage) {
        debug!("Task {}: {} -> {}", task.id, from, task.stage);
        self.observer.record(&TaskUpdate {
            task_id: task.id.clone(),
            batch_id: task.batch_id.clone(),
            index: task.index,
            from,
            to: task.stage,
            at: task.updated_at,
        });
    }

    async fn transitioned(&self, task: &Task, from: Stage, reason: Option<String>) {
        self.publish(task, from);
        self.audit_transition(task, from, reason).await;
    }

    async fn audit_transition(&self, task: &Task, from: Stage, reason: Option<String>) {
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::TaskStateChanged {
                    task_id: task.id.clone(),
                    batch_id: task.batch_id.clone(),
                    from_state: from.to_string(),
                    to_state: task.stage.to_string(),
                    reason,
                })
                .await;
        }
    }
}

/// Resolves once the flag is true. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::notifier::KeywordNotifier;
    use crate::pipeline::{ErrorKind, TaskStatus};
    use crate::testing::{fixtures, MockMaterialService, MockWorkflowService};

    struct Harness {
        material: MockMaterialService,
        workflow: MockWorkflowService,
        limiter: ConcurrencyLimiter,
        runner: TaskRunner,
        updates: broadcast::Receiver<TaskUpdate>,
    }

    fn harness() -> Harness {
        let material = MockMaterialService::new();
        let workflow = MockWorkflowService::new();
        let ctx = StageContext::new(
            Arc::new(material.clone()),
            Arc::new(workflow.clone()),
            KeywordNotifier::new(),
            fixtures::fast_pipeline_config(),
        );
        let limiter = ConcurrencyLimiter::new(2);
        let (tx, updates) = broadcast::channel(64);
        let observer = TaskObserver::new(tx, Arc::new(RwLock::new(HashMap::new())));
        let runner = TaskRunner::new(Arc::new(ctx), limiter.clone(), None, observer);
        Harness {
            material,
            workflow,
            limiter,
            runner,
            updates,
        }
    }

    async fn seed_happy_path(material: &MockMaterialService) {
        material.set_keywords("travel", vec!["beach".into()]).await;
        material
            .set_materials("beach", fixtures::materials("beach", 3))
            .await;
    }

    fn new_task() -> Task {
        Task::new("batch", 0, fixtures::persona("p-1", &["travel"]))
    }

    #[tokio::test]
    async fn test_runs_every_stage_in_order() {
        let mut h = harness();
        seed_happy_path(&h.material).await;
        let (_tx, rx) = watch::channel(false);

        let outcome = h.runner.run(new_task(), rx).await;
        let RunOutcome::Finished(task) = outcome else {
            panic!("task should finish");
        };
        assert_eq!(task.status(), TaskStatus::Succeeded);

        let stages: Vec<Stage> = task.history.iter().map(|r| r.stage).collect();
        assert_eq!(stages, Stage::EXECUTED.to_vec());
        for stage in Stage::EXECUTED {
            assert_eq!(task.attempts_for(stage), 1);
        }

        let mut seen = Vec::new();
        while let Ok(update) = h.updates.try_recv() {
            assert!(update.to > update.from);
            seen.push(update.to);
        }
        assert_eq!(seen.first(), Some(&Stage::TagKeywords));
        assert_eq!(seen.last(), Some(&Stage::Done));
        assert_eq!(h.limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline() {
        let h = harness();
        h.material.set_keywords("travel", vec!["beach".into()]).await;
        h.material
            .set_materials("beach", fixtures::materials("beach", 1))
            .await;
        let (_tx, rx) = watch::channel(false);

        let RunOutcome::Finished(task) = h.runner.run(new_task(), rx).await else {
            panic!("task should finish");
        };
        assert_eq!(task.stage, Stage::Failed);
        let failure = task.failure.unwrap();
        assert_eq!(failure.kind, ErrorKind::DataInsufficiency);
        assert_eq!(failure.stage, Stage::References);
        assert_eq!(h.workflow.log().count("write_draft").await, 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_permit() {
        let h = harness();
        seed_happy_path(&h.material).await;
        h.workflow.set_delay(Duration::from_secs(30)).await;
        let (tx, rx) = watch::channel(false);

        let runner = h.runner.clone();
        let running = tokio::spawn(async move { runner.run(new_task(), rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.limiter.in_flight(), 1);

        tx.send(true).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("cancel should be prompt")
            .unwrap();
        let RunOutcome::Cancelled(task) = outcome else {
            panic!("task should be cancelled");
        };
        assert_eq!(task.stage, Stage::Draft);
        assert_eq!(h.limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start_never_takes_permit() {
        let h = harness();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let outcome = h.runner.run(new_task(), rx).await;
        assert!(matches!(outcome, RunOutcome::Cancelled(_)));
        assert_eq!(outcome.task().stage, Stage::Pending);
        assert_eq!(h.limiter.peak(), 0);
    }

    #[tokio::test]
    async fn test_resumes_at_recorded_stage() {
        let h = harness();
        seed_happy_path(&h.material).await;
        let (_tx, rx) = watch::channel(false);

        // Run once to get a complete set of earlier outputs.
        let RunOutcome::Finished(done) = h.runner.run(new_task(), rx.clone()).await else {
            panic!("task should finish");
        };
        let mut snapshot = done.clone();
        snapshot.stage = Stage::Image;
        snapshot.outputs.images = None;
        snapshot.outputs.score = None;
        snapshot.history.truncate(4);
        snapshot.attempts.clear();

        let searches_before = h.material.log().count("search_materials").await;
        let RunOutcome::Finished(resumed) = h.runner.run(snapshot, rx).await else {
            panic!("task should finish");
        };
        assert_eq!(resumed.stage, Stage::Done);
        assert_eq!(resumed.attempts_for(Stage::Material), 0);
        assert_eq!(resumed.attempts_for(Stage::Image), 1);
        assert_eq!(
            h.material.log().count("search_materials").await,
            searches_before
        );
    }
}
