//! Batches: a set of tasks submitted together and reported on together.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::runner::{RunOutcome, TaskRunner};
use super::types::{PipelineError, Stage, Task, TaskUpdate};
use crate::audit::{AuditEvent, AuditHandle};
use crate::callback::{CallbackDispatcher, CallbackEnvelope, DeliveryOutcome};
use crate::stages::rank_by_score;

/// Buffered stage updates per batch. Slow subscribers lag and skip.
const UPDATE_BUFFER: usize = 256;

/// Latest known position of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub index: usize,
    pub persona_id: String,
    pub stage: Stage,
    pub cancelled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time view of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub batch_id: String,
    pub submitted_at: DateTime<Utc>,
    pub finished: bool,
    pub tasks: Vec<TaskSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Done,
    Failed,
    Cancelled,
}

/// Final word on one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub index: usize,
    pub persona_id: String,
    pub outcome: TaskOutcome,
    pub stage: Stage,
    /// Absent for cancelled tasks.
    pub envelope: Option<CallbackEnvelope>,
    pub delivery: Option<DeliveryOutcome>,
    #[serde(skip)]
    pub task: Task,
}

/// Produced once every task of the batch settled and envelopes went out.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// In submission order.
    pub tasks: Vec<TaskReport>,
}

impl BatchReport {
    pub fn count(&self, outcome: TaskOutcome) -> usize {
        self.tasks.iter().filter(|t| t.outcome == outcome).count()
    }

    pub fn task(&self, index: usize) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.index == index)
    }
}

struct BatchShared {
    id: String,
    task_ids: Vec<String>,
    submitted_at: DateTime<Utc>,
    cancels: HashMap<String, watch::Sender<bool>>,
    board: Arc<RwLock<HashMap<String, TaskSnapshot>>>,
    updates: broadcast::Sender<TaskUpdate>,
    report: watch::Sender<Option<BatchReport>>,
}

/// Handle to a submitted batch. Clones share the batch.
#[derive(Clone)]
pub struct BatchHandle {
    shared: Arc<BatchShared>,
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("id", &self.shared.id)
            .field("tasks", &self.shared.task_ids.len())
            .finish()
    }
}

impl BatchHandle {
    /// Create the handle plus, per task, the receiver its runner watches
    /// for cancellation.
    pub(crate) fn create(
        batch_id: String,
        tasks: &[Task],
    ) -> (Self, Vec<watch::Receiver<bool>>) {
        let mut cancels = HashMap::new();
        let mut receivers = Vec::with_capacity(tasks.len());
        let mut board = HashMap::new();
        for task in tasks {
            let (tx, rx) = watch::channel(false);
            cancels.insert(task.id.clone(), tx);
            receivers.push(rx);
            board.insert(
                task.id.clone(),
                TaskSnapshot {
                    task_id: task.id.clone(),
                    index: task.index,
                    persona_id: task.persona.persona_id.clone(),
                    stage: task.stage,
                    cancelled: false,
                    updated_at: task.updated_at,
                },
            );
        }
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let (report, _) = watch::channel(None);

        let handle = Self {
            shared: Arc::new(BatchShared {
                id: batch_id,
                task_ids: tasks.iter().map(|t| t.id.clone()).collect(),
                submitted_at: Utc::now(),
                cancels,
                board: Arc::new(RwLock::new(board)),
                updates,
                report,
            }),
        };
        (handle, receivers)
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Task ids in submission order.
    pub fn task_ids(&self) -> &[String] {
        &self.shared.task_ids
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.shared.submitted_at
    }

    /// Stream of stage transitions from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskUpdate> {
        self.shared.updates.subscribe()
    }

    pub(crate) fn updates_sender(&self) -> broadcast::Sender<TaskUpdate> {
        self.shared.updates.clone()
    }

    pub(crate) fn board(&self) -> Arc<RwLock<HashMap<String, TaskSnapshot>>> {
        Arc::clone(&self.shared.board)
    }

    /// Ask one task to stop. Returns false if the task is unknown or its
    /// runner already finished.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.shared.cancels.get(task_id) {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    /// Ask every unfinished task to stop. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        self.shared
            .cancels
            .values()
            .filter(|tx| tx.send(true).is_ok())
            .count()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.report.borrow().is_some()
    }

    /// The report, once the batch finished.
    pub fn report(&self) -> Option<BatchReport> {
        self.shared.report.borrow().clone()
    }

    /// Wait for the batch to finish.
    pub async fn wait(&self) -> Result<BatchReport, PipelineError> {
        let mut rx = self.shared.report.subscribe();
        let report = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PipelineError::BatchAborted(self.shared.id.clone()))?;
        report
            .clone()
            .ok_or_else(|| PipelineError::BatchAborted(self.shared.id.clone()))
    }

    pub fn status(&self) -> BatchStatus {
        let mut tasks: Vec<TaskSnapshot> = self
            .shared
            .board
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.index);
        BatchStatus {
            batch_id: self.shared.id.clone(),
            submitted_at: self.shared.submitted_at,
            finished: self.is_finished(),
            tasks,
        }
    }

    fn complete(&self, report: BatchReport) {
        self.shared.report.send_replace(Some(report));
    }
}

/// Run every task of the batch, then rank, dispatch and report.
///
/// Envelopes go out only after all tasks settled so succeeded ones can
/// carry their rank within the batch.
pub(crate) async fn coordinate(
    handle: BatchHandle,
    runner: TaskRunner,
    tasks: Vec<(Task, watch::Receiver<bool>)>,
    dispatcher: Arc<CallbackDispatcher>,
    audit: Option<AuditHandle>,
) {
    let timer = Instant::now();
    let mut set = JoinSet::new();
    for (task, cancel) in tasks {
        let runner = runner.clone();
        set.spawn(async move { runner.run(task, cancel).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!("Task runner in batch {} aborted: {}", handle.id(), e),
        }
    }
    outcomes.sort_by_key(|o| o.task().index);

    let scored: Vec<(usize, Option<f64>)> = outcomes
        .iter()
        .filter_map(|o| match o {
            RunOutcome::Finished(task) if task.stage == Stage::Done => Some((
                task.index,
                task.outputs.score.as_ref().and_then(|s| s.score),
            )),
            _ => None,
        })
        .collect();
    let ranks = rank_by_score(&scored);

    let settled: Vec<(Task, TaskOutcome, Option<CallbackEnvelope>)> = outcomes
        .into_iter()
        .map(|outcome| match outcome {
            RunOutcome::Finished(task) => {
                let kind = if task.stage == Stage::Done {
                    TaskOutcome::Done
                } else {
                    TaskOutcome::Failed
                };
                let envelope =
                    CallbackEnvelope::from_task(&task, ranks.get(&task.index).copied());
                if envelope.is_none() {
                    warn!("Task {} finished without a complete result", task.id);
                }
                (task, kind, envelope)
            }
            RunOutcome::Cancelled(task) => (task, TaskOutcome::Cancelled, None),
        })
        .collect();

    let deliveries = join_all(settled.iter().map(|(_, _, envelope)| {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            match envelope {
                Some(envelope) => Some(dispatcher.deliver(envelope).await),
                None => None,
            }
        }
    }))
    .await;

    let mut reports = Vec::with_capacity(settled.len());
    for ((task, outcome, envelope), delivery) in settled.into_iter().zip(deliveries) {
        if let Some(ref audit) = audit {
            audit
                .emit(AuditEvent::TaskArchived {
                    task_id: task.id.clone(),
                    batch_id: task.batch_id.clone(),
                    snapshot: serde_json::to_value(&task).unwrap_or_default(),
                })
                .await;
        }
        reports.push(TaskReport {
            task_id: task.id.clone(),
            index: task.index,
            persona_id: task.persona.persona_id.clone(),
            outcome,
            stage: task.stage,
            envelope,
            delivery,
            task,
        });
    }

    let report = BatchReport {
        batch_id: handle.id().to_string(),
        submitted_at: handle.submitted_at(),
        finished_at: Utc::now(),
        tasks: reports,
    };
    let (succeeded, failed, cancelled) = (
        report.count(TaskOutcome::Done),
        report.count(TaskOutcome::Failed),
        report.count(TaskOutcome::Cancelled),
    );
    info!(
        "Batch {} finished: {} succeeded, {} failed, {} cancelled in {:?}",
        handle.id(),
        succeeded,
        failed,
        cancelled,
        timer.elapsed()
    );
    if let Some(ref audit) = audit {
        audit
            .emit(AuditEvent::BatchCompleted {
                batch_id: handle.id().to_string(),
                succeeded,
                failed,
                cancelled,
                duration_ms: timer.elapsed().as_millis() as u64,
            })
            .await;
    }
    handle.complete(report);
}
