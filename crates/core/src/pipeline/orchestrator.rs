//! Entry point for submitting personas to the pipeline.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::batch::{coordinate, BatchHandle, BatchStatus};
use super::runner::{TaskObserver, TaskRunner};
use super::types::{PipelineError, Persona, Task};
use crate::audit::{AuditEvent, AuditHandle, DeadLetter};
use crate::callback::{CallbackDispatcher, DeliveryOutcome};
use crate::config::Config;
use crate::gateway::HttpGateway;
use crate::limiter::{ConcurrencyLimiter, LimiterStatus};
use crate::notifier::KeywordNotifier;
use crate::services::{DifyClient, MaterialClient};
use crate::stages::StageContext;

/// Finished batches kept around for status queries.
const MAX_RETAINED_BATCHES: usize = 256;

/// Orchestrator status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub accepting: bool,
    pub limiter: LimiterStatus,
    pub running_batches: usize,
    pub retained_batches: usize,
}

/// Admits batches, runs their tasks under the shared concurrency limit and
/// hands terminal tasks to the callback dispatcher.
pub struct Orchestrator {
    ctx: Arc<StageContext>,
    limiter: ConcurrencyLimiter,
    dispatcher: Arc<CallbackDispatcher>,
    audit: Option<AuditHandle>,
    batches: RwLock<HashMap<String, BatchHandle>>,
    accepting: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        ctx: StageContext,
        dispatcher: CallbackDispatcher,
        audit: Option<AuditHandle>,
    ) -> Self {
        let limiter = ConcurrencyLimiter::new(ctx.config.max_concurrency);
        Self {
            ctx: Arc::new(ctx),
            limiter,
            dispatcher: Arc::new(dispatcher),
            audit,
            batches: RwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Wire up the HTTP-backed services described by `config`.
    pub fn from_config(
        config: &Config,
        notifier: KeywordNotifier,
        audit: Option<AuditHandle>,
    ) -> Result<Self, PipelineError> {
        let gateway = HttpGateway::new()?;

        let material = MaterialClient::new(
            gateway.clone(),
            config.material.clone(),
            config.gateway.clone(),
        );
        let workflow = DifyClient::new(
            gateway.clone(),
            config.generation.clone(),
            config.scoring.clone(),
            config.gateway.clone(),
            config.pipeline.workflow_user.clone(),
        )
        .with_analysis(config.analysis.clone());
        let ctx = StageContext::new(
            Arc::new(material),
            Arc::new(workflow),
            notifier,
            config.pipeline.clone(),
        );

        let mut dispatcher =
            CallbackDispatcher::new(gateway, config.callback.url.clone(), config.callback.policy());
        if let Some(ref audit) = audit {
            dispatcher = dispatcher.with_audit(audit.clone());
        }

        Ok(Self::new(ctx, dispatcher, audit))
    }

    /// Start one task per persona. Tasks are indexed in the given order.
    pub async fn submit_batch(&self, personas: Vec<Persona>) -> Result<BatchHandle, PipelineError> {
        self.ensure_accepting()?;
        if personas.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let tasks: Vec<Task> = personas
            .into_iter()
            .enumerate()
            .map(|(index, persona)| Task::new(batch_id.clone(), index, persona))
            .collect();

        info!("Submitting batch {} with {} task(s)", batch_id, tasks.len());
        Ok(self.launch(batch_id, tasks).await)
    }

    /// Continue task snapshots from their recorded stage.
    ///
    /// Tasks keep their ids and are regrouped by their original batch id.
    /// Terminal snapshots are skipped.
    pub async fn resume(&self, tasks: Vec<Task>) -> Result<Vec<BatchHandle>, PipelineError> {
        self.ensure_accepting()?;

        let mut groups: BTreeMap<String, Vec<Task>> = BTreeMap::new();
        for task in tasks {
            if task.is_terminal() {
                warn!("Not resuming task {}: already {}", task.id, task.stage);
                continue;
            }
            groups.entry(task.batch_id.clone()).or_default().push(task);
        }
        if groups.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        {
            let batches = self.batches.read().await;
            for batch_id in groups.keys() {
                if batches.get(batch_id).is_some_and(|b| !b.is_finished()) {
                    return Err(PipelineError::BatchRunning(batch_id.clone()));
                }
            }
        }

        let mut handles = Vec::with_capacity(groups.len());
        for (batch_id, mut tasks) in groups {
            tasks.sort_by_key(|t| t.index);
            info!("Resuming {} task(s) of batch {}", tasks.len(), batch_id);
            handles.push(self.launch(batch_id, tasks).await);
        }
        Ok(handles)
    }

    async fn launch(&self, batch_id: String, tasks: Vec<Task>) -> BatchHandle {
        let (handle, receivers) = BatchHandle::create(batch_id, &tasks);
        let observer = TaskObserver::new(handle.updates_sender(), handle.board());
        let runner = TaskRunner::new(
            Arc::clone(&self.ctx),
            self.limiter.clone(),
            self.audit.clone(),
            observer,
        );

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::BatchSubmitted {
                    batch_id: handle.id().to_string(),
                    task_ids: handle.task_ids().to_vec(),
                    persona_ids: tasks
                        .iter()
                        .map(|t| t.persona.persona_id.clone())
                        .collect(),
                })
                .await;
        }

        self.register(handle.clone()).await;

        tokio::spawn(coordinate(
            handle.clone(),
            runner,
            tasks.into_iter().zip(receivers).collect(),
            Arc::clone(&self.dispatcher),
            self.audit.clone(),
        ));
        handle
    }

    async fn register(&self, handle: BatchHandle) {
        let mut batches = self.batches.write().await;
        batches.insert(handle.id().to_string(), handle);

        if batches.len() > MAX_RETAINED_BATCHES {
            let mut finished: Vec<(chrono::DateTime<chrono::Utc>, String)> = batches
                .values()
                .filter(|b| b.is_finished())
                .map(|b| (b.submitted_at(), b.id().to_string()))
                .collect();
            finished.sort();
            let excess = batches.len() - MAX_RETAINED_BATCHES;
            for (_, id) in finished.into_iter().take(excess) {
                batches.remove(&id);
            }
        }
    }

    fn ensure_accepting(&self) -> Result<(), PipelineError> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::ShuttingDown)
        }
    }

    pub async fn batch(&self, batch_id: &str) -> Result<BatchHandle, PipelineError> {
        self.batches
            .read()
            .await
            .get(batch_id)
            .cloned()
            .ok_or_else(|| PipelineError::BatchNotFound(batch_id.to_string()))
    }

    /// Status of every retained batch, newest first.
    pub async fn list_batches(&self) -> Vec<BatchStatus> {
        let mut statuses: Vec<BatchStatus> = self
            .batches
            .read()
            .await
            .values()
            .map(BatchHandle::status)
            .collect();
        statuses.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        statuses
    }

    /// Wake tasks waiting for keywords of the given tags.
    ///
    /// Returns the tags that had a waiting task.
    pub async fn notify_keywords(&self, tags: &[String]) -> Vec<String> {
        let woke: Vec<String> = tags
            .iter()
            .filter(|tag| self.ctx.notifier.notify(tag))
            .cloned()
            .collect();
        info!(
            "Keyword notification for {:?}, {} waiting tag(s) woken",
            tags,
            woke.len()
        );

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::KeywordsNotified {
                    tags: tags.to_vec(),
                    woke: woke.clone(),
                })
                .await;
        }
        woke
    }

    /// Post a dead-lettered callback envelope again.
    pub async fn replay_delivery(&self, letter: &DeadLetter) -> DeliveryOutcome {
        info!(
            "Replaying dead letter {} for task {} (previous replays: {})",
            letter.id, letter.task_id, letter.replays
        );
        self.dispatcher.redeliver(letter).await
    }

    pub fn notifier(&self) -> &KeywordNotifier {
        &self.ctx.notifier
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let batches = self.batches.read().await;
        OrchestratorStatus {
            accepting: self.accepting.load(Ordering::SeqCst),
            limiter: self.limiter.status(),
            running_batches: batches.values().filter(|b| !b.is_finished()).count(),
            retained_batches: batches.len(),
        }
    }

    /// Stop accepting work, cancel every running task and wait for the
    /// batches to settle.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator already shutting down");
            return;
        }

        let running: Vec<BatchHandle> = self
            .batches
            .read()
            .await
            .values()
            .filter(|b| !b.is_finished())
            .cloned()
            .collect();
        info!("Shutting down, cancelling {} running batch(es)", running.len());

        for batch in &running {
            batch.cancel_all();
        }
        self.limiter.close();

        for batch in running {
            if let Err(e) = batch.wait().await {
                warn!("{}", e);
            }
        }
        info!("Orchestrator stopped");
    }
}
