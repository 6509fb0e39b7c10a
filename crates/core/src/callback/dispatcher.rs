//! Delivery of callback envelopes to the configured receiver.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::envelope::CallbackEnvelope;
use crate::audit::{AuditEvent, AuditHandle, DeadLetter};
use crate::gateway::{CallPolicy, Endpoint, HttpGateway};
use crate::metrics;

/// Header carrying the envelope's idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// What happened to one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Retries ran out; the envelope is kept in the audit log.
    Failed { attempts: u32, error: String },
    /// No callback URL configured.
    Skipped,
    /// This task's envelope was already handed to the dispatcher.
    Duplicate,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered { .. } => "delivered",
            DeliveryOutcome::Failed { .. } => "failed",
            DeliveryOutcome::Skipped => "skipped",
            DeliveryOutcome::Duplicate => "duplicate",
        }
    }
}

/// Posts envelopes with bounded retries, at most once per task.
pub struct CallbackDispatcher {
    gateway: HttpGateway,
    url: Option<String>,
    policy: CallPolicy,
    /// Task ids whose envelope has been claimed for delivery.
    ledger: Mutex<HashSet<String>>,
    audit: Option<AuditHandle>,
}

impl CallbackDispatcher {
    pub fn new(gateway: HttpGateway, url: Option<String>, policy: CallPolicy) -> Self {
        Self {
            gateway,
            url,
            policy,
            ledger: Mutex::new(HashSet::new()),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Claim the task's delivery slot. False if it was claimed before.
    fn claim(&self, task_id: &str) -> bool {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger.insert(task_id.to_string())
    }

    /// Deliver one envelope.
    ///
    /// The envelope is serialized once; every attempt sends the same bytes
    /// with the same idempotency key. Permanent failure is logged and
    /// audited, never propagated.
    pub async fn deliver(&self, envelope: &CallbackEnvelope) -> DeliveryOutcome {
        if !self.claim(&envelope.task_id) {
            debug!(
                "Envelope for task {} already dispatched, ignoring",
                envelope.task_id
            );
            return self.finish(DeliveryOutcome::Duplicate);
        }

        let Some(url) = self.url.as_deref() else {
            debug!(
                "No callback URL configured, skipping envelope for task {}",
                envelope.task_id
            );
            return self.finish(DeliveryOutcome::Skipped);
        };

        let payload = match serde_json::to_value(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                return self
                    .failed(envelope, serde_json::Value::Null, 0, e.to_string())
                    .await
            }
        };
        let endpoint = Endpoint::post(url)
            .with_header(IDEMPOTENCY_HEADER, envelope.idempotency_key())
            .accept_any_body();

        let report = self
            .gateway
            .execute(&endpoint, Some(&payload), &self.policy)
            .await;

        match report.result {
            Ok(_) => {
                info!(
                    "Delivered callback for task {} in {} attempt(s)",
                    envelope.task_id, report.attempts
                );
                if let Some(ref audit) = self.audit {
                    audit
                        .emit(AuditEvent::DeliveryCompleted {
                            task_id: envelope.task_id.clone(),
                            batch_id: envelope.batch_id.clone(),
                            attempts: report.attempts,
                        })
                        .await;
                }
                self.finish(DeliveryOutcome::Delivered {
                    attempts: report.attempts,
                })
            }
            Err(e) => {
                self.failed(envelope, payload, report.attempts, e.to_string())
                    .await
            }
        }
    }

    /// Post a dead-lettered envelope again.
    ///
    /// Replays bypass the delivery ledger: the task was claimed by its
    /// original delivery. The stored bytes go out with the original
    /// idempotency key, and the result is audited against the dead letter.
    pub async fn redeliver(&self, letter: &DeadLetter) -> DeliveryOutcome {
        let Some(url) = self.url.as_deref() else {
            debug!(
                "No callback URL configured, cannot replay dead letter {}",
                letter.id
            );
            return self.finish(DeliveryOutcome::Skipped);
        };

        let endpoint = Endpoint::post(url)
            .with_header(IDEMPOTENCY_HEADER, letter.task_id.as_str())
            .accept_any_body();
        let report = self
            .gateway
            .execute(&endpoint, Some(&letter.envelope), &self.policy)
            .await;

        let (outcome, error) = match report.result {
            Ok(_) => {
                info!(
                    "Replayed dead letter {} for task {} in {} attempt(s)",
                    letter.id, letter.task_id, report.attempts
                );
                let outcome = DeliveryOutcome::Delivered {
                    attempts: report.attempts,
                };
                (outcome, None)
            }
            Err(e) => {
                let error = e.to_string();
                warn!(
                    "Replay of dead letter {} for task {} failed: {}",
                    letter.id, letter.task_id, error
                );
                let outcome = DeliveryOutcome::Failed {
                    attempts: report.attempts,
                    error: error.clone(),
                };
                (outcome, Some(error))
            }
        };

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::DeliveryReplayed {
                    task_id: letter.task_id.clone(),
                    batch_id: letter.batch_id.clone(),
                    dead_letter_id: letter.id,
                    attempts: report.attempts,
                    error,
                })
                .await;
        }
        self.finish(outcome)
    }

    async fn failed(
        &self,
        envelope: &CallbackEnvelope,
        payload: serde_json::Value,
        attempts: u32,
        error: String,
    ) -> DeliveryOutcome {
        error!(
            "Callback for task {} failed after {} attempt(s): {}",
            envelope.task_id, attempts, error
        );
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::DeliveryFailed {
                    task_id: envelope.task_id.clone(),
                    batch_id: envelope.batch_id.clone(),
                    attempts,
                    error: error.clone(),
                    envelope: payload,
                })
                .await;
        }
        self.finish(DeliveryOutcome::Failed { attempts, error })
    }

    fn finish(&self, outcome: DeliveryOutcome) -> DeliveryOutcome {
        metrics::DELIVERIES_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        outcome
    }
}
