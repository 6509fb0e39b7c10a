use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Which audit records to return.
///
/// `event_types` matches any of the listed types; empty matches all.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub task_id: Option<String>,
    pub batch_id: Option<String>,
    pub event_types: Vec<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            task_id: None,
            batch_id: None,
            event_types: Vec::new(),
            from: None,
            to: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn for_batch(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            ..Self::default()
        }
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// A callback envelope whose delivery ran out of retries.
///
/// Created from a `DeliveryFailed` event. Each `DeliveryReplayed` event
/// bumps `replays`; the first successful one sets `replayed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub task_id: String,
    pub batch_id: String,
    pub failed_at: DateTime<Utc>,
    /// Attempts made by the original delivery.
    pub attempts: u32,
    pub error: String,
    pub envelope: Value,
    pub replays: u32,
    pub replayed_at: Option<DateTime<Utc>>,
}

impl DeadLetter {
    /// Still waiting for a successful replay.
    pub fn is_pending(&self) -> bool {
        self.replayed_at.is_none()
    }
}

/// Which dead letters to list. Oldest failure first.
#[derive(Debug, Clone)]
pub struct DeadLetterQuery {
    pub batch_id: Option<String>,
    pub include_replayed: bool,
    pub limit: i64,
}

impl Default for DeadLetterQuery {
    fn default() -> Self {
        Self {
            batch_id: None,
            include_replayed: false,
            limit: 100,
        }
    }
}

/// Persistence for the audit trail and the dead letters derived from it.
pub trait AuditStore: Send + Sync {
    /// Store records atomically, returning their ids in input order.
    ///
    /// Delivery events also update the dead-letter table in the same
    /// transaction.
    fn insert_batch(&self, records: &[AuditRecord]) -> Result<Vec<i64>, AuditError>;

    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let ids = self.insert_batch(std::slice::from_ref(record))?;
        ids.first()
            .copied()
            .ok_or_else(|| AuditError::Database("insert returned no id".to_string()))
    }

    /// Newest first.
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Matching records, ignoring limit and offset.
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;

    /// Every record of one task in the order it was written.
    fn task_timeline(&self, task_id: &str) -> Result<Vec<AuditRecord>, AuditError>;

    fn dead_letters(&self, query: &DeadLetterQuery) -> Result<Vec<DeadLetter>, AuditError>;

    fn dead_letter(&self, id: i64) -> Result<Option<DeadLetter>, AuditError>;
}
