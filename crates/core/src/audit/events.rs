use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Batch lifecycle
    BatchSubmitted {
        batch_id: String,
        task_ids: Vec<String>,
        persona_ids: Vec<String>,
    },
    BatchCompleted {
        batch_id: String,
        succeeded: usize,
        failed: usize,
        cancelled: usize,
        duration_ms: u64,
    },

    // Task lifecycle
    TaskStateChanged {
        task_id: String,
        batch_id: String,
        from_state: String,
        to_state: String,
        reason: Option<String>,
    },
    TaskCancelled {
        task_id: String,
        batch_id: String,
        /// Stage the task was in when cancelled.
        stage: String,
    },
    /// Final task snapshot, written once its callback is settled.
    TaskArchived {
        task_id: String,
        batch_id: String,
        snapshot: Value,
    },

    // Keyword service callbacks
    KeywordsNotified {
        tags: Vec<String>,
        /// Tags that had at least one waiting task.
        woke: Vec<String>,
    },

    // Callback delivery
    DeliveryCompleted {
        task_id: String,
        batch_id: String,
        attempts: u32,
    },
    /// Delivery gave up. The envelope is kept for manual replay.
    DeliveryFailed {
        task_id: String,
        batch_id: String,
        attempts: u32,
        error: String,
        envelope: Value,
    },
    /// A dead-lettered envelope was posted again. `error` is None on success.
    DeliveryReplayed {
        task_id: String,
        batch_id: String,
        dead_letter_id: i64,
        attempts: u32,
        error: Option<String>,
    },
}

impl AuditEvent {
    /// Get the event type as a string (for filtering/storage)
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::ServiceStarted { .. } => "service_started",
            AuditEvent::ServiceStopped { .. } => "service_stopped",
            AuditEvent::BatchSubmitted { .. } => "batch_submitted",
            AuditEvent::BatchCompleted { .. } => "batch_completed",
            AuditEvent::TaskStateChanged { .. } => "task_state_changed",
            AuditEvent::TaskCancelled { .. } => "task_cancelled",
            AuditEvent::TaskArchived { .. } => "task_archived",
            AuditEvent::KeywordsNotified { .. } => "keywords_notified",
            AuditEvent::DeliveryCompleted { .. } => "delivery_completed",
            AuditEvent::DeliveryFailed { .. } => "delivery_failed",
            AuditEvent::DeliveryReplayed { .. } => "delivery_replayed",
        }
    }

    /// Get the task ID if this event is task-related
    pub fn task_id(&self) -> Option<&str> {
        match self {
            AuditEvent::TaskStateChanged { task_id, .. }
            | AuditEvent::TaskCancelled { task_id, .. }
            | AuditEvent::TaskArchived { task_id, .. }
            | AuditEvent::DeliveryCompleted { task_id, .. }
            | AuditEvent::DeliveryFailed { task_id, .. }
            | AuditEvent::DeliveryReplayed { task_id, .. } => Some(task_id),
            AuditEvent::ServiceStarted { .. }
            | AuditEvent::ServiceStopped { .. }
            | AuditEvent::BatchSubmitted { .. }
            | AuditEvent::BatchCompleted { .. }
            | AuditEvent::KeywordsNotified { .. } => None,
        }
    }

    /// Get the batch ID if this event belongs to a batch
    pub fn batch_id(&self) -> Option<&str> {
        match self {
            AuditEvent::BatchSubmitted { batch_id, .. }
            | AuditEvent::BatchCompleted { batch_id, .. }
            | AuditEvent::TaskStateChanged { batch_id, .. }
            | AuditEvent::TaskCancelled { batch_id, .. }
            | AuditEvent::TaskArchived { batch_id, .. }
            | AuditEvent::DeliveryCompleted { batch_id, .. }
            | AuditEvent::DeliveryFailed { batch_id, .. }
            | AuditEvent::DeliveryReplayed { batch_id, .. } => Some(batch_id),
            AuditEvent::ServiceStarted { .. }
            | AuditEvent::ServiceStopped { .. }
            | AuditEvent::KeywordsNotified { .. } => None,
        }
    }
}

/// Stored audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub task_id: Option<String>,
    pub batch_id: Option<String>,
    pub data: AuditEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_service_started() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.task_id(), None);
        assert_eq!(event.batch_id(), None);
    }

    #[test]
    fn test_event_type_batch_submitted() {
        let event = AuditEvent::BatchSubmitted {
            batch_id: "batch-1".to_string(),
            task_ids: vec!["t-1".to_string(), "t-2".to_string()],
            persona_ids: vec!["p-1".to_string(), "p-2".to_string()],
        };
        assert_eq!(event.event_type(), "batch_submitted");
        assert_eq!(event.task_id(), None);
        assert_eq!(event.batch_id(), Some("batch-1"));
    }

    #[test]
    fn test_event_type_task_state_changed() {
        let event = AuditEvent::TaskStateChanged {
            task_id: "t-1".to_string(),
            batch_id: "batch-1".to_string(),
            from_state: "material".to_string(),
            to_state: "references".to_string(),
            reason: None,
        };
        assert_eq!(event.event_type(), "task_state_changed");
        assert_eq!(event.task_id(), Some("t-1"));
        assert_eq!(event.batch_id(), Some("batch-1"));
    }

    #[test]
    fn test_event_type_keywords_notified() {
        let event = AuditEvent::KeywordsNotified {
            tags: vec!["travel".to_string()],
            woke: vec![],
        };
        assert_eq!(event.event_type(), "keywords_notified");
        assert_eq!(event.task_id(), None);
        assert_eq!(event.batch_id(), None);
    }

    #[test]
    fn test_delivery_failed_keeps_envelope() {
        let event = AuditEvent::DeliveryFailed {
            task_id: "t-1".to_string(),
            batch_id: "batch-1".to_string(),
            attempts: 3,
            error: "HTTP 503".to_string(),
            envelope: json!({"task_id": "t-1", "status": "succeeded"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "delivery_failed");
        assert_eq!(json["envelope"]["task_id"], "t-1");

        let parsed: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.task_id(), Some("t-1"));
    }

    #[test]
    fn test_delivery_replayed_names_its_dead_letter() {
        let event = AuditEvent::DeliveryReplayed {
            task_id: "t-1".to_string(),
            batch_id: "batch-1".to_string(),
            dead_letter_id: 4,
            attempts: 1,
            error: None,
        };
        assert_eq!(event.event_type(), "delivery_replayed");
        assert_eq!(event.batch_id(), Some("batch-1"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["dead_letter_id"], 4);
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_audit_record_serialization() {
        let record = AuditRecord {
            id: 1,
            timestamp: Utc::now(),
            event_type: "service_started".to_string(),
            task_id: None,
            batch_id: None,
            data: AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc123".to_string(),
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"event_type\":\"service_started\""));
    }
}
