use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};
use crate::metrics;

/// Most records written in one transaction.
pub const WRITE_BATCH_LIMIT: usize = 64;

impl From<AuditEventEnvelope> for AuditRecord {
    fn from(envelope: AuditEventEnvelope) -> Self {
        AuditRecord {
            id: 0,
            timestamp: envelope.timestamp,
            event_type: envelope.event.event_type().to_string(),
            task_id: envelope.event.task_id().map(String::from),
            batch_id: envelope.event.batch_id().map(String::from),
            data: envelope.event,
        }
    }
}

/// Drains the audit channel into the store.
///
/// Whatever is queued when the writer wakes is written as one batch, so a
/// burst of stage transitions costs one transaction instead of one each.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Run until every `AuditHandle` is dropped and the queue is empty.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        let mut pending = Vec::with_capacity(WRITE_BATCH_LIMIT);
        while self.rx.recv_many(&mut pending, WRITE_BATCH_LIMIT).await > 0 {
            let records: Vec<AuditRecord> = pending.drain(..).map(AuditRecord::from).collect();
            self.write(&records);
        }

        tracing::info!("Audit writer shutting down");
    }

    fn write(&self, records: &[AuditRecord]) {
        let count = records.len() as u64;
        match self.store.insert_batch(records) {
            Ok(_) => {
                tracing::trace!("Wrote {} audit record(s)", count);
                metrics::AUDIT_RECORDS_TOTAL
                    .with_label_values(&["written"])
                    .inc_by(count);
            }
            Err(e) => {
                let kinds: Vec<&str> = records.iter().map(|r| r.event_type.as_str()).collect();
                tracing::error!(
                    "Dropped {} audit record(s) [{}]: {}",
                    count,
                    kinds.join(", "),
                    e
                );
                metrics::AUDIT_RECORDS_TOTAL
                    .with_label_values(&["dropped"])
                    .inc_by(count);
            }
        }
    }
}

/// Create the handle/writer pair.
///
/// Spawn the writer with `tokio::spawn(writer.run())` and clone the handle
/// into every component that emits events. `buffer_size` bounds the
/// channel; `emit` waits when it is full.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::audit::{
        AuditError, AuditEvent, AuditFilter, DeadLetter, DeadLetterQuery, SqliteAuditStore,
    };

    /// Keeps each batch it is handed; can be told to reject them.
    #[derive(Default)]
    struct BatchLog {
        batches: Mutex<Vec<Vec<AuditRecord>>>,
        reject: bool,
    }

    impl BatchLog {
        fn sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }

        fn event_types(&self) -> Vec<String> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .flatten()
                .map(|r| r.event_type.clone())
                .collect()
        }
    }

    impl AuditStore for BatchLog {
        fn insert_batch(&self, records: &[AuditRecord]) -> Result<Vec<i64>, AuditError> {
            let mut batches = self.batches.lock().unwrap();
            batches.push(records.to_vec());
            if self.reject {
                return Err(AuditError::Database("disk full".to_string()));
            }
            Ok((1..=records.len() as i64).collect())
        }

        fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(Vec::new())
        }

        fn count(&self, _filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(0)
        }

        fn task_timeline(&self, _task_id: &str) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(Vec::new())
        }

        fn dead_letters(&self, _query: &DeadLetterQuery) -> Result<Vec<DeadLetter>, AuditError> {
            Ok(Vec::new())
        }

        fn dead_letter(&self, _id: i64) -> Result<Option<DeadLetter>, AuditError> {
            Ok(None)
        }
    }

    fn moved(task_id: &str, to_state: &str) -> AuditEvent {
        AuditEvent::TaskStateChanged {
            task_id: task_id.to_string(),
            batch_id: "b-1".to_string(),
            from_state: "pending".to_string(),
            to_state: to_state.to_string(),
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_queued_burst_is_written_as_one_batch() {
        let store = Arc::new(BatchLog::default());
        let (handle, writer) = create_audit_system(store.clone(), 16);

        // Queue everything before the writer first wakes.
        for stage in ["tag_keywords", "material", "references", "draft", "image"] {
            handle.emit(moved("t-1", stage)).await;
        }
        drop(handle);
        writer.run().await;

        assert_eq!(store.sizes(), vec![5]);
    }

    #[tokio::test]
    async fn test_batches_are_capped() {
        let store = Arc::new(BatchLog::default());
        let (handle, writer) = create_audit_system(store.clone(), WRITE_BATCH_LIMIT * 2);

        for i in 0..WRITE_BATCH_LIMIT + 3 {
            handle.emit(moved(&format!("t-{}", i), "material")).await;
        }
        drop(handle);
        writer.run().await;

        assert_eq!(store.sizes(), vec![WRITE_BATCH_LIMIT, 3]);
    }

    #[tokio::test]
    async fn test_rejected_batch_does_not_stop_the_writer() {
        let store = Arc::new(BatchLog {
            reject: true,
            ..BatchLog::default()
        });
        let (handle, writer) = create_audit_system(store.clone(), 16);
        let writer = tokio::spawn(writer.run());

        handle.emit(moved("t-1", "material")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;
        drop(handle);

        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer should exit")
            .unwrap();
        assert_eq!(
            store.event_types(),
            vec!["task_state_changed", "service_stopped"]
        );
    }

    #[tokio::test]
    async fn test_writer_outlives_all_but_the_last_handle() {
        let store = Arc::new(BatchLog::default());
        let (main_handle, writer) = create_audit_system(store.clone(), 16);
        let dispatcher_handle = main_handle.clone();
        let writer = tokio::spawn(writer.run());

        main_handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;
        drop(main_handle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        // A late delivery result still lands.
        dispatcher_handle
            .emit(AuditEvent::DeliveryCompleted {
                task_id: "t-1".to_string(),
                batch_id: "b-1".to_string(),
                attempts: 1,
            })
            .await;
        drop(dispatcher_handle);

        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer should exit once every handle is gone")
            .unwrap();
        assert_eq!(
            store.event_types(),
            vec!["service_stopped", "delivery_completed"]
        );
    }

    #[tokio::test]
    async fn test_delivery_failure_through_writer_is_dead_lettered() {
        let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (handle, writer) = create_audit_system(store.clone(), 16);

        handle
            .emit(AuditEvent::DeliveryFailed {
                task_id: "t-1".to_string(),
                batch_id: "b-1".to_string(),
                attempts: 3,
                error: "HTTP 500".to_string(),
                envelope: json!({"task_id": "t-1", "status": "succeeded"}),
            })
            .await;
        drop(handle);
        writer.run().await;

        let timeline = store.task_timeline("t-1").unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].batch_id.as_deref(), Some("b-1"));

        let letters = store.dead_letters(&DeadLetterQuery::default()).unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].envelope["status"], "succeeded");
    }
}
