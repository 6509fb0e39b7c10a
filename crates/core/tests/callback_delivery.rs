//! Callback delivery against a stub consumer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::StubUpstream;
use contentflow_core::audit::{
    create_audit_system, AuditEvent, AuditHandle, AuditStore, DeadLetter, DeadLetterQuery,
    SqliteAuditStore,
};
use contentflow_core::callback::{
    CallbackDispatcher, CallbackEnvelope, DeliveryOutcome, IDEMPOTENCY_HEADER,
};
use contentflow_core::gateway::{Backoff, CallPolicy, HttpGateway};
use contentflow_core::pipeline::{ErrorKind, FailureSummary, Stage, Task};
use contentflow_core::testing::fixtures;

fn policy() -> CallPolicy {
    CallPolicy::default()
        .with_timeout(Duration::from_secs(2))
        .with_max_retries(2)
        .with_backoff(Backoff::Fixed, Duration::from_millis(10))
}

fn envelope() -> CallbackEnvelope {
    let mut task = Task::new("batch-7", 0, fixtures::persona("p-1", &["travel"]));
    task.stage = Stage::Failed;
    task.failure = Some(FailureSummary {
        kind: ErrorKind::DataInsufficiency,
        stage: Stage::References,
        message: "need 2 reference articles".into(),
    });
    CallbackEnvelope::from_task(&task, None).unwrap()
}

fn dispatcher(url: &str) -> CallbackDispatcher {
    CallbackDispatcher::new(HttpGateway::new().unwrap(), Some(url.to_string()), policy())
}

async fn first_dead_letter(store: &SqliteAuditStore) -> DeadLetter {
    for _ in 0..100 {
        if let Some(letter) = store
            .dead_letters(&DeadLetterQuery::default())
            .unwrap()
            .into_iter()
            .next()
        {
            return letter;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no dead letter was written");
}

#[tokio::test]
async fn test_delivered_after_two_unavailable_responses() {
    let consumer = StubUpstream::start(vec![(503, ""), (503, ""), (200, "ok")]).await;
    let dispatcher = dispatcher(&consumer.url);
    let envelope = envelope();

    let outcome = dispatcher.deliver(&envelope).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
    let seen = consumer.requests();
    assert_eq!(seen.len(), 3);
    for request in &seen {
        assert_eq!(
            request.header(IDEMPOTENCY_HEADER).as_deref(),
            Some(envelope.task_id.as_str())
        );
        assert_eq!(request.body, seen[0].body);
    }
    let body: CallbackEnvelope = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(body, envelope);
}

#[tokio::test]
async fn test_exhausted_delivery_is_audited_with_envelope() {
    let consumer = StubUpstream::always(500, "down").await;
    let (tx, mut rx) = mpsc::channel(16);
    let dispatcher = dispatcher(&consumer.url).with_audit(AuditHandle::new(tx));
    let envelope = envelope();

    let outcome = dispatcher.deliver(&envelope).await;

    match outcome {
        DeliveryOutcome::Failed { attempts, ref error } => {
            assert_eq!(attempts, 3);
            assert!(error.contains("500"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(consumer.hits(), 3);

    let audited = rx.recv().await.unwrap();
    match audited.event {
        AuditEvent::DeliveryFailed {
            task_id,
            attempts,
            envelope: stored,
            ..
        } => {
            assert_eq!(task_id, envelope.task_id);
            assert_eq!(attempts, 3);
            assert_eq!(stored["persona_id"], "p-1");
            assert_eq!(stored["error"]["kind"], "data_insufficiency");
        }
        other => panic!("unexpected audit event {:?}", other),
    }
}

#[tokio::test]
async fn test_client_error_fails_without_retry() {
    let consumer = StubUpstream::always(422, "rejected").await;
    let dispatcher = dispatcher(&consumer.url);

    let outcome = dispatcher.deliver(&envelope()).await;

    assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 1, .. }));
    assert_eq!(consumer.hits(), 1);
}

#[tokio::test]
async fn test_second_delivery_sends_nothing() {
    let consumer = StubUpstream::always(200, "").await;
    let (tx, mut rx) = mpsc::channel(16);
    let dispatcher = dispatcher(&consumer.url).with_audit(AuditHandle::new(tx));
    let envelope = envelope();

    assert_eq!(
        dispatcher.deliver(&envelope).await,
        DeliveryOutcome::Delivered { attempts: 1 }
    );
    assert_eq!(dispatcher.deliver(&envelope).await, DeliveryOutcome::Duplicate);
    assert_eq!(consumer.hits(), 1);

    let audited = rx.recv().await.unwrap();
    assert!(matches!(
        audited.event,
        AuditEvent::DeliveryCompleted { attempts: 1, .. }
    ));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_dead_letter_replay_sends_the_original_bytes() {
    let consumer = StubUpstream::start(vec![(500, ""), (500, ""), (500, ""), (200, "ok")]).await;
    let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
    let (audit, writer) = create_audit_system(store.clone(), 16);
    let writer = tokio::spawn(writer.run());
    let dispatcher = dispatcher(&consumer.url).with_audit(audit);
    let envelope = envelope();

    let outcome = dispatcher.deliver(&envelope).await;
    assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 3, .. }));
    let letter = first_dead_letter(&store).await;
    assert_eq!(letter.task_id, envelope.task_id);
    assert!(letter.is_pending());

    let replay = dispatcher.redeliver(&letter).await;
    assert_eq!(replay, DeliveryOutcome::Delivered { attempts: 1 });

    let seen = consumer.requests();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[3].json(), seen[0].json());
    assert_eq!(
        seen[3].header(IDEMPOTENCY_HEADER).as_deref(),
        Some(envelope.task_id.as_str())
    );

    drop(dispatcher);
    writer.await.unwrap();
    let settled = store.dead_letter(letter.id).unwrap().unwrap();
    assert_eq!(settled.replays, 1);
    assert!(!settled.is_pending());
}

#[tokio::test]
async fn test_failed_replay_leaves_dead_letter_pending() {
    let consumer = StubUpstream::always(503, "still down").await;
    let store = Arc::new(SqliteAuditStore::in_memory().unwrap());
    let (audit, writer) = create_audit_system(store.clone(), 16);
    let writer = tokio::spawn(writer.run());
    let dispatcher = dispatcher(&consumer.url).with_audit(audit);

    dispatcher.deliver(&envelope()).await;
    let letter = first_dead_letter(&store).await;
    let replay = dispatcher.redeliver(&letter).await;
    assert!(matches!(replay, DeliveryOutcome::Failed { attempts: 3, .. }));
    assert_eq!(consumer.hits(), 6);

    drop(dispatcher);
    writer.await.unwrap();
    let letter = store.dead_letter(letter.id).unwrap().unwrap();
    assert_eq!(letter.replays, 1);
    assert!(letter.is_pending());
    // One dead letter per task, however many replays fail.
    let pending = store.dead_letters(&DeadLetterQuery::default()).unwrap();
    assert_eq!(pending.len(), 1);
}
