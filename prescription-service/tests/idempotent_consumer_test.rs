//! End-to-end coordination behavior of the creation flow, over the
//! in-memory bus with a scripted validator on the other side.

#![allow(clippy::expect_used, clippy::panic)] // Test code

use chrono::Utc;
use futures::StreamExt;
use rxflow_core::bus::{Disposition, MessageBus, topics};
use rxflow_core::environment::Clock;
use rxflow_core::idempotency::{IdempotencyKey, IdempotencyStore};
use rxflow_core::message::SerializedMessage;
use rxflow_core::practitioner::PractitionerId;
use rxflow_core::prescription::{
    CreatePrescription, PatientId, Prescription, PrescriptionId, PrescriptionState,
};
use rxflow_core::protocol::{ValidationReply, ValidationRequest, ValidationStatus};
use rxflow_core::repository::PrescriptionRepository;
use rxflow_prescription_service::{ConsumeError, CreatePrescriptionFlow, ValidationRequester};
use rxflow_testing::{
    InMemoryBus, InMemoryIdempotencyStore, InMemoryLock, InMemoryPrescriptionRepository,
    test_clock,
};
use std::sync::Arc;
use std::time::Duration;

/// How the scripted validator answers requests.
#[derive(Clone, Copy)]
enum Validator {
    /// Reply `Validated` after `delay`.
    Approve { delay: Duration },
    /// Reply `Rejected` with this reason.
    Decline(&'static str),
    /// Never reply.
    Silent,
}

fn spawn_validator(bus: InMemoryBus, behavior: Validator) {
    tokio::spawn(async move {
        let mut stream = bus
            .subscribe(&[topics::VALIDATION_REQUESTS])
            .await
            .expect("validator subscribes");
        while let Some(Ok(delivery)) = stream.next().await {
            let request: ValidationRequest =
                delivery.message().decode().expect("decode request");
            let correlation_id = delivery
                .message()
                .correlation_id()
                .expect("correlation id present");
            let reply_topic = delivery
                .message()
                .reply_topic()
                .expect("reply topic present")
                .to_string();
            delivery.settle(Disposition::Ack);

            let (status, message) = match behavior {
                Validator::Silent => continue,
                Validator::Approve { delay } => {
                    tokio::time::sleep(delay).await;
                    (
                        ValidationStatus::Validated,
                        format!("practitioner {} validated", request.practitioner_id),
                    )
                }
                Validator::Decline(reason) => {
                    (ValidationStatus::Rejected, reason.to_string())
                }
            };

            let reply = ValidationReply {
                idempotency_key: request.idempotency_key,
                practitioner_id: request.practitioner_id,
                prescription_id: request.prescription_id,
                status,
                message,
            };
            let message = SerializedMessage::from_message(&reply)
                .expect("encode reply")
                .with_correlation_id(&correlation_id);
            bus.publish(&reply_topic, &message)
                .await
                .expect("publish reply");
        }
    });
}

struct Harness {
    bus: InMemoryBus,
    store: InMemoryIdempotencyStore,
    lock: InMemoryLock,
    repository: InMemoryPrescriptionRepository,
    flow: CreatePrescriptionFlow,
}

async fn harness(behavior: Validator, validation_timeout: Duration) -> Harness {
    let bus = InMemoryBus::new();
    let store = InMemoryIdempotencyStore::new();
    let lock = InMemoryLock::new();
    let repository = InMemoryPrescriptionRepository::new();

    // Reply subscription first, then the validator, then any requests.
    let requester = ValidationRequester::new(
        Arc::new(bus.clone()),
        topics::VALIDATION_REPLIES,
        validation_timeout,
    )
    .await
    .expect("requester subscribes");
    spawn_validator(bus.clone(), behavior);

    let flow = CreatePrescriptionFlow::new(
        Arc::new(store.clone()),
        Arc::new(lock.clone()),
        Arc::new(repository.clone()),
        Arc::new(requester),
        Arc::new(test_clock()),
        Duration::from_secs(30),
        Duration::from_secs(86_400),
    );

    Harness {
        bus,
        store,
        lock,
        repository,
        flow,
    }
}

fn create(id: &str, practitioner: &str) -> CreatePrescription {
    CreatePrescription {
        id: PrescriptionId::new(id),
        practitioner_id: PractitionerId::new(practitioner),
        patient_id: PatientId::new("PAT1"),
        issued_at: Utc::now(),
        diagnosis: "seasonal allergy".to_string(),
        notes: None,
        location: Some("General Hospital".to_string()),
    }
}

#[tokio::test]
async fn validated_creation_stores_and_acknowledges() {
    let h = harness(
        Validator::Approve {
            delay: Duration::ZERO,
        },
        Duration::from_secs(1),
    )
    .await;

    let outcome = h
        .flow
        .handle(create("RX1", "DOC1"))
        .await
        .expect("terminal outcome");

    assert!(outcome.success);
    assert_eq!(outcome.state(), Some(PrescriptionState::Validated));

    let stored = h
        .repository
        .find(&PrescriptionId::new("RX1"))
        .await
        .expect("repository up")
        .expect("row exists");
    assert_eq!(stored.state, PrescriptionState::Validated);

    let key = IdempotencyKey::for_create(&PrescriptionId::new("RX1"));
    assert!(h.store.has(&key).await.expect("store up"));
    assert!(!h.lock.is_held(&key), "lock must be released");
}

#[tokio::test]
async fn redelivery_returns_the_identical_cached_outcome() {
    let h = harness(
        Validator::Approve {
            delay: Duration::ZERO,
        },
        Duration::from_secs(1),
    )
    .await;

    let first = h
        .flow
        .handle(create("RX1", "DOC1"))
        .await
        .expect("terminal outcome");

    for _ in 0..3 {
        let replay = h
            .flow
            .handle(create("RX1", "DOC1"))
            .await
            .expect("cached outcome");
        assert_eq!(replay, first, "redelivery must return the stored outcome");
    }

    assert_eq!(
        h.bus.published_count(topics::VALIDATION_REQUESTS),
        1,
        "no validation round-trip may repeat for a redelivery"
    );
    assert_eq!(h.repository.len(), 1, "exactly one persisted prescription");
}

#[tokio::test]
async fn explicit_rejection_is_a_recorded_business_outcome() {
    let h = harness(Validator::Decline("license expired"), Duration::from_secs(1)).await;

    let outcome = h
        .flow
        .handle(create("RX2", "DOC9"))
        .await
        .expect("terminal outcome");

    assert!(!outcome.success);
    assert_eq!(outcome.state(), Some(PrescriptionState::Rejected));
    assert_eq!(outcome.validation.as_deref(), Some("license expired"));

    // Recorded: a redelivery short-circuits on the rejection too.
    let replay = h
        .flow
        .handle(create("RX2", "DOC9"))
        .await
        .expect("cached outcome");
    assert_eq!(replay, outcome);
    assert_eq!(h.bus.published_count(topics::VALIDATION_REQUESTS), 1);
}

#[tokio::test]
async fn timeout_rejects_with_a_distinguishable_reason() {
    let h = harness(Validator::Silent, Duration::from_millis(50)).await;

    let outcome = h
        .flow
        .handle(create("RX3", "DOC1"))
        .await
        .expect("terminal outcome");

    assert!(!outcome.success);
    assert_eq!(outcome.state(), Some(PrescriptionState::Rejected));
    let reason = outcome.validation.expect("timeout reason recorded");
    assert!(
        reason.contains("timed out"),
        "timeout reason must be distinguishable, got: {reason}"
    );
    assert_ne!(reason, "license expired");

    let key = IdempotencyKey::for_create(&PrescriptionId::new("RX3"));
    assert!(
        h.store.has(&key).await.expect("store up"),
        "timeout outcome is terminal and durably recorded"
    );
    assert!(!h.lock.is_held(&key));
}

#[tokio::test]
async fn concurrent_deliveries_issue_exactly_one_round_trip() {
    let h = harness(
        Validator::Approve {
            delay: Duration::from_millis(100),
        },
        Duration::from_secs(2),
    )
    .await;
    let flow = Arc::new(h.flow);

    let a = {
        let flow = Arc::clone(&flow);
        tokio::spawn(async move { flow.handle(create("RX4", "DOC1")).await })
    };
    let b = {
        let flow = Arc::clone(&flow);
        tokio::spawn(async move { flow.handle(create("RX4", "DOC1")).await })
    };

    let results = [a.await.expect("task"), b.await.expect("task")];

    let mut outcomes = 0;
    let mut contended = 0;
    for result in results {
        match result {
            Ok(outcome) => {
                assert!(outcome.success);
                outcomes += 1;
            }
            Err(ConsumeError::Contended) => contended += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(outcomes >= 1, "at least one delivery completes");
    assert_eq!(outcomes + contended, 2);

    assert_eq!(
        h.bus.published_count(topics::VALIDATION_REQUESTS),
        1,
        "the lock must keep the second delivery away from the validator"
    );
    assert_eq!(h.repository.len(), 1);

    // The contended delivery is requeued by the transport; its rerun
    // short-circuits on the stored outcome.
    let replay = flow
        .handle(create("RX4", "DOC1"))
        .await
        .expect("cached outcome");
    assert!(replay.success);
    assert_eq!(h.bus.published_count(topics::VALIDATION_REQUESTS), 1);
}

#[tokio::test]
async fn existing_business_id_conflicts_without_a_validation_call() {
    let h = harness(
        Validator::Approve {
            delay: Duration::ZERO,
        },
        Duration::from_secs(1),
    )
    .await;

    // A prior, distinct creation attempt already owns this id.
    let mut existing = Prescription::from_create(create("RX5", "DOC1"), test_clock().now());
    existing
        .transition(PrescriptionState::Validated, test_clock().now())
        .expect("legal transition");
    h.repository.insert(&existing).await.expect("seed row");

    let outcome = h
        .flow
        .handle(create("RX5", "DOC1"))
        .await
        .expect("conflict outcome");

    assert!(!outcome.success);
    assert!(outcome.message.contains("already exists"));
    assert_eq!(
        h.bus.published_count(topics::VALIDATION_REQUESTS),
        0,
        "conflicts must not reach the validator"
    );
}

#[tokio::test]
async fn interrupted_attempt_is_resumed_not_conflicted() {
    let h = harness(
        Validator::Approve {
            delay: Duration::ZERO,
        },
        Duration::from_secs(1),
    )
    .await;

    // Simulate a crash after the PENDING insert: row exists, no outcome.
    let pending = Prescription::from_create(create("RX6", "DOC1"), test_clock().now());
    h.repository.insert(&pending).await.expect("seed row");

    let outcome = h
        .flow
        .handle(create("RX6", "DOC1"))
        .await
        .expect("terminal outcome");

    assert!(outcome.success, "the rerun must finish the interrupted attempt");
    assert_eq!(h.repository.len(), 1);
    assert_eq!(h.bus.published_count(topics::VALIDATION_REQUESTS), 1);
}

#[tokio::test]
async fn infrastructure_failure_requeues_and_releases_the_lock() {
    let h = harness(
        Validator::Approve {
            delay: Duration::ZERO,
        },
        Duration::from_secs(1),
    )
    .await;

    h.repository.set_unavailable(true);
    let err = h
        .flow
        .handle(create("RX7", "DOC1"))
        .await
        .expect_err("repository is down");
    assert!(matches!(err, ConsumeError::Infrastructure(_)));

    let key = IdempotencyKey::for_create(&PrescriptionId::new("RX7"));
    assert!(
        !h.lock.is_held(&key),
        "the lock must be released on the failure path"
    );
    assert!(
        !h.store.has(&key).await.expect("store up"),
        "no outcome may be recorded for a failed attempt"
    );

    // The transport redelivers; with the repository back, the rerun
    // completes from scratch.
    h.repository.set_unavailable(false);
    let outcome = h
        .flow
        .handle(create("RX7", "DOC1"))
        .await
        .expect("rerun completes");
    assert!(outcome.success);
}

#[tokio::test]
async fn store_outage_is_requeued_not_silently_reprocessed() {
    let h = harness(
        Validator::Approve {
            delay: Duration::ZERO,
        },
        Duration::from_secs(1),
    )
    .await;

    h.store.set_unavailable(true);
    let err = h
        .flow
        .handle(create("RX8", "DOC1"))
        .await
        .expect_err("store is down");
    assert!(matches!(err, ConsumeError::Infrastructure(_)));
    assert_eq!(
        h.bus.published_count(topics::VALIDATION_REQUESTS),
        0,
        "an unreachable store must not be treated as a miss"
    );
}
