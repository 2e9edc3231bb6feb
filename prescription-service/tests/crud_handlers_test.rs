//! CRUD command handling for the prescription service.

#![allow(clippy::expect_used)] // Test code

use chrono::Utc;
use futures::StreamExt;
use rxflow_core::bus::{Disposition, MessageBus, topics};
use rxflow_core::message::{CorrelationId, SerializedMessage};
use rxflow_core::practitioner::PractitionerId;
use rxflow_core::prescription::{
    CreatePrescription, PatientId, Prescription, PrescriptionId, PrescriptionState,
    UpdatePrescription,
};
use rxflow_core::protocol::{ApiResponse, PrescriptionCommand};
use rxflow_core::repository::PrescriptionRepository;
use rxflow_prescription_service::{
    CreatePrescriptionFlow, PrescriptionHandler, ValidationRequester,
};
use rxflow_runtime::MessageHandler;
use rxflow_testing::{
    InMemoryBus, InMemoryIdempotencyStore, InMemoryLock, InMemoryPrescriptionRepository,
    test_clock,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    bus: InMemoryBus,
    repository: InMemoryPrescriptionRepository,
    handler: PrescriptionHandler,
}

async fn harness() -> Harness {
    let bus = InMemoryBus::new();
    let repository = InMemoryPrescriptionRepository::new();

    let requester = ValidationRequester::new(
        Arc::new(bus.clone()),
        topics::VALIDATION_REPLIES,
        Duration::from_millis(100),
    )
    .await
    .expect("requester subscribes");
    let flow = Arc::new(CreatePrescriptionFlow::new(
        Arc::new(InMemoryIdempotencyStore::new()),
        Arc::new(InMemoryLock::new()),
        Arc::new(repository.clone()),
        Arc::new(requester),
        Arc::new(test_clock()),
        Duration::from_secs(30),
        Duration::from_secs(86_400),
    ));
    let handler = PrescriptionHandler::new(
        flow,
        Arc::new(repository.clone()),
        Arc::new(bus.clone()),
        Arc::new(test_clock()),
    );

    Harness {
        bus,
        repository,
        handler,
    }
}

fn seeded_prescription(id: &str, state: PrescriptionState) -> Prescription {
    let mut p = Prescription::from_create(
        CreatePrescription {
            id: PrescriptionId::new(id),
            practitioner_id: PractitionerId::new("DOC1"),
            patient_id: PatientId::new("PAT1"),
            issued_at: Utc::now(),
            diagnosis: "flu".to_string(),
            notes: None,
            location: None,
        },
        Utc::now(),
    );
    if state != PrescriptionState::Pending {
        p.transition(state, Utc::now()).expect("legal transition");
    }
    p
}

fn command_message(command: &PrescriptionCommand) -> SerializedMessage {
    SerializedMessage::from_message(command)
        .expect("encode command")
        .with_correlation(&CorrelationId::new(), "test-replies")
}

async fn next_response(
    stream: &mut rxflow_core::bus::DeliveryStream,
) -> ApiResponse<Prescription> {
    let delivery = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("reply arrives")
        .expect("stream open")
        .expect("no bus error");
    let response = delivery.message().decode().expect("decode response");
    delivery.settle(Disposition::Ack);
    response
}

#[tokio::test]
async fn find_one_replies_with_the_record() {
    let h = harness().await;
    h.repository
        .insert(&seeded_prescription("RX1", PrescriptionState::Validated))
        .await
        .expect("seed");
    let mut replies = h.bus.subscribe(&["test-replies"]).await.expect("subscribe");

    let disposition = h
        .handler
        .handle(&command_message(&PrescriptionCommand::FindOne {
            id: PrescriptionId::new("RX1"),
        }))
        .await
        .expect("handled");
    assert_eq!(disposition, Disposition::Ack);

    let response = next_response(&mut replies).await;
    assert!(response.success);
    assert_eq!(
        response.data.expect("record present").state,
        PrescriptionState::Validated
    );
}

#[tokio::test]
async fn find_one_reports_missing_records() {
    let h = harness().await;
    let mut replies = h.bus.subscribe(&["test-replies"]).await.expect("subscribe");

    h.handler
        .handle(&command_message(&PrescriptionCommand::FindOne {
            id: PrescriptionId::new("RX404"),
        }))
        .await
        .expect("handled");

    let response = next_response(&mut replies).await;
    assert!(!response.success);
    assert!(
        response
            .error
            .as_deref()
            .expect("explanation")
            .contains("not found")
    );
}

#[tokio::test]
async fn rejected_prescriptions_refuse_updates() {
    let h = harness().await;
    h.repository
        .insert(&seeded_prescription("RX2", PrescriptionState::Rejected))
        .await
        .expect("seed");
    let mut replies = h.bus.subscribe(&["test-replies"]).await.expect("subscribe");

    let disposition = h
        .handler
        .handle(&command_message(&PrescriptionCommand::Update {
            id: PrescriptionId::new("RX2"),
            update: UpdatePrescription {
                diagnosis: Some("revised".to_string()),
                ..UpdatePrescription::default()
            },
        }))
        .await
        .expect("handled");
    assert_eq!(disposition, Disposition::Ack, "a refusal is still acked");

    let response = next_response(&mut replies).await;
    assert!(!response.success);
    assert!(
        response
            .error
            .as_deref()
            .expect("explanation")
            .contains("rejected")
    );

    let stored = h
        .repository
        .find(&PrescriptionId::new("RX2"))
        .await
        .expect("repository up")
        .expect("row exists");
    assert_eq!(stored.diagnosis, "flu", "rejected rows must stay untouched");
}

#[tokio::test]
async fn pending_prescriptions_accept_updates() {
    let h = harness().await;
    h.repository
        .insert(&seeded_prescription("RX3", PrescriptionState::Pending))
        .await
        .expect("seed");
    let mut replies = h.bus.subscribe(&["test-replies"]).await.expect("subscribe");

    h.handler
        .handle(&command_message(&PrescriptionCommand::Update {
            id: PrescriptionId::new("RX3"),
            update: UpdatePrescription {
                notes: Some("take with food".to_string()),
                ..UpdatePrescription::default()
            },
        }))
        .await
        .expect("handled");

    let response = next_response(&mut replies).await;
    assert!(response.success);
    assert_eq!(
        response.data.expect("record present").notes.as_deref(),
        Some("take with food")
    );
}

#[tokio::test]
async fn delete_reports_success_and_absence() {
    let h = harness().await;
    h.repository
        .insert(&seeded_prescription("RX4", PrescriptionState::Pending))
        .await
        .expect("seed");
    let mut replies = h.bus.subscribe(&["test-replies"]).await.expect("subscribe");

    h.handler
        .handle(&command_message(&PrescriptionCommand::Delete {
            id: PrescriptionId::new("RX4"),
        }))
        .await
        .expect("handled");
    let response = next_response(&mut replies).await;
    assert!(response.success);
    assert_eq!(h.repository.len(), 0);

    h.handler
        .handle(&command_message(&PrescriptionCommand::Delete {
            id: PrescriptionId::new("RX4"),
        }))
        .await
        .expect("handled");
    let response = next_response(&mut replies).await;
    assert!(!response.success);
}

#[tokio::test]
async fn undecodable_commands_are_dropped_not_requeued() {
    let h = harness().await;

    let garbage = SerializedMessage::new(
        "prescription.create.v1".to_string(),
        vec![0xFF, 0xFF, 0xFF],
        None,
    );
    let disposition = h.handler.handle(&garbage).await.expect("handled");
    assert_eq!(
        disposition,
        Disposition::Ack,
        "poison messages must not wedge the topic"
    );
}
