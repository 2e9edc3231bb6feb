//! Replier-side behavior: the validation responder must answer the same
//! request identically no matter how many times it arrives.

#![allow(clippy::expect_used)] // Test code

use chrono::Utc;
use futures::StreamExt;
use rxflow_core::bus::{Disposition, MessageBus, topics};
use rxflow_core::idempotency::IdempotencyKey;
use rxflow_core::message::{CorrelationId, SerializedMessage};
use rxflow_core::practitioner::{CreatePractitioner, Practitioner, PractitionerId};
use rxflow_core::prescription::{CreatePrescription, PatientId, PrescriptionId};
use rxflow_core::protocol::{
    ApiResponse, PractitionerCommand, ValidationReply, ValidationRequest, ValidationStatus,
};
use rxflow_core::repository::PractitionerRepository;
use rxflow_practitioner_service::PractitionerHandler;
use rxflow_runtime::MessageHandler;
use rxflow_testing::{InMemoryBus, InMemoryIdempotencyStore, InMemoryPractitionerRepository, test_clock};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    bus: InMemoryBus,
    repository: InMemoryPractitionerRepository,
    handler: PractitionerHandler,
}

fn harness() -> Harness {
    let bus = InMemoryBus::new();
    let repository = InMemoryPractitionerRepository::new();
    let handler = PractitionerHandler::new(
        Arc::new(repository.clone()),
        Arc::new(InMemoryIdempotencyStore::new()),
        Arc::new(bus.clone()),
        Arc::new(test_clock()),
        Duration::from_secs(86_400),
    );
    Harness {
        bus,
        repository,
        handler,
    }
}

async fn seed_practitioner(repository: &InMemoryPractitionerRepository, id: &str) {
    repository
        .insert(&Practitioner::from_create(
            CreatePractitioner {
                id: PractitionerId::new(id),
                license_number: format!("LIC-{id}"),
                institution: "General Hospital".to_string(),
                office_location: None,
            },
            Utc::now(),
        ))
        .await
        .expect("seed practitioner");
}

fn validation_message(practitioner: &str, key: &str) -> SerializedMessage {
    let request = ValidationRequest {
        idempotency_key: IdempotencyKey::from_string(key),
        practitioner_id: PractitionerId::new(practitioner),
        prescription_id: PrescriptionId::new("RX1"),
        snapshot: CreatePrescription {
            id: PrescriptionId::new("RX1"),
            practitioner_id: PractitionerId::new(practitioner),
            patient_id: PatientId::new("PAT1"),
            issued_at: Utc::now(),
            diagnosis: "flu".to_string(),
            notes: None,
            location: None,
        },
    };
    SerializedMessage::from_message(&request)
        .expect("encode request")
        .with_correlation(
            &CorrelationId::from_string(key),
            topics::VALIDATION_REPLIES,
        )
}

async fn next_reply(
    stream: &mut rxflow_core::bus::DeliveryStream,
) -> ValidationReply {
    let delivery = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("reply arrives")
        .expect("stream open")
        .expect("no bus error");
    let reply = delivery.message().decode().expect("decode reply");
    delivery.settle(Disposition::Ack);
    reply
}

#[tokio::test]
async fn known_practitioner_is_validated() {
    let h = harness();
    seed_practitioner(&h.repository, "DOC1").await;
    let mut replies = h
        .bus
        .subscribe(&[topics::VALIDATION_REPLIES])
        .await
        .expect("subscribe");

    let disposition = h
        .handler
        .handle(&validation_message("DOC1", "create-prescription:RX1"))
        .await
        .expect("handled");
    assert_eq!(disposition, Disposition::Ack);

    let reply = next_reply(&mut replies).await;
    assert_eq!(reply.status, ValidationStatus::Validated);
    assert!(reply.message.contains("DOC1"));
}

#[tokio::test]
async fn unknown_practitioner_is_rejected() {
    let h = harness();
    let mut replies = h
        .bus
        .subscribe(&[topics::VALIDATION_REPLIES])
        .await
        .expect("subscribe");

    h.handler
        .handle(&validation_message("DOC404", "create-prescription:RX1"))
        .await
        .expect("handled");

    let reply = next_reply(&mut replies).await;
    assert_eq!(reply.status, ValidationStatus::Rejected);
    assert!(reply.message.contains("not found"));
}

#[tokio::test]
async fn duplicate_requests_replay_the_recorded_reply() {
    let h = harness();
    seed_practitioner(&h.repository, "DOC1").await;
    let mut replies = h
        .bus
        .subscribe(&[topics::VALIDATION_REPLIES])
        .await
        .expect("subscribe");

    let message = validation_message("DOC1", "create-prescription:RX1");
    h.handler.handle(&message).await.expect("first request");
    let first = next_reply(&mut replies).await;
    assert_eq!(first.status, ValidationStatus::Validated);

    // The practitioner disappears between the duplicate deliveries; the
    // recorded reply must still be replayed verbatim.
    h.repository
        .delete(&PractitionerId::new("DOC1"))
        .await
        .expect("delete practitioner");

    h.handler.handle(&message).await.expect("duplicate request");
    let second = next_reply(&mut replies).await;
    assert_eq!(second, first, "replier must answer duplicates identically");
}

#[tokio::test]
async fn create_command_conflicts_on_duplicate_license() {
    let h = harness();
    seed_practitioner(&h.repository, "DOC1").await;
    let mut replies = h.bus.subscribe(&["test-replies"]).await.expect("subscribe");

    let command = PractitionerCommand::Create(CreatePractitioner {
        id: PractitionerId::new("DOC2"),
        license_number: "LIC-DOC1".to_string(),
        institution: "City Clinic".to_string(),
        office_location: None,
    });
    let message = SerializedMessage::from_message(&command)
        .expect("encode command")
        .with_correlation(&CorrelationId::new(), "test-replies");

    let disposition = h.handler.handle(&message).await.expect("handled");
    assert_eq!(disposition, Disposition::Ack);

    let delivery = tokio::time::timeout(Duration::from_secs(1), replies.next())
        .await
        .expect("reply arrives")
        .expect("stream open")
        .expect("no bus error");
    let response: ApiResponse<Practitioner> =
        delivery.message().decode().expect("decode response");
    delivery.settle(Disposition::Ack);

    assert!(!response.success);
    assert!(
        response
            .error
            .as_deref()
            .expect("conflict explanation")
            .contains("already exists")
    );
}
