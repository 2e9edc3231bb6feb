//! HTTP routes and the bus-forwarding state.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use rxflow_core::bus::topics;
use rxflow_core::message::{CorrelationId, Message, SerializedMessage};
use rxflow_core::practitioner::{CreatePractitioner, Practitioner, PractitionerId, UpdatePractitioner};
use rxflow_core::prescription::{CreatePrescription, Prescription, PrescriptionId, UpdatePrescription};
use rxflow_core::protocol::{ApiResponse, CreateOutcome, PractitionerCommand, PrescriptionCommand};
use rxflow_runtime::{RpcClient, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::error::GatewayError;

/// Shared state: the RPC client and the round-trip bound.
pub struct AppState {
    rpc: RpcClient,
    timeout: Duration,
}

impl AppState {
    /// Create the state from a ready RPC client.
    #[must_use]
    pub const fn new(rpc: RpcClient, timeout: Duration) -> Self {
        Self { rpc, timeout }
    }

    /// Send a command and decode the correlated reply.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Timeout`] when no reply arrives in time,
    /// [`GatewayError::Bus`] on transport failure, and
    /// [`GatewayError::Codec`] when a payload does not round-trip.
    pub async fn round_trip<C, R>(&self, topic: &str, command: &C) -> Result<R, GatewayError>
    where
        C: Message + Serialize,
        R: Message + DeserializeOwned,
    {
        let message = SerializedMessage::from_message(command)
            .map_err(|e| GatewayError::Codec(e.to_string()))?;

        let reply = self
            .rpc
            .request(topic, message, CorrelationId::new(), self.timeout)
            .await
            .map_err(|e| match e {
                RpcError::Timeout(_) => GatewayError::Timeout,
                other => GatewayError::Bus(other.to_string()),
            })?;

        reply
            .decode::<R>()
            .map_err(|e| GatewayError::Codec(e.to_string()))
    }
}

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/practitioners",
            get(list_practitioners).post(create_practitioner),
        )
        .route(
            "/practitioners/:id",
            get(find_practitioner)
                .put(update_practitioner)
                .delete(delete_practitioner),
        )
        .route(
            "/prescriptions",
            get(list_prescriptions).post(create_prescription),
        )
        .route(
            "/prescriptions/:id",
            get(find_prescription)
                .put(update_prescription)
                .delete(delete_prescription),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Practitioner routes
// ---------------------------------------------------------------------------

async fn create_practitioner(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePractitioner>,
) -> Result<Json<ApiResponse<Practitioner>>, GatewayError> {
    let reply = state
        .round_trip(
            topics::PRACTITIONER_COMMANDS,
            &PractitionerCommand::Create(body),
        )
        .await?;
    Ok(Json(reply))
}

async fn list_practitioners(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Practitioner>>>, GatewayError> {
    let reply = state
        .round_trip(topics::PRACTITIONER_COMMANDS, &PractitionerCommand::FindAll)
        .await?;
    Ok(Json(reply))
}

async fn find_practitioner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Practitioner>>, GatewayError> {
    let reply = state
        .round_trip(
            topics::PRACTITIONER_COMMANDS,
            &PractitionerCommand::FindOne {
                id: PractitionerId::new(id),
            },
        )
        .await?;
    Ok(Json(reply))
}

async fn update_practitioner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdatePractitioner>,
) -> Result<Json<ApiResponse<Practitioner>>, GatewayError> {
    let reply = state
        .round_trip(
            topics::PRACTITIONER_COMMANDS,
            &PractitionerCommand::Update {
                id: PractitionerId::new(id),
                update: body,
            },
        )
        .await?;
    Ok(Json(reply))
}

async fn delete_practitioner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Practitioner>>, GatewayError> {
    let reply = state
        .round_trip(
            topics::PRACTITIONER_COMMANDS,
            &PractitionerCommand::Delete {
                id: PractitionerId::new(id),
            },
        )
        .await?;
    Ok(Json(reply))
}

// ---------------------------------------------------------------------------
// Prescription routes
// ---------------------------------------------------------------------------

async fn create_prescription(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePrescription>,
) -> Result<Json<CreateOutcome>, GatewayError> {
    let reply = state
        .round_trip(
            topics::PRESCRIPTION_COMMANDS,
            &PrescriptionCommand::Create(body),
        )
        .await?;
    Ok(Json(reply))
}

async fn list_prescriptions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Prescription>>>, GatewayError> {
    let reply = state
        .round_trip(topics::PRESCRIPTION_COMMANDS, &PrescriptionCommand::FindAll)
        .await?;
    Ok(Json(reply))
}

async fn find_prescription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Prescription>>, GatewayError> {
    let reply = state
        .round_trip(
            topics::PRESCRIPTION_COMMANDS,
            &PrescriptionCommand::FindOne {
                id: PrescriptionId::new(id),
            },
        )
        .await?;
    Ok(Json(reply))
}

async fn update_prescription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdatePrescription>,
) -> Result<Json<ApiResponse<Prescription>>, GatewayError> {
    let reply = state
        .round_trip(
            topics::PRESCRIPTION_COMMANDS,
            &PrescriptionCommand::Update {
                id: PrescriptionId::new(id),
                update: body,
            },
        )
        .await?;
    Ok(Json(reply))
}

async fn delete_prescription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Prescription>>, GatewayError> {
    let reply = state
        .round_trip(
            topics::PRESCRIPTION_COMMANDS,
            &PrescriptionCommand::Delete {
                id: PrescriptionId::new(id),
            },
        )
        .await?;
    Ok(Json(reply))
}
