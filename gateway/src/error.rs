//! Gateway error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors a gateway round-trip can produce.
///
/// These cover only the transport between the gateway and the services;
/// business failures (not found, conflict, rejected validation) arrive as
/// ordinary reply payloads with `success: false` and map to 200 responses.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The service did not reply in time.
    #[error("upstream service did not reply in time")]
    Timeout,

    /// The bus could not carry the request.
    #[error("message bus failure: {0}")]
    Bus(String),

    /// A payload could not be encoded or decoded.
    #[error("codec failure: {0}")]
    Codec(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Bus(_) | Self::Codec(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
