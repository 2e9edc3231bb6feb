//! # rxflow Gateway
//!
//! The HTTP edge of the platform. Every route is a thin forward: the JSON
//! body becomes a typed command, the command goes over the bus with a
//! fresh correlation id, and the correlated reply becomes the JSON
//! response. No business logic lives here; record ownership, validation,
//! and idempotency all happen behind the bus.

pub mod config;
pub mod error;
pub mod routes;

pub use config::Config;
pub use error::GatewayError;
pub use routes::{AppState, router};
