//! # rxflow Prescription Service
//!
//! Owns prescription records and the **idempotent creation flow**: the one
//! path in the platform with real concurrency and failure-handling design.
//!
//! ```text
//! creation message ──► PrescriptionHandler
//!                            │
//!                            ▼
//!                   ┌─────────────────────┐   hit
//!                   │ idempotency store   ├─────────► cached outcome, ack
//!                   └─────────┬───────────┘
//!                             │ miss
//!                             ▼
//!                   ┌─────────────────────┐   denied
//!                   │  distributed lock   ├─────────► requeue (no ack)
//!                   └─────────┬───────────┘
//!                             │ granted
//!                             ▼
//!                 re-check store ── create PENDING row
//!                             │
//!                             ▼
//!                 validation round-trip (bounded wait)
//!                             │
//!                             ▼
//!              VALIDATED / REJECTED transition, store
//!              outcome, release lock, reply, ack
//! ```
//!
//! Everything else in this crate (the find/update/delete handlers) is
//! ordinary CRUD around the record.

pub mod config;
pub mod consumer;
pub mod handlers;
pub mod validation;

pub use config::Config;
pub use consumer::{ConsumeError, CreatePrescriptionFlow};
pub use handlers::PrescriptionHandler;
pub use validation::{ValidationRequestError, ValidationRequester};
