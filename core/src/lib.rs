//! # rxflow Core
//!
//! Core domain types and coordination traits for the rxflow prescription
//! platform.
//!
//! rxflow coordinates creation of a prescription record that must be
//! cross-validated against a practitioner record owned by a separate
//! service, reachable only through asynchronous message exchange. The
//! guarantee the platform provides is *effective-once processing* on top of
//! an at-least-once transport: duplicate delivery of the same creation
//! request never produces duplicate side effects or duplicate outbound
//! validation calls.
//!
//! ## Core Concepts
//!
//! - **Lifecycle engine** ([`prescription`]): the prescription state
//!   machine (`Pending → Validated | Rejected`) with terminal-state
//!   enforcement
//! - **Message bus** ([`bus`]): publish/subscribe with explicit per-delivery
//!   settlement ([`bus::Disposition`]) so the handler, not the transport,
//!   decides acknowledge vs requeue
//! - **Idempotency** ([`idempotency`]): durable result store plus a
//!   ttl-bounded distributed lock, both keyed by a deterministic
//!   [`idempotency::IdempotencyKey`]
//! - **Protocol** ([`protocol`]): the typed commands, validation
//!   request/reply pair, and outcome payloads exchanged between services
//! - **Repositories** ([`repository`]): record persistence seams the
//!   coordination layer treats as black boxes
//!
//! ## Architecture Principles
//!
//! - All coordination state is externalized to shared stores; worker
//!   processes hold no cross-request mutable state
//! - Infrastructure failure and business rejection are distinct types at
//!   every seam, never conflated in one error channel
//! - Dependencies are injected handles with explicit connection lifecycles

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod bus;
pub mod environment;
pub mod idempotency;
pub mod message;
pub mod practitioner;
pub mod prescription;
pub mod protocol;
pub mod repository;
