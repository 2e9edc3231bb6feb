//! # rxflow Testing
//!
//! In-memory fakes for every seam the services depend on, so the full
//! coordination behavior (idempotence, single-flight, lock hygiene,
//! timeout distinctness) can be exercised in plain `#[tokio::test]`s with
//! no broker, no Redis, and no database.
//!
//! - [`bus::InMemoryBus`]: per-topic queues with settlement-driven
//!   redelivery and a publish counter for asserting round-trip counts
//! - [`stores::InMemoryIdempotencyStore`] / [`stores::InMemoryLock`]:
//!   ttl-aware store and lock with an unavailability switch for the
//!   infrastructure-failure paths
//! - [`repos::InMemoryPrescriptionRepository`] /
//!   [`repos::InMemoryPractitionerRepository`]: hash-map repositories
//! - [`mocks::FixedClock`]: deterministic time

pub mod bus;
pub mod mocks;
pub mod repos;
pub mod stores;

pub use bus::InMemoryBus;
pub use mocks::{FixedClock, test_clock};
pub use repos::{InMemoryPractitionerRepository, InMemoryPrescriptionRepository};
pub use stores::{InMemoryIdempotencyStore, InMemoryLock};
