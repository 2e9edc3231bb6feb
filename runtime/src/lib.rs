//! # rxflow Runtime
//!
//! Service-side plumbing shared by every rxflow worker:
//!
//! - [`consumer::MessageConsumer`]: a resilient subscribe-process-reconnect
//!   loop that feeds deliveries to a [`consumer::MessageHandler`] and settles
//!   each one with the handler's [`Disposition`](rxflow_core::bus::Disposition)
//! - [`rpc::RpcClient`]: synchronous-looking request/reply over the
//!   asynchronous bus, built on a correlation table and oneshot wakes
//!
//! Neither component knows anything about prescriptions or practitioners;
//! the domain lives in the services that plug into them.

pub mod consumer;
pub mod rpc;

pub use consumer::{MessageConsumer, MessageHandler};
pub use rpc::{RpcClient, RpcError};
