//! Inter-agent communication bus for the Conductor workspace.
//!
//! Point-to-point and topic messaging with priority-based response timeouts,
//! bounded delivery retries, a failed-message ring buffer and
//! request/response correlation.
//!
//! # Main types
//!
//! - [`CommunicationBus`] — Queue, delivery loop, mailboxes and topics.
//! - [`AgentMessage`] — A message owned by the bus until delivered or dropped.
//! - [`MessageType`] / [`MessagePriority`] — Closed message kinds and priority tiers.
//! - [`CommunicationMetrics`] — Read-only activity snapshot.

/// The bus and its background loops.
pub mod bus;
/// Bus configuration.
pub mod config;
/// Message types.
pub mod message;

pub use bus::{CommunicationBus, CommunicationMetrics, PendingResponse};
pub use config::BusConfig;
pub use message::{AgentMessage, MessagePriority, MessageType};
