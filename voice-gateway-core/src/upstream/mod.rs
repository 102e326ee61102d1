//! Upstream realtime-model session.
//!
//! Owns one outbound WebSocket to the model service, serializes the wire
//! protocol (`protocol`), and exposes a typed event stream plus imperative
//! operations to the broker.

pub mod client;
pub mod protocol;

pub use client::{UpstreamSession, UpstreamState};
pub use protocol::SessionEvent;
