//! # voice-gateway-core
//!
//! Core of a realtime voice-assistant session broker: audio framing, the
//! upstream realtime-model WebSocket session, a RAG tool executor, and the
//! process-wide session registry.
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!                 │              Broker (server crate)        │
//!                 └───────────────┬────────────────────────────┘
//!                                 │
//!        ┌────────────────────────┼─────────────────────────┐
//!        │                        │                          │
//! ┌──────▼───────┐       ┌────────▼─────────┐       ┌────────▼────────┐
//! │ SessionRegistry│      │  UpstreamSession  │       │   ToolExecutor   │
//! │ (id -> entry)  │      │ (one WS per call) │◄─────►│ (RAG dispatch)   │
//! └────────────────┘      └───────────────────┘       └──────┬───────────┘
//!                                                              │
//!                                                      ┌───────▼────────┐
//!                                                      │ RetrievalClient │
//!                                                      └─────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod registry;
pub mod retrieval;
pub mod tool_executor;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use registry::{SessionEntry, SessionRegistry};
pub use retrieval::{RetrievalClient, SearchParams, Snippet};
pub use upstream::{SessionEvent, UpstreamSession, UpstreamState};
