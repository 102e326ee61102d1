//! Error types for the gateway core.

use thiserror::Error;

/// Result type for gateway core operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur while framing audio, running the upstream session,
/// dispatching tool calls, or looking up the session registry.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Raw audio buffer is empty, odd-length, or otherwise not PCM16.
    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    /// Inbound client frame failed to parse or was missing a required field.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Client frame referenced a channel or type this broker does not route.
    #[error("unknown channel or type: {0}")]
    UnknownRoute(String),

    /// Operation attempted on an upstream session that already closed.
    #[error("session already closed")]
    SessionClosed,

    /// Upstream WebSocket did not complete its handshake in time, or refused it.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream returned a protocol-level error event.
    #[error("upstream error {code}: {message}")]
    UpstreamError {
        /// Error code reported by the upstream, when present.
        code: String,
        /// Human-readable message reported by the upstream.
        message: String,
    },

    /// Retrieval call failed or returned malformed data.
    #[error("tool execution failed: {0}")]
    ToolFailure(String),

    /// A session id was already present in the registry.
    #[error("session already registered: {0}")]
    AlreadyExists(String),

    /// A session id was not found in the registry.
    #[error("session not found: {0}")]
    NotFound(String),

    /// Required configuration was missing or invalid at startup.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP transport error (retrieval calls).
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GatewayError {
    /// Create a new invalid-audio error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAudio(msg.into())
    }

    /// Create a new invalid-message error.
    pub fn message<S: Into<String>>(msg: S) -> Self {
        Self::InvalidMessage(msg.into())
    }

    /// Create a new unknown-route error.
    pub fn route<S: Into<String>>(msg: S) -> Self {
        Self::UnknownRoute(msg.into())
    }

    /// Create a new upstream-unavailable error.
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    /// Create a new upstream protocol error.
    pub fn upstream<S: Into<String>>(code: S, message: S) -> Self {
        Self::UpstreamError { code: code.into(), message: message.into() }
    }

    /// Create a new tool-failure error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::ToolFailure(msg.into())
    }

    /// Create a new config error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }
}
