//! Process configuration loaded from the environment at startup.

use crate::error::{GatewayError, Result};

/// Default realtime model id used when `OPENAI_REALTIME_MODEL` is unset.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Default bind address used when `BIND_ADDR` is unset.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Validated process configuration. Constructed once at startup via
/// [`GatewayConfig::from_env`]; immutable thereafter.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bearer credential for the upstream realtime model.
    pub openai_api_key: String,
    /// Upstream realtime model id.
    pub realtime_model: String,
    /// Vector store id searched by the RAG tool, if retrieval is enabled.
    pub vector_store_id: Option<String>,
    /// Allowed CORS origin; `None` means permissive (local/dev).
    pub client_origin: Option<String>,
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: String,
}

impl GatewayConfig {
    /// Load configuration from process environment variables.
    ///
    /// `OPENAI_API_KEY` is the only variable whose absence is a hard
    /// failure; every other field falls back to a sensible default,
    /// per the policy that a gateway with retrieval disabled is still a
    /// valid deployment.
    pub fn from_env() -> Result<Self> {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| GatewayError::config("OPENAI_API_KEY is required"))?;
        if openai_api_key.trim().is_empty() {
            return Err(GatewayError::config("OPENAI_API_KEY must not be empty"));
        }

        let realtime_model = std::env::var("OPENAI_REALTIME_MODEL")
            .unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string());

        let vector_store_id = std::env::var("OPENAI_VECTOR_STORE_ID")
            .ok()
            .filter(|s| !s.trim().is_empty());
        if vector_store_id.is_none() {
            tracing::warn!("OPENAI_VECTOR_STORE_ID not set; rag_search tool will be disabled");
        }

        let client_origin = std::env::var("CLIENT_ORIGIN").ok().filter(|s| !s.trim().is_empty());

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        Ok(Self { openai_api_key, realtime_model, vector_store_id, client_origin, bind_addr })
    }

    /// True if retrieval is configured and the `rag_search` tool should be
    /// registered with the upstream session.
    pub fn retrieval_enabled(&self) -> bool {
        self.vector_store_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_api_key_is_hard_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        let prev = std::env::var("OPENAI_API_KEY").ok();
        unsafe { std::env::remove_var("OPENAI_API_KEY") };
        let result = GatewayConfig::from_env();
        assert!(result.is_err());
        if let Some(v) = prev {
            unsafe { std::env::set_var("OPENAI_API_KEY", v) };
        }
    }

    #[test]
    fn missing_vector_store_disables_retrieval() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("OPENAI_API_KEY", "test-key");
            std::env::remove_var("OPENAI_VECTOR_STORE_ID");
        }
        let cfg = GatewayConfig::from_env().unwrap();
        assert!(!cfg.retrieval_enabled());
    }
}
