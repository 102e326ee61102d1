//! HTTP process wrapper: a `/health` liveness route, the `/` WebSocket
//! upgrade route, and CORS sourced from configuration. Business logic lives
//! entirely in [`crate::broker`].

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use voice_gateway_core::{GatewayConfig, RetrievalClient, SessionRegistry};

use crate::broker;

/// Shared process state handed to every connection handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<SessionRegistry>,
    pub retrieval: Option<Arc<RetrievalClient>>,
}

impl AppState {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        let retrieval = config.vector_store_id.as_ref().map(|vector_store_id| {
            Arc::new(RetrievalClient::new(config.openai_api_key.clone(), vector_store_id.clone()))
        });
        Self { config, registry: Arc::new(SessionRegistry::new()), retrieval }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = match &state.config.client_origin {
        Some(origin) => CorsLayer::new().allow_origin(
            origin.parse::<axum::http::HeaderValue>().expect("CLIENT_ORIGIN must be a valid header value"),
        ),
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(ws_upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| broker::handle_connection(socket, state))
}
