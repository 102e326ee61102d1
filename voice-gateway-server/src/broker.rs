//! Per-connection session broker: owns the client WebSocket, mints a
//! session id, opens one upstream session, and ferries frames between the
//! two sockets under the channel-tagged envelope protocol.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

use voice_gateway_core::registry::SessionEntry;
use voice_gateway_core::tool_executor::{self, ToolOutcome};
use voice_gateway_core::upstream::client::UpstreamEvent;
use voice_gateway_core::{SessionEvent, UpstreamSession};

use crate::app::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CONVERSATION_CHANNEL: &str = "openai:conversation";
const SUMMARIZE_CHANNEL: &str = "sonju:summarize";
const ERROR_CHANNEL: &str = "openai:error";

/// Pending transparent PNG used as a canned reply to `sonju:summarize`.
const PLACEHOLDER_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";

fn mint_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let epoch_ms = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect();
    format!("sonj_{epoch_ms}_{suffix}")
}

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let session_id = mint_session_id();
    let (mut client_tx, mut client_rx) = socket.split();

    let tool_schema = state.config.retrieval_enabled().then(|| rag_search_schema());
    let upstream = match UpstreamSession::open(
        &session_id,
        &state.config.openai_api_key,
        &state.config.realtime_model,
        tool_schema,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "failed to open upstream session");
            let _ = send_envelope(
                &mut client_tx,
                &ErrorEnvelope { channel: ERROR_CHANNEL, code: "503".to_string(), message: e.to_string() },
            )
            .await;
            return;
        }
    };

    let entry = Arc::new(SessionEntry::new(session_id.clone()));
    if state.registry.insert(entry.clone()).is_err() {
        tracing::error!(session_id, "session id collision, aborting connection");
        upstream.close().await;
        return;
    }

    tracing::info!(session_id, "session opened");
    run_session(session_id.clone(), upstream.clone(), entry, client_tx, client_rx, state.clone()).await;

    upstream.close().await;
    state.registry.remove(&session_id);
    tracing::info!(session_id, "session closed");
}

async fn run_session(
    session_id: String,
    upstream: Arc<UpstreamSession>,
    entry: Arc<SessionEntry>,
    mut client_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut client_rx: futures::stream::SplitStream<WebSocket>,
    state: AppState,
) {
    let mut upstream_events = upstream.events();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately; consume it
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            client_msg = client_rx.next() => {
                match client_msg {
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(msg)) => {
                        if handle_client_message(msg, &upstream, &mut client_tx).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session_id, error = %e, "client socket error");
                        break;
                    }
                    None => break,
                }
            }
            upstream_event = upstream_events.next() => {
                match upstream_event {
                    Some(Ok(UpstreamEvent::Session(event))) => {
                        if forward_session_event(event, &mut client_tx).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(UpstreamEvent::FunctionCallDelta { call_id, name, delta })) => {
                        let mut tool_state = entry.tool_state.lock().await;
                        tool_state.push_delta(&call_id, name.as_deref(), &delta);
                    }
                    Some(Ok(UpstreamEvent::FunctionCallDone { call_id, name, arguments })) => {
                        let outcome = {
                            let mut tool_state = entry.tool_state.lock().await;
                            tool_executor::dispatch(
                                &mut tool_state,
                                state.retrieval.as_deref(),
                                &call_id,
                                &name,
                                &arguments,
                            )
                            .await
                        };
                        let output = serde_json::to_value(&outcome).unwrap_or(Value::Null);
                        if upstream.send_tool_output(&call_id, &output).await.is_err() {
                            break;
                        }
                        log_tool_outcome(&session_id, &outcome);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(session_id, error = %e, "upstream error");
                        let _ = send_envelope(&mut client_tx, &ErrorEnvelope {
                            channel: ERROR_CHANNEL,
                            code: "upstream_error".to_string(),
                            message: e.to_string(),
                        }).await;
                        break;
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    tracing::debug!(session_id, "client missed heartbeat pong, closing connection");
                    break;
                }
                if client_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }
}

fn log_tool_outcome(session_id: &str, outcome: &ToolOutcome) {
    match outcome {
        ToolOutcome::Skipped { reason, .. } => tracing::debug!(session_id, reason, "tool call skipped"),
        ToolOutcome::Error { error } => tracing::warn!(session_id, error, "tool call failed"),
        ToolOutcome::Result { low_confidence, count, .. } => {
            tracing::debug!(session_id, low_confidence, count, "tool call dispatched")
        }
    }
}

async fn handle_client_message(
    msg: Message,
    upstream: &Arc<UpstreamSession>,
    client_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    match msg {
        Message::Binary(bytes) => handle_binary(&bytes, upstream, client_tx).await,
        Message::Text(text) => handle_text(&text, upstream, client_tx).await,
        Message::Close(_) => Err(()),
        _ => Ok(()),
    }
}

async fn handle_binary(
    bytes: &[u8],
    upstream: &Arc<UpstreamSession>,
    client_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    let chunks = match voice_gateway_core::audio::to_base64_chunks(bytes, voice_gateway_core::audio::DEFAULT_CHUNK_SIZE) {
        Ok(chunks) => chunks,
        Err(e) => {
            let _ = send_error(client_tx, "400", e.to_string()).await;
            return Ok(());
        }
    };
    for chunk in chunks {
        if upstream.append_audio(&chunk).await.is_err() {
            return Err(());
        }
    }
    Ok(())
}

async fn handle_text(
    text: &str,
    upstream: &Arc<UpstreamSession>,
    client_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            let _ = send_error(client_tx, "400", "invalid JSON".to_string()).await;
            return Ok(());
        }
    };

    let Some(channel) = value.get("channel").and_then(Value::as_str) else {
        let _ = send_error(client_tx, "400", "missing channel".to_string()).await;
        return Ok(());
    };

    match channel {
        CONVERSATION_CHANNEL => handle_conversation(&value, upstream, client_tx).await,
        SUMMARIZE_CHANNEL => handle_summarize(client_tx).await,
        "sonju:suggestedQuestion" | "sonju:officeInfo" => Ok(()),
        other => {
            let _ = send_error(client_tx, "400", format!("unknown channel: {other}")).await;
            Ok(())
        }
    }
}

async fn handle_conversation(
    value: &Value,
    upstream: &Arc<UpstreamSession>,
    client_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    let Some(msg_type) = value.get("type").and_then(Value::as_str) else {
        let _ = send_error(client_tx, "400", "missing type".to_string()).await;
        return Ok(());
    };

    match msg_type {
        "input_audio_buffer.commit" => {
            if upstream.clear_audio().await.is_err() {
                return Err(());
            }
        }
        "input_audio_buffer.append" => {
            let _ = send_error(client_tx, "400", "audio must be sent as a binary frame".to_string()).await;
        }
        "input_audio_buffer.end" => {
            if upstream.commit_audio(&["text", "audio"]).await.is_err() {
                return Err(());
            }
        }
        "input_text" => {
            let text = value.get("text").and_then(Value::as_str).unwrap_or_default();
            if upstream.send_text(text, &["text", "audio"]).await.is_err() {
                return Err(());
            }
        }
        "preprompted" => {
            let option = value.get("enum").and_then(Value::as_str).unwrap_or_default();
            let _ = send_envelope(
                client_tx,
                &json!({ "channel": CONVERSATION_CHANNEL, "type": "preprompted.done", "output": option }),
            )
            .await;
        }
        _ => {}
    }
    Ok(())
}

async fn handle_summarize(client_tx: &mut futures::stream::SplitSink<WebSocket, Message>) -> Result<(), ()> {
    let _ = send_envelope(
        client_tx,
        &json!({
            "channel": SUMMARIZE_CHANNEL,
            "type": "summary.image",
            "image_base64": PLACEHOLDER_PNG_BASE64,
        }),
    )
    .await;
    Ok(())
}

async fn forward_session_event(
    event: SessionEvent,
    client_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    let is_close = matches!(event, SessionEvent::Closed { .. });

    let envelope = match event {
        SessionEvent::TextDelta { output_index, delta } => {
            Some(json!({ "channel": CONVERSATION_CHANNEL, "type": "response.text.delta", "output_index": output_index, "delta": delta }))
        }
        SessionEvent::TextDone { output_index } => {
            Some(json!({ "channel": CONVERSATION_CHANNEL, "type": "response.text.done", "output_index": output_index }))
        }
        SessionEvent::AudioDelta { output_index, delta } => {
            Some(json!({ "channel": CONVERSATION_CHANNEL, "type": "response.audio.delta", "output_index": output_index, "delta": delta }))
        }
        SessionEvent::AudioDone { output_index } => {
            Some(json!({ "channel": CONVERSATION_CHANNEL, "type": "response.audio.done", "output_index": output_index }))
        }
        SessionEvent::TranscriptDelta { output_index, delta } => {
            Some(json!({ "channel": CONVERSATION_CHANNEL, "type": "response.audio_transcript.delta", "output_index": output_index, "delta": delta }))
        }
        SessionEvent::TranscriptDone { output_index } => {
            Some(json!({ "channel": CONVERSATION_CHANNEL, "type": "response.audio_transcript.done", "output_index": output_index }))
        }
        SessionEvent::Error { code, message } => {
            Some(json!({ "channel": ERROR_CHANNEL, "code": code, "message": message }))
        }
        SessionEvent::Closed { code, reason } => {
            let message = if reason.is_empty() { "upstream connection closed".to_string() } else { reason };
            Some(json!({ "channel": ERROR_CHANNEL, "code": code, "message": message }))
        }
        SessionEvent::SessionCreated | SessionEvent::SessionUpdated | SessionEvent::ResponseDone => None,
    };

    if let Some(envelope) = envelope {
        send_envelope(client_tx, &envelope).await.map_err(|_| ())?;
    }

    if is_close {
        return Err(());
    }
    Ok(())
}

async fn send_error(
    client_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    code: &str,
    message: String,
) -> Result<(), ()> {
    send_envelope(client_tx, &ErrorEnvelope { channel: ERROR_CHANNEL, code: code.to_string(), message })
        .await
        .map_err(|_| ())
}

#[derive(Serialize)]
struct ErrorEnvelope {
    channel: &'static str,
    code: String,
    message: String,
}

async fn send_envelope<T: Serialize>(
    client_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    client_tx.send(Message::Text(text.into())).await
}

fn rag_search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string" },
            "mode": { "type": "string", "enum": ["provisional", "final"] },
            "topK": { "type": "integer", "minimum": 1, "maximum": 5 },
            "threshold": { "type": "number", "minimum": 0, "maximum": 1 },
        },
        "required": ["query"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_prefixed_and_unique() {
        let a = mint_session_id();
        let b = mint_session_id();
        assert!(a.starts_with("sonj_"));
        assert_ne!(a, b);
    }

    #[test]
    fn rag_schema_requires_query() {
        let schema = rag_search_schema();
        let required = schema.get("required").and_then(Value::as_array).unwrap();
        assert!(required.contains(&json!("query")));
    }
}
