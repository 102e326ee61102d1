//! WebSocket client for the upstream realtime model.

use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::Stream;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{GatewayError, Result};
use crate::upstream::protocol::{ClientEvent, ConversationItem, ServerEvent, SessionEvent};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

const UPSTREAM_URL: &str = "wss://api.openai.com/v1/realtime";
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Coarse lifecycle state of one upstream session, per the gateway's state
/// machine: Connecting -> Ready -> Awaiting-Response/Updating -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    Connecting,
    Ready,
    AwaitingResponse,
    Updating,
    Closed,
}

/// An event surfaced by the upstream session. `FunctionCallDelta`/`Done`
/// are consumed by the tool executor and never forwarded to broker
/// subscribers as-is; everything else maps onto [`SessionEvent`].
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Session(SessionEvent),
    FunctionCallDelta { call_id: String, name: Option<String>, delta: String },
    FunctionCallDone { call_id: String, name: String, arguments: String },
}

/// One outbound WebSocket connection to the upstream realtime model.
pub struct UpstreamSession {
    session_id: String,
    state: StdMutex<UpstreamState>,
    connected: Arc<AtomicBool>,
    sink: Arc<Mutex<WsSink>>,
    source: Arc<Mutex<WsSource>>,
    instructions_hash: StdMutex<Option<u64>>,
    keepalive: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UpstreamSession {
    /// Open a connection, submit the initial `session.update`, and start
    /// the keepalive ping loop.
    pub async fn open(
        session_id: impl Into<String>,
        api_key: &str,
        model: &str,
        tool_schema: Option<Value>,
    ) -> Result<Arc<Self>> {
        let session_id = session_id.into();
        let url = format!("{UPSTREAM_URL}?model={model}");
        let mut request = url
            .into_client_request()
            .map_err(|e| GatewayError::unavailable(format!("invalid upstream url: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {api_key}")
                .parse()
                .map_err(|e| GatewayError::unavailable(format!("invalid api key header: {e}")))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            tokio_tungstenite::tungstenite::http::HeaderValue::from_static("realtime=v1"),
        );

        let ws_stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| GatewayError::unavailable("upstream handshake timed out"))?
            .map_err(|e| GatewayError::unavailable(format!("upstream connect failed: {e}")))?
            .0;

        let (sink, source) = ws_stream.split();

        let session = Arc::new(Self {
            session_id,
            state: StdMutex::new(UpstreamState::Connecting),
            connected: Arc::new(AtomicBool::new(true)),
            sink: Arc::new(Mutex::new(sink)),
            source: Arc::new(Mutex::new(source)),
            instructions_hash: StdMutex::new(None),
            keepalive: Mutex::new(None),
        });

        session.send_initial_session_update(tool_schema).await?;
        session.start_keepalive().await;
        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> UpstreamState {
        *self.state.lock().unwrap()
    }

    async fn send_initial_session_update(&self, tool_schema: Option<Value>) -> Result<()> {
        let mut tools = Vec::new();
        if let Some(schema) = tool_schema {
            tools.push(json!({
                "type": "function",
                "name": "rag_search",
                "description": "Search the knowledge base for relevant context.",
                "parameters": schema,
            }));
        }

        let session = json!({
            "modalities": ["text", "audio"],
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": { "model": "whisper-1" },
            "turn_detection": null,
            "temperature": 0.7,
            "max_response_output_tokens": 350,
            "tools": tools,
        });

        self.send_raw(&ClientEvent::SessionUpdate { session }).await?;
        Ok(())
    }

    async fn start_keepalive(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else { break };
                if !session.is_connected() {
                    break;
                }
                let mut sink = session.sink.lock().await;
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    session.connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });
        *self.keepalive.lock().await = Some(handle);
    }

    async fn send_raw(&self, event: &ClientEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(GatewayError::SessionClosed);
        }
        let text = serde_json::to_string(event)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(GatewayError::from)
    }

    /// Append one base64-encoded PCM16 chunk to the input audio buffer.
    pub async fn append_audio(&self, base64_chunk: &str) -> Result<()> {
        self.send_raw(&ClientEvent::AudioAppend { audio: base64_chunk.to_string() }).await
    }

    /// Commit the input audio buffer and request a response.
    pub async fn commit_audio(&self, modalities: &[&str]) -> Result<()> {
        self.send_raw(&ClientEvent::AudioCommit).await?;
        self.request_response(modalities).await
    }

    /// Discard the uncommitted input audio buffer.
    pub async fn clear_audio(&self) -> Result<()> {
        self.send_raw(&ClientEvent::AudioClear).await
    }

    /// Send a user text message and request a response.
    pub async fn send_text(&self, text: &str, modalities: &[&str]) -> Result<()> {
        self.send_raw(&ClientEvent::ConversationItemCreate { item: ConversationItem::user_text(text) })
            .await?;
        self.request_response(modalities).await
    }

    /// Send a text-only message and await the full reply inline, bypassing
    /// the subscriber event stream. Resolves with the concatenated
    /// `response.text.delta` payloads and the raw `response.done` body once
    /// it arrives; fails on an `error` frame with the upstream message.
    pub async fn send_text_await(&self, text: &str) -> Result<(String, Value)> {
        self.send_raw(&ClientEvent::ConversationItemCreate { item: ConversationItem::user_text(text) })
            .await?;
        self.request_response(&["text"]).await?;

        let mut full_text = String::new();
        loop {
            let mut source = self.source.lock().await;
            let frame = source.next().await;
            drop(source);
            match frame {
                Some(Ok(Message::Text(raw))) => {
                    let event: ServerEvent = serde_json::from_str(&raw)?;
                    match event {
                        ServerEvent::TextDelta { delta, .. } => full_text.push_str(&delta),
                        ServerEvent::ResponseDone { response } => {
                            *self.state.lock().unwrap() = UpstreamState::Ready;
                            return Ok((full_text, response));
                        }
                        ServerEvent::Error { error } => {
                            *self.state.lock().unwrap() = UpstreamState::Closed;
                            return Err(GatewayError::upstream(
                                error.code.unwrap_or_default(),
                                error.message,
                            ));
                        }
                        _ => {}
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.connected.store(false, Ordering::SeqCst);
                    *self.state.lock().unwrap() = UpstreamState::Closed;
                    return Err(GatewayError::SessionClosed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(GatewayError::from(e)),
            }
        }
    }

    /// Answer a tool call with its output.
    pub async fn send_tool_output(&self, call_id: &str, output: &Value) -> Result<()> {
        let output_str = serde_json::to_string(output)?;
        self.send_raw(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::tool_output(call_id, output_str),
        })
        .await?;
        self.request_response(&["text", "audio"]).await
    }

    async fn request_response(&self, modalities: &[&str]) -> Result<()> {
        *self.state.lock().unwrap() = UpstreamState::AwaitingResponse;
        self.send_raw(&ClientEvent::ResponseCreate {
            response: Some(json!({ "modalities": modalities })),
        })
        .await
    }

    /// Submit a `session.update` carrying new instructions, unless the
    /// instructions are unchanged since the last accepted submission.
    pub async fn maybe_update_instructions(&self, instructions: &str) -> Result<bool> {
        let hash = hash_str(instructions);
        {
            let current = self.instructions_hash.lock().unwrap();
            if *current == Some(hash) {
                return Ok(false);
            }
        }
        *self.state.lock().unwrap() = UpstreamState::Updating;
        self.send_raw(&ClientEvent::SessionUpdate { session: json!({ "instructions": instructions }) })
            .await?;
        *self.instructions_hash.lock().unwrap() = Some(hash);
        Ok(true)
    }

    /// Read and translate the next raw upstream frame. Returns `Ok(None)`
    /// for frames that carry no subscriber-visible event (e.g. a non-text
    /// websocket control frame) without ending the stream.
    async fn receive_raw(&self) -> Option<Result<Option<UpstreamEvent>>> {
        let mut source = self.source.lock().await;
        match source.next().await {
            Some(Ok(Message::Text(text))) => Some(self.translate(&text)),
            Some(Ok(Message::Close(frame))) => {
                self.connected.store(false, Ordering::SeqCst);
                *self.state.lock().unwrap() = UpstreamState::Closed;
                let (code, reason) = match frame {
                    Some(f) => (u16::from(f.code), f.reason.to_string()),
                    None => (1006, String::new()),
                };
                Some(Ok(Some(UpstreamEvent::Session(SessionEvent::Closed { code, reason }))))
            }
            Some(Ok(_)) => Some(Ok(None)),
            Some(Err(e)) => {
                self.connected.store(false, Ordering::SeqCst);
                *self.state.lock().unwrap() = UpstreamState::Closed;
                Some(Err(GatewayError::from(e)))
            }
            None => {
                self.connected.store(false, Ordering::SeqCst);
                *self.state.lock().unwrap() = UpstreamState::Closed;
                None
            }
        }
    }

    fn translate(&self, raw: &str) -> Result<Option<UpstreamEvent>> {
        let event: ServerEvent = serde_json::from_str(raw)?;
        let mut state = self.state.lock().unwrap();
        let translated = match event {
            ServerEvent::SessionCreated { .. } => {
                *state = UpstreamState::Ready;
                Some(UpstreamEvent::Session(SessionEvent::SessionCreated))
            }
            ServerEvent::SessionUpdated { .. } => {
                *state = UpstreamState::Ready;
                Some(UpstreamEvent::Session(SessionEvent::SessionUpdated))
            }
            ServerEvent::Error { error } => {
                *state = UpstreamState::Closed;
                Some(UpstreamEvent::Session(SessionEvent::Error {
                    code: error.code.unwrap_or_default(),
                    message: error.message,
                }))
            }
            ServerEvent::TextDelta { output_index, delta } => {
                Some(UpstreamEvent::Session(SessionEvent::TextDelta { output_index, delta }))
            }
            ServerEvent::TextDone { output_index, .. } => {
                Some(UpstreamEvent::Session(SessionEvent::TextDone { output_index }))
            }
            ServerEvent::AudioDelta { output_index, delta } => {
                Some(UpstreamEvent::Session(SessionEvent::AudioDelta { output_index, delta }))
            }
            ServerEvent::AudioDone { output_index } => {
                Some(UpstreamEvent::Session(SessionEvent::AudioDone { output_index }))
            }
            ServerEvent::TranscriptDelta { output_index, delta } => {
                Some(UpstreamEvent::Session(SessionEvent::TranscriptDelta { output_index, delta }))
            }
            ServerEvent::TranscriptDone { output_index, .. } => {
                Some(UpstreamEvent::Session(SessionEvent::TranscriptDone { output_index }))
            }
            ServerEvent::FunctionCallDelta { call_id, name, delta } => {
                Some(UpstreamEvent::FunctionCallDelta { call_id, name, delta })
            }
            ServerEvent::FunctionCallDone { call_id, name, arguments } => {
                Some(UpstreamEvent::FunctionCallDone { call_id, name, arguments })
            }
            ServerEvent::ResponseDone { .. } => {
                *state = UpstreamState::Ready;
                Some(UpstreamEvent::Session(SessionEvent::ResponseDone))
            }
            ServerEvent::Unknown => None,
        };
        Ok(translated)
    }

    /// Stream of translated upstream events.
    pub fn events(self: &Arc<Self>) -> Pin<Box<dyn Stream<Item = Result<UpstreamEvent>> + Send>> {
        let session = Arc::clone(self);
        Box::pin(async_stream::stream! {
            while session.is_connected() {
                match session.receive_raw().await {
                    Some(Ok(Some(event))) => yield Ok(event),
                    Some(Ok(None)) => continue,
                    Some(Err(e)) => yield Err(e),
                    None => break,
                }
            }
        })
    }

    /// Close the upstream socket. Cancels the keepalive loop; subsequent
    /// operations fail with [`GatewayError::SessionClosed`].
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.state.lock().unwrap() = UpstreamState::Closed;
        if let Some(handle) = self.keepalive.lock().await.take() {
            handle.abort();
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
    }
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_str_is_stable_and_discriminates() {
        assert_eq!(hash_str("same instructions"), hash_str("same instructions"));
        assert_ne!(hash_str("instructions a"), hash_str("instructions b"));
    }
}
