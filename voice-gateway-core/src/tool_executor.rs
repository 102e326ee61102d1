//! Tool-call coalescing and dispatch.
//!
//! The upstream streams function-call arguments as deltas keyed by
//! `call_id`; this module buffers them per call, dispatches the completed
//! call through the retrieval client once the deltas are done, and applies
//! rate-limiting and low-confidence escalation on top of the raw result.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::retrieval::{format_context, RetrievalClient, SearchParams, Snippet};

/// Minimum spacing between two `rag_search` dispatches in the same session.
pub const RATE_LIMIT: Duration = Duration::from_millis(1_200);

/// RAG cache entry time-to-live.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Escalate to the "contact a human" message after this many consecutive
/// low-confidence results.
pub const ESCALATION_THRESHOLD: u32 = 3;

const LOW_CONFIDENCE_MESSAGE: &str = "관련 문서를 찾지 못했습니다. 다른 표현으로 다시 질문해 주세요.";
const ESCALATION_MESSAGE: &str = "관련 문서를 계속 찾지 못하고 있습니다…";

/// Mutable, per-session tool-dispatch state: pending argument buffers,
/// rate-limit timestamp, the low-confidence streak, and the RAG cache.
#[derive(Default)]
pub struct SessionToolState {
    pending: HashMap<String, PendingCall>,
    last_tool_at: Option<Instant>,
    low_confidence_count: u32,
    cache: HashMap<String, CacheEntry>,
}

struct PendingCall {
    name: String,
    arguments: String,
}

struct CacheEntry {
    context: String,
    sources: Vec<Snippet>,
    inserted_at: Instant,
}

/// Normalized `rag_search` call parameters.
#[derive(Debug, Clone)]
struct RagArgs {
    query: String,
    mode: RagMode,
    top_k: usize,
    threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RagMode {
    Provisional,
    Final,
}

/// Outcome of a completed tool dispatch, ready to serialize into a
/// `tool.output` frame.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ToolOutcome {
    Skipped { skipped: bool, reason: String },
    Error { error: String },
    Result {
        context: String,
        sources: Vec<String>,
        count: usize,
        mode: String,
        #[serde(rename = "lowConfidence", skip_serializing_if = "is_false")]
        low_confidence: bool,
        #[serde(rename = "lowConfidenceCount", skip_serializing_if = "Option::is_none")]
        low_confidence_count: Option<u32>,
    },
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl SessionToolState {
    /// Record one argument delta for `call_id`, creating the pending entry
    /// on first sight.
    pub fn push_delta(&mut self, call_id: &str, name: Option<&str>, delta: &str) {
        let entry = self.pending.entry(call_id.to_string()).or_insert_with(|| PendingCall {
            name: name.unwrap_or_default().to_string(),
            arguments: String::new(),
        });
        if entry.name.is_empty() {
            if let Some(n) = name {
                entry.name = n.to_string();
            }
        }
        entry.arguments.push_str(delta);
    }

    /// Take the accumulated arguments for `call_id`, removing the pending
    /// entry. Returns `None` if no delta was ever seen for this call.
    fn take(&mut self, call_id: &str, name: &str) -> (String, String) {
        match self.pending.remove(call_id) {
            Some(p) => (if p.name.is_empty() { name.to_string() } else { p.name }, p.arguments),
            None => (name.to_string(), String::new()),
        }
    }
}

/// Dispatches a completed tool call (`response.function_call_arguments.done`)
/// and returns the serialized `tool.output` payload.
pub async fn dispatch(
    state: &mut SessionToolState,
    retrieval: Option<&RetrievalClient>,
    call_id: &str,
    name: &str,
    final_arguments: &str,
) -> ToolOutcome {
    let (resolved_name, buffered) = state.take(call_id, name);
    let raw_args = if final_arguments.is_empty() { &buffered } else { final_arguments };

    let now = Instant::now();
    if let Some(last) = state.last_tool_at {
        if now.duration_since(last) < RATE_LIMIT {
            return ToolOutcome::Skipped { skipped: true, reason: "rate_limited".to_string() };
        }
    }
    state.last_tool_at = Some(now);

    if resolved_name != "rag_search" {
        return ToolOutcome::Error { error: "unknown tool".to_string() };
    }

    let args: Value = serde_json::from_str(raw_args).unwrap_or(Value::Object(Default::default()));
    let rag_args = match parse_rag_args(&args) {
        Some(a) => a,
        None => return ToolOutcome::Error { error: "empty query".to_string() },
    };

    let Some(retrieval) = retrieval else {
        return ToolOutcome::Error { error: "retrieval not configured".to_string() };
    };

    let (effective_top_k, effective_threshold, max_chars) = match rag_args.mode {
        RagMode::Provisional => (rag_args.top_k.min(1), rag_args.threshold.max(0.4), 120),
        RagMode::Final => (rag_args.top_k, rag_args.threshold, 200),
    };
    let params = SearchParams { top_k: effective_top_k, threshold: effective_threshold, max_chars };

    let cache_key = normalize_query(&rag_args.query);
    let cached = state
        .cache
        .get(&cache_key)
        .filter(|entry| entry.inserted_at.elapsed() < CACHE_TTL);

    let (context, sources) = if let Some(entry) = cached {
        debug!(call_id, "rag cache hit");
        (entry.context.clone(), entry.sources.clone())
    } else {
        let snippets = match retrieval.search(&rag_args.query, params).await {
            Ok(s) => s,
            Err(e) => {
                warn!(call_id, error = %e, "retrieval call failed");
                return ToolOutcome::Error { error: e.to_string() };
            }
        };
        let context = format_context(&snippets);
        state.cache.insert(
            cache_key,
            CacheEntry { context: context.clone(), sources: snippets.clone(), inserted_at: now },
        );
        (context, snippets)
    };

    let top_score = sources.first().map(|s| s.score).unwrap_or(0.0);
    let low_confidence = sources.is_empty() || top_score < params.threshold;

    let mode_str = match rag_args.mode {
        RagMode::Provisional => "provisional",
        RagMode::Final => "final",
    };

    if low_confidence {
        state.low_confidence_count += 1;
        let message = if state.low_confidence_count >= ESCALATION_THRESHOLD {
            ESCALATION_MESSAGE
        } else {
            LOW_CONFIDENCE_MESSAGE
        };
        ToolOutcome::Result {
            context: message.to_string(),
            sources: Vec::new(),
            count: 0,
            mode: mode_str.to_string(),
            low_confidence: true,
            low_confidence_count: Some(state.low_confidence_count),
        }
    } else {
        state.low_confidence_count = 0;
        let count = sources.len();
        let tool_sources = sources.iter().map(|s| s.metadata.file_id.clone()).collect();
        ToolOutcome::Result {
            context,
            sources: tool_sources,
            count,
            mode: mode_str.to_string(),
            low_confidence: false,
            low_confidence_count: None,
        }
    }
}

fn parse_rag_args(value: &Value) -> Option<RagArgs> {
    let query = value.get("query").and_then(Value::as_str).unwrap_or("").trim();
    if query.is_empty() {
        return None;
    }
    let mode = match value.get("mode").and_then(Value::as_str) {
        Some("provisional") => RagMode::Provisional,
        _ => RagMode::Final,
    };
    let top_k = value.get("topK").and_then(Value::as_u64).map(|n| n as usize).unwrap_or(2).clamp(1, 5);
    let threshold = value.get("threshold").and_then(Value::as_f64).map(|n| n as f32).unwrap_or(0.3);
    Some(RagArgs { query: query.to_string(), mode, top_k, threshold })
}

fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let mut state = SessionToolState::default();
        let outcome = dispatch(&mut state, None, "call_1", "other_tool", "{}").await;
        assert!(matches!(outcome, ToolOutcome::Error { error } if error == "unknown tool"));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let mut state = SessionToolState::default();
        let outcome = dispatch(&mut state, None, "call_1", "rag_search", r#"{"query":"  "}"#).await;
        assert!(matches!(outcome, ToolOutcome::Error { error } if error == "empty query"));
    }

    #[tokio::test]
    async fn rate_limit_skips_second_call() {
        let mut state = SessionToolState::default();
        state.last_tool_at = Some(Instant::now());
        let outcome =
            dispatch(&mut state, None, "call_2", "rag_search", r#"{"query":"hello"}"#).await;
        assert!(matches!(outcome, ToolOutcome::Skipped { skipped, .. } if skipped));
    }

    #[test]
    fn push_delta_accumulates_in_order() {
        let mut state = SessionToolState::default();
        state.push_delta("call_1", Some("rag_search"), "{\"query\":");
        state.push_delta("call_1", None, "\"hi\"}");
        let (name, args) = state.take("call_1", "rag_search");
        assert_eq!(name, "rag_search");
        assert_eq!(args, "{\"query\":\"hi\"}");
    }

    #[test]
    fn normalize_query_collapses_whitespace_and_case() {
        assert_eq!(normalize_query("  Hello   World  "), "hello world");
    }
}
