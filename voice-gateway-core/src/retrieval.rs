//! Retrieval-augmented-generation client.
//!
//! Searches a file-search-capable model endpoint constrained to a vector
//! store and normalizes whatever it returns into scored [`Snippet`]s.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{GatewayError, Result};

/// One retrieved piece of context, truncated and scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    pub score: f32,
    pub metadata: SnippetMetadata,
}

/// Attribution for a [`Snippet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetMetadata {
    pub source: String,
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Parameters controlling a single retrieval call.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub top_k: usize,
    pub threshold: f32,
    pub max_chars: usize,
}

/// The structured schema the model is constrained to answer with.
#[derive(Debug, Deserialize)]
struct StructuredResults {
    #[serde(default)]
    results: Vec<StructuredResult>,
}

#[derive(Debug, Deserialize)]
struct StructuredResult {
    file_id: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    score: Option<f32>,
    text: String,
}

/// Searches a single OpenAI vector store via the Responses API's
/// `file_search` tool.
pub struct RetrievalClient {
    http: reqwest::Client,
    api_key: String,
    vector_store_id: String,
    model: String,
}

const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";
const DEFAULT_RETRIEVAL_MODEL: &str = "gpt-4o-mini";

impl RetrievalClient {
    pub fn new(api_key: impl Into<String>, vector_store_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            vector_store_id: vector_store_id.into(),
            model: DEFAULT_RETRIEVAL_MODEL.to_string(),
        }
    }

    /// Search the vector store and return up to `params.top_k` snippets,
    /// truncated to `params.max_chars`, filtered by `params.threshold`, and
    /// sorted by descending score.
    pub async fn search(&self, query: &str, params: SearchParams) -> Result<Vec<Snippet>> {
        let body = json!({
            "model": self.model,
            "input": query,
            "tools": [{
                "type": "file_search",
                "vector_store_ids": [self.vector_store_id],
                "max_num_results": params.top_k,
            }],
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": "retrieval_results",
                    "schema": {
                        "type": "object",
                        "properties": {
                            "results": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "file_id": {"type": "string"},
                                        "filename": {"type": "string"},
                                        "score": {"type": "number"},
                                        "text": {"type": "string"},
                                    },
                                    "required": ["file_id", "text"],
                                },
                            },
                        },
                        "required": ["results"],
                    },
                },
            },
        });

        let response = self
            .http
            .post(RESPONSES_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| GatewayError::tool(format!("retrieval request failed: {e}")))?;

        let raw: Value = response.json().await?;
        let mut snippets = self.parse_structured(&raw, params).unwrap_or_default();
        if snippets.is_empty() {
            snippets = self.parse_citations(&raw, params);
        }

        snippets.retain(|s| s.score >= params.threshold);
        snippets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        snippets.truncate(params.top_k);
        Ok(snippets)
    }

    fn parse_structured(&self, raw: &Value, params: SearchParams) -> Option<Vec<Snippet>> {
        let text = extract_output_text(raw)?;
        let parsed: StructuredResults = serde_json::from_str(&text).ok()?;
        Some(
            parsed
                .results
                .into_iter()
                .map(|r| Snippet {
                    content: truncate(&r.text, params.max_chars),
                    score: r.score.unwrap_or(0.0),
                    metadata: SnippetMetadata {
                        source: "OpenAI Vector Store".to_string(),
                        file_id: r.file_id,
                        filename: r.filename,
                    },
                })
                .collect(),
        )
    }

    /// Fallback: mine `file_citation` annotations out of free-text output
    /// when the model did not honor the structured schema.
    fn parse_citations(&self, raw: &Value, params: SearchParams) -> Vec<Snippet> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        let output = raw.get("output").and_then(Value::as_array).cloned().unwrap_or_default();
        for item in &output {
            let Some(content) = item.get("content").and_then(Value::as_array) else { continue };
            for part in content {
                let Some(annotations) = part.get("annotations").and_then(Value::as_array) else {
                    continue;
                };
                for ann in annotations {
                    if ann.get("type").and_then(Value::as_str) != Some("file_citation") {
                        continue;
                    }
                    let file_id = ann.get("file_id").and_then(Value::as_str).unwrap_or_default();
                    let quote = ann.get("quote").and_then(Value::as_str).unwrap_or_default();
                    if file_id.is_empty() || quote.is_empty() {
                        continue;
                    }
                    let key = (file_id.to_string(), quote.to_string());
                    if !seen.insert(key) {
                        continue;
                    }
                    out.push(Snippet {
                        content: truncate(quote, params.max_chars),
                        score: 0.0,
                        metadata: SnippetMetadata {
                            source: "OpenAI Vector Store".to_string(),
                            file_id: file_id.to_string(),
                            filename: ann.get("filename").and_then(Value::as_str).map(str::to_string),
                        },
                    });
                    if out.len() >= params.top_k {
                        return out;
                    }
                }
            }
        }
        out
    }
}

fn extract_output_text(raw: &Value) -> Option<String> {
    if let Some(s) = raw.get("output_text").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    let output = raw.get("output").and_then(Value::as_array)?;
    for item in output {
        let Some(content) = item.get("content").and_then(Value::as_array) else { continue };
        for part in content {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

/// Render snippets as the concatenated context block sent back to the
/// model as a `tool.output`.
pub fn format_context(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .map(|s| format!("[출처: {}]\n{}", s.metadata.filename.as_deref().unwrap_or(&s.metadata.file_id), s.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_appends_ellipsis_only_when_needed() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello…");
    }

    #[test]
    fn format_context_joins_with_blank_line() {
        let snippets = vec![
            Snippet {
                content: "a".to_string(),
                score: 0.9,
                metadata: SnippetMetadata {
                    source: "OpenAI Vector Store".to_string(),
                    file_id: "f1".to_string(),
                    filename: Some("doc1.pdf".to_string()),
                },
            },
            Snippet {
                content: "b".to_string(),
                score: 0.5,
                metadata: SnippetMetadata {
                    source: "OpenAI Vector Store".to_string(),
                    file_id: "f2".to_string(),
                    filename: None,
                },
            },
        ];
        let rendered = format_context(&snippets);
        assert!(rendered.contains("[출처: doc1.pdf]\na"));
        assert!(rendered.contains("[출처: f2]\nb"));
        assert!(rendered.contains("\n\n"));
    }
}
