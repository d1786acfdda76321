//! Reqwest-based LLM client implementing OpenAI-compatible Chat Completions streaming.

use std::{future::Future, pin::Pin};

use async_stream::try_stream;
use futures_core::Stream;
use futures_util::StreamExt as _;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
}

/// Transport-level failures; callers map these into their own taxonomy.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key configured (set MATHSENSE_API_KEY or OPENAI_API_KEY)")]
    MissingCredential,

    #[error("invalid API key: {0}")]
    InvalidCredential(String),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl LlmError {
    /// True when the failure is on the network path rather than in the reply.
    pub fn is_unavailable(&self) -> bool {
        match self {
            LlmError::Transport(_) => true,
            LlmError::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        match self {
            LlmError::MissingCredential | LlmError::InvalidCredential(_) => true,
            LlmError::Status { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }
}

/// Something that turns a system + user message pair into reply text.
pub trait CompletionBackend: Send + Sync {
    fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

#[derive(Debug)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    opts: ChatOptions,
}

impl LlmClient {
    pub fn from_config(cfg: &Config) -> Result<Self, LlmError> {
        let api_base_url = cfg.get("API_BASE_URL").unwrap_or_else(|| "default".into());
        let base_url = normalize_base_url(&api_base_url);
        let api_key = cfg.api_key();

        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(LlmError::Transport)?;

        let opts = ChatOptions {
            model: cfg.get("DEFAULT_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            temperature: 0.2,
            top_p: 1.0,
            max_tokens: cfg.get_u64("MAX_TOKENS").map(|v| v as u32),
        };

        Ok(Self { http, base_url, api_key, opts })
    }

    pub fn model(&self) -> &str {
        &self.opts.model
    }

    pub fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>> {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();
        let opts = self.opts.clone();

        Box::pin(try_stream! {
            let key = api_key.ok_or(LlmError::MissingCredential)?;
            let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
            let hv = HeaderValue::from_str(&format!("Bearer {}", key.trim()))
                .map_err(|e| LlmError::InvalidCredential(e.to_string()))?;
            headers.insert(AUTHORIZATION, hv);

            let mut body = serde_json::json!({
                "model": opts.model,
                "temperature": opts.temperature,
                "top_p": opts.top_p,
                "messages": messages,
                "stream": true,
            });
            if let Some(max) = opts.max_tokens {
                body["max_tokens"] = serde_json::json!(max);
            }

            tracing::debug!(%url, model = %opts.model, "sending chat request");
            let resp = http
                .post(url)
                .headers(headers)
                .json(&body)
                .send()
                .await
                .map_err(LlmError::Transport)?;

            let status = resp.status();
            let is_sse = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.starts_with("text/event-stream"))
                .unwrap_or(false);

            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                Err::<(), _>(LlmError::Status { status: status.as_u16(), body: truncate(&text, 300) })?;
                return;
            }

            // Some compatible servers ignore `stream: true` and answer in one JSON body.
            if !is_sse {
                let text = resp.text().await.map_err(LlmError::Transport)?;
                let full: Completion = serde_json::from_str(&text)
                    .map_err(|e| LlmError::Decode(e.to_string()))?;
                for choice in full.choices {
                    if let Some(content) = choice.message.and_then(|m| m.content) {
                        yield StreamEvent::Content(content);
                    }
                }
                yield StreamEvent::Done;
                return;
            }

            let mut buf = LineBuffer::default();
            let mut stream = resp.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let bytes = chunk.map_err(LlmError::Transport)?;
                for line in buf.push(&bytes) {
                    match parse_sse_line(&line)? {
                        Some(StreamEvent::Done) => { yield StreamEvent::Done; return; }
                        Some(ev) => yield ev,
                        None => {}
                    }
                }
            }
            if let Some(ev) = parse_sse_line(&buf.finish())? {
                yield ev;
            }
        })
    }
}

impl CompletionBackend for LlmClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let mut stream = self.chat_stream(messages);
        let mut out = String::new();
        while let Some(ev) = stream.next().await {
            match ev? {
                StreamEvent::Content(t) => out.push_str(&t),
                StreamEvent::Done => break,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Done,
}

/// Splits a byte stream into lines, decoding only whole lines so multi-byte
/// characters cut across chunk boundaries survive.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

fn normalize_base_url(raw: &str) -> String {
    if raw == "default" {
        return "https://api.openai.com/v1".to_string();
    }
    let trimmed = raw.trim_end_matches('/');
    if !trimmed.ends_with("/v1") && !trimmed.contains("/v1/") {
        format!("{}/v1", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Decode one SSE line. Comments, blank lines and unknown fields yield `None`.
fn parse_sse_line(line: &str) -> Result<Option<StreamEvent>, LlmError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(Some(StreamEvent::Done));
    }
    let chunk: Chunk =
        serde_json::from_str(payload).map_err(|e| LlmError::Decode(e.to_string()))?;
    if let Some(err) = chunk.error {
        return Err(LlmError::Decode(err.message.unwrap_or_else(|| "error event".into())));
    }
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();
    if content.is_empty() {
        Ok(None)
    } else {
        Ok(Some(StreamEvent::Content(content)))
    }
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// Minimal chunk structures for OpenAI-like streaming
#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<Delta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_v1_suffix() {
        assert_eq!(normalize_base_url("default"), "https://api.openai.com/v1");
        assert_eq!(normalize_base_url("http://localhost:8080/"), "http://localhost:8080/v1");
        assert_eq!(normalize_base_url("http://h/v1/"), "http://h/v1");
    }

    #[test]
    fn sse_lines_decode_content_and_done() {
        let line = r#"data: {"choices":[{"delta":{"content":"import numpy"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            Some(StreamEvent::Content("import numpy".into()))
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), Some(StreamEvent::Done));
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_sse_line("event: ping").unwrap(), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            None
        );
    }

    #[test]
    fn sse_garbage_is_a_decode_error() {
        let err = parse_sse_line("data: {not json").unwrap_err();
        assert!(matches!(err, LlmError::Decode(_)));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn line_buffer_keeps_characters_split_across_chunks() {
        let mut buf = LineBuffer::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"2π\"}}]}\n".as_bytes();
        let cut = line.iter().position(|&b| b == 0xCF).unwrap() + 1;

        assert!(buf.push(&line[..cut]).is_empty());
        let lines = buf.push(&line[cut..]);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            parse_sse_line(&lines[0]).unwrap(),
            Some(StreamEvent::Content("2π".into()))
        );

        assert!(buf.push(b"data: [DO").is_empty());
        assert_eq!(buf.finish(), "data: [DO");
    }

    #[test]
    fn status_codes_classify() {
        let s = |status| LlmError::Status { status, body: String::new() };
        assert!(s(401).is_auth());
        assert!(s(403).is_auth());
        assert!(s(429).is_unavailable());
        assert!(s(503).is_unavailable());
        assert!(!s(400).is_unavailable() && !s(400).is_auth());
        assert!(LlmError::MissingCredential.is_auth());
    }
}
