//! Code generation client: prompt in, `GeneratedCode` out.

pub mod extract;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::GenerationError,
    llm::{ChatMessage, CompletionBackend, LlmError, Role},
    role::{visualization_role_text, visualization_user_text},
};

/// One user action's worth of input to the generator.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into() }
    }
}

/// Source text returned by the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub source: String,
    pub prompt: String,
    pub generated_at: DateTime<Utc>,
}

impl GeneratedCode {
    pub fn new(source: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            prompt: prompt.into(),
            generated_at: Utc::now(),
        }
    }

    /// Short content hash, used to correlate log lines.
    pub fn fingerprint(&self) -> String {
        let digest = format!("{:x}", md5::compute(self.source.as_bytes()));
        digest[..12].to_string()
    }
}

impl From<LlmError> for GenerationError {
    fn from(e: LlmError) -> Self {
        if e.is_auth() {
            return GenerationError::Authentication(e.to_string());
        }
        if e.is_unavailable() {
            let msg = match &e {
                LlmError::Status { status: 429, .. } => {
                    format!("{e} (rate limit or quota exceeded)")
                }
                _ => e.to_string(),
            };
            return GenerationError::ServiceUnavailable(msg);
        }
        GenerationError::MalformedResponse(e.to_string())
    }
}

/// Sends prompts to a completion backend and extracts the returned code.
#[derive(Debug)]
pub struct CodeGenerator<B> {
    backend: B,
}

impl<B: CompletionBackend> CodeGenerator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Issue exactly one request for `req`; blank prompts fail before any I/O.
    pub async fn generate(&self, req: GenerationRequest) -> Result<GeneratedCode, GenerationError> {
        if req.prompt.trim().is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        let messages = vec![
            ChatMessage::new(Role::System, visualization_role_text()),
            ChatMessage::new(Role::User, visualization_user_text(&req.prompt)),
        ];

        let reply = self.backend.complete(messages).await.map_err(|e| {
            tracing::warn!(error = %e, "generation request failed");
            GenerationError::from(e)
        })?;

        let source = extract::extract_code(&reply).ok_or_else(|| {
            tracing::warn!(reply_len = reply.len(), "no code body in reply");
            GenerationError::MalformedResponse(if reply.trim().is_empty() {
                "empty reply".to_string()
            } else {
                "reply contained no code block".to_string()
            })
        })?;

        let code = GeneratedCode::new(source, req.prompt.trim());
        tracing::info!(fingerprint = %code.fingerprint(), lines = code.source.lines().count(), "code generated");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;

    struct Scripted {
        calls: AtomicUsize,
        reply: Mutex<Option<Result<String, LlmError>>>,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl Scripted {
        fn new(reply: Result<String, LlmError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl CompletionBackend for Scripted {
        async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen.lock().unwrap() = messages;
            self.reply.lock().unwrap().take().expect("backend called twice")
        }
    }

    #[tokio::test]
    async fn blank_prompts_never_reach_the_backend() {
        for prompt in ["", "   ", "\n\t"] {
            let gen = CodeGenerator::new(Scripted::new(Ok("import math".into())));
            let err = gen.generate(GenerationRequest::new(prompt)).await.unwrap_err();
            assert_eq!(err, GenerationError::EmptyPrompt);
            assert_eq!(gen.backend().calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn fenced_reply_becomes_generated_code() {
        let reply = "Sure!\n```python\nimport numpy as np\nimport matplotlib.pyplot as plt\nx = np.linspace(0, 2 * np.pi, 200)\nplt.plot(x, np.sin(x))\n```\n";
        let gen = CodeGenerator::new(Scripted::new(Ok(reply.into())));
        let code = gen
            .generate(GenerationRequest::new("plot a sine wave from 0 to 2π"))
            .await
            .unwrap();

        assert!(code.source.starts_with("import numpy as np\n"));
        assert!(!code.source.contains("```"));
        assert_eq!(code.prompt, "plot a sine wave from 0 to 2π");
        assert_eq!(gen.backend().calls.load(Ordering::SeqCst), 1);

        let seen = gen.backend().seen.lock().unwrap();
        assert_eq!(seen[0].role, Role::System);
        assert!(seen[1].content.contains("plot a sine wave"));
    }

    #[tokio::test]
    async fn prose_reply_is_malformed() {
        let gen = CodeGenerator::new(Scripted::new(Ok("I'd rather not.".into())));
        let err = gen.generate(GenerationRequest::new("x")).await.unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn transport_failures_map_to_distinct_errors() {
        let cases = [
            (LlmError::MissingCredential, "auth"),
            (LlmError::Status { status: 401, body: "bad key".into() }, "auth"),
            (LlmError::Status { status: 429, body: String::new() }, "unavailable"),
            (LlmError::Status { status: 502, body: String::new() }, "unavailable"),
            (LlmError::Decode("eof".into()), "malformed"),
        ];
        for (e, want) in cases {
            let gen = CodeGenerator::new(Scripted::new(Err(e)));
            let got = gen.generate(GenerationRequest::new("plot")).await.unwrap_err();
            let kind = match got {
                GenerationError::Authentication(_) => "auth",
                GenerationError::ServiceUnavailable(_) => "unavailable",
                GenerationError::MalformedResponse(_) => "malformed",
                GenerationError::EmptyPrompt => "empty",
            };
            assert_eq!(kind, want);
        }
    }

    #[test]
    fn quota_errors_mention_quota() {
        let e = GenerationError::from(LlmError::Status { status: 429, body: String::new() });
        assert!(e.to_string().contains("quota"));
    }

    #[test]
    fn fingerprint_tracks_source_only() {
        let a = GeneratedCode::new("x = 1\n", "a");
        let b = GeneratedCode::new("x = 1\n", "b");
        let c = GeneratedCode::new("x = 2\n", "a");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 12);
    }
}
