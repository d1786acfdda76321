#![allow(dead_code)]

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use mathsense::llm::{ChatMessage, CompletionBackend, LlmError};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};

/// Interpreter with numpy + matplotlib, or `None` (tests then skip).
pub fn sandbox_python() -> Option<String> {
    let bin = std::env::var("MATHSENSE_TEST_PYTHON").unwrap_or_else(|_| "python3".into());
    let ok = std::process::Command::new(&bin)
        .args(["-c", "import numpy, matplotlib"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if ok {
        Some(bin)
    } else {
        println!("Warning: no python with numpy and matplotlib found ({bin})");
        println!("Skipping sandbox execution test");
        None
    }
}

/// Serve exactly one HTTP exchange; the handle yields the raw request text.
pub async fn serve_once(response: String) -> (String, JoinHandle<String>) {
    serve_chunks(vec![response.into_bytes()]).await
}

/// Like [`serve_once`], writing the response in separate, spaced-out parts.
pub async fn serve_chunks(parts: Vec<Vec<u8>>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.expect("accept");
        let request = read_request(&mut sock).await;
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            sock.write_all(part).await.expect("write");
            sock.flush().await.expect("flush");
        }
        sock.shutdown().await.ok();
        request
    });
    (base, handle)
}

async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = sock.read(&mut chunk).await.expect("read");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let len = text[..end]
                .lines()
                .find_map(|l| {
                    let (k, v) = l.split_once(':')?;
                    k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn sse_response(chunks: &[&str]) -> String {
    let mut body = String::new();
    body.push_str(": keep-alive\n\n");
    for c in chunks {
        let payload = serde_json::json!({ "choices": [{ "delta": { "content": c } }] });
        body.push_str(&format!("data: {payload}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}"
    )
}

pub fn status_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Backend that returns canned replies, optionally after a delay.
pub struct FakeBackend {
    pub calls: AtomicUsize,
    replies: Mutex<Vec<Result<String, LlmError>>>,
    delay: Duration,
}

impl FakeBackend {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self { calls: AtomicUsize::new(0), replies: Mutex::new(replies), delay: Duration::ZERO }
    }

    pub fn replying(code: &str) -> Self {
        Self::new(vec![Ok(format!("```python\n{code}```"))])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletionBackend for FakeBackend {
    fn complete(
        &self,
        _messages: Vec<ChatMessage>,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Err(LlmError::Decode("no scripted reply left".into()))
            } else {
                replies.remove(0)
            }
        };
        let delay = self.delay;
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            next
        }
    }
}

pub const SINE_CODE: &str = "\
import numpy as np
import matplotlib.pyplot as plt

x = np.linspace(0, 2 * np.pi, 200)
fig, ax = plt.subplots(figsize=(6, 3))
ax.plot(x, np.sin(x), label=\"sin(x)\")
ax.set_title(\"Sine wave\")
ax.set_xlabel(\"x\")
ax.legend()
";
