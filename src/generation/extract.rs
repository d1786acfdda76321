//! Pull a code body out of a free-text model reply.

use std::sync::OnceLock;

use regex::Regex;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?ms)^[ \t]*(```|~~~)[ \t]*([A-Za-z0-9_+.-]*)[^\n]*\n(.*?)^[ \t]*(?:```|~~~)[ \t]*$")
            .expect("valid fence regex")
    })
}

fn open_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:```|~~~)[ \t]*[A-Za-z0-9_+.-]*[^\n]*\n").expect("valid fence regex")
    })
}

fn code_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:import\s+\w|from\s+\w[\w.]*\s+import\b)|\b(?:plt|np)\.\w")
            .expect("valid hint regex")
    })
}

const PYTHON_TAGS: &[&str] = &["python", "py", "python3"];

/// Extract the code body from `reply`, or `None` when nothing code-like is present.
///
/// Preference order: a python-tagged fenced block, any fenced block, the tail of
/// an unterminated fence, then the whole reply if it reads as code.
pub fn extract_code(reply: &str) -> Option<String> {
    let reply = reply.replace("\r\n", "\n");

    let blocks: Vec<(String, String)> = fence_re()
        .captures_iter(&reply)
        .map(|c| (c[2].to_ascii_lowercase(), c[3].to_string()))
        .collect();

    let picked = blocks
        .iter()
        .find(|(tag, body)| PYTHON_TAGS.contains(&tag.as_str()) && !body.trim().is_empty())
        .or_else(|| blocks.iter().find(|(_, body)| !body.trim().is_empty()))
        .map(|(_, body)| body.clone());

    if let Some(body) = picked {
        return non_blank(body);
    }

    if let Some(m) = open_fence_re().find(&reply) {
        let tail = strip_stray_fences(&reply[m.end()..]);
        if code_hint_re().is_match(&tail) {
            return non_blank(tail);
        }
    }

    let bare = strip_stray_fences(&reply);
    if code_hint_re().is_match(&bare) {
        return non_blank(bare);
    }
    None
}

fn strip_stray_fences(text: &str) -> String {
    text.lines()
        .filter(|l| {
            let t = l.trim();
            !(t.starts_with("```") || t.starts_with("~~~"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_blank(body: String) -> Option<String> {
    let trimmed = body.trim_matches('\n').trim_end();
    if trimmed.trim().is_empty() {
        None
    } else {
        Some(format!("{trimmed}\n"))
    }
}
