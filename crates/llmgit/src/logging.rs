//! Logging helpers for llmgit
//!
//! The library logs through `tracing`; this module keeps credentials and
//! oversized values out of those events.
//!
//! # Log Levels
//!
//! - **WARN**: Rejected refs, forced pushes, degraded diff reads, repaired chat output
//! - **INFO**: Commits created, pushes completed, workspaces wiped
//! - **DEBUG**: Pipeline phases (init, write, stage, remote setup, transport)
//! - **TRACE**: Per-object and per-pkt-line detail
//!
//! # Security
//!
//! - URLs are logged without userinfo (`https://[REDACTED]@host/...`)
//! - Words in free text that look like access tokens become `[REDACTED]`
//! - Free text (commit messages, model output) is escaped and truncated

use std::borrow::Cow;

const REDACTED: &str = "[REDACTED]";

/// Prefixes of access tokens issued by common Git hosts.
const TOKEN_PREFIXES: &[&str] = &["ghp_", "gho_", "ghs_", "ghu_", "github_pat_", "glpat-"];

/// How values are rendered into log fields.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Strip userinfo and token-like words (default: true)
    pub redact_credentials: bool,

    /// Longest free-text field before truncation, in bytes (default: 200)
    pub max_field_len: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            redact_credentials: true,
            max_field_len: 200,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log credentials verbatim. Only for debugging a transport locally.
    pub fn unsafe_show_credentials(mut self) -> Self {
        self.redact_credentials = false;
        self
    }

    pub fn max_field_len(mut self, len: usize) -> Self {
        self.max_field_len = len;
        self
    }

    /// Remove userinfo from a URL before logging.
    ///
    /// Tokens are often placed in the username position
    /// (`https://ghp_xxx@github.com/...`), so any userinfo is dropped.
    pub fn redact_url<'a>(&self, url: &'a str) -> Cow<'a, str> {
        if !self.redact_credentials {
            return Cow::Borrowed(url);
        }
        let Some((scheme, rest)) = url.split_once("://") else {
            return Cow::Borrowed(url);
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        match authority.rfind('@') {
            Some(at) => Cow::Owned(format!("{}://{}@{}", scheme, REDACTED, &rest[at + 1..])),
            None => Cow::Borrowed(url),
        }
    }

    /// Escape, mask tokens in, and truncate free text for a log field.
    pub fn sanitize_text(&self, text: &str) -> String {
        let escaped = sanitize_for_log(text);
        let masked = if self.redact_credentials {
            mask_tokens(&escaped)
        } else {
            escaped
        };
        truncate(&masked, self.max_field_len)
    }
}

/// Replace whitespace-separated words that look like access tokens.
fn mask_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while !rest.is_empty() {
        let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (word, tail) = rest.split_at(word_end);
        out.push_str(if looks_like_token(word) { REDACTED } else { word });

        let space_end = tail
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(tail.len());
        out.push_str(&tail[..space_end]);
        rest = &tail[space_end..];
    }
    out
}

fn looks_like_token(word: &str) -> bool {
    TOKEN_PREFIXES
        .iter()
        .any(|p| word.starts_with(p) && word.len() >= p.len() + 16)
}

/// Cut `text` to at most `max` bytes on a char boundary.
fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let end = (0..=max)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}...[{} more bytes]", &text[..end], text.len() - end)
}

/// Escape characters that could forge extra log lines.
///
/// Newlines, carriage returns and tabs become visible escapes; other
/// control characters are dropped.
pub fn sanitize_for_log(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}
