//! Structured model output: `{explanation, files: [...]}`.
//!
//! Local models routinely emit JSON that is fenced in markdown, cut off
//! mid-stream, or littered with trailing commas. [`GeneratedResponse::parse`]
//! accepts all of it: valid JSON is used as is, broken JSON goes through
//! [`repair_json`], and anything still unparseable becomes the explanation
//! of a response with no files.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::git::FileDescriptor;

/// System prompt asking for a [`GeneratedResponse`] object.
pub const STRUCTURED_SYSTEM_PROMPT: &str = r#"You are a programming assistant. Reply with exactly one JSON object and nothing else:

{
  "explanation": "overall explanation of the solution",
  "files": [
    {
      "filename": "path/with.extension",
      "language": "language or file type",
      "content": "complete file content",
      "explanation": "what this file does"
    }
  ]
}

Rules:
1. The whole reply must be valid JSON in this shape; no text or code fences outside it.
2. Put every explanation inside an "explanation" field, written in Markdown.
3. Write explanations in the language the user wrote in.
4. Give complete file contents; never truncate or elide code.
5. Escape string values as JSON requires.
6. Use relative filenames with fitting extensions; files must work together.
7. When code is produced, include a README.md covering purpose, layout, setup and usage.
8. When no files are needed, return an empty "files" array."#;

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)(?:\r?\n```|$)").expect("valid regex")
});

/// One generated file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedFile {
    #[serde(alias = "path")]
    pub filename: String,
    pub language: String,
    pub content: String,
    pub explanation: String,
}

/// The model's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratedResponse {
    pub explanation: String,
    pub files: Vec<GeneratedFile>,
}

impl GeneratedResponse {
    /// Parse model output. Never fails.
    pub fn parse(raw: &str) -> Self {
        if let Ok(response) = serde_json::from_str::<GeneratedResponse>(raw.trim()) {
            return response;
        }

        match repair_json(raw).and_then(|fixed| serde_json::from_str(&fixed).ok()) {
            Some(response) => {
                tracing::warn!("model output was not valid JSON; used repaired output");
                response
            }
            None => {
                tracing::warn!("model output could not be repaired; using raw text");
                GeneratedResponse {
                    explanation: raw.to_string(),
                    files: Vec::new(),
                }
            }
        }
    }

    /// Files ready for the Git pipeline. Entries without a filename are skipped.
    pub fn file_descriptors(&self) -> Vec<FileDescriptor> {
        self.files
            .iter()
            .filter(|f| {
                let keep = !f.filename.trim().is_empty();
                if !keep {
                    tracing::warn!("skipping generated file without a filename");
                }
                keep
            })
            .map(|f| FileDescriptor::new(f.filename.trim(), f.content.clone()))
            .collect()
    }
}

enum Frame {
    Object {
        expect_key: bool,
        /// Byte offset of the current key in the output, until its value starts
        key_start: Option<usize>,
    },
    Array,
}

/// Best-effort repair of truncated or sloppy JSON.
///
/// - takes the body of a ```` ```json ```` fence when present
/// - starts at the first `{` and stops after the matching `}`
/// - escapes raw newlines and tabs inside strings
/// - drops trailing commas, dangling keys and partial literals
/// - closes open strings, arrays and objects
///
/// Returns `None` when there is no object to repair.
pub fn repair_json(raw: &str) -> Option<String> {
    let text = JSON_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);
    let text = &text[text.find('{')?..];

    let mut out = String::with_capacity(text.len() + 8);
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut string_start = 0;
    let mut string_is_key = false;

    for ch in text.chars() {
        if in_string {
            match ch {
                _ if escaped => {
                    escaped = false;
                    out.push(ch);
                }
                '\\' => {
                    escaped = true;
                    out.push(ch);
                }
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(ch),
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                string_start = out.len();
                string_is_key = false;
                if let Some(Frame::Object {
                    expect_key: true,
                    key_start,
                }) = stack.last_mut()
                {
                    string_is_key = true;
                    *key_start = Some(string_start);
                }
                out.push(ch);
            }
            '{' => {
                stack.push(Frame::Object {
                    expect_key: true,
                    key_start: None,
                });
                out.push(ch);
            }
            '[' => {
                stack.push(Frame::Array);
                out.push(ch);
            }
            '}' | ']' => {
                trim_dangling(&mut out, stack.last_mut());
                let closer = match stack.pop() {
                    Some(Frame::Array) => ']',
                    _ => '}',
                };
                out.push(closer);
                if stack.is_empty() {
                    return Some(out);
                }
            }
            ':' => {
                if let Some(Frame::Object { expect_key, .. }) = stack.last_mut() {
                    *expect_key = false;
                }
                out.push(ch);
            }
            ',' => {
                if let Some(Frame::Object {
                    expect_key,
                    key_start,
                }) = stack.last_mut()
                {
                    *expect_key = true;
                    *key_start = None;
                }
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }

    // Truncated input: finish the open string, then close every frame.
    if in_string {
        if escaped {
            out.pop();
        }
        if string_is_key {
            out.truncate(string_start);
        } else {
            out.push('"');
        }
    }
    while !stack.is_empty() {
        trim_dangling(&mut out, stack.last_mut());
        out.push(match stack.pop() {
            Some(Frame::Array) => ']',
            _ => '}',
        });
    }

    Some(out)
}

/// Remove whatever cannot precede a closing bracket: whitespace, commas,
/// keys without values, and half-written literals.
fn trim_dangling(out: &mut String, frame: Option<&mut Frame>) {
    let mut key_start = match frame {
        Some(Frame::Object { key_start, .. }) => key_start.take(),
        _ => None,
    };

    loop {
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);

        if out.ends_with(',') {
            out.pop();
            continue;
        }
        if out.ends_with(':') {
            // `"key":` with no value
            match key_start.take() {
                Some(start) => out.truncate(start),
                None => {
                    out.pop();
                }
            }
            continue;
        }
        if let Some(start) = key_start.take() {
            // `"key"` with no colon
            if out.len() > start && out.ends_with('"') && !out[start..].contains(':') {
                out.truncate(start);
                continue;
            }
        }
        if fix_partial_literal(out) {
            continue;
        }
        break;
    }
}

/// Complete or drop a bare literal cut off at the end of `out`.
fn fix_partial_literal(out: &mut String) -> bool {
    let start = out
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+')))
        .map(|i| i + 1)
        .unwrap_or(0);
    let token = &out[start..];
    if token.is_empty() {
        return false;
    }

    for literal in ["true", "false", "null"] {
        if token == literal {
            return false;
        }
        if literal.starts_with(token) {
            out.truncate(start);
            out.push_str(literal);
            return true;
        }
    }

    if token.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '-') {
        let cleaned = token.trim_end_matches(['.', '-', '+', 'e', 'E']);
        if cleaned.len() != token.len() {
            let keep = start + cleaned.len();
            out.truncate(keep);
            return true;
        }
        return false;
    }

    // Unknown bare word: not JSON, drop it.
    out.truncate(start);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn repaired(raw: &str) -> serde_json::Value {
        let fixed = repair_json(raw).unwrap();
        serde_json::from_str(&fixed).unwrap_or_else(|e| panic!("{}: {}", fixed, e))
    }

    #[test]
    fn test_valid_response() {
        let raw = r#"{"explanation":"done","files":[{"filename":"README.md","language":"markdown","content":"hi","explanation":"readme"}]}"#;
        let response = GeneratedResponse::parse(raw);
        assert_eq!(response.explanation, "done");
        assert_eq!(response.files.len(), 1);
        assert_eq!(
            response.file_descriptors(),
            vec![FileDescriptor::new("README.md", "hi")]
        );
    }

    #[test]
    fn test_truncated_files_array() {
        let response = GeneratedResponse::parse(r#"{"explanation": "ok", "files": ["#);
        assert_eq!(
            response,
            GeneratedResponse {
                explanation: "ok".into(),
                files: vec![],
            }
        );
    }

    #[test]
    fn test_truncated_inside_content_string() {
        let response = GeneratedResponse::parse(
            r#"{"explanation": "x", "files": [{"filename": "a.py", "content": "print(1)\n"#,
        );
        assert_eq!(response.files[0].filename, "a.py");
        assert_eq!(response.files[0].content, "print(1)\n");
    }

    #[test]
    fn test_fenced_with_prose_and_trailing_commas() {
        let raw = "Here you go:\n```json\n{\"explanation\": \"e\", \"files\": [],}\n```\nBye";
        assert_eq!(repaired(raw), serde_json::json!({"explanation": "e", "files": []}));
    }

    #[test]
    fn test_raw_newlines_in_strings() {
        let raw = "{\"explanation\": \"line1\nline2\"}";
        assert_eq!(repaired(raw)["explanation"], "line1\nline2");
    }

    #[test]
    fn test_dangling_keys_and_literals() {
        assert_eq!(repaired(r#"{"a": 1, "b""#), serde_json::json!({"a": 1}));
        assert_eq!(repaired(r#"{"a": 1, "b":"#), serde_json::json!({"a": 1}));
        assert_eq!(repaired(r#"{"a": 1, "bo"#), serde_json::json!({"a": 1}));
        assert_eq!(repaired(r#"{"a": tr"#), serde_json::json!({"a": true}));
        assert_eq!(repaired(r#"{"a": [1, 2."#), serde_json::json!({"a": [1, 2]}));
    }

    #[test]
    fn test_trailing_text_after_object_is_dropped() {
        assert_eq!(
            repaired(r#"{"explanation": "a"} trailing {"#),
            serde_json::json!({"explanation": "a"})
        );
    }

    #[test]
    fn test_unrepairable_falls_back_to_raw_text() {
        let raw = "I cannot produce JSON today.";
        assert!(repair_json(raw).is_none());

        let response = GeneratedResponse::parse(raw);
        assert_eq!(response.explanation, raw);
        assert!(response.files.is_empty());
    }

    #[test]
    fn test_missing_fields_default() {
        let response = GeneratedResponse::parse(r#"{"files": [{"path": "x.txt"}]}"#);
        assert_eq!(response.explanation, "");
        assert_eq!(response.files[0].filename, "x.txt");
        assert_eq!(response.files[0].content, "");
    }

    #[test]
    fn test_file_descriptors_skip_unnamed() {
        let response = GeneratedResponse {
            explanation: String::new(),
            files: vec![
                GeneratedFile {
                    filename: " ".into(),
                    ..Default::default()
                },
                GeneratedFile {
                    filename: "ok.txt".into(),
                    content: "c".into(),
                    ..Default::default()
                },
            ],
        };
        assert_eq!(
            response.file_descriptors(),
            vec![FileDescriptor::new("ok.txt", "c")]
        );
    }
}
