//! Ollama `/api/chat` client with streaming and a bounded tool loop.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::history::{ChatHistory, ChatMessage, Role, ToolCall};
use super::response::{GeneratedResponse, STRUCTURED_SYSTEM_PROMPT};
use super::tools::ToolRegistry;
use crate::error::{Error, Result};
use crate::http::{DEFAULT_MAX_RESPONSE_BYTES, build_client, read_body_with_limit};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";

/// Default bound on tool-call rounds per turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 4;

/// Tools are offered only when the last user message contains this word.
pub const TOOL_TRIGGER: &str = "ollama";

/// Bytes of an error body kept for the error message.
const ERROR_BODY_LIMIT: usize = 4096;

/// Chat client configuration.
///
/// # Example
///
/// ```rust
/// use llmgit::ChatConfig;
///
/// let config = ChatConfig::new("qwen2.5-coder:7b")
///     .host("http://gpu-box:11434")
///     .max_tool_rounds(2);
/// ```
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub(crate) host: String,
    pub(crate) model: String,
    pub(crate) system_prompt: Option<String>,
    pub(crate) structured_output: bool,
    pub(crate) tools_enabled: bool,
    pub(crate) max_tool_rounds: usize,
    pub(crate) timeout: Option<Duration>,
    pub(crate) user_agent: String,
}

impl ChatConfig {
    /// Structured output and tools on, default host.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_OLLAMA_HOST.to_string(),
            model: model.into(),
            system_prompt: None,
            structured_output: true,
            tools_enabled: true,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            timeout: None,
            user_agent: format!("llmgit/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Replace the default system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Ask for `{explanation, files}` JSON (on by default).
    pub fn structured_output(mut self, enabled: bool) -> Self {
        self.structured_output = enabled;
        self
    }

    pub fn tools(mut self, enabled: bool) -> Self {
        self.tools_enabled = enabled;
        self
    }

    pub fn max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Overall request timeout. Unset by default; generation can be slow.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn host_url(&self) -> &str {
        &self.host
    }

    fn effective_system_prompt(&self) -> Option<&str> {
        match &self.system_prompt {
            Some(prompt) => Some(prompt),
            None if self.structured_output => Some(STRUCTURED_SYSTEM_PROMPT),
            None => None,
        }
    }
}

/// An installed model from `GET /api/tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: String,
}

/// A loaded model from `GET /api/ps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub size_vram: u64,
    #[serde(default)]
    pub expires_at: String,
}

#[derive(Deserialize)]
struct ModelList<T> {
    #[serde(default = "Vec::new")]
    models: Vec<T>,
}

/// Message part of a `/api/chat` response or stream chunk.
#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseChunk {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Result of one chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    /// Input history plus the assistant reply and any tool exchanges
    pub history: ChatHistory,
    /// Final assistant text
    pub reply: String,
    /// Tool-call rounds executed
    pub tool_rounds: usize,
}

impl ChatTurn {
    /// Parse the reply as structured output.
    pub fn response(&self) -> GeneratedResponse {
        GeneratedResponse::parse(&self.reply)
    }
}

/// Client for one Ollama host and model.
pub struct OllamaClient {
    config: ChatConfig,
    http: Client,
    tools: ToolRegistry,
}

impl OllamaClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let http = build_client(config.timeout, &config.user_agent)?;
        Ok(Self {
            config,
            http,
            tools: ToolRegistry::builtin(),
        })
    }

    /// Replace the built-in tools.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Run one turn over `history`.
    ///
    /// `on_chunk` receives the accumulated reply text whenever it grows.
    /// The caller's history is left untouched; the extended history is
    /// returned in the [`ChatTurn`].
    pub async fn chat<F>(&self, history: &ChatHistory, mut on_chunk: F) -> Result<ChatTurn>
    where
        F: FnMut(&str) + Send,
    {
        if history.is_empty() {
            return Err(Error::invalid("chat history is empty"));
        }

        let mut history = history.clone();
        let mut tool_rounds = 0;
        loop {
            let offer_tools = self.config.tools_enabled
                && !self.tools.is_empty()
                && history.last_user_mentions(TOOL_TRIGGER);

            let message = if offer_tools {
                self.complete(&history, &mut on_chunk).await?
            } else {
                self.stream(&history, &mut on_chunk).await?
            };

            let calls = message.tool_calls.clone();
            let reply = message.content.clone();
            history.push(message);

            if calls.is_empty() {
                tracing::debug!(
                    model = %self.config.model,
                    tool_rounds,
                    chars = reply.len(),
                    "chat turn complete"
                );
                return Ok(ChatTurn {
                    history,
                    reply,
                    tool_rounds,
                });
            }

            if tool_rounds >= self.config.max_tool_rounds {
                return Err(Error::Chat(format!(
                    "model still calling tools after {} rounds",
                    tool_rounds
                )));
            }
            tool_rounds += 1;

            let outputs = futures_util::future::join_all(calls.iter().map(|call| {
                self.tools
                    .call(self, &call.function.name, &call.function.arguments)
            }))
            .await;
            for (index, (call, output)) in calls.iter().zip(outputs).enumerate() {
                history.push(ChatMessage::tool(index, call.function.name.clone(), output));
            }
        }
    }

    /// Installed models.
    pub async fn list_models(&self) -> Result<Vec<InstalledModel>> {
        let list: ModelList<InstalledModel> = self.get_json("api/tags").await?;
        Ok(list.models)
    }

    /// Models currently loaded.
    pub async fn running_models(&self) -> Result<Vec<RunningModel>> {
        let list: ModelList<RunningModel> = self.get_json("api/ps").await?;
        Ok(list.models)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.host.trim_end_matches('/'), path)
    }

    fn request_body(&self, history: &ChatHistory, stream: bool, with_tools: bool) -> Value {
        let mut messages: Vec<&ChatMessage> = Vec::with_capacity(history.len() + 1);
        let system = self
            .config
            .effective_system_prompt()
            .filter(|_| history.messages().first().map(|m| m.role) != Some(Role::System))
            .map(ChatMessage::system);
        if let Some(system) = &system {
            messages.push(system);
        }
        messages.extend(history.messages());

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
        });
        if with_tools {
            body["tools"] = Value::Array(self.tools.definitions());
        } else if self.config.structured_output {
            body["format"] = response_schema();
        }
        body
    }

    async fn post_chat(&self, body: &Value) -> Result<reqwest::Response> {
        let url = self.endpoint("api/chat");
        tracing::debug!(
            model = %self.config.model,
            messages = body["messages"].as_array().map_or(0, |m| m.len()),
            stream = body["stream"].as_bool().unwrap_or(false),
            tools = body.get("tools").is_some(),
            "sending chat request"
        );
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Chat(format!("request to {} failed: {}", url, e)))?;
        check_status(response).await
    }

    /// Non-streaming request; used when tools are offered.
    async fn complete<F>(&self, history: &ChatHistory, on_chunk: &mut F) -> Result<ChatMessage>
    where
        F: FnMut(&str) + Send,
    {
        let body = self.request_body(history, false, true);
        let response = self.post_chat(&body).await?;
        let bytes = read_body_with_limit(response, DEFAULT_MAX_RESPONSE_BYTES)
            .await
            .map_err(Error::Chat)?;
        let chunk: ResponseChunk = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Chat(format!("invalid chat response: {}", e)))?;
        if let Some(error) = chunk.error {
            return Err(Error::Chat(error));
        }

        let message = chunk.message.unwrap_or_default();
        if !message.content.trim().is_empty() {
            on_chunk(&message.content);
        }
        Ok(assistant_message(message.content, message.tool_calls))
    }

    /// Streaming request: NDJSON chunks until `done`.
    async fn stream<F>(&self, history: &ChatHistory, on_chunk: &mut F) -> Result<ChatMessage>
    where
        F: FnMut(&str) + Send,
    {
        let body = self.request_body(history, true, false);
        let response = self.post_chat(&body).await?;

        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut accumulated = StreamState::default();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| Error::Chat(format!("stream interrupted: {}", e)))?;
            pending.extend_from_slice(&bytes);
            if pending.len() + accumulated.content.len() > DEFAULT_MAX_RESPONSE_BYTES {
                return Err(Error::Chat(format!(
                    "response too large: exceeded {} bytes limit",
                    DEFAULT_MAX_RESPONSE_BYTES
                )));
            }

            while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=end).collect();
                accumulated.apply_line(&line, on_chunk)?;
            }
            if accumulated.done {
                break;
            }
        }
        if !accumulated.done {
            accumulated.apply_line(&pending, on_chunk)?;
        }
        if !accumulated.done {
            tracing::warn!(model = %self.config.model, "chat stream ended without a done marker");
        }

        Ok(assistant_message(accumulated.content, accumulated.tool_calls))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Chat(format!("request to {} failed: {}", url, e)))?;
        let response = check_status(response).await?;
        let bytes = read_body_with_limit(response, DEFAULT_MAX_RESPONSE_BYTES)
            .await
            .map_err(Error::Chat)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Chat(format!("invalid response from {}: {}", path, e)))
    }
}

#[derive(Debug, Default)]
struct StreamState {
    content: String,
    tool_calls: Vec<ToolCall>,
    done: bool,
}

impl StreamState {
    /// Fold one NDJSON line into the state. Blank lines are ignored.
    fn apply_line<F>(&mut self, line: &[u8], on_chunk: &mut F) -> Result<()>
    where
        F: FnMut(&str),
    {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let chunk: ResponseChunk = serde_json::from_str(line)
            .map_err(|e| Error::Chat(format!("invalid stream chunk: {}", e)))?;
        if let Some(error) = chunk.error {
            return Err(Error::Chat(error));
        }

        if let Some(message) = chunk.message {
            self.tool_calls.extend(message.tool_calls);
            if !message.content.is_empty() {
                self.content.push_str(&message.content);
                if !self.content.trim().is_empty() {
                    on_chunk(&self.content);
                }
            }
        }
        self.done |= chunk.done;
        Ok(())
    }
}

fn assistant_message(content: String, tool_calls: Vec<ToolCall>) -> ChatMessage {
    ChatMessage {
        tool_calls,
        ..ChatMessage::assistant(content)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_body_with_limit(response, ERROR_BODY_LIMIT)
        .await
        .map(|b| String::from_utf8_lossy(&b).trim().to_string())
        .unwrap_or_default();
    Err(Error::Chat(format!("API error ({}): {}", status, body)))
}

/// JSON schema passed as `format` for structured output.
fn response_schema() -> Value {
    let string = json!({"type": "string"});
    json!({
        "type": "object",
        "properties": {
            "explanation": string,
            "files": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "filename": string,
                        "language": string,
                        "content": string,
                        "explanation": string,
                    },
                    "required": ["filename", "content"],
                },
            },
        },
        "required": ["explanation", "files"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client(config: ChatConfig) -> OllamaClient {
        OllamaClient::new(config).unwrap()
    }

    fn user_history(text: &str) -> ChatHistory {
        ChatHistory::from(vec![ChatMessage::user(text)])
    }

    #[test]
    fn test_config_defaults() {
        let config = ChatConfig::new("m");
        assert_eq!(config.host_url(), DEFAULT_OLLAMA_HOST);
        assert_eq!(config.model_name(), "m");
        assert!(config.structured_output);
        assert!(config.tools_enabled);
        assert_eq!(config.max_tool_rounds, DEFAULT_MAX_TOOL_ROUNDS);
        assert_eq!(config.effective_system_prompt(), Some(STRUCTURED_SYSTEM_PROMPT));
        assert_eq!(
            ChatConfig::new("m").structured_output(false).effective_system_prompt(),
            None
        );
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let c = client(ChatConfig::new("m").host("http://h:1/"));
        assert_eq!(c.endpoint("api/chat"), "http://h:1/api/chat");
    }

    #[test]
    fn test_request_body_streaming() {
        let c = client(ChatConfig::new("m"));
        let body = c.request_body(&user_history("hi"), true, false);

        assert_eq!(body["model"], "m");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["format"]["type"], "object");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_request_body_with_tools_has_no_format() {
        let c = client(ChatConfig::new("m"));
        let body = c.request_body(&user_history("ollama?"), false, true);

        assert_eq!(body["tools"].as_array().unwrap().len(), 2);
        assert!(body.get("format").is_none());
    }

    #[test]
    fn test_request_body_keeps_caller_system_prompt() {
        let c = client(ChatConfig::new("m"));
        let history = ChatHistory::from(vec![
            ChatMessage::system("custom"),
            ChatMessage::user("hi"),
        ]);
        let body = c.request_body(&history, true, false);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "custom");
    }

    #[test]
    fn test_stream_state_accumulates() {
        let mut state = StreamState::default();
        let mut seen = Vec::new();
        let mut on_chunk = |s: &str| seen.push(s.to_string());

        for line in [
            r#"{"message":{"role":"assistant","content":" "},"done":false}"#,
            "",
            r#"{"message":{"role":"assistant","content":"{\"a\""},"done":false}"#,
            r#"{"message":{"role":"assistant","content":":1}"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
        ] {
            state.apply_line(line.as_bytes(), &mut on_chunk).unwrap();
        }

        assert!(state.done);
        assert_eq!(state.content, r#" {"a":1}"#);
        assert_eq!(seen, vec![r#" {"a""#.to_string(), r#" {"a":1}"#.to_string()]);
    }

    #[test]
    fn test_stream_state_error_chunk() {
        let mut state = StreamState::default();
        let err = state
            .apply_line(br#"{"error":"model not found"}"#, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::Chat(msg) if msg == "model not found"));
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_history() {
        let c = client(ChatConfig::new("m"));
        let err = c.chat(&ChatHistory::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
