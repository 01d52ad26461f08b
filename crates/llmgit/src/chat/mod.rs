//! Chat client for a local Ollama runtime.
//!
//! Produces the [`FileDescriptor`](crate::FileDescriptor)s the Git
//! pipeline consumes:
//!
//! ```text
//! ChatHistory -> OllamaClient::chat -> GeneratedResponse::parse -> file_descriptors
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use llmgit::{ChatConfig, ChatHistory, ChatMessage, OllamaClient};
//!
//! # async fn demo() -> llmgit::Result<()> {
//! let client = OllamaClient::new(ChatConfig::new("qwen2.5-coder:7b"))?;
//! let mut history = ChatHistory::new();
//! history.push(ChatMessage::user("Write a hello world in Rust"));
//!
//! let turn = client.chat(&history, |text| eprint!("\r{} chars", text.len())).await?;
//! for file in turn.response().file_descriptors() {
//!     println!("{}", file.path);
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod history;
mod response;
mod tools;

pub use client::{
    ChatConfig, ChatTurn, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_OLLAMA_HOST, InstalledModel,
    OllamaClient, RunningModel, TOOL_TRIGGER,
};
pub use history::{ChatHistory, ChatMessage, Role, ToolCall, ToolCallFunction};
pub use response::{GeneratedFile, GeneratedResponse, STRUCTURED_SYSTEM_PROMPT, repair_json};
pub use tools::{ListModels, RunningModels, Tool, ToolRegistry};
