//! llmgit - Push LLM-generated files to Git remotes from an in-memory workspace
//!
//! Three layers:
//! - [`FileSystem`]: async virtual filesystem ([`InMemoryFs`], [`RealFs`])
//! - [`GitClient`]: init, stage, commit, remote setup and smart-HTTP push,
//!   with real Git objects written through the filesystem trait
//! - [`OllamaClient`]: streaming chat with a local model whose structured
//!   reply becomes [`FileDescriptor`]s
//!
//! # Example
//!
//! ```rust
//! use std::path::Path;
//! use std::sync::Arc;
//! use llmgit::{Author, FileDescriptor, FileSystem, GitClient, GitConfig, InMemoryFs};
//!
//! #[tokio::main]
//! async fn main() -> llmgit::Result<()> {
//!     let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
//!     let client = GitClient::new(GitConfig::new());
//!     let work_dir = Path::new("/workspace/hello");
//!
//!     client
//!         .write_files(&fs, work_dir, &[FileDescriptor::new("README.md", "# hello\n")])
//!         .await?;
//!     let commit = client
//!         .commit(&fs, work_dir, "Initial commit", &Author::new("Bot", "bot@example.com"))
//!         .await?;
//!
//!     assert!(!client.has_working_tree_changes(&fs, work_dir).await?);
//!     println!("committed {}", commit.sha);
//!     Ok(())
//! }
//! ```

mod chat;
mod error;
mod fs;
mod git;
mod http;
mod logging;

pub use chat::{
    ChatConfig, ChatHistory, ChatMessage, ChatTurn, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_OLLAMA_HOST,
    GeneratedFile, GeneratedResponse, InstalledModel, ListModels, OllamaClient, Role,
    RunningModel, RunningModels, STRUCTURED_SYSTEM_PROMPT, TOOL_TRIGGER, Tool, ToolCall,
    ToolCallFunction, ToolRegistry, repair_json,
};
pub use error::{Error, Result};
pub use fs::{DirEntry, FileSystem, FileType, InMemoryFs, Metadata, RealFs};
pub use git::pack;
pub use git::{
    Author, CommitRecord, CredentialProvider, Credentials, DEFAULT_AUTHOR_EMAIL,
    DEFAULT_AUTHOR_NAME, DEFAULT_BRANCH, DEFAULT_COMMIT_MESSAGE, DEFAULT_REMOTE, DiffEntry,
    DiffReport, DiffStatus, FALLBACK_WORKSPACE_NAME, FileDescriptor, FileState, GitClient,
    GitConfig, ObjectId, ObjectKind, PushOutcome, PushPolicy, PushRemote, Remote, StatusEntry,
    validate_branch_name, workspace_name_from_url,
};
pub use http::DEFAULT_MAX_RESPONSE_BYTES;
pub use logging::{LogConfig, sanitize_for_log};
