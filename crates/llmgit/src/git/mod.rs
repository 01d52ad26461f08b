//! Git repository pipeline.
//!
//! Turns a set of generated files into commits and pushes them over
//! smart HTTP, entirely through the [`FileSystem`](crate::FileSystem)
//! trait:
//!
//! ```text
//! write_files -> compute_status -> stage_all -> commit -> setup_remote -> push
//! ```
//!
//! `diff` is a read-only path usable at any point after initialization.
//!
//! # Security
//!
//! - Author identity is explicit; host git configuration is never read
//! - Remote URLs pass an allowlist and may not embed credentials
//! - Push credentials are supplied per push through a callback
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use llmgit::{Author, FileDescriptor, FileSystem, GitClient, GitConfig, InMemoryFs, PushRemote};
//!
//! # async fn demo() -> llmgit::Result<()> {
//! let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
//! let client = GitClient::new(GitConfig::new().allow_remote("https://github.com/myorg/"));
//! let work_dir = Path::new("/workspace/demo");
//!
//! client
//!     .write_files(&fs, work_dir, &[FileDescriptor::new("README.md", "# demo")])
//!     .await?;
//! let outcome = client
//!     .push(
//!         &fs,
//!         work_dir,
//!         &PushRemote::new("https://github.com/myorg/demo.git", "user", "token"),
//!         &Author::new("Deploy Bot", "deploy@example.com"),
//!         None,
//!     )
//!     .await?;
//! println!("pushed {} to {}", outcome.commit, outcome.branch);
//! # Ok(())
//! # }
//! ```

mod client;
mod commit;
mod config;
mod config_file;
mod diff;
mod index;
mod object;
pub mod pack;
mod push;
mod refs;
mod remote;
mod status;
mod transport;

pub use client::{FALLBACK_WORKSPACE_NAME, FileDescriptor, GitClient, workspace_name_from_url};
pub use commit::{Author, CommitRecord};
pub use config::{
    DEFAULT_AUTHOR_EMAIL, DEFAULT_AUTHOR_NAME, DEFAULT_BRANCH, DEFAULT_COMMIT_MESSAGE,
    DEFAULT_REMOTE, GitConfig, PushPolicy,
};
pub use diff::{DiffEntry, DiffReport, DiffStatus};
pub use object::{ObjectId, ObjectKind};
pub use push::{PushOutcome, PushRemote};
pub use refs::validate_branch_name;
pub use remote::Remote;
pub use status::{FileState, StatusEntry};
pub use transport::{CredentialProvider, Credentials};
