//! Virtual filesystem for llmgit
//!
//! Provides an async filesystem trait and implementations:
//! - `InMemoryFs`: Sandboxed in-memory store (default for workspaces)
//! - `RealFs`: A host directory acting as the filesystem root

mod memory;
mod realfs;
mod traits;

pub use memory::InMemoryFs;
pub use realfs::RealFs;
pub use traits::{DirEntry, FileSystem, FileType, Metadata};
pub(crate) use traits::fs_errors;
