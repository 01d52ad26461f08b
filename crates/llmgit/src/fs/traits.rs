//! Filesystem trait definitions

use async_trait::async_trait;
use std::io::{Error as IoError, ErrorKind};
use std::path::Path;

use crate::error::{Error, Result};

/// Async filesystem trait.
///
/// Every component of the Git pipeline goes through this trait; none of
/// them may assume whether the store is the host filesystem or a sandboxed
/// in-memory one.
///
/// All operations fail with [`ErrorKind::NotFound`] on a missing path,
/// except `mkdir`, which is idempotent on an existing directory.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read a file's contents.
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write contents to a file, replacing it. The parent must exist.
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Create a directory.
    ///
    /// With `recursive`, missing ancestors are created too. Succeeds when
    /// the directory already exists; fails with `AlreadyExists` only when
    /// a non-directory occupies the path.
    async fn mkdir(&self, path: &Path, recursive: bool) -> Result<()>;

    /// Read directory entries.
    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Get file metadata.
    async fn stat(&self, path: &Path) -> Result<Metadata>;

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Remove a file. Fails on directories.
    async fn unlink(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory. Fails on files and non-empty directories.
    async fn rmdir(&self, path: &Path) -> Result<()>;
}

/// File metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// File type
    pub file_type: FileType,
    /// File size in bytes
    pub size: u64,
}

impl Metadata {
    /// Check if this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.file_type.is_dir()
    }

    /// Check if this entry is a regular file.
    pub fn is_file(&self) -> bool {
        self.file_type.is_file()
    }
}

/// File type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file
    File,
    /// Directory
    Directory,
}

impl FileType {
    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// Directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Entry name (not full path)
    pub name: String,
    /// Entry metadata
    pub metadata: Metadata,
}

/// Constructors for the io errors filesystem implementations return.
pub(crate) mod fs_errors {
    use super::*;

    pub fn not_found(what: &str) -> Error {
        IoError::new(ErrorKind::NotFound, format!("{}: not found", what)).into()
    }

    pub fn already_exists(what: &str) -> Error {
        IoError::new(ErrorKind::AlreadyExists, format!("{}: file exists", what)).into()
    }

    pub fn is_a_directory(what: &str) -> Error {
        IoError::other(format!("{}: is a directory", what)).into()
    }

    pub fn not_a_directory(what: &str) -> Error {
        IoError::other(format!("{}: not a directory", what)).into()
    }

    pub fn not_empty(what: &str) -> Error {
        IoError::other(format!("{}: directory not empty", what)).into()
    }
}
