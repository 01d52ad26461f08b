//! Error types for llmgit
//!
//! This module provides the error type shared by the filesystem adapter,
//! the Git pipeline and the chat client:
//! - Human-readable messages suitable for direct display
//! - No credentials in any message (URLs are shown without userinfo)
//! - "Nothing to do" conditions are distinguishable from real failures

use std::io::ErrorKind;
use thiserror::Error;

/// Result type alias using llmgit's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// llmgit error types.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from filesystem operations.
    ///
    /// A missing path surfaces as [`ErrorKind::NotFound`]; use
    /// [`Error::is_not_found`] to test for it.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed caller input (message, author, path, URL).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `stage_all` found no path whose working tree differs from HEAD.
    #[error("no added or modified files to stage")]
    NoChanges,

    /// Neither the index nor the working tree differs from HEAD.
    #[error("nothing to commit, working tree clean")]
    NothingToCommit,

    /// Push requested on a repository with no commits and no files.
    #[error("no files to push")]
    NothingToPush,

    /// Transport or authentication failure during push.
    #[error("push failed: {0}")]
    PushFailed(String),

    /// The directory does not hold an initialized repository.
    #[error("not a git repository: {0}")]
    NotARepository(String),

    /// A stored object, ref or index could not be decoded.
    #[error("corrupt repository data: {0}")]
    CorruptObject(String),

    /// Network error outside of a push (allowlist, request, response).
    #[error("network error: {0}")]
    Network(String),

    /// Error talking to the chat API.
    #[error("chat error: {0}")]
    Chat(String),

    /// Internal error for unexpected failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error is a filesystem "path does not exist" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == ErrorKind::NotFound)
    }

    /// True when the error is an "already exists" filesystem condition.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == ErrorKind::AlreadyExists)
    }

    /// True for the benign "nothing to do" class.
    ///
    /// Callers may treat these as success rather than surfacing them as
    /// failures.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Error::NoChanges | Error::NothingToCommit | Error::NothingToPush
        )
    }

    /// Create an invalid-input error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a corrupt-object error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptObject(message.into())
    }
}
