//! Commit engine.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::client::GitClient;
use super::index::Index;
use super::object::{ObjectId, ObjectStore};
use super::refs;
use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// Commit author identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid("author name must not be empty"));
        }
        if self.email.trim().is_empty() {
            return Err(Error::invalid("author email must not be empty"));
        }
        // Would break the `Name <email>` line of the commit object.
        if [&self.name, &self.email]
            .iter()
            .any(|s| s.contains(['<', '>', '\n']))
        {
            return Err(Error::invalid(
                "author name and email must not contain '<', '>' or newlines",
            ));
        }
        Ok(())
    }
}

/// A commit as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub sha: ObjectId,
    pub message: String,
    pub author: Author,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
}

impl CommitRecord {
    fn from_object(sha: ObjectId, commit: gix_object::Commit) -> Self {
        Self {
            sha,
            message: commit.message.to_string().trim_end_matches('\n').to_string(),
            author: Author {
                name: commit.author.name.to_string(),
                email: commit.author.email.to_string(),
            },
            timestamp: commit.author.time.seconds,
        }
    }
}

impl GitClient {
    /// Record the index as a new commit on the current branch.
    ///
    /// When the index already differs from HEAD it is committed as is.
    /// Otherwise, if the working tree differs from HEAD, everything is
    /// staged first. With neither, fails with [`Error::NothingToCommit`].
    pub async fn commit(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
        message: &str,
        author: &Author,
    ) -> Result<CommitRecord> {
        if message.trim().is_empty() {
            return Err(Error::invalid("commit message must not be empty"));
        }
        author.validate()?;

        let status = self.compute_status(fs, work_dir).await?;
        if !status.iter().any(|e| e.is_staged()) {
            if !status.iter().any(|e| e.is_dirty()) {
                return Err(Error::NothingToCommit);
            }
            self.stage_all(fs, work_dir).await?;
        }

        let fs = fs.as_ref();
        let git_dir = Self::git_dir(work_dir);
        let store = ObjectStore::new(fs, &git_dir);
        let index = Index::load(fs, &git_dir).await?;
        let tree = store.write_tree(&index.to_tree_map()).await?;

        let parent = refs::resolve_head(fs, &git_dir).await?;
        let signature = gix_actor::Signature {
            name: author.name.trim().into(),
            email: author.email.trim().into(),
            time: gix_object::date::Time::new(chrono::Utc::now().timestamp(), 0),
        };
        let commit = gix_object::Commit {
            tree: tree.into(),
            parents: parent.into_iter().map(Into::into).collect(),
            author: signature.clone(),
            committer: signature,
            encoding: None,
            message: commit_message(message).into(),
            extra_headers: Vec::new(),
        };
        let sha = store.write_object(&commit).await?;

        let branch = refs::head_target(fs, &git_dir).await?;
        refs::write_ref(fs, &git_dir, &branch, &sha).await?;

        tracing::info!(
            sha = %sha,
            branch = %branch,
            files = index.len(),
            message = %self.log.sanitize_text(message),
            "created commit"
        );
        Ok(CommitRecord::from_object(sha, commit))
    }

    /// Read a commit by id.
    pub async fn read_commit(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
        sha: &ObjectId,
    ) -> Result<CommitRecord> {
        let git_dir = Self::require_repo(fs.as_ref(), work_dir).await?;
        let store = ObjectStore::new(fs.as_ref(), &git_dir);
        let commit = store.read_commit(sha).await?;
        Ok(CommitRecord::from_object(*sha, commit))
    }

    /// Walk first parents from HEAD, newest first. An unborn branch has an
    /// empty log.
    pub async fn log(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
        limit: Option<usize>,
    ) -> Result<Vec<CommitRecord>> {
        let git_dir = Self::require_repo(fs.as_ref(), work_dir).await?;
        let store = ObjectStore::new(fs.as_ref(), &git_dir);

        let mut records = Vec::new();
        let mut next = refs::resolve_head(fs.as_ref(), &git_dir).await?;
        while let Some(sha) = next {
            if limit.is_some_and(|n| records.len() >= n) {
                break;
            }
            let commit = store.read_commit(&sha).await?;
            next = commit.parents.first().copied().map(ObjectId::from);
            records.push(CommitRecord::from_object(sha, commit));
        }
        Ok(records)
    }
}

/// Git stores messages newline-terminated.
fn commit_message(message: &str) -> String {
    if message.ends_with('\n') {
        message.to_string()
    } else {
        format!("{}\n", message)
    }
}
