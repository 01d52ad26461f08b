//! Three-way status: HEAD, index, working tree.
//!
//! [`GitClient::compute_status`] is the only place the three sources are
//! compared. The predicates and [`GitClient::stage_all`] are all derived
//! from its output, and it is recomputed on every call.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;

use super::client::{GitClient, validate_relative_path};
use super::index::Index;
use super::object::{ObjectId, ObjectKind, ObjectStore};
use super::refs;
use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// State of one side of a path, relative to HEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Not present here, and not in HEAD either
    Absent,
    /// Same content as HEAD
    Unmodified,
    /// Present in HEAD with different content
    Modified,
    /// Present here, absent from HEAD
    Added,
    /// Present in HEAD, absent here
    Deleted,
}

impl FileState {
    /// A side that is present with unknown content.
    fn unknown(head: Option<&ObjectId>) -> Self {
        match head {
            Some(_) => FileState::Modified,
            None => FileState::Added,
        }
    }

    fn classify(head: Option<&ObjectId>, side: Option<&ObjectId>) -> Self {
        match (head, side) {
            (None, None) => FileState::Absent,
            (None, Some(_)) => FileState::Added,
            (Some(_), None) => FileState::Deleted,
            (Some(a), Some(b)) if a == b => FileState::Unmodified,
            (Some(_), Some(_)) => FileState::Modified,
        }
    }
}

/// Per-path comparison of HEAD, working tree and index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    /// Workspace-relative path
    pub path: String,
    /// `Unmodified` when the path is in HEAD, else `Absent`
    pub head: FileState,
    /// Working tree relative to HEAD
    pub workdir: FileState,
    /// Index relative to HEAD
    pub stage: FileState,
    /// Blob id in HEAD
    pub head_id: Option<ObjectId>,
    /// Blob id the working-tree content hashes to
    pub workdir_id: Option<ObjectId>,
    /// Blob id recorded in the index
    pub stage_id: Option<ObjectId>,
    /// The working-tree file exists but could not be read; `workdir_id`
    /// is unknown
    pub workdir_unreadable: bool,
}

impl StatusEntry {
    /// Working tree differs from HEAD (needs `add`).
    pub fn is_dirty(&self) -> bool {
        self.head != self.workdir
    }

    /// Index differs from HEAD (would be committed now).
    pub fn is_staged(&self) -> bool {
        self.head != self.stage
    }

    /// Working tree differs from the index. Unreadable content never
    /// matches.
    pub fn is_unstaged(&self) -> bool {
        self.workdir_unreadable || self.workdir_id != self.stage_id
    }
}

/// Relative paths of all files under `work_dir`, excluding `.git`.
async fn walk_workdir(fs: &dyn FileSystem, work_dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending: Vec<(PathBuf, String)> = vec![(work_dir.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = pending.pop() {
        for entry in fs.read_dir(&dir).await? {
            if entry.name == ".git" {
                continue;
            }
            let rel = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", prefix, entry.name)
            };
            if entry.metadata.is_dir() {
                pending.push((dir.join(&entry.name), rel));
            } else {
                files.push(rel);
            }
        }
    }

    Ok(files)
}

/// Content of the HEAD tree as `path -> blob id`; empty when unborn.
pub(crate) async fn head_files(
    fs: &dyn FileSystem,
    git_dir: &Path,
) -> Result<BTreeMap<String, ObjectId>> {
    match refs::resolve_head(fs, git_dir).await? {
        Some(head) => {
            let store = ObjectStore::new(fs, git_dir);
            let commit = store.read_commit(&head).await?;
            store.flatten_tree(&ObjectId::from(commit.tree)).await
        }
        None => Ok(BTreeMap::new()),
    }
}

impl GitClient {
    /// Recompute the status of every path known to HEAD, the index or the
    /// working tree. Unchanged paths are included.
    ///
    /// A working-tree file that cannot be read is logged and reported with
    /// [`StatusEntry::workdir_unreadable`] instead of failing the whole
    /// status; staging it still fails.
    pub async fn compute_status(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
    ) -> Result<Vec<StatusEntry>> {
        let fs = fs.as_ref();
        let git_dir = Self::require_repo(fs, work_dir).await?;

        let head = head_files(fs, &git_dir).await?;
        let index = Index::load(fs, &git_dir).await?;

        let workdir_paths = walk_workdir(fs, work_dir).await?;
        let hashes = join_all(workdir_paths.iter().map(|rel| async move {
            let content = fs.read_file(&work_dir.join(rel)).await?;
            ObjectId::hash(ObjectKind::Blob, &content)
        }))
        .await;

        let mut workdir = BTreeMap::new();
        let mut unreadable = BTreeSet::new();
        for (rel, hash) in workdir_paths.into_iter().zip(hashes) {
            match hash {
                Ok(id) => {
                    workdir.insert(rel, id);
                }
                // Removed between listing and reading.
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "could not read working tree file");
                    unreadable.insert(rel);
                }
            }
        }

        let mut paths: BTreeSet<String> = head.keys().cloned().collect();
        paths.extend(workdir.keys().cloned());
        paths.extend(unreadable.iter().cloned());
        paths.extend(index.to_tree_map().into_keys());

        let entries = paths
            .into_iter()
            .map(|path| {
                let head_id = head.get(&path).copied();
                let workdir_id = workdir.get(&path).copied();
                let stage_id = index.get(&path).map(|e| e.id);
                let workdir_unreadable = unreadable.contains(&path);
                let workdir = if workdir_unreadable {
                    FileState::unknown(head_id.as_ref())
                } else {
                    FileState::classify(head_id.as_ref(), workdir_id.as_ref())
                };
                StatusEntry {
                    head: FileState::classify(head_id.as_ref(), head_id.as_ref()),
                    workdir,
                    stage: FileState::classify(head_id.as_ref(), stage_id.as_ref()),
                    path,
                    head_id,
                    workdir_id,
                    stage_id,
                    workdir_unreadable,
                }
            })
            .collect();

        Ok(entries)
    }

    /// True iff some path's working tree differs from HEAD.
    pub async fn has_working_tree_changes(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
    ) -> Result<bool> {
        let status = self.compute_status(fs, work_dir).await?;
        Ok(status.iter().any(StatusEntry::is_dirty))
    }

    /// True iff the index differs from HEAD, i.e. a commit made now would
    /// record something.
    pub async fn has_commitable_changes(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
    ) -> Result<bool> {
        let status = self.compute_status(fs, work_dir).await?;
        Ok(status.iter().any(StatusEntry::is_staged))
    }

    /// Stage every path whose working tree differs from HEAD.
    ///
    /// Fails with [`Error::NoChanges`] when there is nothing to stage.
    /// Returns the staged paths.
    pub async fn stage_all(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
    ) -> Result<Vec<String>> {
        let paths: Vec<String> = self
            .compute_status(fs, work_dir)
            .await?
            .into_iter()
            .filter(StatusEntry::is_dirty)
            .map(|entry| entry.path)
            .collect();

        if paths.is_empty() {
            return Err(Error::NoChanges);
        }

        self.stage_paths(fs.as_ref(), work_dir, &paths).await?;
        tracing::debug!(
            work_dir = %work_dir.display(),
            count = paths.len(),
            "staged changes"
        );
        Ok(paths)
    }

    /// Stage a single path.
    ///
    /// A present file is hashed into the object store and recorded in the
    /// index; a missing one is removed from the index.
    pub async fn add(&self, fs: &Arc<dyn FileSystem>, work_dir: &Path, path: &str) -> Result<()> {
        validate_relative_path(path)?;
        Self::require_repo(fs.as_ref(), work_dir).await?;
        self.stage_paths(fs.as_ref(), work_dir, &[path.to_string()])
            .await
    }

    async fn stage_paths(
        &self,
        fs: &dyn FileSystem,
        work_dir: &Path,
        paths: &[String],
    ) -> Result<()> {
        let git_dir = Self::git_dir(work_dir);
        let store = ObjectStore::new(fs, &git_dir);
        let mut index = Index::load(fs, &git_dir).await?;

        let blobs = join_all(paths.iter().map(|rel| {
            let store = &store;
            async move {
                match fs.read_file(&work_dir.join(rel)).await {
                    Ok(content) => {
                        let id = store.write(ObjectKind::Blob, &content).await?;
                        Ok::<_, Error>(Some((id, content.len())))
                    }
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }))
        .await;

        for (rel, blob) in paths.iter().zip(blobs) {
            match blob? {
                Some((id, size)) => index.insert(rel.clone(), id, size),
                None => {
                    index.remove(rel);
                }
            }
        }

        index.save(fs, &git_dir).await
    }
}
