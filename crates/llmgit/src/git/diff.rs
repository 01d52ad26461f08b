//! Working tree vs index diff report.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::client::GitClient;
use super::object::{ObjectId, ObjectStore};
use crate::error::Result;
use crate::fs::FileSystem;

/// How a path differs between the index and the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Modified,
    Deleted,
}

/// One changed path with both sides' content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub path: String,
    pub status: DiffStatus,
    /// Index side; empty when absent or unreadable
    pub old_content: String,
    /// Working-tree side; empty when absent or unreadable
    pub new_content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    pub has_diff: bool,
    pub entries: Vec<DiffEntry>,
}

impl GitClient {
    /// Compare the working tree against the index.
    ///
    /// Untracked files are `added`, files missing from disk are `deleted`.
    /// A side whose content cannot be read (missing blob, I/O error,
    /// non-UTF-8 bytes) is reported as an empty string; one bad file never
    /// fails the report.
    pub async fn diff(&self, fs: &Arc<dyn FileSystem>, work_dir: &Path) -> Result<DiffReport> {
        let status = self.compute_status(fs, work_dir).await?;
        let store = ObjectStore::new(fs.as_ref(), &Self::git_dir(work_dir));

        let mut entries = Vec::new();
        for entry in status.into_iter().filter(|e| e.is_unstaged()) {
            let status = match (entry.stage_id, entry.workdir_id) {
                (None, _) => DiffStatus::Added,
                (_, None) if !entry.workdir_unreadable => DiffStatus::Deleted,
                _ => DiffStatus::Modified,
            };

            let old_content = match entry.stage_id {
                Some(id) => read_index_side(&store, &entry.path, &id).await,
                None => String::new(),
            };
            // Unreadable files were already logged by compute_status.
            let new_content = match entry.workdir_id {
                Some(_) => read_workdir_side(fs.as_ref(), work_dir, &entry.path).await,
                None => String::new(),
            };

            entries.push(DiffEntry {
                path: entry.path,
                status,
                old_content,
                new_content,
            });
        }

        Ok(DiffReport {
            has_diff: !entries.is_empty(),
            entries,
        })
    }
}

async fn read_index_side(store: &ObjectStore<'_>, path: &str, id: &ObjectId) -> String {
    match store.read_blob(id).await {
        Ok(bytes) => text_or_empty(path, bytes),
        Err(e) => {
            tracing::warn!(path, error = %e, "could not read staged content");
            String::new()
        }
    }
}

async fn read_workdir_side(fs: &dyn FileSystem, work_dir: &Path, path: &str) -> String {
    match fs.read_file(&work_dir.join(path)).await {
        Ok(bytes) => text_or_empty(path, bytes),
        Err(e) => {
            tracing::warn!(path, error = %e, "could not read working tree content");
            String::new()
        }
    }
}

fn text_or_empty(path: &str, bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|_| {
        tracing::warn!(path, "binary content omitted from diff");
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fs::{DirEntry, InMemoryFs, Metadata};
    use async_trait::async_trait;
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::git::config::GitConfig;
    use crate::git::{Author, FileDescriptor};
    use pretty_assertions::assert_eq;

    async fn committed() -> (GitClient, Arc<dyn FileSystem>, &'static Path) {
        let client = GitClient::new(GitConfig::new());
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        let work_dir = Path::new("/ws/demo");
        client
            .write_files(
                &fs,
                work_dir,
                &[
                    FileDescriptor::new("keep.txt", "same"),
                    FileDescriptor::new("edit.txt", "old"),
                    FileDescriptor::new("gone.txt", "bye"),
                ],
            )
            .await
            .unwrap();
        client
            .commit(&fs, work_dir, "init", &Author::new("A", "a@x.com"))
            .await
            .unwrap();
        (client, fs, work_dir)
    }

    #[tokio::test]
    async fn test_clean_tree_has_no_diff() {
        let (client, fs, work_dir) = committed().await;
        let report = client.diff(&fs, work_dir).await.unwrap();
        assert_eq!(report, DiffReport::default());
    }

    #[tokio::test]
    async fn test_classifies_changes() {
        let (client, fs, work_dir) = committed().await;
        fs.write_file(&work_dir.join("edit.txt"), b"new").await.unwrap();
        fs.unlink(&work_dir.join("gone.txt")).await.unwrap();
        fs.write_file(&work_dir.join("new.txt"), b"hi").await.unwrap();

        let report = client.diff(&fs, work_dir).await.unwrap();
        assert!(report.has_diff);
        assert_eq!(
            report.entries,
            vec![
                DiffEntry {
                    path: "edit.txt".into(),
                    status: DiffStatus::Modified,
                    old_content: "old".into(),
                    new_content: "new".into(),
                },
                DiffEntry {
                    path: "gone.txt".into(),
                    status: DiffStatus::Deleted,
                    old_content: "bye".into(),
                    new_content: String::new(),
                },
                DiffEntry {
                    path: "new.txt".into(),
                    status: DiffStatus::Added,
                    old_content: String::new(),
                    new_content: "hi".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_binary_and_missing_blob_degrade_to_empty() {
        let (client, fs, work_dir) = committed().await;
        fs.write_file(&work_dir.join("edit.txt"), &[0xff, 0xfe, 0x00])
            .await
            .unwrap();

        // Drop the staged blob for edit.txt from the object store.
        let status = client.compute_status(&fs, work_dir).await.unwrap();
        let staged = status
            .iter()
            .find(|e| e.path == "edit.txt")
            .and_then(|e| e.stage_id)
            .unwrap()
            .to_hex();
        fs.unlink(&work_dir.join(format!(".git/objects/{}/{}", &staged[..2], &staged[2..])))
            .await
            .unwrap();

        let report = client.diff(&fs, work_dir).await.unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].status, DiffStatus::Modified);
        assert_eq!(report.entries[0].old_content, "");
        assert_eq!(report.entries[0].new_content, "");
    }

    /// Delegates to an in-memory store; reads of one path fail with EIO
    /// once `failing` is set.
    struct FlakyFs {
        inner: InMemoryFs,
        bad: PathBuf,
        failing: AtomicBool,
    }

    #[async_trait]
    impl FileSystem for FlakyFs {
        async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
            if path == self.bad && self.failing.load(Ordering::SeqCst) {
                return Err(io::Error::other("EIO").into());
            }
            self.inner.read_file(path).await
        }
        async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
            self.inner.write_file(path, content).await
        }
        async fn mkdir(&self, path: &Path, recursive: bool) -> Result<()> {
            self.inner.mkdir(path, recursive).await
        }
        async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
            self.inner.read_dir(path).await
        }
        async fn stat(&self, path: &Path) -> Result<Metadata> {
            self.inner.stat(path).await
        }
        async fn exists(&self, path: &Path) -> Result<bool> {
            self.inner.exists(path).await
        }
        async fn unlink(&self, path: &Path) -> Result<()> {
            self.inner.unlink(path).await
        }
        async fn rmdir(&self, path: &Path) -> Result<()> {
            self.inner.rmdir(path).await
        }
    }

    #[tokio::test]
    async fn test_unreadable_working_file_degrades_to_empty() {
        let client = GitClient::new(GitConfig::new());
        let work_dir = Path::new("/ws/demo");
        let flaky = Arc::new(FlakyFs {
            inner: InMemoryFs::new(),
            bad: work_dir.join("bad.bin"),
            failing: AtomicBool::new(false),
        });
        let fs: Arc<dyn FileSystem> = flaky.clone();
        client
            .write_files(
                &fs,
                work_dir,
                &[
                    FileDescriptor::new("bad.bin", "v1"),
                    FileDescriptor::new("ok.txt", "ok"),
                ],
            )
            .await
            .unwrap();
        client
            .commit(&fs, work_dir, "init", &Author::new("A", "a@x.com"))
            .await
            .unwrap();

        flaky.failing.store(true, Ordering::SeqCst);
        fs.write_file(&work_dir.join("new.txt"), b"hi").await.unwrap();

        let report = client.diff(&fs, work_dir).await.unwrap();
        assert_eq!(
            report.entries,
            vec![
                DiffEntry {
                    path: "bad.bin".into(),
                    status: DiffStatus::Modified,
                    old_content: "v1".into(),
                    new_content: String::new(),
                },
                DiffEntry {
                    path: "new.txt".into(),
                    status: DiffStatus::Added,
                    old_content: String::new(),
                    new_content: "hi".into(),
                },
            ]
        );

        let status = client.compute_status(&fs, work_dir).await.unwrap();
        let bad = status.iter().find(|e| e.path == "bad.bin").unwrap();
        assert!(bad.workdir_unreadable);
        assert!(bad.is_dirty());

        // Unknown content is never committed.
        assert!(matches!(
            client.stage_all(&fs, work_dir).await,
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_serializes_camel_case() {
        let (client, fs, work_dir) = committed().await;
        fs.write_file(&work_dir.join("new.txt"), b"x").await.unwrap();

        let json = serde_json::to_value(client.diff(&fs, work_dir).await.unwrap()).unwrap();
        assert_eq!(json["hasDiff"], true);
        assert_eq!(json["entries"][0]["status"], "added");
        assert_eq!(json["entries"][0]["newContent"], "x");
    }

    #[tokio::test]
    async fn test_diff_requires_repository() {
        let client = GitClient::new(GitConfig::new());
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        assert!(matches!(
            client.diff(&fs, Path::new("/nope")).await,
            Err(Error::NotARepository(_))
        ));
    }
}
