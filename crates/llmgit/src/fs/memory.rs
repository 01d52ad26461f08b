//! In-memory filesystem implementation

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;

use super::traits::{DirEntry, FileSystem, FileType, Metadata, fs_errors};
use crate::error::Result;

/// In-memory filesystem.
///
/// Stores all files and directories in a map keyed by normalized absolute
/// path. Nothing ever touches the host disk, which makes it the default
/// store for workspaces.
pub struct InMemoryFs {
    entries: RwLock<BTreeMap<PathBuf, FsEntry>>,
}

#[derive(Debug, Clone)]
enum FsEntry {
    File { content: Vec<u8> },
    Directory,
}

impl FsEntry {
    fn metadata(&self) -> Metadata {
        match self {
            FsEntry::File { content } => Metadata {
                file_type: FileType::File,
                size: content.len() as u64,
            },
            FsEntry::Directory => Metadata {
                file_type: FileType::Directory,
                size: 0,
            },
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFs {
    /// Create a new in-memory filesystem containing only `/`.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(PathBuf::from("/"), FsEntry::Directory);
        Self {
            entries: RwLock::new(entries),
        }
    }

    fn normalize_path(path: &Path) -> PathBuf {
        let mut result = PathBuf::from("/");

        for component in path.components() {
            match component {
                Component::Normal(name) => result.push(name),
                Component::ParentDir => {
                    result.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }

        result
    }

    fn display(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn has_children(entries: &BTreeMap<PathBuf, FsEntry>, path: &Path) -> bool {
        entries
            .keys()
            .any(|p| p.as_path() != path && p.parent() == Some(path))
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let entries = self.entries.read().await;

        match entries.get(&path) {
            Some(FsEntry::File { content }) => Ok(content.clone()),
            Some(FsEntry::Directory) => Err(fs_errors::is_a_directory(&Self::display(&path))),
            None => Err(fs_errors::not_found(&Self::display(&path))),
        }
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut entries = self.entries.write().await;

        if let Some(parent) = path.parent() {
            match entries.get(parent) {
                Some(FsEntry::Directory) => {}
                Some(FsEntry::File { .. }) => {
                    return Err(fs_errors::not_a_directory(&Self::display(parent)));
                }
                None => return Err(fs_errors::not_found(&Self::display(parent))),
            }
        }

        if let Some(FsEntry::Directory) = entries.get(&path) {
            return Err(fs_errors::is_a_directory(&Self::display(&path)));
        }

        entries.insert(
            path,
            FsEntry::File {
                content: content.to_vec(),
            },
        );

        Ok(())
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut entries = self.entries.write().await;

        match entries.get(&path) {
            Some(FsEntry::Directory) => return Ok(()),
            Some(FsEntry::File { .. }) => {
                return Err(fs_errors::already_exists(&Self::display(&path)));
            }
            None => {}
        }

        if recursive {
            let mut current = PathBuf::from("/");
            for component in path.components().skip(1) {
                current.push(component);
                match entries.get(&current) {
                    Some(FsEntry::Directory) => {}
                    Some(FsEntry::File { .. }) => {
                        return Err(fs_errors::already_exists(&Self::display(&current)));
                    }
                    None => {
                        entries.insert(current.clone(), FsEntry::Directory);
                    }
                }
            }
        } else {
            // Check parent exists
            if let Some(parent) = path.parent() {
                match entries.get(parent) {
                    Some(FsEntry::Directory) => {}
                    Some(FsEntry::File { .. }) => {
                        return Err(fs_errors::not_a_directory(&Self::display(parent)));
                    }
                    None => return Err(fs_errors::not_found(&Self::display(parent))),
                }
            }
            entries.insert(path, FsEntry::Directory);
        }

        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let path = Self::normalize_path(path);
        let entries = self.entries.read().await;

        match entries.get(&path) {
            Some(FsEntry::Directory) => {
                let result = entries
                    .iter()
                    .filter(|(entry_path, _)| {
                        entry_path.as_path() != path.as_path()
                            && entry_path.parent() == Some(path.as_path())
                    })
                    .map(|(entry_path, entry)| DirEntry {
                        name: entry_path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        metadata: entry.metadata(),
                    })
                    .collect();
                Ok(result)
            }
            Some(FsEntry::File { .. }) => Err(fs_errors::not_a_directory(&Self::display(&path))),
            None => Err(fs_errors::not_found(&Self::display(&path))),
        }
    }

    async fn stat(&self, path: &Path) -> Result<Metadata> {
        let path = Self::normalize_path(path);
        let entries = self.entries.read().await;

        entries
            .get(&path)
            .map(FsEntry::metadata)
            .ok_or_else(|| fs_errors::not_found(&Self::display(&path)))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = Self::normalize_path(path);
        let entries = self.entries.read().await;
        Ok(entries.contains_key(&path))
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut entries = self.entries.write().await;

        match entries.get(&path) {
            Some(FsEntry::File { .. }) => {
                entries.remove(&path);
                Ok(())
            }
            Some(FsEntry::Directory) => Err(fs_errors::is_a_directory(&Self::display(&path))),
            None => Err(fs_errors::not_found(&Self::display(&path))),
        }
    }

    async fn rmdir(&self, path: &Path) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut entries = self.entries.write().await;

        match entries.get(&path) {
            Some(FsEntry::Directory) => {
                if Self::has_children(&entries, &path) {
                    return Err(fs_errors::not_empty(&Self::display(&path)));
                }
                entries.remove(&path);
                Ok(())
            }
            Some(FsEntry::File { .. }) => Err(fs_errors::not_a_directory(&Self::display(&path))),
            None => Err(fs_errors::not_found(&Self::display(&path))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read_file() {
        let fs = InMemoryFs::new();

        fs.write_file(Path::new("/test.txt"), b"hello world")
            .await
            .unwrap();

        let content = fs.read_file(Path::new("/test.txt")).await.unwrap();
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn test_write_requires_parent() {
        let fs = InMemoryFs::new();

        let err = fs
            .write_file(Path::new("/missing/file.txt"), b"x")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mkdir_and_read_dir() {
        let fs = InMemoryFs::new();

        fs.mkdir(Path::new("/mydir"), false).await.unwrap();
        fs.write_file(Path::new("/mydir/file.txt"), b"test")
            .await
            .unwrap();

        let entries = fs.read_dir(Path::new("/mydir")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "file.txt");
        assert!(entries[0].metadata.is_file());
    }

    #[tokio::test]
    async fn test_mkdir_is_idempotent() {
        let fs = InMemoryFs::new();

        fs.mkdir(Path::new("/a/b/c"), true).await.unwrap();
        fs.mkdir(Path::new("/a/b/c"), true).await.unwrap();
        fs.mkdir(Path::new("/a/b"), false).await.unwrap();

        assert!(fs.stat(Path::new("/a/b/c")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_mkdir_over_file_fails() {
        let fs = InMemoryFs::new();

        fs.write_file(Path::new("/file"), b"x").await.unwrap();
        let err = fs.mkdir(Path::new("/file"), false).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_missing_paths_are_not_found() {
        let fs = InMemoryFs::new();
        let missing = Path::new("/nope");

        assert!(fs.read_file(missing).await.unwrap_err().is_not_found());
        assert!(fs.read_dir(missing).await.unwrap_err().is_not_found());
        assert!(fs.stat(missing).await.unwrap_err().is_not_found());
        assert!(fs.unlink(missing).await.unwrap_err().is_not_found());
        assert!(fs.rmdir(missing).await.unwrap_err().is_not_found());
        assert!(!fs.exists(missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlink_and_rmdir() {
        let fs = InMemoryFs::new();

        fs.mkdir(Path::new("/dir"), false).await.unwrap();
        fs.write_file(Path::new("/dir/f"), b"x").await.unwrap();

        assert!(fs.rmdir(Path::new("/dir")).await.is_err());
        assert!(fs.unlink(Path::new("/dir")).await.is_err());

        fs.unlink(Path::new("/dir/f")).await.unwrap();
        fs.rmdir(Path::new("/dir")).await.unwrap();
        assert!(!fs.exists(Path::new("/dir")).await.unwrap());
    }

    #[tokio::test]
    async fn test_parent_dir_normalization() {
        let fs = InMemoryFs::new();

        fs.mkdir(Path::new("/a"), false).await.unwrap();
        fs.write_file(Path::new("/a/../b.txt"), b"x").await.unwrap();
        assert!(fs.exists(Path::new("/b.txt")).await.unwrap());
    }
}
