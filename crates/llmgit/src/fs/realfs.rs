//! Host filesystem backend.
//!
//! [`RealFs`] maps the virtual absolute paths the Git pipeline uses onto a
//! directory of the host filesystem. Every path is resolved beneath the
//! root: `..` components are collapsed before joining, so no path can
//! escape it.
//!
//! # Example
//!
//! ```rust,no_run
//! use llmgit::{FileSystem, RealFs};
//! use std::path::Path;
//!
//! # async fn demo() -> llmgit::Result<()> {
//! let fs = RealFs::new("/var/lib/llmgit");
//! fs.mkdir(Path::new("/workspace/demo"), true).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::traits::{DirEntry, FileSystem, FileType, Metadata, fs_errors};
use crate::error::Result;

/// Filesystem rooted at a host directory.
#[derive(Debug, Clone)]
pub struct RealFs {
    root: PathBuf,
}

impl RealFs {
    /// Create a filesystem whose `/` is `root` on the host.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Host directory backing `/`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        let mut relative = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(name) => relative.push(name),
                Component::ParentDir => {
                    relative.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        self.root.join(relative)
    }

    fn metadata_from(meta: &std::fs::Metadata) -> Metadata {
        Metadata {
            file_type: if meta.is_dir() {
                FileType::Directory
            } else {
                FileType::File
            },
            size: meta.len(),
        }
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(path)).await?)
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        Ok(tokio::fs::write(self.resolve(path), content).await?)
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> Result<()> {
        let host = self.resolve(path);

        if let Ok(meta) = tokio::fs::metadata(&host).await {
            if meta.is_dir() {
                return Ok(());
            }
            return Err(fs_errors::already_exists(&path.to_string_lossy()));
        }

        if recursive {
            tokio::fs::create_dir_all(&host).await?;
        } else {
            tokio::fs::create_dir(&host).await?;
        }
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(self.resolve(path)).await?;
        let mut result = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let meta = entry.metadata().await?;
            result.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                metadata: Self::metadata_from(&meta),
            });
        }

        Ok(result)
    }

    async fn stat(&self, path: &Path) -> Result<Metadata> {
        let meta = tokio::fs::metadata(self.resolve(path)).await?;
        Ok(Self::metadata_from(&meta))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }

    async fn unlink(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::remove_file(self.resolve(path)).await?)
    }

    async fn rmdir(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::remove_dir(self.resolve(path)).await?)
    }
}
