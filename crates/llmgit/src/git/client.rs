//! Git client: workspace lifecycle.
//!
//! [`GitClient`] is the entry point of the pipeline. Its operations are
//! spread over the sibling modules (`status`, `commit`, `remote`, `push`,
//! `diff`); this file holds construction and the repository lifecycle:
//! directory creation and removal, `init_repository`, and materializing
//! generated files into a workspace.
//!
//! Every operation takes the filesystem and the workspace path explicitly
//! and re-reads the repository state it needs. Nothing is cached between
//! calls, so a single workspace must not be driven by two pipelines at once.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use futures_util::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::config::GitConfig;
use super::config_file::ConfigFile;
use super::refs;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::logging::LogConfig;

/// Repository name: last path segment, `.git` suffix dropped.
static REPO_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/([^/]+?)(?:\.git)?/*$").expect("valid regex"));

/// Workspace name used when the URL carries none.
pub const FALLBACK_WORKSPACE_NAME: &str = "repo";

/// A generated file to materialize in a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Workspace-relative, `/`-separated path
    pub path: String,
    /// File content (may be empty)
    pub content: String,
}

impl FileDescriptor {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Reject paths that are empty or that could leave the workspace or
    /// touch Git metadata.
    pub fn validate(&self) -> Result<()> {
        validate_relative_path(&self.path)
    }
}

pub(crate) fn validate_relative_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::invalid("file path must not be empty"));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(Error::invalid(format!(
            "file path must be relative: {}",
            path
        )));
    }
    for segment in path.split('/') {
        match segment {
            "" | "." | ".." => {
                return Err(Error::invalid(format!("invalid file path: {}", path)));
            }
            s if s.eq_ignore_ascii_case(".git") => {
                return Err(Error::invalid(format!(
                    "file path must not touch .git: {}",
                    path
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Git client for sandboxed operations.
///
/// All operations work on the given [`FileSystem`] and never access the
/// host's git installation or configuration.
#[derive(Debug, Clone)]
pub struct GitClient {
    pub(crate) config: GitConfig,
    pub(crate) log: LogConfig,
}

impl GitClient {
    /// Create a new git client with the given configuration.
    pub fn new(config: GitConfig) -> Self {
        Self {
            config,
            log: LogConfig::default(),
        }
    }

    /// Replace the log redaction settings.
    pub fn with_log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Get the git configuration.
    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    pub(crate) fn git_dir(work_dir: &Path) -> PathBuf {
        work_dir.join(".git")
    }

    /// `.git` of an initialized repository, or `NotARepository`.
    pub(crate) async fn require_repo(fs: &dyn FileSystem, work_dir: &Path) -> Result<PathBuf> {
        let git_dir = Self::git_dir(work_dir);
        if !fs.exists(&git_dir.join(refs::HEAD)).await? {
            return Err(Error::NotARepository(work_dir.display().to_string()));
        }
        Ok(git_dir)
    }

    /// Create every directory from the root down to `path`.
    ///
    /// Existing directories at any level are fine; calling it twice leaves
    /// the same state.
    pub async fn ensure_directory(&self, fs: &Arc<dyn FileSystem>, path: &Path) -> Result<()> {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            if let Err(e) = fs.mkdir(&current, false).await {
                if !(e.is_already_exists() && fs.stat(&current).await?.is_dir()) {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Recursively delete `path`. An absent path is success.
    pub async fn remove_directory(&self, fs: &Arc<dyn FileSystem>, path: &Path) -> Result<()> {
        let fs = fs.as_ref();

        match fs.stat(path).await {
            Ok(meta) if meta.is_file() => return tolerate_missing(fs.unlink(path).await),
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }

        // (directory, children already scheduled)
        let mut pending = vec![(path.to_path_buf(), false)];
        while let Some((dir, expanded)) = pending.pop() {
            if expanded {
                tolerate_missing(fs.rmdir(&dir).await)?;
                continue;
            }

            let entries = match fs.read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            pending.push((dir.clone(), true));
            for entry in entries {
                let child = dir.join(&entry.name);
                if entry.metadata.is_dir() {
                    pending.push((child, false));
                } else {
                    tolerate_missing(fs.unlink(&child).await)?;
                }
            }
        }

        tracing::debug!(path = %path.display(), "removed directory");
        Ok(())
    }

    /// Remove several workspaces concurrently.
    ///
    /// Every removal runs to completion; the first failure is returned.
    pub async fn clean_workspaces(
        &self,
        fs: &Arc<dyn FileSystem>,
        paths: &[PathBuf],
    ) -> Result<()> {
        let results = join_all(paths.iter().map(|p| self.remove_directory(fs, p))).await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        tracing::info!(count = paths.len(), "cleaned workspaces");
        Ok(())
    }

    /// Make sure `work_dir` holds a repository.
    ///
    /// When `HEAD` resolves nothing happens. Otherwise the directory and
    /// the `.git` layout are created; existing files (an unborn `HEAD`, a
    /// config with remotes) are left untouched, so repeated calls are
    /// no-ops. Returns `true` when a new repository was created.
    ///
    /// Fails with [`Error::InvalidInput`] before touching the filesystem
    /// when the configured branch is not a valid ref name.
    pub async fn init_repository(&self, fs: &Arc<dyn FileSystem>, work_dir: &Path) -> Result<bool> {
        let head_ref = refs::branch_ref(self.config.branch())?;
        let git_dir = Self::git_dir(work_dir);
        if refs::resolve(fs.as_ref(), &git_dir, refs::HEAD).await.is_ok() {
            return Ok(false);
        }

        self.ensure_directory(fs, work_dir).await?;
        fs.mkdir(&git_dir.join("objects"), true).await?;
        fs.mkdir(&git_dir.join("refs/heads"), true).await?;
        fs.mkdir(&git_dir.join("refs/tags"), true).await?;

        let head_path = git_dir.join(refs::HEAD);
        if fs.exists(&head_path).await? {
            return Ok(false);
        }

        refs::write_symbolic(fs.as_ref(), &git_dir, refs::HEAD, &head_ref).await?;

        let mut config = ConfigFile::load(fs.as_ref(), &git_dir).await?;
        config.set("core.repositoryformatversion", "0")?;
        config.set("core.filemode", "false")?;
        config.set("core.bare", "false")?;
        config.set("user.name", self.config.author_name())?;
        config.set("user.email", self.config.author_email())?;
        config.save(fs.as_ref(), &git_dir).await?;

        tracing::debug!(
            work_dir = %work_dir.display(),
            branch = self.config.branch(),
            "initialized repository"
        );
        Ok(true)
    }

    /// Validate and write generated files into the workspace.
    ///
    /// The repository is initialized first. Parent directories are created,
    /// then all files are written concurrently; the call returns only after
    /// every write has finished.
    pub async fn write_files(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
        files: &[FileDescriptor],
    ) -> Result<()> {
        for file in files {
            file.validate()?;
        }

        self.init_repository(fs, work_dir).await?;

        let parents: BTreeSet<PathBuf> = files
            .iter()
            .filter_map(|f| work_dir.join(&f.path).parent().map(Path::to_path_buf))
            .collect();
        for parent in &parents {
            self.ensure_directory(fs, parent).await?;
        }

        let writes = files.iter().map(|file| {
            let path = work_dir.join(&file.path);
            async move { fs.write_file(&path, file.content.as_bytes()).await }
        });
        join_all(writes)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()?;

        tracing::debug!(
            work_dir = %work_dir.display(),
            count = files.len(),
            "wrote files"
        );
        Ok(())
    }

    /// Fresh workspace for `url` under `root`.
    ///
    /// A workspace with the same name is wiped first.
    pub async fn prepare_workspace(
        &self,
        fs: &Arc<dyn FileSystem>,
        root: &Path,
        url: &str,
    ) -> Result<PathBuf> {
        let work_dir = root.join(workspace_name_from_url(url));
        self.remove_directory(fs, &work_dir).await?;
        self.ensure_directory(fs, &work_dir).await?;
        Ok(work_dir)
    }
}

fn tolerate_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Workspace directory name for a remote URL.
///
/// The last path segment without its `.git` suffix; characters outside
/// `[A-Za-z0-9._-]` become `-`. Falls back to `"repo"`.
///
/// ```rust
/// use llmgit::workspace_name_from_url;
///
/// assert_eq!(workspace_name_from_url("https://github.com/org/demo.git"), "demo");
/// assert_eq!(workspace_name_from_url("https://github.com/"), "repo");
/// ```
pub fn workspace_name_from_url(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());

    REPO_NAME
        .captures(&path)
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                        c
                    } else {
                        '-'
                    }
                })
                .collect::<String>()
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_WORKSPACE_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;

    fn setup() -> (GitClient, Arc<dyn FileSystem>) {
        (
            GitClient::new(GitConfig::new()),
            Arc::new(InMemoryFs::new()) as Arc<dyn FileSystem>,
        )
    }

    #[tokio::test]
    async fn test_ensure_directory_idempotent() {
        let (client, fs) = setup();
        let path = Path::new("/ws/a/b/c");

        client.ensure_directory(&fs, path).await.unwrap();
        client.ensure_directory(&fs, path).await.unwrap();
        assert!(fs.stat(path).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_ensure_directory_over_file_fails() {
        let (client, fs) = setup();
        fs.write_file(Path::new("/ws"), b"x").await.unwrap();

        assert!(client.ensure_directory(&fs, Path::new("/ws/a")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_directory_recursive_and_idempotent() {
        let (client, fs) = setup();
        client
            .ensure_directory(&fs, Path::new("/ws/a/b"))
            .await
            .unwrap();
        fs.write_file(Path::new("/ws/a/b/f.txt"), b"x").await.unwrap();
        fs.write_file(Path::new("/ws/top.txt"), b"y").await.unwrap();

        client.remove_directory(&fs, Path::new("/ws")).await.unwrap();
        assert!(!fs.exists(Path::new("/ws")).await.unwrap());

        client.remove_directory(&fs, Path::new("/ws")).await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_workspaces() {
        let (client, fs) = setup();
        for dir in ["/ws/one/x", "/ws/two"] {
            client.ensure_directory(&fs, Path::new(dir)).await.unwrap();
        }

        client
            .clean_workspaces(
                &fs,
                &[
                    PathBuf::from("/ws/one"),
                    PathBuf::from("/ws/two"),
                    PathBuf::from("/ws/missing"),
                ],
            )
            .await
            .unwrap();

        assert!(fs.read_dir(Path::new("/ws")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_repository_idempotent() {
        let (client, fs) = setup();
        let work_dir = Path::new("/ws/demo");

        assert!(client.init_repository(&fs, work_dir).await.unwrap());
        let head = fs.read_file(Path::new("/ws/demo/.git/HEAD")).await.unwrap();
        assert_eq!(head, b"ref: refs/heads/main\n");

        assert!(!client.init_repository(&fs, work_dir).await.unwrap());
        let head_again = fs.read_file(Path::new("/ws/demo/.git/HEAD")).await.unwrap();
        assert_eq!(head, head_again);
    }

    #[tokio::test]
    async fn test_require_repo() {
        let (client, fs) = setup();
        let work_dir = Path::new("/ws/demo");

        assert!(matches!(
            GitClient::require_repo(fs.as_ref(), work_dir).await,
            Err(Error::NotARepository(_))
        ));
        client.init_repository(&fs, work_dir).await.unwrap();
        assert!(GitClient::require_repo(fs.as_ref(), work_dir).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_files_creates_parents() {
        let (client, fs) = setup();
        let work_dir = Path::new("/ws/demo");
        let files = vec![
            FileDescriptor::new("README.md", "# demo"),
            FileDescriptor::new("src/bin/main.rs", "fn main() {}"),
            FileDescriptor::new("empty.txt", ""),
        ];

        client.write_files(&fs, work_dir, &files).await.unwrap();

        let content = fs
            .read_file(Path::new("/ws/demo/src/bin/main.rs"))
            .await
            .unwrap();
        assert_eq!(content, b"fn main() {}");
        assert!(fs.exists(Path::new("/ws/demo/.git/HEAD")).await.unwrap());
        assert!(fs.exists(Path::new("/ws/demo/empty.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_files_rejects_bad_paths() {
        let (client, fs) = setup();
        let work_dir = Path::new("/ws/demo");

        for bad in ["", "/etc/passwd", "../escape", "a//b", ".git/config", "x/.GIT/y"] {
            let err = client
                .write_files(&fs, work_dir, &[FileDescriptor::new(bad, "x")])
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "accepted {:?}", bad);
        }
        assert!(!fs.exists(work_dir).await.unwrap());
    }

    #[tokio::test]
    async fn test_prepare_workspace_wipes_previous() {
        let (client, fs) = setup();
        let root = Path::new("/git-workspace");
        let url = "https://github.com/org/demo.git";

        let dir = client.prepare_workspace(&fs, root, url).await.unwrap();
        assert_eq!(dir, PathBuf::from("/git-workspace/demo"));
        fs.write_file(&dir.join("stale.txt"), b"old").await.unwrap();

        let dir = client.prepare_workspace(&fs, root, url).await.unwrap();
        assert!(fs.read_dir(&dir).await.unwrap().is_empty());
    }

    #[test]
    fn test_workspace_name_from_url() {
        assert_eq!(
            workspace_name_from_url("https://github.com/org/demo.git"),
            "demo"
        );
        assert_eq!(workspace_name_from_url("https://github.com/org/demo"), "demo");
        assert_eq!(
            workspace_name_from_url("https://github.com/org/demo.git/"),
            "demo"
        );
        assert_eq!(
            workspace_name_from_url("https://host/org/my_repo.v2.git"),
            "my_repo.v2"
        );
        assert_eq!(
            workspace_name_from_url("https://host/org/a%2Bb.git"),
            "a-2Bb"
        );
        assert_eq!(workspace_name_from_url("https://github.com"), "repo");
        assert_eq!(workspace_name_from_url("not a url"), "repo");
    }
}
