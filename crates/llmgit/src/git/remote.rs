//! Remote configuration.
//!
//! Remotes live in `.git/config` as `[remote "<name>"]` sections holding
//! only `url` and `fetch`. Credentials never enter this file: URLs with
//! userinfo are rejected by the allowlist check.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::client::GitClient;
use super::config::DEFAULT_REMOTE;
use super::config_file::ConfigFile;
use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// A configured remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remote {
    /// Remote name
    pub name: String,
    /// Remote URL
    pub url: String,
}

fn validate_remote_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::invalid(format!("invalid remote name: '{}'", name)));
    }
    Ok(())
}

impl GitClient {
    /// Add a remote.
    ///
    /// Fails when the URL is not allowed or the name is taken.
    pub async fn add_remote(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
        name: &str,
        url: &str,
    ) -> Result<()> {
        validate_remote_name(name)?;
        let git_dir = Self::require_repo(fs.as_ref(), work_dir).await?;
        self.config.is_url_allowed(url).map_err(Error::InvalidInput)?;

        let mut config = ConfigFile::load(fs.as_ref(), &git_dir).await?;
        if config.subsections("remote").contains(&name) {
            return Err(Error::invalid(format!("remote {} already exists", name)));
        }

        config.set(&format!("remote.{}.url", name), url)?;
        config.set(
            &format!("remote.{}.fetch", name),
            &format!("+refs/heads/*:refs/remotes/{}/*", name),
        )?;
        config.save(fs.as_ref(), &git_dir).await?;

        tracing::debug!(remote = name, url = %self.log.redact_url(url), "added remote");
        Ok(())
    }

    /// Remove a remote.
    pub async fn remove_remote(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
        name: &str,
    ) -> Result<()> {
        let git_dir = Self::require_repo(fs.as_ref(), work_dir).await?;

        let mut config = ConfigFile::load(fs.as_ref(), &git_dir).await?;
        if !config.remove_section("remote", Some(name)) {
            return Err(Error::invalid(format!("no such remote: {}", name)));
        }
        config.save(fs.as_ref(), &git_dir).await?;

        tracing::debug!(remote = name, "removed remote");
        Ok(())
    }

    /// List all remotes.
    pub async fn list_remotes(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
    ) -> Result<Vec<Remote>> {
        let git_dir = Self::require_repo(fs.as_ref(), work_dir).await?;
        let config = ConfigFile::load(fs.as_ref(), &git_dir).await?;

        Ok(config
            .subsections("remote")
            .into_iter()
            .filter_map(|name| {
                config.get(&format!("remote.{}.url", name)).map(|url| Remote {
                    name: name.to_string(),
                    url: url.to_string(),
                })
            })
            .collect())
    }

    /// Point `origin` at `url`, replacing any previous `origin`.
    ///
    /// Exactly one `origin` exists afterwards.
    pub async fn setup_remote(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
        url: &str,
    ) -> Result<Remote> {
        self.config.is_url_allowed(url).map_err(Error::InvalidInput)?;

        let remotes = self.list_remotes(fs, work_dir).await?;
        if remotes.iter().any(|r| r.name == DEFAULT_REMOTE) {
            self.remove_remote(fs, work_dir, DEFAULT_REMOTE).await?;
        }
        self.add_remote(fs, work_dir, DEFAULT_REMOTE, url).await?;

        Ok(Remote {
            name: DEFAULT_REMOTE.to_string(),
            url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::git::config::GitConfig;

    async fn setup(config: GitConfig) -> (GitClient, Arc<dyn FileSystem>) {
        let client = GitClient::new(config);
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        client.init_repository(&fs, Path::new("/repo")).await.unwrap();
        (client, fs)
    }

    #[tokio::test]
    async fn test_remote_add_list_remove() {
        let (client, fs) = setup(GitConfig::new().allow_remote("https://github.com/org/")).await;
        let repo = Path::new("/repo");

        client
            .add_remote(&fs, repo, "origin", "https://github.com/org/repo.git")
            .await
            .unwrap();
        let remotes = client.list_remotes(&fs, repo).await.unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].url, "https://github.com/org/repo.git");

        let dup = client
            .add_remote(&fs, repo, "origin", "https://github.com/org/other.git")
            .await;
        assert!(dup.is_err());

        client.remove_remote(&fs, repo, "origin").await.unwrap();
        assert!(client.list_remotes(&fs, repo).await.unwrap().is_empty());
        assert!(client.remove_remote(&fs, repo, "origin").await.is_err());
    }

    #[tokio::test]
    async fn test_remote_url_blocked() {
        let (client, fs) = setup(GitConfig::new().allow_remote("https://github.com/org/")).await;

        let err = client
            .add_remote(&fs, Path::new("/repo"), "origin", "https://evil.com/repo.git")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not in allowlist"));
    }

    #[tokio::test]
    async fn test_setup_remote_replaces_origin() {
        let (client, fs) = setup(GitConfig::new().allow_all_remotes()).await;
        let repo = Path::new("/repo");

        client
            .setup_remote(&fs, repo, "https://github.com/org/first.git")
            .await
            .unwrap();
        client
            .setup_remote(&fs, repo, "https://github.com/org/second.git")
            .await
            .unwrap();

        let remotes = client.list_remotes(&fs, repo).await.unwrap();
        assert_eq!(
            remotes,
            vec![Remote {
                name: "origin".into(),
                url: "https://github.com/org/second.git".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_setup_remote_rejects_embedded_credentials() {
        let (client, fs) = setup(GitConfig::new().allow_all_remotes()).await;

        let err = client
            .setup_remote(&fs, Path::new("/repo"), "https://u:p@github.com/org/r.git")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let config = fs.read_file(Path::new("/repo/.git/config")).await.unwrap();
        assert!(!String::from_utf8_lossy(&config).contains("u:p"));
    }
}
