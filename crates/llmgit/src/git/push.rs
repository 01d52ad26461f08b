//! Push pipeline: configure `origin`, commit what is pending, and send
//! the current branch over smart HTTP.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::client::GitClient;
use super::commit::Author;
use super::config::{DEFAULT_COMMIT_MESSAGE, DEFAULT_REMOTE, PushPolicy};
use super::object::{ObjectId, ObjectStore};
use super::pack::write_pack;
use super::refs;
use super::transport::{CredentialProvider, Credentials, RefUpdate, SmartHttp};
use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// Where to push, with the credentials to present if challenged.
///
/// The credentials stay in this value; the repository only ever records
/// `url`.
#[derive(Clone)]
pub struct PushRemote {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl PushRemote {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// A remote that needs no authentication.
    pub fn anonymous(url: impl Into<String>) -> Self {
        Self::new(url, "", "")
    }
}

impl fmt::Debug for PushRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRemote")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Result of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    /// Remote name (`origin`)
    pub remote: String,
    /// Remote URL, without credentials
    pub url: String,
    /// Branch pushed
    pub branch: String,
    /// Commit the remote branch now points at
    pub commit: ObjectId,
    /// Remote tip before the push
    pub previous: Option<ObjectId>,
    /// Remote commits not in local history were overwritten
    pub forced: bool,
    /// Remote already had this commit; nothing was sent
    pub up_to_date: bool,
}

impl GitClient {
    /// Push the workspace to `remote.url`.
    ///
    /// 1. `origin` is set to the URL (credentials are never stored)
    /// 2. A repository without commits gets everything staged and committed,
    ///    or fails with [`Error::NothingToPush`] when it has no files
    /// 3. Pending index or working-tree changes are committed
    /// 4. The current branch is pushed; transport and authentication
    ///    failures surface as [`Error::PushFailed`]
    ///
    /// Under [`PushPolicy::Force`] (the default) remote-only commits are
    /// discarded.
    pub async fn push(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
        remote: &PushRemote,
        author: &Author,
        message: Option<&str>,
    ) -> Result<PushOutcome> {
        if remote.username.is_empty() && remote.password.is_empty() {
            return self
                .push_with_credentials(fs, work_dir, &remote.url, None, author, message)
                .await;
        }

        let credentials = Credentials::new(remote.username.clone(), remote.password.clone());
        let provider = move || credentials.clone();
        let provider: &dyn CredentialProvider = &provider;
        self.push_with_credentials(fs, work_dir, &remote.url, Some(provider), author, message)
            .await
    }

    /// [`GitClient::push`] with a caller-supplied credential callback.
    pub async fn push_with_credentials(
        &self,
        fs: &Arc<dyn FileSystem>,
        work_dir: &Path,
        url: &str,
        credentials: Option<&dyn CredentialProvider>,
        author: &Author,
        message: Option<&str>,
    ) -> Result<PushOutcome> {
        let message = message.unwrap_or(DEFAULT_COMMIT_MESSAGE);

        self.init_repository(fs, work_dir).await?;
        let remote = self.setup_remote(fs, work_dir, url).await?;

        let git_dir = Self::git_dir(work_dir);
        if refs::resolve_head(fs.as_ref(), &git_dir).await?.is_none() {
            if !self.has_working_tree_changes(fs, work_dir).await? {
                return Err(Error::NothingToPush);
            }
            self.stage_all(fs, work_dir).await?;
            self.commit(fs, work_dir, message, author).await?;
        } else {
            match self.commit(fs, work_dir, message, author).await {
                Ok(_) | Err(Error::NothingToCommit) => {}
                Err(e) => return Err(e),
            }
        }

        let local = refs::resolve(fs.as_ref(), &git_dir, refs::HEAD).await?;
        let ref_name = refs::head_target(fs.as_ref(), &git_dir).await?;
        let branch = ref_name
            .strip_prefix("refs/heads/")
            .unwrap_or(&ref_name)
            .to_string();

        let mut transport = SmartHttp::new(&self.config, &remote.url, credentials, &self.log)?;
        let advertisement = transport.discover().await?;
        let previous = advertisement.refs.get(&ref_name).copied();

        let mut outcome = PushOutcome {
            remote: DEFAULT_REMOTE.to_string(),
            url: remote.url.clone(),
            branch,
            commit: local,
            previous,
            forced: false,
            up_to_date: previous == Some(local),
        };
        if outcome.up_to_date {
            tracing::info!(
                url = %self.log.redact_url(&outcome.url),
                branch = %outcome.branch,
                "remote is up to date"
            );
            return Ok(outcome);
        }

        let store = ObjectStore::new(fs.as_ref(), &git_dir);
        let known_previous = match previous {
            Some(old) if store.contains(&old).await? => Some(old),
            _ => None,
        };
        let fast_forward = match previous {
            None => true,
            Some(old) => known_previous.is_some() && store.is_ancestor(&old, &local).await?,
        };
        outcome.forced = !fast_forward;

        if outcome.forced {
            if self.config.policy() == PushPolicy::FastForwardOnly {
                return Err(Error::PushFailed(format!(
                    "rejected {} (non-fast-forward): the remote has commits that are not in local history",
                    ref_name
                )));
            }
            tracing::warn!(
                url = %self.log.redact_url(&outcome.url),
                branch = %outcome.branch,
                "force push discards remote commits not in local history"
            );
        }

        let objects = store.reachable(&local, known_previous.as_ref()).await?;
        let pack = write_pack(objects.iter().map(|(_, kind, body)| (*kind, body.as_slice())))?;

        let update = RefUpdate {
            name: ref_name,
            old: previous,
            new: local,
        };
        transport
            .receive_pack(&advertisement, &update, &pack)
            .await?;

        tracing::info!(
            url = %self.log.redact_url(&outcome.url),
            branch = %outcome.branch,
            commit = %local,
            objects = objects.len(),
            forced = outcome.forced,
            "pushed"
        );
        Ok(outcome)
    }
}
