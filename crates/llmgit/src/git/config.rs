//! Git configuration for llmgit.
//!
//! # Security
//!
//! - Author identity is supplied by the caller, never read from the host
//! - Remote URLs must pass an explicit allowlist
//! - Only HTTPS remotes are accepted unless plain HTTP is explicitly enabled
//! - Remote URLs may not embed credentials; those arrive at push time only

use std::collections::HashSet;
use std::time::Duration;

use url::Url;

/// Default author name for commits.
pub const DEFAULT_AUTHOR_NAME: &str = "llmgit";

/// Default author email for commits.
pub const DEFAULT_AUTHOR_EMAIL: &str = "llmgit@localhost";

/// Default branch created by `init_repository` and pushed by `push`.
pub const DEFAULT_BRANCH: &str = "main";

/// Default remote name.
pub const DEFAULT_REMOTE: &str = "origin";

/// Default commit message used by the push pipeline.
pub const DEFAULT_COMMIT_MESSAGE: &str = "Automatic commit";

/// Default transport timeout (seconds).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// How a push treats a remote branch that has moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushPolicy {
    /// Overwrite the remote branch unconditionally.
    ///
    /// Remote-only commits are discarded. This matches the
    /// regenerate-and-overwrite workflow the pipeline was built for.
    #[default]
    Force,
    /// Refuse the push unless the remote tip is part of local history.
    FastForwardOnly,
}

/// Git configuration.
///
/// # Example
///
/// ```rust
/// use llmgit::{GitConfig, PushPolicy};
///
/// let config = GitConfig::new()
///     .author("Deploy Bot", "deploy@example.com")
///     .allow_remote("https://github.com/myorg/")
///     .push_policy(PushPolicy::FastForwardOnly);
/// ```
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Author name for commits
    pub(crate) author_name: String,
    /// Author email for commits
    pub(crate) author_email: String,
    /// Branch created on init and pushed
    pub(crate) default_branch: String,
    /// Remote URL prefixes that are allowed
    pub(crate) remote_allowlist: HashSet<String>,
    /// Allow all remote URLs (dangerous - testing only)
    pub(crate) allow_all_remotes: bool,
    /// Accept `http://` remotes (local test servers)
    pub(crate) allow_insecure_http: bool,
    /// Force or fast-forward-only push
    pub(crate) push_policy: PushPolicy,
    /// Transport request timeout
    pub(crate) http_timeout: Duration,
    /// User-Agent sent by the transport
    pub(crate) user_agent: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: DEFAULT_AUTHOR_NAME.to_string(),
            author_email: DEFAULT_AUTHOR_EMAIL.to_string(),
            default_branch: DEFAULT_BRANCH.to_string(),
            remote_allowlist: HashSet::new(),
            allow_all_remotes: false,
            allow_insecure_http: false,
            push_policy: PushPolicy::default(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            user_agent: format!("git/llmgit-{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl GitConfig {
    /// Create a new git configuration with the default identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default author name and email for commits.
    pub fn author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }

    /// Set the branch created on init and pushed by the pipeline.
    ///
    /// The name is checked when the repository is initialized; see
    /// [`validate_branch_name`](crate::validate_branch_name).
    pub fn default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    /// Add a remote URL prefix to the allowlist.
    ///
    /// ```rust
    /// use llmgit::GitConfig;
    ///
    /// let config = GitConfig::new()
    ///     .allow_remote("https://github.com/myorg/");
    /// ```
    pub fn allow_remote(mut self, pattern: impl Into<String>) -> Self {
        self.remote_allowlist.insert(pattern.into());
        self
    }

    /// Add multiple remote URL prefixes to the allowlist.
    pub fn allow_remotes(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for pattern in patterns {
            self.remote_allowlist.insert(pattern.into());
        }
        self
    }

    /// Allow all remote URLs.
    ///
    /// # Warning
    ///
    /// Any HTTPS URL becomes pushable. Use only when the caller fully
    /// controls the URLs handed to the pipeline.
    pub fn allow_all_remotes(mut self) -> Self {
        self.allow_all_remotes = true;
        self
    }

    /// Accept plain `http://` remotes.
    ///
    /// Credentials travel unencrypted over such remotes; intended for
    /// local test servers.
    pub fn allow_insecure_http(mut self) -> Self {
        self.allow_insecure_http = true;
        self
    }

    /// Choose between force and fast-forward-only pushes.
    pub fn push_policy(mut self, policy: PushPolicy) -> Self {
        self.push_policy = policy;
        self
    }

    /// Set the transport request timeout.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the User-Agent header sent by the transport.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Get the configured author name.
    pub fn author_name(&self) -> &str {
        &self.author_name
    }

    /// Get the configured author email.
    pub fn author_email(&self) -> &str {
        &self.author_email
    }

    /// Get the branch created on init and pushed.
    pub fn branch(&self) -> &str {
        &self.default_branch
    }

    /// Get the push policy.
    pub fn policy(&self) -> PushPolicy {
        self.push_policy
    }

    /// Check if remote access is configured.
    pub fn has_remote_access(&self) -> bool {
        self.allow_all_remotes || !self.remote_allowlist.is_empty()
    }

    /// Check if a remote URL is allowed.
    ///
    /// Returns an error message when the URL:
    /// - is not `https://` (or `http://` with insecure HTTP enabled)
    /// - carries userinfo (credentials belong to the push call, not the URL)
    /// - matches no allowlist prefix (unless all remotes are allowed)
    pub(crate) fn is_url_allowed(&self, url: &str) -> Result<(), String> {
        let parsed = Url::parse(url).map_err(|e| format!("invalid remote URL: {}", e))?;

        match parsed.scheme() {
            "https" => {}
            "http" if self.allow_insecure_http => {}
            _ => {
                return Err(format!(
                    "only HTTPS remote URLs are allowed (got scheme '{}')",
                    parsed.scheme()
                ));
            }
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(
                "remote URL must not embed credentials; supply them at push time".to_string(),
            );
        }

        if self.allow_all_remotes {
            return Ok(());
        }

        if self.remote_allowlist.is_empty() {
            return Err("no remote URLs are allowed; configure GitConfig::allow_remote()".to_string());
        }

        if self
            .remote_allowlist
            .iter()
            .any(|pattern| url.starts_with(pattern.as_str()))
        {
            return Ok(());
        }

        Err(format!("remote URL '{}' is not in allowlist", url))
    }
}
