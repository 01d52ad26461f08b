//! `llmgit serve`: HTTP endpoint that commits posted files and pushes them

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use llmgit::{
    Author, DEFAULT_BRANCH, DEFAULT_REMOTE, FileDescriptor, FileSystem, GitClient, GitConfig,
    InMemoryFs, PushOutcome, PushRemote, sanitize_for_log, validate_branch_name,
    workspace_name_from_url,
};

/// Root of the per-repository workspaces.
const WORKSPACE_ROOT: &str = "/git-workspace";

/// Author email when `GIT_AUTHOR_EMAIL` is unset.
const FALLBACK_AUTHOR_EMAIL: &str = "noreply@example.com";

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Username for HTTP authentication
    #[arg(long, env = "GITHUB_USERNAME")]
    username: String,

    /// Personal access token
    #[arg(long, env = "GITHUB_PAT", hide_env_values = true)]
    password: String,

    /// Commit author name (defaults to the username)
    #[arg(long, env = "GIT_AUTHOR_NAME")]
    author_name: Option<String>,

    /// Commit author email
    #[arg(long, env = "GIT_AUTHOR_EMAIL", default_value = FALLBACK_AUTHOR_EMAIL)]
    author_email: String,

    /// Allowed remote URL prefix (repeatable)
    #[arg(long = "allow-remote", default_value = "https://github.com/")]
    allow_remote: Vec<String>,
}

/// Body of `POST /api/push-to-github`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PushRequest {
    branch: BranchRef,
    commit: CommitInfo,
    push: Option<PushTarget>,
    files: Option<Vec<RequestFile>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BranchRef {
    #[serde(rename = "ref")]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommitInfo {
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PushTarget {
    url: Option<String>,
    remote: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RequestFile {
    filename: Option<String>,
    content: Option<String>,
}

/// Shared server state.
pub struct AppState {
    fs: Arc<dyn FileSystem>,
    credentials: PushCredentials,
    author: Author,
    allowed: Vec<String>,
    /// One pipeline at a time; workspaces share the filesystem
    lock: Mutex<()>,
}

struct PushCredentials {
    username: String,
    password: String,
}

impl AppState {
    fn from_args(args: &ServeArgs) -> Self {
        let author_name = args
            .author_name
            .clone()
            .unwrap_or_else(|| args.username.clone());
        Self {
            fs: Arc::new(InMemoryFs::new()),
            credentials: PushCredentials {
                username: args.username.clone(),
                password: args.password.clone(),
            },
            author: Author::new(author_name, args.author_email.clone()),
            allowed: args.allow_remote.clone(),
            lock: Mutex::new(()),
        }
    }

    fn client(&self, branch: &str) -> GitClient {
        GitClient::new(
            GitConfig::new()
                .author(self.author.name.clone(), self.author.email.clone())
                .default_branch(branch)
                .allow_remotes(self.allowed.iter().cloned()),
        )
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/push-to-github", post(push_to_github))
        .with_state(state)
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", args.bind, args.port))?;
    let state = Arc::new(AppState::from_args(&args));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("llmgit server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn push_to_github(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PushRequest>,
) -> Response {
    let Some(url) = request
        .push
        .as_ref()
        .and_then(|p| p.url.clone())
        .filter(|u| !u.is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": "Missing push information or URL",
            })),
        )
            .into_response();
    };

    let branch = match request_branch(&request) {
        Ok(branch) => branch,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "message": "Invalid branch name",
                    "error": e.to_string(),
                })),
            )
                .into_response();
        }
    };

    match run_pipeline(&state, &request, &url, &branch).await {
        Ok((outcome, files)) => Json(json!({
            "success": true,
            "message": "Successfully pushed to GitHub",
            "details": {
                "repository": url,
                "branch": branch,
                "commit": outcome.commit,
                "pushResult": outcome,
                "files": files,
            },
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(url = %sanitize_for_log(&url), error = %e, "Push failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "Failed to push to GitHub",
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

/// Short branch name from `branch.ref`, accepting `refs/heads/<name>`.
fn request_branch(request: &PushRequest) -> llmgit::Result<String> {
    let branch = match request.branch.name.as_deref() {
        Some(name) if !name.is_empty() => name.strip_prefix("refs/heads/").unwrap_or(name),
        _ => DEFAULT_BRANCH,
    };
    validate_branch_name(branch)?;
    Ok(branch.to_string())
}

async fn run_pipeline(
    state: &AppState,
    request: &PushRequest,
    url: &str,
    branch: &str,
) -> llmgit::Result<(PushOutcome, Vec<String>)> {
    if let Some(remote) = request.push.as_ref().and_then(|p| p.remote.as_deref()) {
        if remote != DEFAULT_REMOTE {
            tracing::warn!(remote, "Only '{}' is supported; using it instead", DEFAULT_REMOTE);
        }
    }

    let repo = workspace_name_from_url(url);
    let files = request_files(request, &repo);
    let names: Vec<String> = files.iter().map(|f| f.path.clone()).collect();

    let _guard = state.lock.lock().await;
    let client = state.client(branch);
    let work_dir = client
        .prepare_workspace(&state.fs, Path::new(WORKSPACE_ROOT), url)
        .await?;
    client.write_files(&state.fs, &work_dir, &files).await?;

    let message = request
        .commit
        .message
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Update to {}", repo));
    let remote = PushRemote::new(
        url,
        state.credentials.username.clone(),
        state.credentials.password.clone(),
    );

    let outcome = client
        .push(&state.fs, &work_dir, &remote, &state.author, Some(&message))
        .await?;
    tracing::info!(
        repo = %repo,
        branch = %outcome.branch,
        commit = %outcome.commit,
        files = names.len(),
        "Pushed"
    );
    Ok((outcome, names))
}

/// Files to write; a README when the request carries none usable.
fn request_files(request: &PushRequest, repo: &str) -> Vec<FileDescriptor> {
    let files: Vec<FileDescriptor> = request
        .files
        .iter()
        .flatten()
        .filter_map(|f| match (&f.filename, &f.content) {
            (Some(name), Some(content)) if !name.is_empty() => {
                Some(FileDescriptor::new(name.clone(), content.clone()))
            }
            _ => None,
        })
        .collect();

    if files.is_empty() {
        return vec![FileDescriptor::new(
            "README.md",
            format!("# {}\n\nCreated with llmgit from an in-memory workspace", repo),
        )];
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::from_args(&ServeArgs {
            port: 0,
            bind: "127.0.0.1".into(),
            username: "bot".into(),
            password: "secret".into(),
            author_name: None,
            author_email: FALLBACK_AUTHOR_EMAIL.into(),
            allow_remote: vec!["https://github.com/".into()],
        }))
    }

    async fn call(body: Value) -> (StatusCode, Value) {
        let request: PushRequest = serde_json::from_value(body).unwrap();
        let response = push_to_github(State(state()), Json(request)).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_url_is_bad_request() {
        let (status, body) = call(json!({"files": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Missing push information or URL");

        let (status, _) = call(json!({"push": {"remote": "origin"}})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_disallowed_remote_is_server_error() {
        let (status, body) = call(json!({
            "push": {"url": "https://evil.example.com/x.git"},
            "files": [{"filename": "a.txt", "content": "a"}],
        }))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Failed to push to GitHub");
        assert!(body["error"].as_str().unwrap().contains("evil.example.com"));
    }

    #[tokio::test]
    async fn test_invalid_branch_is_bad_request() {
        for name in ["../x", "refs/heads/../../escaped", "a b", "-f"] {
            let (status, body) = call(json!({
                "push": {"url": "https://github.com/o/r.git"},
                "branch": {"ref": name},
            }))
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", name);
            assert_eq!(body["message"], "Invalid branch name");
        }
    }

    #[test]
    fn test_request_branch_strips_heads_prefix() {
        let branch = |value: Value| {
            let request: PushRequest = serde_json::from_value(value).unwrap();
            request_branch(&request).unwrap()
        };
        assert_eq!(branch(json!({"branch": {"ref": "refs/heads/dev"}})), "dev");
        assert_eq!(branch(json!({"branch": {"ref": "feature/x"}})), "feature/x");
        assert_eq!(branch(json!({"branch": {"ref": ""}})), DEFAULT_BRANCH);
        assert_eq!(branch(json!({})), DEFAULT_BRANCH);
    }

    #[test]
    fn test_default_readme() {
        let request: PushRequest = serde_json::from_value(json!({
            "files": [{"filename": "", "content": "x"}, {"filename": "b.txt"}],
        }))
        .unwrap();
        let files = request_files(&request, "demo");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "README.md");
        assert!(files[0].content.starts_with("# demo\n\n"));
    }

    #[test]
    fn test_request_files_kept_in_order() {
        let request: PushRequest = serde_json::from_value(json!({
            "files": [
                {"filename": "index.html", "content": "<h1>hi</h1>"},
                {"filename": "css/site.css", "content": ""},
            ],
        }))
        .unwrap();
        let files = request_files(&request, "demo");
        let names: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(names, vec!["index.html", "css/site.css"]);
    }

    #[test]
    fn test_router_builds() {
        let _router = router(state());
    }
}
