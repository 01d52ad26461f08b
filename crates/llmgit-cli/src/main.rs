//! llmgit CLI - Push generated files to Git remotes
//!
//! Usage:
//!   llmgit push ./site --url https://github.com/me/site.git   # Push a host directory
//!   llmgit chat "Write a todo app" --push-url https://...       # Generate files and push them
//!   llmgit serve --port 3000                                    # Run the HTTP push endpoint

mod serve;
mod workspace;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use llmgit::{
    Author, ChatConfig, ChatHistory, ChatMessage, DEFAULT_AUTHOR_EMAIL, DEFAULT_AUTHOR_NAME,
    DEFAULT_BRANCH, DEFAULT_OLLAMA_HOST, FileDescriptor, FileSystem, GitClient, GitConfig,
    InMemoryFs, OllamaClient, PushOutcome, PushPolicy, PushRemote, workspace_name_from_url,
};

/// Root of the in-memory workspaces.
const WORKSPACE_ROOT: &str = "/workspace";

/// llmgit - Push LLM-generated files to Git remotes
#[derive(Parser, Debug)]
#[command(name = "llmgit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: SubCmd,
}

#[derive(Subcommand, Debug)]
enum SubCmd {
    /// Commit a host directory in memory and push it
    Push {
        /// Directory whose files are pushed
        dir: PathBuf,

        /// Remote repository URL
        #[arg(long)]
        url: String,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Ask a local model for files, optionally pushing them
    Chat {
        /// Prompt sent as the user message
        prompt: String,

        /// Model name
        #[arg(long, env = "OLLAMA_MODEL", default_value = "qwen2.5-coder:7b")]
        model: String,

        /// Ollama base URL
        #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_HOST)]
        host: String,

        /// Plain text reply instead of structured JSON
        #[arg(long)]
        raw: bool,

        /// Push the generated files to this remote
        #[arg(long)]
        push_url: Option<String>,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Serve POST /api/push-to-github
    Serve(serve::ServeArgs),
}

/// Remote access and identity options shared by commands that push.
#[derive(clap::Args, Debug, Clone)]
struct RemoteArgs {
    /// Username for HTTP authentication
    #[arg(long, env = "GITHUB_USERNAME")]
    username: Option<String>,

    /// Password or personal access token
    #[arg(long, env = "GITHUB_PAT", hide_env_values = true)]
    password: Option<String>,

    /// Commit author name (defaults to the username)
    #[arg(long, env = "GIT_AUTHOR_NAME")]
    author_name: Option<String>,

    /// Commit author email
    #[arg(long, env = "GIT_AUTHOR_EMAIL")]
    author_email: Option<String>,

    /// Branch to create and push
    #[arg(long, default_value = DEFAULT_BRANCH)]
    branch: String,

    /// Allowed remote URL prefix (repeatable)
    #[arg(long = "allow-remote", default_value = "https://github.com/")]
    allow_remote: Vec<String>,

    /// Allow any remote URL
    #[arg(long)]
    allow_any_remote: bool,

    /// Refuse to overwrite remote commits missing locally
    #[arg(long)]
    fast_forward_only: bool,
}

impl RemoteArgs {
    fn author(&self) -> Author {
        let name = self
            .author_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| DEFAULT_AUTHOR_NAME.to_string());
        let email = self
            .author_email
            .clone()
            .unwrap_or_else(|| DEFAULT_AUTHOR_EMAIL.to_string());
        Author::new(name, email)
    }

    fn git_config(&self) -> GitConfig {
        let author = self.author();
        let mut config = GitConfig::new()
            .author(author.name, author.email)
            .default_branch(&self.branch)
            .allow_remotes(self.allow_remote.iter().cloned());
        if self.allow_any_remote {
            config = config.allow_all_remotes();
        }
        if self.fast_forward_only {
            config = config.push_policy(PushPolicy::FastForwardOnly);
        }
        config
    }

    fn push_remote(&self, url: &str) -> PushRemote {
        PushRemote::new(
            url,
            self.username.clone().unwrap_or_default(),
            self.password.clone().unwrap_or_default(),
        )
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .with_level(true)
        .with_ansi(true)
        .with_filter(filter);

    tracing_subscriber::registry().with(console).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        SubCmd::Push {
            dir,
            url,
            message,
            remote,
        } => run_push(&dir, &url, message.as_deref(), &remote).await,
        SubCmd::Chat {
            prompt,
            model,
            host,
            raw,
            push_url,
            remote,
        } => {
            let config = ChatConfig::new(model).host(host).structured_output(!raw);
            run_chat(config, &prompt, push_url.as_deref(), &remote).await
        }
        SubCmd::Serve(serve_args) => serve::run(serve_args).await,
    }
}

async fn run_push(dir: &Path, url: &str, message: Option<&str>, remote: &RemoteArgs) -> Result<()> {
    let files = workspace::collect_files(dir)
        .await
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    if files.is_empty() {
        anyhow::bail!("{} contains no text files to push", dir.display());
    }

    let outcome = push_files(&files, url, message, remote).await?;
    print_outcome(&outcome, files.len());
    Ok(())
}

async fn run_chat(
    config: ChatConfig,
    prompt: &str,
    push_url: Option<&str>,
    remote: &RemoteArgs,
) -> Result<()> {
    let client = OllamaClient::new(config).context("Failed to create chat client")?;
    let history = ChatHistory::from(vec![ChatMessage::user(prompt)]);

    let mut printed = 0;
    let turn = client
        .chat(&history, |text| {
            if let Some(delta) = text.get(printed..) {
                eprint!("{}", delta);
                let _ = std::io::stderr().flush();
            }
            printed = text.len();
        })
        .await
        .context("Chat request failed")?;
    eprintln!();

    let response = turn.response();
    println!("{}", response.explanation);
    let files = response.file_descriptors();
    for file in &files {
        println!("  {} ({} bytes)", file.path, file.content.len());
    }

    let Some(url) = push_url else {
        return Ok(());
    };
    if files.is_empty() {
        anyhow::bail!("The model returned no files to push");
    }
    let outcome = push_files(&files, url, Some(prompt), remote).await?;
    print_outcome(&outcome, files.len());
    Ok(())
}

/// Write `files` into a fresh in-memory workspace and push it to `url`.
async fn push_files(
    files: &[FileDescriptor],
    url: &str,
    message: Option<&str>,
    remote: &RemoteArgs,
) -> Result<PushOutcome> {
    let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
    let client = GitClient::new(remote.git_config());

    let work_dir = client
        .prepare_workspace(&fs, Path::new(WORKSPACE_ROOT), url)
        .await?;
    client.write_files(&fs, &work_dir, files).await?;

    let default_message = format!("Update to {}", workspace_name_from_url(url));
    let outcome = client
        .push(
            &fs,
            &work_dir,
            &remote.push_remote(url),
            &remote.author(),
            Some(message.unwrap_or(&default_message)),
        )
        .await
        .with_context(|| format!("Failed to push to {}", url))?;
    Ok(outcome)
}

fn print_outcome(outcome: &PushOutcome, files: usize) {
    if outcome.up_to_date {
        println!("{} {} is up to date", outcome.url, outcome.branch);
        return;
    }
    let range = match outcome.previous {
        Some(previous) => format!("{}..{}", &previous.to_hex()[..7], &outcome.commit.to_hex()[..7]),
        None => format!("new branch at {}", &outcome.commit.to_hex()[..7]),
    };
    println!(
        "Pushed {} file(s) to {} {} ({}{})",
        files,
        outcome.url,
        outcome.branch,
        range,
        if outcome.forced { ", forced" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_push_args() {
        let args = Args::try_parse_from([
            "llmgit",
            "push",
            "./site",
            "--url",
            "https://github.com/me/site.git",
            "--username",
            "me",
            "--fast-forward-only",
        ])
        .unwrap();

        let SubCmd::Push { dir, url, remote, .. } = args.command else {
            panic!("expected push");
        };
        assert_eq!(dir, PathBuf::from("./site"));
        assert_eq!(url, "https://github.com/me/site.git");
        assert_eq!(remote.allow_remote, vec!["https://github.com/".to_string()]);
        assert_eq!(remote.username.as_deref(), Some("me"));
        assert_eq!(remote.git_config().policy(), PushPolicy::FastForwardOnly);
        assert_eq!(remote.git_config().branch(), "main");
    }

    #[test]
    fn test_author_falls_back_to_defaults() {
        let args = Args::try_parse_from([
            "llmgit",
            "push",
            ".",
            "--url",
            "https://github.com/me/site.git",
            "--author-email",
            "me@example.com",
        ])
        .unwrap();
        let SubCmd::Push { remote, .. } = args.command else {
            panic!("expected push");
        };
        // GITHUB_USERNAME may be set in the environment running the tests.
        let author = remote.author();
        assert!(!author.name.is_empty());
        assert_eq!(author.email, "me@example.com");
    }
}
