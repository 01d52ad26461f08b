//! Shared HTTP client construction.
//!
//! Both the Git transport and the chat client go through [`build_client`]:
//! - Redirects are not followed, so an allowed remote cannot bounce a push
//!   (and its credentials) to another host
//! - Automatic decompression is off; git and Ollama bodies are read as-is
//! - Response bodies are read with a size cap

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;

use crate::error::{Error, Result};

/// Default maximum response body size (32 MB)
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;

/// Connect timeout applied to every client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a client with the given overall timeout and User-Agent.
pub(crate) fn build_client(timeout: Option<Duration>, user_agent: &str) -> Result<Client> {
    // Another component may already have installed a provider; either way one is set.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .no_gzip()
        .no_brotli()
        .no_deflate();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder
        .build()
        .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))
}

/// Read a response body, failing once it exceeds `limit` bytes.
pub(crate) async fn read_body_with_limit(
    response: reqwest::Response,
    limit: usize,
) -> std::result::Result<Vec<u8>, String> {
    if let Some(length) = response.content_length() {
        if length as usize > limit {
            return Err(format!(
                "response too large: {} bytes (max: {} bytes)",
                length, limit
            ));
        }
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("failed to read response: {}", e))?;
        if body.len() + chunk.len() > limit {
            return Err(format!("response too large: exceeded {} bytes limit", limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Read at most `limit` bytes of a response body, dropping the rest.
///
/// Used for error bodies, where a prefix is enough and read errors are
/// not worth reporting over the status that caused them.
pub(crate) async fn read_body_prefix(response: reqwest::Response, limit: usize) -> Vec<u8> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(Ok(chunk)) = stream.next().await {
        let take = chunk.len().min(limit - body.len());
        body.extend_from_slice(&chunk[..take]);
        if body.len() >= limit {
            break;
        }
    }
    body
}
