//! Smart-HTTP `git-receive-pack` transport.
//!
//! # Credentials
//!
//! Credentials are requested from a [`CredentialProvider`] only when the
//! server answers `401 Unauthorized`, once per challenge. They live in a
//! sensitive `Authorization` header for the duration of one push and are
//! never written to the repository or logged.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use super::config::GitConfig;
use super::object::ObjectId;
use crate::error::{Error, Result};
use crate::http::{
    DEFAULT_MAX_RESPONSE_BYTES, build_client, read_body_prefix, read_body_with_limit,
};
use crate::logging::LogConfig;

const SERVICE: &str = "git-receive-pack";
/// Capabilities requested when the server advertises them.
const WANTED_CAPABILITIES: &[&str] = &["report-status", "side-band-64k"];
const FLUSH: &[u8] = b"0000";
/// Bytes of a failed response kept for the error message.
const ERROR_BODY_PREFIX: usize = 4096;

/// Username and password for HTTP Basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn authorization(&self) -> Result<HeaderValue> {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {}", token))
            .map_err(|_| Error::invalid("credentials contain invalid header characters"))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Supplies credentials at the moment the transport is challenged.
///
/// Any `Fn() -> Credentials` closure is a provider:
///
/// ```rust
/// use llmgit::{CredentialProvider, Credentials};
///
/// fn takes_provider(_: &dyn CredentialProvider) {}
///
/// let token = std::env::var("GITHUB_PAT").unwrap_or_default();
/// takes_provider(&move || Credentials::new("x-access-token", token.clone()));
/// ```
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<Credentials>;
}

#[async_trait]
impl<F> CredentialProvider for F
where
    F: Fn() -> Credentials + Send + Sync,
{
    async fn credentials(&self) -> Result<Credentials> {
        Ok(self())
    }
}

/// Frame `payload` as one pkt-line.
pub(crate) fn pkt_line(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{:04x}", payload.len() + 4).into_bytes();
    out.extend_from_slice(payload);
    out
}

/// Split a pkt-line stream. `None` marks a flush (or delimiter) packet.
pub(crate) fn read_pkt_lines(mut data: &[u8]) -> Result<Vec<Option<Vec<u8>>>> {
    let mut lines = Vec::new();
    while !data.is_empty() {
        let header = data
            .get(..4)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| usize::from_str_radix(h, 16).ok())
            .ok_or_else(|| Error::PushFailed("malformed pkt-line from server".into()))?;

        if header < 4 {
            lines.push(None);
            data = &data[4..];
            continue;
        }
        let payload = data
            .get(4..header)
            .ok_or_else(|| Error::PushFailed("truncated pkt-line from server".into()))?;
        lines.push(Some(payload.to_vec()));
        data = &data[header..];
    }
    Ok(lines)
}

fn trim_lf(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    text.strip_suffix('\n').unwrap_or(&text).to_string()
}

/// Refs and capabilities announced by `info/refs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Advertisement {
    pub refs: BTreeMap<String, ObjectId>,
    pub capabilities: Vec<String>,
}

impl Advertisement {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut adv = Advertisement::default();
        let mut first_ref = true;

        for line in read_pkt_lines(body)?.into_iter().flatten() {
            let line = trim_lf(&line);
            if line.starts_with("# service=") {
                continue;
            }

            let (refline, caps) = match line.split_once('\0') {
                Some((refline, caps)) => (refline.to_string(), Some(caps.to_string())),
                None => (line.clone(), None),
            };
            if first_ref {
                if let Some(caps) = caps {
                    adv.capabilities = caps.split_whitespace().map(str::to_string).collect();
                }
                first_ref = false;
            }

            let (id, name) = refline.split_once(' ').ok_or_else(|| {
                Error::PushFailed(format!("malformed ref advertisement: {}", refline))
            })?;
            if name == "capabilities^{}" {
                continue;
            }
            adv.refs.insert(name.to_string(), ObjectId::from_hex(id)?);
        }

        Ok(adv)
    }

    fn has(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Capabilities to request: the wanted ones the server offers, plus an
    /// agent string when the server sends one.
    fn negotiate(&self) -> Vec<String> {
        let mut caps: Vec<String> = WANTED_CAPABILITIES
            .iter()
            .filter(|c| self.has(c))
            .map(|c| c.to_string())
            .collect();
        if self.capabilities.iter().any(|c| c.starts_with("agent=")) {
            caps.push(format!("agent=llmgit/{}", env!("CARGO_PKG_VERSION")));
        }
        caps
    }
}

/// One ref update sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RefUpdate {
    pub name: String,
    pub old: Option<ObjectId>,
    pub new: ObjectId,
}

/// Build the receive-pack request: command, flush, pack.
pub(crate) fn encode_request(update: &RefUpdate, capabilities: &[String], pack: &[u8]) -> Vec<u8> {
    let old = update.old.unwrap_or(ObjectId::ZERO);
    let command = format!(
        "{} {} {}\0{}\n",
        old,
        update.new,
        update.name,
        capabilities.join(" ")
    );
    let mut body = pkt_line(command.as_bytes());
    body.extend_from_slice(FLUSH);
    body.extend_from_slice(pack);
    body
}

/// Outcome of `report-status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReportStatus {
    pub unpack: std::result::Result<(), String>,
    pub refs: Vec<(String, std::result::Result<(), String>)>,
}

impl ReportStatus {
    /// Parse a response, demultiplexing side-band when it was negotiated.
    pub fn parse(body: &[u8], side_band: bool) -> Result<Self> {
        let report = if side_band {
            let mut primary = Vec::new();
            for packet in read_pkt_lines(body)?.into_iter().flatten() {
                match packet.split_first() {
                    Some((1, data)) => primary.extend_from_slice(data),
                    Some((2, progress)) => {
                        tracing::trace!(progress = %trim_lf(progress), "remote progress");
                    }
                    Some((3, message)) => {
                        return Err(Error::PushFailed(format!(
                            "remote error: {}",
                            trim_lf(message)
                        )));
                    }
                    _ => {}
                }
            }
            primary
        } else {
            body.to_vec()
        };

        let mut status = ReportStatus {
            unpack: Err("missing unpack status".to_string()),
            refs: Vec::new(),
        };
        for line in read_pkt_lines(&report)?.into_iter().flatten() {
            let line = trim_lf(&line);
            if let Some(result) = line.strip_prefix("unpack ") {
                status.unpack = if result == "ok" {
                    Ok(())
                } else {
                    Err(result.to_string())
                };
            } else if let Some(name) = line.strip_prefix("ok ") {
                status.refs.push((name.to_string(), Ok(())));
            } else if let Some(rest) = line.strip_prefix("ng ") {
                let (name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
                status.refs.push((name.to_string(), Err(reason.to_string())));
            }
        }
        Ok(status)
    }

    fn into_result(self, ref_name: &str) -> Result<()> {
        if let Err(reason) = self.unpack {
            return Err(Error::PushFailed(format!("remote unpack failed: {}", reason)));
        }
        match self.refs.into_iter().find(|(name, _)| name == ref_name) {
            Some((_, Ok(()))) => Ok(()),
            Some((_, Err(reason))) => Err(Error::PushFailed(format!(
                "remote rejected {}: {}",
                ref_name, reason
            ))),
            None => Err(Error::PushFailed(format!(
                "remote did not report status for {}",
                ref_name
            ))),
        }
    }
}

/// A smart-HTTP session against one remote URL.
pub(crate) struct SmartHttp<'a> {
    client: Client,
    base: String,
    credentials: Option<&'a dyn CredentialProvider>,
    authorization: Option<HeaderValue>,
    log: &'a LogConfig,
}

impl<'a> SmartHttp<'a> {
    pub fn new(
        config: &GitConfig,
        url: &str,
        credentials: Option<&'a dyn CredentialProvider>,
        log: &'a LogConfig,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(Some(config.http_timeout), &config.user_agent)?,
            base: url.trim_end_matches('/').to_string(),
            credentials,
            authorization: None,
            log,
        })
    }

    /// Send a request, answering a 401 challenge with credentials once.
    async fn send<F>(&mut self, what: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut challenged = false;
        loop {
            let mut request = build(&self.client);
            if let Some(auth) = &self.authorization {
                request = request.header(AUTHORIZATION, auth.clone());
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::PushFailed(format!("{} failed: {}", what, e)))?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            let provider = match self.credentials {
                Some(provider) if !challenged => provider,
                Some(_) => {
                    return Err(Error::PushFailed(format!(
                        "authentication failed for {} (HTTP 401)",
                        self.log.redact_url(&self.base)
                    )));
                }
                None => {
                    return Err(Error::PushFailed(format!(
                        "authentication required for {} (HTTP 401)",
                        self.log.redact_url(&self.base)
                    )));
                }
            };

            challenged = true;
            tracing::debug!(step = what, "server requested authentication");
            self.authorization = Some(provider.credentials().await?.authorization()?);
        }
    }

    async fn body(&self, what: &str, response: Response) -> Result<Vec<u8>> {
        let status = response.status();
        if !status.is_success() {
            let detail = read_body_prefix(response, ERROR_BODY_PREFIX).await;
            let detail = self.log.sanitize_text(String::from_utf8_lossy(&detail).trim());
            if detail.is_empty() {
                return Err(Error::PushFailed(format!("{} returned HTTP {}", what, status)));
            }
            return Err(Error::PushFailed(format!(
                "{} returned HTTP {}: {}",
                what, status, detail
            )));
        }
        read_body_with_limit(response, DEFAULT_MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| Error::PushFailed(format!("{}: {}", what, e)))
    }

    /// `GET info/refs?service=git-receive-pack`.
    pub async fn discover(&mut self) -> Result<Advertisement> {
        let url = format!("{}/info/refs?service={}", self.base, SERVICE);
        tracing::debug!(url = %self.log.redact_url(&url), "discovering refs");

        let response = self.send("ref discovery", |c| c.get(&url)).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = self.body("ref discovery", response).await?;

        if content_type != format!("application/x-{}-advertisement", SERVICE) {
            return Err(Error::PushFailed(format!(
                "remote does not speak smart HTTP (content-type '{}')",
                content_type
            )));
        }

        let adv = Advertisement::parse(&body)?;
        tracing::trace!(refs = adv.refs.len(), caps = ?adv.capabilities, "ref advertisement");
        Ok(adv)
    }

    /// `POST git-receive-pack` with one ref update and its pack.
    pub async fn receive_pack(
        &mut self,
        adv: &Advertisement,
        update: &RefUpdate,
        pack: &[u8],
    ) -> Result<()> {
        let capabilities = adv.negotiate();
        let body = encode_request(update, &capabilities, pack);
        let url = format!("{}/{}", self.base, SERVICE);
        tracing::debug!(
            url = %self.log.redact_url(&url),
            refname = %update.name,
            bytes = body.len(),
            "sending pack"
        );

        let response = self
            .send("receive-pack", |c| {
                c.post(&url)
                    .header(CONTENT_TYPE, format!("application/x-{}-request", SERVICE))
                    .header(ACCEPT, format!("application/x-{}-result", SERVICE))
                    .body(body.clone())
            })
            .await?;
        let reply = self.body("receive-pack", response).await?;

        if !capabilities.iter().any(|c| c == "report-status") {
            return Ok(());
        }
        let side_band = capabilities.iter().any(|c| c == "side-band-64k");
        ReportStatus::parse(&reply, side_band)?.into_result(&update.name)
    }
}
