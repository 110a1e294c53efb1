// src/services/source.rs

//! Upstream search API client with transport failover.
//!
//! Requests go through the primary transport (`reqwest`) until the upstream
//! rejects it for proxy reasons. From then on the client prefers the secondary
//! transport (an external `curl` process) and falls back to the primary one
//! per request. The mode lives in an atomic cell shared by every crawler
//! holding the client.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::{Result, TransportError, TransportErrorKind};
use crate::models::{Configuration, RawRecord, SourceConfig};
use crate::utils::http::{create_async_client, default_headers};

/// Parsed body of one search request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "SearchResults", default)]
    pub results: Vec<RawRecord>,

    #[serde(rename = "Count", default)]
    pub count: u64,
}

/// One way of issuing a GET request against the search API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    async fn get(&self, url: &str) -> std::result::Result<SearchResponse, TransportError>;
}

/// In-process HTTP transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn classify(err: &reqwest::Error) -> TransportErrorKind {
        if let Some(status) = err.status() {
            return status_kind(status.as_u16());
        }
        if err.is_connect() && tunnel_auth_rejected(err) {
            TransportErrorKind::ProxyRejected
        } else if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_decode() || err.is_body() {
            TransportErrorKind::Decode
        } else {
            TransportErrorKind::Connect
        }
    }

    fn error(err: reqwest::Error) -> TransportError {
        TransportError::failed("reqwest", Self::classify(&err), err)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn get(&self, url: &str) -> std::result::Result<SearchResponse, TransportError> {
        let response = self.client.get(url).send().await.map_err(Self::error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::failed(
                self.name(),
                status_kind(status.as_u16()),
                format!("upstream answered {status}"),
            ));
        }

        let bytes = response.bytes().await.map_err(Self::error)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::failed(self.name(), TransportErrorKind::Decode, e))
    }
}

/// Messages of the tunnel errors raised when a proxy answers CONNECT with 407.
/// The error types themselves are private to the HTTP stack.
const TUNNEL_AUTH_MESSAGES: [&str; 2] = [
    "proxy authorization required",
    "proxy authentication required",
];

/// Whether any cause in the chain is a proxy tunnel refusing authentication.
fn tunnel_auth_rejected(err: &(dyn std::error::Error + 'static)) -> bool {
    std::iter::successors(Some(err), |cause| cause.source()).any(|cause| {
        let text = cause.to_string();
        TUNNEL_AUTH_MESSAGES.contains(&text.as_str())
    })
}

/// Transport that shells out to `curl`.
pub struct CurlTransport {
    binary: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl CurlTransport {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            binary: config.curl_binary.clone(),
            headers: default_headers(config),
            timeout: config.timeout(),
        }
    }

    fn error(kind: TransportErrorKind, message: impl std::fmt::Display) -> TransportError {
        TransportError::failed("curl", kind, message)
    }
}

/// Write-out appended after the body: `<http_code> <proxy_connect_code>`.
const CURL_WRITE_OUT: &str = "\n%{http_code} %{http_connect}";

/// Split curl output into body and the status codes written by [`CURL_WRITE_OUT`].
fn split_curl_output(stdout: &[u8]) -> (&[u8], u16, u16) {
    let Some(pos) = stdout.iter().rposition(|b| *b == b'\n') else {
        return (stdout, 0, 0);
    };
    let trailer = String::from_utf8_lossy(&stdout[pos + 1..]);
    let mut codes = trailer
        .split_whitespace()
        .map(|code| code.parse::<u16>().unwrap_or(0));
    let http_code = codes.next().unwrap_or(0);
    let connect_code = codes.next().unwrap_or(0);
    (&stdout[..pos], http_code, connect_code)
}

/// Map a curl exit code without a usable HTTP status.
fn curl_exit_kind(code: Option<i32>) -> TransportErrorKind {
    match code {
        Some(28) => TransportErrorKind::Timeout,
        Some(5 | 6 | 7 | 35 | 52 | 56) => TransportErrorKind::Connect,
        _ => TransportErrorKind::Subprocess,
    }
}

#[async_trait]
impl Transport for CurlTransport {
    fn name(&self) -> &'static str {
        "curl"
    }

    async fn get(&self, url: &str) -> std::result::Result<SearchResponse, TransportError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-sS")
            .arg("--compressed")
            .arg("--max-time")
            .arg(self.timeout.as_secs().max(1).to_string());
        for (name, value) in &self.headers {
            command.arg("-H").arg(format!("{name}: {value}"));
        }
        command
            .arg("-w")
            .arg(CURL_WRITE_OUT)
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = command
            .output()
            .await
            .map_err(|e| Self::error(TransportErrorKind::Subprocess, e))?;

        let (body, http_code, connect_code) = split_curl_output(&output.stdout);
        if http_code == 407 || connect_code == 407 {
            return Err(Self::error(
                TransportErrorKind::ProxyRejected,
                "proxy authentication required",
            ));
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::error(
                curl_exit_kind(output.status.code()),
                format!("{} ({})", output.status, stderr.trim()),
            ));
        }

        if !(200..300).contains(&http_code) {
            return Err(Self::error(
                status_kind(http_code),
                format!("upstream answered {http_code}"),
            ));
        }

        serde_json::from_slice(body).map_err(|e| Self::error(TransportErrorKind::Decode, e))
    }
}

fn status_kind(code: u16) -> TransportErrorKind {
    if code == StatusCode::PROXY_AUTHENTICATION_REQUIRED.as_u16() {
        TransportErrorKind::ProxyRejected
    } else {
        TransportErrorKind::Status(code)
    }
}

/// Which transport the client currently prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Primary,
    Secondary,
}

const MODE_PRIMARY: u8 = 0;
const MODE_SECONDARY: u8 = 1;

/// One fetched page.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub results: Vec<RawRecord>,
    /// Upstream's total result count for the query
    pub total_count_hint: u64,
    /// Transport that served the page
    pub served_by: TransportMode,
}

/// Client for the paginated search API.
pub struct SourceClient {
    base_url: String,
    include_count: bool,
    primary: Arc<dyn Transport>,
    secondary: Option<Arc<dyn Transport>>,
    mode: AtomicU8,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl SourceClient {
    /// Create a client over explicit transports.
    pub fn new(
        config: &SourceConfig,
        primary: Arc<dyn Transport>,
        secondary: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self {
            base_url: config.base_url.clone(),
            include_count: config.include_count,
            primary,
            secondary,
            mode: AtomicU8::new(MODE_PRIMARY),
            retry_attempts: config.retry_attempts.max(1),
            retry_backoff: config.retry_backoff(),
        }
    }

    /// Create a client with the `reqwest` primary and, unless disabled, the `curl` secondary.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let primary: Arc<dyn Transport> = Arc::new(HttpTransport::new(create_async_client(config)?));
        let secondary: Option<Arc<dyn Transport>> = if config.curl_binary.trim().is_empty() {
            None
        } else {
            Some(Arc::new(CurlTransport::new(config)))
        };
        Ok(Self::new(config, primary, secondary))
    }

    /// Current transport mode.
    pub fn mode(&self) -> TransportMode {
        match self.mode.load(Ordering::Acquire) {
            MODE_SECONDARY => TransportMode::Secondary,
            _ => TransportMode::Primary,
        }
    }

    /// Request URL for one page of a configuration.
    pub fn page_url(&self, configuration: &Configuration, page: usize) -> String {
        let mut parts = Vec::with_capacity(3);
        if self.include_count {
            parts.push("count=true".to_string());
        }
        parts.push(configuration.filter.expression.clone());
        parts.push(configuration.range_selector(page));
        format!("{}?{}", self.base_url, parts.join("&"))
    }

    /// Fetch page `page` (zero-based) of a configuration.
    ///
    /// The record offset is `page × configuration.page_size`.
    pub async fn fetch_page(
        &self,
        configuration: &Configuration,
        page: usize,
    ) -> std::result::Result<PageResponse, TransportError> {
        let url = self.page_url(configuration, page);

        if let (TransportMode::Secondary, Some(secondary)) = (self.mode(), &self.secondary) {
            let secondary_err = match self.attempt(secondary.as_ref(), &url).await {
                Ok(response) => return Ok(page_response(response, TransportMode::Secondary)),
                Err(e) => e,
            };
            log::debug!(
                "{} - page {} secondary transport failed, trying primary: {}",
                configuration,
                page,
                secondary_err
            );
            return match self.attempt(self.primary.as_ref(), &url).await {
                Ok(response) => Ok(page_response(response, TransportMode::Primary)),
                Err(primary_err) => Err(TransportError::exhausted(primary_err, secondary_err)),
            };
        }

        let primary_err = match self.attempt(self.primary.as_ref(), &url).await {
            Ok(response) => return Ok(page_response(response, TransportMode::Primary)),
            Err(e) => e,
        };

        match &self.secondary {
            Some(secondary) if primary_err.is_proxy_rejection() => {
                self.switch_to_secondary(&primary_err);
                match self.attempt(secondary.as_ref(), &url).await {
                    Ok(response) => Ok(page_response(response, TransportMode::Secondary)),
                    Err(secondary_err) => {
                        Err(TransportError::exhausted(primary_err, secondary_err))
                    }
                }
            }
            _ => Err(primary_err),
        }
    }

    /// Try one transport up to `retry_attempts` times. Proxy rejections are not retried.
    async fn attempt(
        &self,
        transport: &dyn Transport,
        url: &str,
    ) -> std::result::Result<SearchResponse, TransportError> {
        let mut attempt = 1;
        loop {
            match transport.get(url).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_proxy_rejection() || attempt >= self.retry_attempts => {
                    return Err(e);
                }
                Err(e) => {
                    log::debug!(
                        "{} attempt {}/{} failed: {}",
                        transport.name(),
                        attempt,
                        self.retry_attempts,
                        e
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    fn switch_to_secondary(&self, cause: &TransportError) {
        if self
            .mode
            .compare_exchange(
                MODE_PRIMARY,
                MODE_SECONDARY,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            log::warn!("Switching to secondary transport after: {}", cause);
        }
    }
}

fn page_response(response: SearchResponse, served_by: TransportMode) -> PageResponse {
    PageResponse {
        results: response.results,
        total_count_hint: response.count,
        served_by,
    }
}

/// Scripted transports for tests.
#[cfg(test)]
pub(crate) mod stub {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    type Behavior =
        dyn Fn(usize, &str) -> std::result::Result<SearchResponse, TransportError> + Send + Sync;

    /// Transport answering with a closure of (call index, url).
    pub struct StubTransport {
        name: &'static str,
        calls: AtomicUsize,
        behavior: Box<Behavior>,
    }

    impl StubTransport {
        pub fn new(
            name: &'static str,
            behavior: impl Fn(usize, &str) -> std::result::Result<SearchResponse, TransportError>
            + Send
            + Sync
            + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                behavior: Box::new(behavior),
            })
        }

        /// Always fails with the given classification.
        pub fn failing(name: &'static str, kind: TransportErrorKind) -> Arc<Self> {
            Self::new(name, move |_, _| {
                Err(TransportError::failed(name, kind, "stubbed failure"))
            })
        }

        /// Always returns the same page.
        pub fn constant(name: &'static str, ids: &[&str]) -> Arc<Self> {
            let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
            Self::new(name, move |_, _| Ok(response_with_ids(ids.as_slice())))
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn get(&self, url: &str) -> std::result::Result<SearchResponse, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.behavior)(call, url)
        }
    }

    pub fn raw_with_id(id: &str) -> RawRecord {
        let mut raw = RawRecord::new();
        raw.insert("Id".into(), serde_json::Value::String(id.to_string()));
        raw.insert("Price".into(), serde_json::json!(1000.0));
        raw
    }

    pub fn response_with_ids<S: AsRef<str>>(ids: &[S]) -> SearchResponse {
        SearchResponse {
            results: ids.iter().map(|id| raw_with_id(id.as_ref())).collect(),
            count: ids.len() as u64,
        }
    }

    /// Source config with no waiting between attempts.
    pub fn fast_config() -> SourceConfig {
        SourceConfig {
            base_url: "https://search.test/list".into(),
            retry_attempts: 2,
            retry_backoff_ms: 0,
            request_delay_ms: 0,
            ..SourceConfig::default()
        }
    }
}
