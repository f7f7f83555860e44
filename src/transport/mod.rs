//! Resilient HTTP transport.
//!
//! One transport per session: its cookie store persists across calls made
//! through the same instance and is never shared across instances. Handles
//! redirects, per-request timeouts, retry with exponential backoff on
//! transient failures, environment-driven proxy routing, and optional
//! IPv4-only resolution.

pub mod cookies;
pub mod proxy;
pub mod resolver;

use crate::config::PortalConfig;
use crate::error::{EngineError, EngineResult};
use cookies::MemoryCookieStore;
use resolver::Ipv4OnlyResolver;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const ACCEPT: &str =
    "text/javascript,text/plain,application/javascript,application/x-javascript,*/*;q=0.8";

/// Retry budget: 3 attempts total, backoff 500ms·2ⁿ between them.
const MAX_ATTEMPTS: u32 = 3;

/// Response from a transport request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Final URL after redirects.
    pub final_url: String,
    /// Content-Type header, if present.
    pub content_type: Option<String>,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is in the retryable set (408, 429, 5xx).
    fn is_transient(&self) -> bool {
        self.status == 408 || self.status == 429 || self.status >= 500
    }
}

/// HTTP client with a persistent cookie store and transparent retries.
pub struct Transport {
    client: reqwest::Client,
    cookies: Arc<MemoryCookieStore>,
    request_timeout: Duration,
}

impl Transport {
    /// Build a transport for the configured portal.
    pub fn new(config: &PortalConfig) -> EngineResult<Self> {
        let cookies = Arc::new(MemoryCookieStore::new());

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, ACCEPT.parse().unwrap());
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7".parse().unwrap(),
        );

        let mut builder = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&cookies))
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers);

        match proxy::proxy_for_host(&config.host()) {
            Some(proxy_url) => {
                debug!(proxy = %proxy_url, "routing portal traffic through proxy");
                let proxy = reqwest::Proxy::all(&proxy_url)
                    .map_err(|e| EngineError::Network(format!("invalid proxy URL: {e}")))?;
                builder = builder.proxy(proxy);
            }
            None => {
                builder = builder.no_proxy();
            }
        }

        if config.force_ipv4 {
            builder = builder.dns_resolver(Arc::new(Ipv4OnlyResolver));
        }

        let client = builder
            .build()
            .map_err(|e| EngineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            cookies,
            request_timeout: config.request_timeout,
        })
    }

    /// The cookie store owned by this transport.
    pub fn cookies(&self) -> &MemoryCookieStore {
        &self.cookies
    }

    /// GET with optional extra headers and per-request timeout override.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> EngineResult<HttpResponse> {
        self.request(reqwest::Method::GET, url, None, headers, timeout)
            .await
    }

    /// POST a text body with optional extra headers and timeout override.
    pub async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> EngineResult<HttpResponse> {
        self.request(reqwest::Method::POST, url, Some(body), headers, timeout)
            .await
    }

    /// Issue a request, retrying transient failures.
    ///
    /// Retries apply uniformly to GET and POST: every POST against this
    /// portal is a read-oriented lookup or search, never a mutation.
    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<String>,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> EngineResult<HttpResponse> {
        let timeout = timeout.unwrap_or(self.request_timeout);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let mut builder = self
                .client
                .request(method.clone(), url)
                .timeout(timeout);
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }
            if let Some(body) = &body {
                builder = builder.body(body.clone());
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let final_url = resp.url().to_string();
                    let content_type = resp
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    let body = resp.text().await.unwrap_or_default();
                    let response = HttpResponse {
                        status,
                        final_url,
                        content_type,
                        body,
                    };

                    if response.is_transient() && attempt < MAX_ATTEMPTS {
                        debug!(status, attempt, url, "transient status, retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt < MAX_ATTEMPTS {
                        debug!(error = %e, attempt, url, "network failure, retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(EngineError::Network(format!(
                        "request to {url} failed after {attempt} attempts: {e}"
                    )));
                }
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(attempt - 1))
}
