//! HTTP access behind a small trait so network stages can be tested offline.

use crate::error::FetchError;
use rand::{Rng, rng};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// Server answers worth another attempt.
const TRANSIENT_STATUSES: &[u16] = &[500, 502, 503, 504];

/// A fetched document.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// URL after following HTTP redirects.
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body is declared as RSS, Atom or generic XML.
    pub fn looks_like_feed(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| {
                let ct = ct.to_ascii_lowercase();
                ct.contains("rss") || ct.contains("atom") || ct.contains("xml")
            })
            .unwrap_or(false)
    }
}

/// Minimal GET-only client used by the registry and fetcher.
pub trait HttpClient {
    /// GET `url`, following redirects. Non-2xx answers are returned, not errors.
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

/// Production client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { inner })
    }
}

impl HttpClient for ReqwestClient {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let resp = self.inner.get(url).send().await?;
        let final_url = resp.url().to_string();
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await?.to_vec();
        debug!(status, bytes = body.len(), %final_url, "GET complete");
        Ok(HttpResponse { final_url, status, content_type, body })
    }
}

/// Retries transport errors and transient 5xx answers of any [`HttpClient`].
///
/// `delay = min(base_delay * 2^(attempt-1), max_delay) + jitter(0..=100ms)`
///
/// After `max_retries` extra attempts the last answer is returned as-is, so a
/// persistent 503 still surfaces to the caller as a status.
#[derive(Debug, Clone)]
pub struct RetryClient<C> {
    inner: C,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<C: HttpClient> RetryClient<C> {
    pub fn new(inner: C, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(5),
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt - 1).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = if self.base_delay.is_zero() { 0 } else { rng().random_range(0..=100) };
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<C: HttpClient> HttpClient for RetryClient<C> {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            let result = self.inner.get(url).await;
            let transient = match &result {
                Ok(resp) => TRANSIENT_STATUSES.contains(&resp.status),
                Err(FetchError::Request(_)) => true,
                Err(_) => false,
            };
            if !transient || attempt >= self.max_retries {
                return result;
            }
            attempt += 1;
            let delay = self.delay_for(attempt);
            match &result {
                Ok(resp) => warn!(%url, attempt, status = resp.status, ?delay, "Transient status; retrying"),
                Err(e) => warn!(%url, attempt, error = %e, ?delay, "Request failed; retrying"),
            }
            sleep(delay).await;
        }
    }
}
