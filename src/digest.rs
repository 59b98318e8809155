//! Digest generation over stored article history.
//!
//! Stored articles from the last N days are grouped by category into a
//! prompt and sent to an OpenAI-compatible chat endpoint. Requests go through
//! [`RetrySummarize`], which retries with exponential backoff and jitter.

use crate::config::Config;
use crate::error::DigestError;
use crate::models::Article;
use crate::store::ArticleStore;
use crate::utils::truncate_for_log;
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Headlines per category included in the prompt.
const PER_CATEGORY: usize = 12;

const SYSTEM_PROMPT: &str = "You are a news editor. Write a concise markdown digest of the \
headlines you are given: one short section per category, a few bullet points each, \
no invented facts.";

/// Something that turns a prompt into a markdown summary.
pub trait Summarize {
    async fn summarize(&self, prompt: &str) -> Result<String, DigestError>;
}

/// Adds exponential backoff with jitter to any [`Summarize`] implementation.
///
/// `delay = min(base_delay * 2^(attempt-1), max_delay) + jitter(0..=250ms)`
pub struct RetrySummarize<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T: Summarize> RetrySummarize<T> {
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn delay_for(&self, attempt: usize) -> StdDuration {
        let shift = (attempt - 1).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = if self.base_delay.is_zero() { 0 } else { rng().random_range(0..=250) };
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetrySummarize<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySummarize")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: Summarize> Summarize for RetrySummarize<T> {
    #[instrument(level = "info", skip_all)]
    async fn summarize(&self, prompt: &str) -> Result<String, DigestError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;
        loop {
            match self.inner.summarize(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            error = %e,
                            "summarize() exhausted retries"
                        );
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(attempt, max = self.max_retries, ?delay, error = %e, "summarize() failed; backing off");
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Generic OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatClient {
    pub fn new(endpoint: &str, model: &str, api_key: Option<String>, timeout: StdDuration) -> Result<Self, DigestError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }
}

impl Summarize for ChatClient {
    #[instrument(level = "info", skip_all, fields(endpoint = %self.endpoint, model = %self.model))]
    async fn summarize(&self, prompt: &str) -> Result<String, DigestError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.3,
        };
        let mut req = self.http.post(format!("{}/chat/completions", self.endpoint)).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let t0 = Instant::now();
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), elapsed_ms = t0.elapsed().as_millis() as u64, "Chat endpoint error");
            return Err(DigestError::Status(status.as_u16()));
        }
        let parsed: ChatResponse = resp.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(DigestError::EmptyResponse)?;
        info!(elapsed_ms = t0.elapsed().as_millis() as u64, chars = content.len(), "Digest response received");
        Ok(content)
    }
}

/// Prompt listing headlines per category, best-known categories first.
pub fn build_prompt(articles: &[Article], days: i64, config: &Config) -> String {
    let residual = config.classifier.residual_category.as_str();
    let grouped = articles
        .iter()
        .into_group_map_by(|a| a.primary_category().unwrap_or(residual).to_string());
    let order = config
        .categories
        .iter()
        .map(|c| c.key.as_str())
        .chain(std::iter::once(residual))
        .chain(grouped.keys().map(String::as_str).sorted())
        .unique();

    let mut prompt = format!("Headlines from the last {days} day(s), grouped by category.\n");
    for key in order {
        let Some(items) = grouped.get(key) else {
            continue;
        };
        let _ = writeln!(prompt, "\n## {}", config.category_title(key));
        for a in items.iter().take(PER_CATEGORY) {
            let _ = writeln!(prompt, "- {} ({}, {})", a.title, a.outlet, a.published_at.format("%Y-%m-%d"));
            if !a.summary_text.is_empty() {
                let _ = writeln!(prompt, "  {}", truncate_for_log(&a.summary_text, 200));
            }
        }
    }
    prompt
}

/// Markdown digest for the last `days` days, `None` when nothing is stored.
#[instrument(level = "info", skip_all, fields(days))]
pub async fn generate_digest<S: ArticleStore, M: Summarize>(
    store: &S,
    summarizer: &M,
    days: i64,
    now: DateTime<Utc>,
    config: &Config,
) -> Result<Option<String>, DigestError> {
    let articles = store.since(now - Duration::days(days)).await?;
    if articles.is_empty() {
        warn!("No stored articles for digest");
        return Ok(None);
    }
    let prompt = build_prompt(&articles, days, config);
    let body = summarizer.summarize(&prompt).await?;

    let mut md = format!("# News digest: last {days} day(s)\n\n_Generated {}_\n\n", now.format("%Y-%m-%d %H:%M UTC"));
    md.push_str(body.trim());
    md.push_str("\n\n## Sources\n\n");
    for a in articles.iter().take(50) {
        let _ = writeln!(md, "- [{}]({}) ({})", a.title, a.canonical_url, a.outlet);
    }
    info!(articles = articles.len(), "Digest generated");
    Ok(Some(md))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryTag, fixtures::article};
    use crate::store::JsonlStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Summarize for Flaky {
        async fn summarize(&self, prompt: &str) -> Result<String, DigestError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(DigestError::Status(503))
            } else {
                Ok(format!("summary of {} chars", prompt.len()))
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let retry = RetrySummarize::new(
            Flaky {
                failures: 2,
                calls: AtomicUsize::new(0),
            },
            3,
            StdDuration::ZERO,
        );
        assert!(retry.summarize("p").await.is_ok());
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let retry = RetrySummarize::new(
            Flaky {
                failures: 10,
                calls: AtomicUsize::new(0),
            },
            2,
            StdDuration::ZERO,
        );
        assert!(matches!(retry.summarize("p").await, Err(DigestError::Status(503))));
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetrySummarize::new(
            Flaky {
                failures: 0,
                calls: AtomicUsize::new(0),
            },
            5,
            StdDuration::from_secs(1),
        );
        assert!(retry.delay_for(1) >= StdDuration::from_secs(1));
        assert!(retry.delay_for(3) >= StdDuration::from_secs(4));
        assert!(retry.delay_for(10) <= StdDuration::from_millis(30_250));
    }

    #[test]
    fn test_prompt_groups_by_category_title() {
        let config = Config::default();
        let mut a = article("a", "x.example", "Fed holds rates", now());
        a.categories = vec![CategoryTag {
            key: "finance_markets".into(),
            confidence: 0.5,
        }];
        let b = article("b", "y.example", "Local fair opens", now());
        let prompt = build_prompt(&[a, b], 7, &config);
        assert!(prompt.contains("last 7 day(s)"));
        let finance = prompt.find("## Finance & Markets").unwrap();
        let general = prompt.find("## General").unwrap();
        assert!(finance < general);
        assert!(prompt.contains("- Fed holds rates (x.example, 2025-03-10)"));
    }

    #[tokio::test]
    async fn test_generate_digest_from_store() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("articles.jsonl"));
        let summarizer = Flaky {
            failures: 0,
            calls: AtomicUsize::new(0),
        };

        assert_eq!(generate_digest(&store, &summarizer, 7, now(), &config).await.unwrap(), None);

        store.insert(&[article("a", "x.example", "Chip news", now())], now()).await.unwrap();
        let md = generate_digest(&store, &summarizer, 7, now(), &config).await.unwrap().unwrap();
        assert!(md.starts_with("# News digest: last 7 day(s)"));
        assert!(md.contains("- [Chip news](https://x.example/a) (x.example)"));
    }
}
