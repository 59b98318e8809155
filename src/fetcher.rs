//! Fetcher: concurrent feed retrieval, aggregator-link resolution and
//! Open-Graph image enrichment.
//!
//! All network work goes through a bounded `buffer_unordered` pool. The two
//! URL caches in [`RunCaches`] are shared by every worker for the lifetime of
//! one run. Failures are isolated per feed, entry or page.

use crate::cache::RunCaches;
use crate::config::PipelineConfig;
use crate::error::FetchError;
use crate::http::HttpClient;
use crate::models::{Article, FeedEndpoint, FeedFailure, RawEntry};
use crate::utils::{domain_key, normalize_url, truncate_for_log};
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

const AGGREGATOR_HOSTS: &[&str] = &["news.google.com"];

static META_REFRESH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+http-equiv\s*=\s*["']?refresh["']?[^>]+content\s*=\s*["'][^"']*url\s*=\s*([^"'>\s]+)"#)
        .unwrap()
});

static JS_REDIRECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:window\.)?location(?:\.href)?\s*=\s*["'](https?://[^"']+)["']|data-n-au\s*=\s*["'](https?://[^"']+)["']"#)
        .unwrap()
});

static IMAGE_META: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        r#"meta[property="og:image"]"#,
        r#"meta[name="og:image"]"#,
        r#"meta[name="twitter:image"]"#,
        r#"meta[property="twitter:image"]"#,
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect()
});

/// Host belongs to a news aggregator whose links wrap the publisher URL.
pub fn is_aggregator_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .map(|h| AGGREGATOR_HOSTS.iter().any(|a| h == *a))
        .unwrap_or(false)
}

/// Image URLs worth showing: absolute, not from an aggregator, not a logo.
pub fn acceptable_image(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http") && !lower.contains("logo") && !is_aggregator_url(url)
}

/// Everything the fetch phase produced.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub entries: Vec<RawEntry>,
    pub failures: Vec<FeedFailure>,
    pub feeds_attempted: usize,
    pub feeds_succeeded: usize,
    /// Items seen across all feeds, before the window filter.
    pub entries_seen: usize,
}

/// Concurrent fetcher holding the run's client and caches.
pub struct Fetcher<'a, C> {
    client: &'a C,
    caches: &'a RunCaches,
    config: &'a PipelineConfig,
}

impl<'a, C: HttpClient> Fetcher<'a, C> {
    pub fn new(client: &'a C, caches: &'a RunCaches, config: &'a PipelineConfig) -> Self {
        Self { client, caches, config }
    }

    /// Fetch every endpoint, keeping entries published within `[window_start, now]`.
    #[instrument(level = "info", skip_all, fields(endpoints = endpoints.len(), workers = self.config.workers))]
    pub async fn fetch_all(
        &self,
        endpoints: &[FeedEndpoint],
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> FetchReport {
        let results: Vec<(&FeedEndpoint, Result<(Vec<RawEntry>, usize), FetchError>)> =
            stream::iter(endpoints)
                .map(|endpoint| async move {
                    (endpoint, self.fetch_feed(endpoint, window_start, now).await)
                })
                .buffer_unordered(self.config.workers.max(1))
                .collect()
                .await;

        let mut report = FetchReport { feeds_attempted: endpoints.len(), ..Default::default() };
        for (endpoint, result) in results {
            match result {
                Ok((entries, seen)) => {
                    report.feeds_succeeded += 1;
                    report.entries_seen += seen;
                    report.entries.extend(entries);
                }
                Err(e) => {
                    warn!(url = %endpoint.canonical_url, error = %e, "Feed failed");
                    report.failures.push(FeedFailure {
                        url: endpoint.canonical_url.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            succeeded = report.feeds_succeeded,
            failed = report.failures.len(),
            seen = report.entries_seen,
            kept = report.entries.len(),
            "Fetched feeds"
        );
        report
    }

    #[instrument(level = "debug", skip_all, fields(url = %endpoint.canonical_url))]
    async fn fetch_feed(
        &self,
        endpoint: &FeedEndpoint,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(Vec<RawEntry>, usize), FetchError> {
        let resp = self.client.get(&endpoint.canonical_url).await?;
        if !resp.is_success() {
            return Err(FetchError::Status { status: resp.status, url: endpoint.canonical_url.clone() });
        }
        let feed = feed_rs::parser::parse(&resp.body[..]).map_err(|e| FetchError::Parse(e.to_string()))?;

        let feed_title = feed.title.map(|t| t.content.trim().to_string()).unwrap_or_default();
        let from_aggregator = is_aggregator_url(&endpoint.canonical_url);
        let outlet = if feed_title.is_empty() || from_aggregator {
            None
        } else {
            Some(feed_title)
        };

        let seen = feed.entries.len().min(self.config.max_entries_per_feed);
        let mut entries = Vec::new();
        for entry in feed.entries.into_iter().take(self.config.max_entries_per_feed) {
            let Some(link) = entry_link(&entry) else {
                debug!(id = %truncate_for_log(&entry.id, 80), "Entry without link dropped");
                continue;
            };
            let published_at = entry.published.or(entry.updated);
            if let Some(ts) = published_at {
                if ts < window_start || ts > now {
                    continue;
                }
            }

            let link = normalize_url(&link);
            let link = if is_aggregator_url(&link) {
                match self.resolve_link(&link).await {
                    Some(resolved) => resolved,
                    None => {
                        debug!(url = %truncate_for_log(&link, 120), "Unresolved aggregator link dropped");
                        continue;
                    }
                }
            } else {
                link
            };

            let outlet = outlet.clone().unwrap_or_else(|| domain_key(&link));
            entries.push(RawEntry {
                title: entry.title.as_ref().map(|t| t.content.clone()).unwrap_or_default(),
                summary_html: entry_summary(&entry),
                image_url: entry_image(&entry),
                published_at,
                link,
                outlet,
                source: endpoint.parent_source.clone(),
            });
        }
        debug!(kept = entries.len(), seen, "Parsed feed");
        Ok((entries, seen))
    }

    /// Resolve an aggregator link to the publisher URL, once per run.
    ///
    /// Follows HTTP redirects first, then meta-refresh and script redirects
    /// in the returned page. `None` when no publisher URL could be found.
    #[instrument(level = "debug", skip_all, fields(url = %truncate_for_log(url, 120)))]
    pub async fn resolve_link(&self, url: &str) -> Option<String> {
        if !is_aggregator_url(url) {
            return Some(url.to_string());
        }
        if let Some(cached) = self.caches.redirects.get(url) {
            return cached;
        }
        let resolved = match self.client.get(url).await {
            Ok(resp) if resp.is_success() || (300..400).contains(&resp.status) => {
                if !is_aggregator_url(&resp.final_url) {
                    Some(normalize_url(&resp.final_url))
                } else {
                    redirect_target(&resp.text()).map(|u| normalize_url(&u))
                }
            }
            Ok(resp) => {
                debug!(status = resp.status, "Aggregator link answered with error status");
                None
            }
            Err(e) => {
                debug!(error = %e, "Aggregator link resolution failed");
                None
            }
        };
        self.caches.redirects.insert(url, resolved.clone());
        resolved
    }

    /// Fill missing images on up to `image_enrich_limit` articles from page
    /// metadata. Returns the number of images found.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub async fn enrich_images(&self, articles: &mut [Article]) -> usize {
        let targets: Vec<(usize, String)> = articles
            .iter()
            .enumerate()
            .filter(|(_, a)| a.image_url.is_none())
            .take(self.config.image_enrich_limit)
            .map(|(idx, a)| (idx, a.canonical_url.clone()))
            .collect();

        let found: Vec<(usize, Option<String>)> = stream::iter(targets)
            .map(|(idx, url)| async move { (idx, self.lookup_image(&url).await) })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut enriched = 0;
        for (idx, image) in found {
            if let Some(image) = image {
                articles[idx].image_url = Some(image);
                enriched += 1;
            }
        }
        info!(enriched, "Image enrichment complete");
        enriched
    }

    async fn lookup_image(&self, url: &str) -> Option<String> {
        if let Some(cached) = self.caches.images.get(url) {
            return cached;
        }
        let image = match self.client.get(url).await {
            Ok(resp) if resp.is_success() => page_image(&resp.text()),
            Ok(resp) => {
                debug!(%url, status = resp.status, "Image lookup got error status");
                None
            }
            Err(e) => {
                error!(%url, error = %e, "Image lookup failed");
                None
            }
        };
        self.caches.images.insert(url, image.clone());
        image
    }
}

/// First Open-Graph or Twitter-card image in a page.
pub fn page_image(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    IMAGE_META.iter().find_map(|selector| {
        document
            .select(selector)
            .filter_map(|m| m.value().attr("content"))
            .map(str::trim)
            .find(|c| acceptable_image(c))
            .map(str::to_string)
    })
}

/// Publisher URL named by a meta-refresh or script redirect.
fn redirect_target(html: &str) -> Option<String> {
    if let Some(caps) = META_REFRESH.captures(html) {
        let target = caps[1].to_string();
        if !is_aggregator_url(&target) {
            return Some(target);
        }
    }
    JS_REDIRECT
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string()))
        .find(|u| !is_aggregator_url(u))
}

fn entry_link(entry: &Entry) -> Option<String> {
    entry
        .links
        .iter()
        .find(|l| {
            !l.href.trim().is_empty()
                && l.rel.as_deref().is_none_or(|r| r.eq_ignore_ascii_case("alternate"))
        })
        .or_else(|| entry.links.iter().find(|l| !l.href.trim().is_empty()))
        .map(|l| l.href.trim().to_string())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))
}

fn entry_summary(entry: &Entry) -> String {
    entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .filter(|s| !s.trim().is_empty())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default()
}

fn entry_image(entry: &Entry) -> Option<String> {
    let from_content = entry.media.iter().flat_map(|m| &m.content).find_map(|c| {
        let is_image = c
            .content_type
            .as_ref()
            .map(|m| m.ty().as_str() == "image")
            .unwrap_or(true);
        c.url.as_ref().map(|u| u.to_string()).filter(|u| is_image && acceptable_image(u))
    });
    from_content
        .or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|m| &m.thumbnails)
                .map(|t| t.image.uri.clone())
                .find(|u| acceptable_image(u))
        })
        .or_else(|| {
            entry
                .links
                .iter()
                .filter(|l| l.rel.as_deref() == Some("enclosure"))
                .filter(|l| l.media_type.as_deref().is_some_and(|m| m.starts_with("image/")))
                .map(|l| l.href.clone())
                .find(|u| acceptable_image(u))
        })
}
