//! Source Registry: turns the source list into concrete feed endpoints.
//!
//! A source line is either a feed URL, kept as-is, or a site URL that is
//! resolved through the reddit rule, the known-feeds table, or HTML
//! auto-discovery (`<link rel="alternate" type="application/rss+xml">`).
//! Sources that yield nothing are reported as skipped, never as errors.

use crate::config::Config;
use crate::error::ConfigError;
use crate::http::HttpClient;
use crate::models::{FeedEndpoint, SkippedSource, Source};
use crate::utils::{domain_key, normalize_url, truncate_for_log};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, instrument, warn};
use url::Url;

static FEED_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\.(xml|rss|atom)/?$|/(feeds?|rss|atom)(/|$|\.))").unwrap());

static REDDIT_SUB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)reddit\.com/r/([A-Za-z0-9_]+)").unwrap());

static ALTERNATE_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel~="alternate"][href]"#).unwrap());

/// Parse the line-oriented source list.
///
/// `#` lines and blank lines are ignored. A line may carry a category hint
/// after the URL. Repeated URLs keep their first occurrence.
pub fn parse_source_list(text: &str, config: &Config) -> Vec<Source> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(url) = parts.next() else { continue };
        let declared_category = parts.next().map(str::to_lowercase);
        let url = url.to_string();
        if !seen.insert(normalize_url(&url)) {
            debug!(%url, "Duplicate source ignored");
            continue;
        }
        let reputation_tier = config.sources.tier_for(&domain_key(&url));
        sources.push(Source { url, declared_category, reputation_tier });
    }
    sources
}

/// Read and parse a source list file.
pub fn load_source_file(path: &Path, config: &Config) -> Result<Vec<Source>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let sources = parse_source_list(&text, config);
    info!(count = sources.len(), path = %path.display(), "Loaded source list");
    Ok(sources)
}

/// URL already points at a feed document.
pub fn looks_like_feed_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(u) => FEED_PATH.is_match(u.path()),
        Err(_) => FEED_PATH.is_match(url),
    }
}

/// Google News search feed restricted to one site and the lookback window.
pub fn google_news_feed(domain: &str, days: i64) -> String {
    let query = format!("site:{domain} when:{}d", days.max(1));
    format!(
        "https://news.google.com/rss/search?q={}&hl=en-US&gl=US&ceid=US:en",
        urlencoding::encode(&query)
    )
}

/// Endpoints resolved from a source list plus the sources that yielded none.
#[derive(Debug, Default)]
pub struct Resolution {
    pub endpoints: Vec<FeedEndpoint>,
    pub skipped: Vec<SkippedSource>,
}

/// Resolves sources into feed endpoints using an [`HttpClient`] for discovery.
pub struct Registry<'a, C> {
    client: &'a C,
    config: &'a Config,
}

impl<'a, C: HttpClient> Registry<'a, C> {
    pub fn new(client: &'a C, config: &'a Config) -> Self {
        Self { client, config }
    }

    /// Resolve every source. Output order follows the source list.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn load(&self, sources: &[Source], lookback_days: i64) -> Resolution {
        let workers = self.config.pipeline.workers.max(1);
        let mut resolved: Vec<(usize, Result<Vec<String>, String>)> =
            stream::iter(sources.iter().enumerate())
                .map(|(idx, source)| async move { (idx, self.resolve(source).await) })
                .buffer_unordered(workers)
                .collect()
                .await;
        resolved.sort_by_key(|(idx, _)| *idx);

        let cap = self.config.pipeline.max_feeds_per_domain.max(1);
        let mut per_domain: HashMap<String, usize> = HashMap::new();
        let mut seen = HashSet::new();
        let mut fallback_domains = HashSet::new();
        let mut out = Resolution::default();

        for (idx, result) in resolved {
            let source = &sources[idx];
            let domain = domain_key(&source.url);
            let mut direct_failure = None;
            let mut feeds = match result {
                Ok(feeds) => feeds,
                Err(reason) => {
                    if !self.config.pipeline.google_news_fallback {
                        warn!(url = %source.url, %reason, "Skipping source");
                        out.skipped.push(SkippedSource { url: source.url.clone(), reason });
                        continue;
                    }
                    debug!(url = %source.url, %reason, "No direct feed; relying on aggregator fallback");
                    direct_failure = Some(reason);
                    Vec::new()
                }
            };
            if self.config.pipeline.google_news_fallback && fallback_domains.insert(domain.clone()) {
                feeds.push(google_news_feed(&domain, lookback_days));
            }

            let (mut emitted, mut capped) = (0usize, 0usize);
            for feed in feeds {
                let canonical_url = normalize_url(&feed);
                if !seen.insert(canonical_url.clone()) {
                    continue;
                }
                let count = per_domain.entry(domain.clone()).or_default();
                if *count >= cap && !canonical_url.starts_with("https://news.google.com/") {
                    debug!(%domain, url = %canonical_url, "Per-domain feed cap reached");
                    capped += 1;
                    continue;
                }
                *count += 1;
                emitted += 1;
                out.endpoints.push(FeedEndpoint { canonical_url, parent_source: source.clone() });
            }
            if emitted == 0 {
                let reason = match direct_failure {
                    Some(reason) => reason,
                    None if capped > 0 => "per-domain feed cap".to_string(),
                    None => "feeds already listed".to_string(),
                };
                warn!(url = %source.url, %reason, "Skipping source");
                out.skipped.push(SkippedSource { url: source.url.clone(), reason });
            }
        }

        info!(
            endpoints = out.endpoints.len(),
            skipped = out.skipped.len(),
            "Resolved feed endpoints"
        );
        out
    }

    /// Feed URLs for one source, or the reason it yielded none.
    async fn resolve(&self, source: &Source) -> Result<Vec<String>, String> {
        let url = source.url.trim();
        if looks_like_feed_url(url) {
            return Ok(vec![url.to_string()]);
        }
        if let Some(caps) = REDDIT_SUB.captures(url) {
            return Ok(vec![format!("https://www.reddit.com/r/{}/.rss", &caps[1])]);
        }
        let known = self.config.sources.known_feeds_for(&domain_key(url));
        if !known.is_empty() {
            return Ok(known.to_vec());
        }
        self.discover(url).await
    }

    /// Fetch the site page and read its alternate feed links.
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn discover(&self, url: &str) -> Result<Vec<String>, String> {
        let resp = self.client.get(url).await.map_err(|e| e.to_string())?;
        if !resp.is_success() {
            return Err(format!("HTTP status {}", resp.status));
        }
        if resp.looks_like_feed() {
            return Ok(vec![resp.final_url.clone()]);
        }
        let base = Url::parse(&resp.final_url)
            .or_else(|_| Url::parse(url))
            .map_err(|e| format!("invalid URL: {e}"))?;
        let feeds = discover_feed_links(&resp.text(), &base, self.config.pipeline.max_feeds_per_domain);
        if feeds.is_empty() {
            return Err("no feed discovered".to_string());
        }
        debug!(count = feeds.len(), first = %truncate_for_log(&feeds[0], 120), "Discovered feeds");
        Ok(feeds)
    }
}

/// Absolute RSS/Atom URLs advertised by an HTML page, at most `max`.
pub fn discover_feed_links(html: &str, base: &Url, max: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut found = Vec::new();
    for link in document.select(&ALTERNATE_LINK) {
        let typ = link.value().attr("type").unwrap_or_default().to_ascii_lowercase();
        if !(typ.contains("rss") || typ.contains("atom")) {
            continue;
        }
        let Some(href) = link.value().attr("href") else { continue };
        if let Ok(abs) = base.join(href) {
            let abs = abs.to_string();
            if !found.contains(&abs) {
                found.push(abs);
            }
        }
        if found.len() >= max {
            break;
        }
    }
    found
}
